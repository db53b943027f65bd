use serde::{Deserialize, Serialize};

use crate::domain::{Deal, DealId, PipelineSummary, StageId, StageSummary};

/// One stage column with its deals in display order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagePayload {
    pub stage: StageSummary,
    pub deals: Vec<Deal>,
}

/// Full board for one pipeline, as returned by the pipeline fetch endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardPayload {
    pub pipeline: PipelineSummary,
    pub stages: Vec<StagePayload>,
}

/// Minimal stage-move persist body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveDealRequest {
    pub deal_id: DealId,
    pub stage_id: StageId,
}

/// Successful stage-move response carrying the canonical deal record. The
/// server may have substituted field values; the record wins over any local
/// guess.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveDealResponse {
    pub deal: Deal,
}
