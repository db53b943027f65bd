//! Turns a finished drag into a concrete model transform, or refuses it.

use shared::{
    domain::{DealId, StageId},
    protocol::MoveDealRequest,
};
use thiserror::Error;

use crate::model::BoardModel;

/// A drop event named a deal or stage that is no longer on the board
/// (concurrent deletion). The transition is discarded rather than applied
/// against a model it no longer describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("deal {} is no longer on the board", .0 .0)]
    DealNotFound(DealId),
    #[error("stage {} is no longer part of the pipeline", .0 .0)]
    StageNotFound(StageId),
}

/// A validated cross-stage transition plus its minimal persist payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedMove {
    pub deal_id: DealId,
    pub from_stage_id: StageId,
    pub target_stage_id: StageId,
    pub request: MoveDealRequest,
}

/// Decides what a `{deal, released-over-stage}` event means against the
/// visible model. `Ok(None)` is a drop on the deal's current stage: fully
/// discarded, no network call, no repaint.
pub fn plan_move(
    visible: &BoardModel,
    deal_id: DealId,
    target_stage_id: StageId,
) -> Result<Option<PlannedMove>, TransitionError> {
    let from_stage_id = visible
        .stage_of(deal_id)
        .ok_or(TransitionError::DealNotFound(deal_id))?;
    if !visible.contains_stage(target_stage_id) {
        return Err(TransitionError::StageNotFound(target_stage_id));
    }
    if from_stage_id == target_stage_id {
        return Ok(None);
    }
    Ok(Some(PlannedMove {
        deal_id,
        from_stage_id,
        target_stage_id,
        request: MoveDealRequest {
            deal_id,
            stage_id: target_stage_id,
        },
    }))
}

#[cfg(test)]
#[path = "tests/transition_tests.rs"]
mod tests;
