use shared::{
    domain::{Deal, DealId, PipelineSummary, StageId, StageSummary},
    protocol::BoardPayload,
};
use thiserror::Error;

/// One stage column and the deals it currently holds, in display order.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardStage {
    pub stage: StageSummary,
    pub deals: Vec<Deal>,
}

/// Immutable snapshot of one pipeline's board. Every transform returns a
/// fresh model; callers replace their reference, which keeps before/after
/// comparison for optimistic rollback trivial.
///
/// Invariant: each deal id appears in exactly one stage list, and its
/// `stage_id` matches the containing stage.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardModel {
    pub pipeline: PipelineSummary,
    pub stages: Vec<BoardStage>,
}

/// Derived per-stage header figures. Never stored, always recomputed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageStatistics {
    pub stage_id: StageId,
    pub deal_count: usize,
    pub amount_total: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("deal {} is not on the board", .0 .0)]
    UnknownDeal(DealId),
    #[error("stage {} is not part of this pipeline", .0 .0)]
    UnknownStage(StageId),
}

impl BoardModel {
    /// Builds a fresh model from a fetch payload. Stage membership in the
    /// payload is authoritative: stages are ordered by `position` and each
    /// deal's `stage_id` is rewritten from its containing column.
    pub fn from_payload(payload: BoardPayload) -> Self {
        let mut stages: Vec<BoardStage> = payload
            .stages
            .into_iter()
            .map(|stage| BoardStage {
                deals: stage.deals,
                stage: stage.stage,
            })
            .collect();
        stages.sort_by_key(|column| column.stage.position);

        for column in &mut stages {
            let stage_id = column.stage.stage_id;
            for deal in &mut column.deals {
                deal.stage_id = stage_id;
            }
        }

        Self {
            pipeline: payload.pipeline,
            stages,
        }
    }

    pub fn stage(&self, stage_id: StageId) -> Option<&BoardStage> {
        self.stages
            .iter()
            .find(|column| column.stage.stage_id == stage_id)
    }

    pub fn contains_stage(&self, stage_id: StageId) -> bool {
        self.stage(stage_id).is_some()
    }

    /// The stage currently holding `deal_id`, if the deal is on the board.
    pub fn stage_of(&self, deal_id: DealId) -> Option<StageId> {
        self.stages.iter().find_map(|column| {
            column
                .deals
                .iter()
                .any(|deal| deal.deal_id == deal_id)
                .then_some(column.stage.stage_id)
        })
    }

    pub fn deal(&self, deal_id: DealId) -> Option<&Deal> {
        self.stages
            .iter()
            .flat_map(|column| column.deals.iter())
            .find(|deal| deal.deal_id == deal_id)
    }

    /// Pure stage transition. Removes the deal from its source column and
    /// appends it to the end of the target column. Moving a deal onto its
    /// current stage returns an identical model.
    pub fn move_deal(
        &self,
        deal_id: DealId,
        target_stage_id: StageId,
    ) -> Result<BoardModel, ModelError> {
        let source_stage_id = self
            .stage_of(deal_id)
            .ok_or(ModelError::UnknownDeal(deal_id))?;
        if !self.contains_stage(target_stage_id) {
            return Err(ModelError::UnknownStage(target_stage_id));
        }
        if source_stage_id == target_stage_id {
            return Ok(self.clone());
        }

        let mut next = self.clone();
        let mut moved = None;
        for column in &mut next.stages {
            if column.stage.stage_id == source_stage_id {
                if let Some(index) = column.deals.iter().position(|deal| deal.deal_id == deal_id) {
                    moved = Some(column.deals.remove(index));
                }
            }
        }
        if let Some(mut deal) = moved {
            deal.stage_id = target_stage_id;
            for column in &mut next.stages {
                if column.stage.stage_id == target_stage_id {
                    column.deals.push(deal);
                    break;
                }
            }
        }
        Ok(next)
    }

    /// Folds a canonical record in: the deal lands in its record's stage,
    /// replacing any previous occurrence anywhere on the board. A record
    /// naming a stage this board does not have leaves the model unchanged;
    /// the caller decides whether that is worth reporting.
    pub fn upsert_deal(&self, deal: Deal) -> BoardModel {
        if !self.contains_stage(deal.stage_id) {
            return self.clone();
        }

        let mut next = self.remove_deal(deal.deal_id);
        for column in &mut next.stages {
            if column.stage.stage_id == deal.stage_id {
                column.deals.push(deal);
                break;
            }
        }
        next
    }

    pub fn remove_deal(&self, deal_id: DealId) -> BoardModel {
        let mut next = self.clone();
        for column in &mut next.stages {
            column.deals.retain(|deal| deal.deal_id != deal_id);
        }
        next
    }

    pub fn stage_statistics(&self) -> Vec<StageStatistics> {
        self.stages
            .iter()
            .map(|column| StageStatistics {
                stage_id: column.stage.stage_id,
                deal_count: column.deals.len(),
                amount_total: column.deals.iter().map(|deal| deal.amount).sum(),
            })
            .collect()
    }
}

#[cfg(test)]
#[path = "tests/model_tests.rs"]
mod tests;
