//! Client-side engine for the pipeline deal board.
//!
//! Owns the confirmed board model (last state acknowledged by the server),
//! applies drag transitions optimistically, persists them over the REST
//! boundary, and reconciles each response back into the confirmed model.
//! The view layer only ever receives fresh [`BoardModel`] snapshots and
//! user-facing notifications through the event channel; it never mutates
//! board state itself.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use shared::{
    domain::{Deal, DealId, PipelineId, StageId},
    error::{ApiError, ErrorCode},
    protocol::{BoardPayload, MoveDealRequest, MoveDealResponse},
};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

pub mod config;
pub mod gesture;
pub mod model;
pub mod transition;

pub use config::{load_settings, Settings};
pub use gesture::{
    DragGestureInterpreter, DropRegion, DropTargetKind, GestureOutcome, KeyStep, Point, Rect,
};
pub use model::{BoardModel, BoardStage, ModelError, StageStatistics};
pub use transition::{plan_move, PlannedMove, TransitionError};

const DEFAULT_PERSIST_TIMEOUT: Duration = Duration::from_secs(10);
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Why a stage-move persist did not produce a canonical record.
#[derive(Debug, Error)]
pub enum PersistFailure {
    #[error("server rejected the move: {0}")]
    Rejected(ApiError),
    #[error("stage move request failed: {0}")]
    Transport(String),
    #[error("stage move request timed out after {0:?}")]
    TimedOut(Duration),
}

/// REST boundary consumed by the engine. The backend owns the canonical
/// records; this trait is the whole surface the board needs from it.
#[async_trait]
pub trait DealApi: Send + Sync {
    async fn fetch_board(&self, pipeline_id: PipelineId) -> Result<BoardPayload>;
    async fn move_deal(
        &self,
        request: MoveDealRequest,
    ) -> std::result::Result<MoveDealResponse, PersistFailure>;
}

/// Fallback wiring for a client constructed without a backend.
pub struct MissingDealApi;

#[async_trait]
impl DealApi for MissingDealApi {
    async fn fetch_board(&self, pipeline_id: PipelineId) -> Result<BoardPayload> {
        Err(anyhow!(
            "deal api unavailable; cannot fetch pipeline {}",
            pipeline_id.0
        ))
    }

    async fn move_deal(
        &self,
        request: MoveDealRequest,
    ) -> std::result::Result<MoveDealResponse, PersistFailure> {
        Err(PersistFailure::Transport(format!(
            "deal api unavailable; cannot move deal {}",
            request.deal_id.0
        )))
    }
}

/// `DealApi` over the CRM REST backend.
pub struct HttpDealApi {
    http: Client,
    server_url: String,
}

impl HttpDealApi {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            server_url: server_url.into(),
        }
    }
}

#[async_trait]
impl DealApi for HttpDealApi {
    async fn fetch_board(&self, pipeline_id: PipelineId) -> Result<BoardPayload> {
        let payload: BoardPayload = self
            .http
            .get(format!(
                "{}/pipelines/{}/board",
                self.server_url, pipeline_id.0
            ))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .with_context(|| format!("invalid board payload for pipeline {}", pipeline_id.0))?;
        Ok(payload)
    }

    async fn move_deal(
        &self,
        request: MoveDealRequest,
    ) -> std::result::Result<MoveDealResponse, PersistFailure> {
        let response = self
            .http
            .post(format!("{}/deals/{}/stage", self.server_url, request.deal_id.0))
            .json(&request)
            .send()
            .await
            .map_err(|err| PersistFailure::Transport(err.to_string()))?;

        if response.status().is_client_error() {
            let status = response.status();
            let error = response.json::<ApiError>().await.unwrap_or_else(|_| {
                ApiError::new(
                    ErrorCode::Validation,
                    format!("stage move rejected with status {status}"),
                )
            });
            return Err(PersistFailure::Rejected(error));
        }

        let response = response
            .error_for_status()
            .map_err(|err| PersistFailure::Transport(err.to_string()))?;
        response
            .json::<MoveDealResponse>()
            .await
            .map_err(|err| PersistFailure::Transport(format!("invalid move response: {err}")))
    }
}

/// Everything the view layer can observe. Failures are delivered here as
/// notifications, never as errors the view has to interpret.
#[derive(Debug, Clone)]
pub enum BoardEvent {
    /// The visible model was replaced. Statistics are derived from the
    /// confirmed model for the stage headers.
    BoardUpdated {
        model: BoardModel,
        stats: Vec<StageStatistics>,
    },
    /// Persist succeeded and the canonical record matched the optimistic
    /// guess.
    MoveConfirmed { deal: Deal },
    /// Persist succeeded but the server substituted field values; the
    /// server record won and the user should see why.
    MoveAdjusted { deal: Deal, reason: String },
    /// Persist failed; the optimistic move was reverted.
    MoveFailed { deal_id: DealId, reason: String },
    /// A drop event referenced a deal or stage no longer on the board.
    MoveRejected { reason: String },
}

/// One optimistic transition awaiting its server verdict. The queue head
/// per deal is always the dispatched one.
#[derive(Debug, Clone, Copy)]
struct PendingMove {
    seq: u64,
    deal_id: DealId,
    from_stage_id: StageId,
    target_stage_id: StageId,
}

#[derive(Default)]
struct BoardState {
    confirmed: Option<BoardModel>,
    pending: HashMap<DealId, VecDeque<PendingMove>>,
    /// Bumped on every full model replacement; completions from a previous
    /// board are discarded.
    generation: u64,
    next_seq: u64,
}

impl BoardState {
    /// Confirmed model plus the replay of every pending optimistic move, in
    /// issue order.
    fn visible(&self) -> Option<BoardModel> {
        let confirmed = self.confirmed.as_ref()?;
        let mut moves: Vec<&PendingMove> = self.pending.values().flatten().collect();
        moves.sort_by_key(|pending| pending.seq);

        let mut model = confirmed.clone();
        for pending in moves {
            if let Ok(next) = model.move_deal(pending.deal_id, pending.target_stage_id) {
                model = next;
            }
        }
        Some(model)
    }
}

pub struct BoardClient {
    api: Arc<dyn DealApi>,
    persist_timeout: Duration,
    inner: Mutex<BoardState>,
    events: broadcast::Sender<BoardEvent>,
}

impl BoardClient {
    pub fn new(api: Arc<dyn DealApi>) -> Arc<Self> {
        Self::new_with_timeout(api, DEFAULT_PERSIST_TIMEOUT)
    }

    pub fn new_with_timeout(api: Arc<dyn DealApi>, persist_timeout: Duration) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            api,
            persist_timeout,
            inner: Mutex::new(BoardState::default()),
            events,
        })
    }

    pub fn from_settings(settings: &Settings) -> Arc<Self> {
        Self::new_with_timeout(
            Arc::new(HttpDealApi::new(settings.server_url.clone())),
            Duration::from_secs(settings.persist_timeout_secs),
        )
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<BoardEvent> {
        self.events.subscribe()
    }

    /// Fetches a pipeline and replaces the whole board. Any pending
    /// optimistic state belongs to the previous board and is discarded;
    /// in-flight completions are fenced off by the generation bump.
    pub async fn load_pipeline(&self, pipeline_id: PipelineId) -> Result<BoardModel> {
        let payload = self
            .api
            .fetch_board(pipeline_id)
            .await
            .with_context(|| format!("failed to fetch board for pipeline {}", pipeline_id.0))?;
        let model = BoardModel::from_payload(payload);

        let mut guard = self.inner.lock().await;
        guard.generation += 1;
        guard.pending.clear();
        guard.confirmed = Some(model.clone());
        info!(
            pipeline_id = pipeline_id.0,
            stages = model.stages.len(),
            "board: pipeline loaded"
        );
        self.publish_board(&guard);
        Ok(model)
    }

    /// Full-model refresh of the currently loaded pipeline.
    pub async fn refresh_board(&self) -> Result<BoardModel> {
        let pipeline_id = {
            let guard = self.inner.lock().await;
            guard
                .confirmed
                .as_ref()
                .map(|model| model.pipeline.pipeline_id)
        };
        let pipeline_id = pipeline_id.ok_or_else(|| anyhow!("no pipeline loaded"))?;
        self.load_pipeline(pipeline_id).await
    }

    pub async fn visible_model(&self) -> Option<BoardModel> {
        self.inner.lock().await.visible()
    }

    pub async fn confirmed_model(&self) -> Option<BoardModel> {
        self.inner.lock().await.confirmed.clone()
    }

    /// Per-stage header figures, derived from the confirmed model.
    pub async fn stage_statistics(&self) -> Vec<StageStatistics> {
        self.inner
            .lock()
            .await
            .confirmed
            .as_ref()
            .map(BoardModel::stage_statistics)
            .unwrap_or_default()
    }

    /// True when no optimistic transition is awaiting its server verdict.
    pub async fn is_idle(&self) -> bool {
        self.inner.lock().await.pending.is_empty()
    }

    /// Consumes a finished gesture. Cancelled gestures and same-stage drops
    /// are discarded without a network call; a valid cross-stage drop is
    /// applied optimistically and its persist dispatched, serialized per
    /// deal behind whatever is already in flight.
    pub async fn drop_deal(self: &Arc<Self>, outcome: GestureOutcome) {
        let GestureOutcome::Drop {
            deal_id,
            target_stage_id,
        } = outcome
        else {
            return;
        };

        let mut guard = self.inner.lock().await;
        let Some(visible) = guard.visible() else {
            let _ = self.events.send(BoardEvent::MoveRejected {
                reason: "no pipeline loaded".into(),
            });
            return;
        };

        let planned = match plan_move(&visible, deal_id, target_stage_id) {
            Ok(Some(planned)) => planned,
            Ok(None) => {
                info!(deal_id = deal_id.0, "move: drop on current stage discarded");
                return;
            }
            Err(err) => {
                warn!(deal_id = deal_id.0, error = %err, "move: stale drop event discarded");
                let _ = self.events.send(BoardEvent::MoveRejected {
                    reason: err.to_string(),
                });
                return;
            }
        };

        let seq = guard.next_seq;
        guard.next_seq += 1;
        let generation = guard.generation;
        let queue = guard.pending.entry(deal_id).or_default();
        let dispatch_now = queue.is_empty();
        queue.push_back(PendingMove {
            seq,
            deal_id,
            from_stage_id: planned.from_stage_id,
            target_stage_id,
        });
        info!(
            deal_id = deal_id.0,
            from_stage = planned.from_stage_id.0,
            target_stage = target_stage_id.0,
            queued = !dispatch_now,
            "move: optimistic transition recorded"
        );
        self.publish_board(&guard);
        drop(guard);

        if dispatch_now {
            self.spawn_persist(deal_id, target_stage_id, seq, generation);
        }
    }

    /// Folds an externally created or edited deal into the confirmed model,
    /// the same way a successful reconciliation would.
    pub async fn fold_deal(&self, deal: Deal) {
        let mut guard = self.inner.lock().await;
        let Some(confirmed) = guard.confirmed.as_ref() else {
            return;
        };
        if !confirmed.contains_stage(deal.stage_id) {
            warn!(
                deal_id = deal.deal_id.0,
                stage_id = deal.stage_id.0,
                "board: external deal update names an unknown stage; ignored"
            );
            return;
        }
        guard.confirmed = Some(confirmed.upsert_deal(deal));
        self.publish_board(&guard);
    }

    /// Folds an external deletion in. Pending transitions for the deal are
    /// dropped; a persist already in flight will find its queue gone and be
    /// discarded on completion.
    pub async fn remove_deal(&self, deal_id: DealId) {
        let mut guard = self.inner.lock().await;
        guard.pending.remove(&deal_id);
        let Some(confirmed) = guard.confirmed.as_ref() else {
            return;
        };
        guard.confirmed = Some(confirmed.remove_deal(deal_id));
        info!(deal_id = deal_id.0, "board: external deletion folded in");
        self.publish_board(&guard);
    }

    fn spawn_persist(
        self: &Arc<Self>,
        deal_id: DealId,
        target_stage_id: StageId,
        seq: u64,
        generation: u64,
    ) {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            let request = MoveDealRequest {
                deal_id,
                stage_id: target_stage_id,
            };
            let result =
                match tokio::time::timeout(client.persist_timeout, client.api.move_deal(request))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(PersistFailure::TimedOut(client.persist_timeout)),
                };
            client.reconcile(deal_id, seq, generation, result).await;
        });
    }

    /// Merges a persist completion back into the board. Completions that no
    /// longer match the deal's dispatched queue head, or that belong to a
    /// replaced board, are discarded silently; the newer transition's own
    /// completion governs final state.
    async fn reconcile(
        self: &Arc<Self>,
        deal_id: DealId,
        seq: u64,
        generation: u64,
        result: std::result::Result<MoveDealResponse, PersistFailure>,
    ) {
        let mut guard = self.inner.lock().await;
        if guard.generation != generation {
            info!(deal_id = deal_id.0, seq, "move: completion for a replaced board discarded");
            return;
        }
        let head = guard
            .pending
            .get(&deal_id)
            .and_then(|queue| queue.front())
            .copied();
        let Some(head) = head.filter(|pending| pending.seq == seq) else {
            info!(deal_id = deal_id.0, seq, "move: superseded completion discarded");
            return;
        };

        match result {
            Ok(response) => {
                let canonical = response.deal;
                let optimistic = guard
                    .visible()
                    .as_ref()
                    .and_then(|model| model.deal(deal_id).cloned());

                if let Some(confirmed) = guard.confirmed.as_ref() {
                    if !confirmed.contains_stage(canonical.stage_id) {
                        warn!(
                            deal_id = deal_id.0,
                            stage_id = canonical.stage_id.0,
                            "move: canonical record names a stage outside this board"
                        );
                    }
                    guard.confirmed = Some(confirmed.upsert_deal(canonical.clone()));
                }

                let next = {
                    if let Some(queue) = guard.pending.get_mut(&deal_id) {
                        queue.pop_front();
                        if queue.is_empty() {
                            guard.pending.remove(&deal_id);
                            None
                        } else {
                            queue
                                .front()
                                .map(|pending| (pending.seq, pending.target_stage_id))
                        }
                    } else {
                        None
                    }
                };

                info!(
                    deal_id = deal_id.0,
                    stage_id = canonical.stage_id.0,
                    "move: persist confirmed"
                );
                self.publish_board(&guard);

                match optimistic
                    .as_ref()
                    .and_then(|local| material_difference(local, &canonical))
                {
                    Some(reason) => {
                        let _ = self.events.send(BoardEvent::MoveAdjusted {
                            deal: canonical,
                            reason,
                        });
                    }
                    None => {
                        let _ = self.events.send(BoardEvent::MoveConfirmed { deal: canonical });
                    }
                }

                drop(guard);
                if let Some((next_seq, next_target)) = next {
                    info!(
                        deal_id = deal_id.0,
                        target_stage = next_target.0,
                        "move: dispatching queued transition"
                    );
                    self.spawn_persist(deal_id, next_target, next_seq, generation);
                }
            }
            Err(failure) => {
                // Revert: drop the deal's whole queue. A queued successor
                // started from the failed move's target stage, which no
                // longer exists once the head is rolled back.
                guard.pending.remove(&deal_id);
                warn!(
                    deal_id = deal_id.0,
                    from_stage = head.from_stage_id.0,
                    target_stage = head.target_stage_id.0,
                    error = %failure,
                    "move: persist failed; optimistic move reverted"
                );
                self.publish_board(&guard);
                let _ = self.events.send(BoardEvent::MoveFailed {
                    deal_id,
                    reason: failure.to_string(),
                });
            }
        }
    }

    fn publish_board(&self, state: &BoardState) {
        let Some(model) = state.visible() else {
            return;
        };
        let stats = state
            .confirmed
            .as_ref()
            .map(BoardModel::stage_statistics)
            .unwrap_or_default();
        let _ = self.events.send(BoardEvent::BoardUpdated { model, stats });
    }
}

/// A canonical record "differs materially" from the optimistic guess when
/// the fields a stage move is allowed to touch come back different: the
/// stage itself, or server-clamped amount/probability/status.
fn material_difference(local: &Deal, canonical: &Deal) -> Option<String> {
    if canonical.stage_id != local.stage_id {
        return Some(format!(
            "server placed the deal in stage {} instead of {}",
            canonical.stage_id.0, local.stage_id.0
        ));
    }
    if canonical.amount != local.amount {
        return Some(format!(
            "server adjusted the amount from {} to {}",
            local.amount, canonical.amount
        ));
    }
    if canonical.probability != local.probability {
        return Some(format!(
            "server adjusted the probability from {} to {}",
            local.probability, canonical.probability
        ));
    }
    if canonical.status != local.status {
        return Some(format!(
            "server changed the deal status to {:?}",
            canonical.status
        ));
    }
    None
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
