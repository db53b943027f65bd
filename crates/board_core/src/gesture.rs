//! Drag gesture interpretation for the pipeline board.
//!
//! Translates a continuous pointer or keyboard gesture into exactly one
//! discrete outcome: either "deal X released over stage Y" or a
//! cancellation. Interpretation is synchronous and touches no I/O; the view
//! layer feeds raw events in and registers the droppable layout.

use shared::domain::{DealId, StageId};

use crate::model::BoardModel;

/// Movement in pixels before a press turns into a drag. Anything below is a
/// click and must never move a deal.
pub const DRAG_THRESHOLD_PX: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn distance_to(&self, other: Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn center(&self) -> Point {
        Point {
            x: self.x + self.width / 2.0,
            y: self.y + self.height / 2.0,
        }
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x
            && point.x <= self.x + self.width
            && point.y >= self.y
            && point.y <= self.y + self.height
    }
}

/// A droppable region published by the view: either a whole stage column or
/// a single deal card.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DropTargetKind {
    Column(StageId),
    Card(DealId),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DropRegion {
    pub target: DropTargetKind,
    pub rect: Rect,
}

/// The single semantic outcome of a finished gesture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GestureOutcome {
    Drop {
        deal_id: DealId,
        target_stage_id: StageId,
    },
    Cancelled,
}

/// Keyboard drag movement, one stage column at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStep {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum GestureState {
    Idle,
    /// Pressed on a card, displacement still below the threshold.
    Pending {
        deal_id: DealId,
        origin: Point,
        card_center: Point,
    },
    Dragging {
        deal_id: DealId,
        origin: Point,
        card_center: Point,
        current: Point,
    },
    /// Keyboard grab; the candidate target walks the stage order.
    KeyboardDrag {
        deal_id: DealId,
        candidate: StageId,
    },
}

#[derive(Debug)]
pub struct DragGestureInterpreter {
    regions: Vec<DropRegion>,
    state: GestureState,
}

impl Default for DragGestureInterpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl DragGestureInterpreter {
    pub fn new() -> Self {
        Self {
            regions: Vec::new(),
            state: GestureState::Idle,
        }
    }

    /// Replaces the droppable layout. The view calls this whenever columns
    /// or cards are laid out anew.
    pub fn set_regions(&mut self, regions: Vec<DropRegion>) {
        self.regions = regions;
    }

    pub fn is_dragging(&self) -> bool {
        matches!(
            self.state,
            GestureState::Dragging { .. } | GestureState::KeyboardDrag { .. }
        )
    }

    /// Records a primary-button press on a card. Nothing is dragged yet.
    pub fn pointer_down(&mut self, deal_id: DealId, point: Point, card_rect: Rect) {
        self.state = GestureState::Pending {
            deal_id,
            origin: point,
            card_center: card_rect.center(),
        };
    }

    /// Arms the drag once the pointer has moved far enough from its press
    /// point; afterwards tracks the pointer.
    pub fn pointer_move(&mut self, point: Point) {
        match self.state {
            GestureState::Pending {
                deal_id,
                origin,
                card_center,
            } if origin.distance_to(point) >= DRAG_THRESHOLD_PX => {
                self.state = GestureState::Dragging {
                    deal_id,
                    origin,
                    card_center,
                    current: point,
                };
            }
            GestureState::Dragging {
                deal_id,
                origin,
                card_center,
                ..
            } => {
                self.state = GestureState::Dragging {
                    deal_id,
                    origin,
                    card_center,
                    current: point,
                };
            }
            _ => {}
        }
    }

    /// Finishes a pointer gesture. A press that never armed stays a click;
    /// an armed drag resolves against the registered regions.
    pub fn pointer_up(&mut self, model: &BoardModel, point: Point) -> GestureOutcome {
        let state = std::mem::replace(&mut self.state, GestureState::Idle);
        let GestureState::Dragging {
            deal_id,
            origin,
            card_center,
            ..
        } = state
        else {
            return GestureOutcome::Cancelled;
        };

        if model.stage_of(deal_id).is_none() {
            return GestureOutcome::Cancelled;
        }

        let dragged_center = Point {
            x: card_center.x + (point.x - origin.x),
            y: card_center.y + (point.y - origin.y),
        };
        match self.resolve_target(model, deal_id, dragged_center) {
            Some(target_stage_id) => GestureOutcome::Drop {
                deal_id,
                target_stage_id,
            },
            None => GestureOutcome::Cancelled,
        }
    }

    /// Aborts whatever gesture is in flight (Escape, window blur).
    pub fn cancel(&mut self) -> GestureOutcome {
        self.state = GestureState::Idle;
        GestureOutcome::Cancelled
    }

    /// The stage the drag would currently land on, for drop highlighting.
    pub fn current_target(&self, model: &BoardModel) -> Option<StageId> {
        match self.state {
            GestureState::Dragging {
                deal_id,
                origin,
                card_center,
                current,
            } => {
                let dragged_center = Point {
                    x: card_center.x + (current.x - origin.x),
                    y: card_center.y + (current.y - origin.y),
                };
                self.resolve_target(model, deal_id, dragged_center)
            }
            GestureState::KeyboardDrag { candidate, .. } => Some(candidate),
            _ => None,
        }
    }

    /// Starts the accessibility-equivalent keyboard drag. Returns false if
    /// the deal is not on the supplied board.
    pub fn key_grab(&mut self, model: &BoardModel, deal_id: DealId) -> bool {
        match model.stage_of(deal_id) {
            Some(stage_id) => {
                self.state = GestureState::KeyboardDrag {
                    deal_id,
                    candidate: stage_id,
                };
                true
            }
            None => {
                self.state = GestureState::Idle;
                false
            }
        }
    }

    /// Moves the keyboard candidate one column left or right, clamped at
    /// the pipeline's ends.
    pub fn key_step(&mut self, model: &BoardModel, step: KeyStep) {
        let GestureState::KeyboardDrag { deal_id, candidate } = self.state else {
            return;
        };
        let Some(index) = stage_order(model, candidate) else {
            return;
        };
        let next_index = match step {
            KeyStep::Left => index.saturating_sub(1),
            KeyStep::Right => (index + 1).min(model.stages.len().saturating_sub(1)),
        };
        if let Some(column) = model.stages.get(next_index) {
            self.state = GestureState::KeyboardDrag {
                deal_id,
                candidate: column.stage.stage_id,
            };
        }
    }

    /// Finishes a keyboard drag with the same outcome shape as a pointer
    /// release.
    pub fn key_drop(&mut self) -> GestureOutcome {
        let state = std::mem::replace(&mut self.state, GestureState::Idle);
        match state {
            GestureState::KeyboardDrag { deal_id, candidate } => GestureOutcome::Drop {
                deal_id,
                target_stage_id: candidate,
            },
            _ => GestureOutcome::Cancelled,
        }
    }

    /// Collision detection: among the regions containing the dragged card's
    /// center, the one whose own center is nearest wins. Card regions
    /// resolve to the card's parent stage. Exact distance ties prefer the
    /// stage earliest in column order.
    fn resolve_target(
        &self,
        model: &BoardModel,
        dragged: DealId,
        center: Point,
    ) -> Option<StageId> {
        let mut best: Option<(f64, usize, StageId)> = None;
        for region in &self.regions {
            if region.target == DropTargetKind::Card(dragged) {
                continue;
            }
            if !region.rect.contains(center) {
                continue;
            }
            let stage_id = match region.target {
                DropTargetKind::Column(stage_id) => stage_id,
                DropTargetKind::Card(deal_id) => match model.stage_of(deal_id) {
                    Some(stage_id) => stage_id,
                    None => continue,
                },
            };
            let Some(order) = stage_order(model, stage_id) else {
                continue;
            };
            let distance = center.distance_to(region.rect.center());
            let closer = match best {
                None => true,
                Some((best_distance, best_order, _)) => {
                    distance < best_distance || (distance == best_distance && order < best_order)
                }
            };
            if closer {
                best = Some((distance, order, stage_id));
            }
        }
        best.map(|(_, _, stage_id)| stage_id)
    }
}

fn stage_order(model: &BoardModel, stage_id: StageId) -> Option<usize> {
    model
        .stages
        .iter()
        .position(|column| column.stage.stage_id == stage_id)
}

#[cfg(test)]
#[path = "tests/gesture_tests.rs"]
mod tests;
