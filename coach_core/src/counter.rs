//! Rep counter state machines.
//!
//! One counter instance per active session converts the stream of
//! classified poses into discrete rep events. Two variants exist:
//!
//! - [`SquatCounter`]: two states (up/down), driven by a single
//!   position + confidence pair. Only full down→up cycles count; there
//!   is no failure path.
//! - [`PushupCounter`]: four states tracking passes through the mid
//!   position. Reaching up through mid without ever hitting down (or the
//!   reverse) is an incomplete rep and counts as a failure with
//!   corrective feedback.
//!
//! Frames below the confidence threshold are inconclusive: state is left
//! unchanged and no event is emitted. Each instance is strictly
//! sequential; it is only ever driven by its session's evaluator thread.

use crate::{ClassifiedPose, ExerciseKind, Position};

/// Default confidence threshold for accepting a classified position
pub const DEFAULT_THRESHOLD: f32 = 0.7;

/// Outcome of one evaluated repetition attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RepOutcome {
    Success,
    Failure,
}

/// A detected rep event with user-facing feedback text
#[derive(Clone, Debug, PartialEq)]
pub struct RepEvent {
    pub outcome: RepOutcome,
    pub feedback: String,
}

impl RepEvent {
    fn success() -> Self {
        Self {
            outcome: RepOutcome::Success,
            feedback: "성공!".into(),
        }
    }

    fn failure(feedback: &str) -> Self {
        Self {
            outcome: RepOutcome::Failure,
            feedback: feedback.into(),
        }
    }
}

/// Capability shared by all rep counter variants: consume one classified
/// pose, produce zero or one rep event.
pub trait RepCounter: Send {
    fn feed(&mut self, pose: &ClassifiedPose) -> Option<RepEvent>;
    fn success_count(&self) -> u32;
    fn failure_count(&self) -> u32;
    fn reset(&mut self);
}

/// Build the counter matching an exercise kind
pub fn counter_for(kind: ExerciseKind, threshold: f32) -> Box<dyn RepCounter> {
    match kind {
        ExerciseKind::Squat => Box::new(SquatCounter::new(threshold)),
        ExerciseKind::Pushup => Box::new(PushupCounter::new(threshold)),
    }
}

// ============================================================================
// Squat Counter
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SquatState {
    Up,
    Down,
}

/// Two-state squat counter: up→down is silent, down→up emits a success.
pub struct SquatCounter {
    state: SquatState,
    threshold: f32,
    success: u32,
    failure: u32,
}

impl SquatCounter {
    pub fn new(threshold: f32) -> Self {
        Self {
            state: SquatState::Up,
            threshold,
            success: 0,
            failure: 0,
        }
    }
}

impl RepCounter for SquatCounter {
    fn feed(&mut self, pose: &ClassifiedPose) -> Option<RepEvent> {
        let (position, confidence) = match *pose {
            ClassifiedPose::TwoClass {
                position,
                confidence,
            } => (position, confidence),
            // Wrong classifier variant: inconclusive
            ClassifiedPose::ThreeClass { .. } => return None,
        };

        if confidence < self.threshold {
            return None;
        }

        match (self.state, position) {
            (SquatState::Up, Position::Down) => {
                self.state = SquatState::Down;
                tracing::debug!("squat: up -> down");
                None
            }
            (SquatState::Down, Position::Up) => {
                self.state = SquatState::Up;
                self.success += 1;
                tracing::debug!(count = self.success, "squat rep completed");
                Some(RepEvent::success())
            }
            _ => None,
        }
    }

    fn success_count(&self) -> u32 {
        self.success
    }

    fn failure_count(&self) -> u32 {
        self.failure
    }

    fn reset(&mut self) {
        self.state = SquatState::Up;
        self.success = 0;
        self.failure = 0;
    }
}

// ============================================================================
// Push-up Counter
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PushupState {
    Up,
    Down,
    /// Passed through mid on the way down from up
    MidFromUp,
    /// Passed through mid on the way up from down
    MidFromDown,
}

/// Four-state push-up counter driven by three-class probabilities.
///
/// Leaving mid in the direction it was entered from signals an
/// incomplete rep: mid_from_up→up never reached the bottom, and
/// mid_from_down→down never reached the top. Both count as failures
/// with corrective feedback instead of being silently dropped.
pub struct PushupCounter {
    state: PushupState,
    threshold: f32,
    success: u32,
    failure: u32,
}

impl PushupCounter {
    pub fn new(threshold: f32) -> Self {
        Self {
            state: PushupState::Up,
            threshold,
            success: 0,
            failure: 0,
        }
    }

    fn succeed(&mut self) -> Option<RepEvent> {
        self.state = PushupState::Up;
        self.success += 1;
        tracing::debug!(count = self.success, "push-up rep completed");
        Some(RepEvent::success())
    }

    fn fail(&mut self, next: PushupState, feedback: &str) -> Option<RepEvent> {
        self.state = next;
        self.failure += 1;
        tracing::debug!(count = self.failure, "push-up rep failed");
        Some(RepEvent::failure(feedback))
    }
}

impl RepCounter for PushupCounter {
    fn feed(&mut self, pose: &ClassifiedPose) -> Option<RepEvent> {
        let (down, up, mid) = match *pose {
            ClassifiedPose::ThreeClass { down, up, mid } => (down, up, mid),
            ClassifiedPose::TwoClass { .. } => return None,
        };

        let thr = self.threshold;

        match self.state {
            PushupState::Up => {
                if down >= thr {
                    self.state = PushupState::Down;
                } else if mid >= thr {
                    self.state = PushupState::MidFromUp;
                }
                None
            }
            PushupState::Down => {
                if up >= thr {
                    self.succeed()
                } else if mid >= thr {
                    self.state = PushupState::MidFromDown;
                    None
                } else {
                    None
                }
            }
            PushupState::MidFromUp => {
                if down >= thr {
                    self.state = PushupState::Down;
                    None
                } else if up >= thr {
                    // Came back up without reaching the bottom
                    self.fail(PushupState::Up, "더 깊게 내려가세요!")
                } else {
                    None
                }
            }
            PushupState::MidFromDown => {
                if up >= thr {
                    self.succeed()
                } else if down >= thr {
                    // Dropped back down without reaching the top
                    self.fail(PushupState::Down, "끝까지 올라가세요!")
                } else {
                    None
                }
            }
        }
    }

    fn success_count(&self) -> u32 {
        self.success
    }

    fn failure_count(&self) -> u32 {
        self.failure
    }

    fn reset(&mut self) {
        self.state = PushupState::Up;
        self.success = 0;
        self.failure = 0;
    }
}
