//! Per-session counting pipeline.
//!
//! Decouples the arrival rate of classified pose frames from rep
//! evaluation: each active session owns one ordered channel feeding a
//! dedicated evaluator thread that drives the session's rep counter.
//! For every emitted event the evaluator applies the durable session
//! mutation and dispatches the outbound message *before* taking the next
//! frame, so at most one durable mutation per session is ever in flight.
//!
//! Safety: each `CountingPipeline` spawns exactly one thread that is
//! shut down when the pipeline is dropped, preventing thread leaks.

use crate::counter::{RepCounter, RepOutcome};
use crate::lifecycle::{self, RepApplied};
use crate::protocol::{Outbound, RepResult};
use crate::store::Store;
use crate::{ClassifiedPose, Error, Result, SessionId};
use crossbeam_channel::{self as xch, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Shared close signal between the dispatch loop and the evaluator.
///
/// Set on workout completion, manual stop, or a fatal evaluator error;
/// once closed, no further pose frames are accepted and the dispatch
/// loop winds down.
#[derive(Debug, Default)]
pub struct SessionFlags {
    closed: AtomicBool,
}

impl SessionFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

/// Everything the evaluator needs to turn a rep event into a durable
/// mutation plus an outbound message.
pub struct EvaluatorContext {
    pub session_id: SessionId,
    pub socket_session_id: Uuid,
    pub store: Arc<dyn Store>,
    pub outbound: xch::Sender<Outbound>,
    pub flags: Arc<SessionFlags>,
    pub poll_interval: Duration,
}

/// Handle to one session's frame channel and evaluator thread
pub struct CountingPipeline {
    tx: xch::Sender<ClassifiedPose>,
    shutdown: Arc<AtomicBool>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl CountingPipeline {
    /// Spawn the evaluator thread for one session.
    ///
    /// The producer side never blocks: frames go through an unbounded
    /// channel and the evaluator waits on it with a timeout so it can
    /// observe shutdown without busy-spinning.
    pub fn spawn(mut counter: Box<dyn RepCounter>, ctx: EvaluatorContext) -> Self {
        let (tx, rx) = xch::unbounded::<ClassifiedPose>();
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = shutdown.clone();
        let poll = ctx.poll_interval;

        let join_handle = std::thread::spawn(move || {
            loop {
                if shutdown_flag.load(Ordering::Relaxed) || ctx.flags.is_closed() {
                    break;
                }

                match rx.recv_timeout(poll) {
                    Ok(pose) => {
                        if let Some(event) = counter.feed(&pose) {
                            if let Err(e) = deliver_event(&ctx, event.outcome, &event.feedback) {
                                // Durable mutations are not retried; a failure
                                // here closes the session.
                                tracing::error!(
                                    session_id = ctx.session_id,
                                    error = %e,
                                    "failed to deliver rep event, closing session"
                                );
                                ctx.flags.close();
                                break;
                            }
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => {
                        tracing::debug!(
                            session_id = ctx.session_id,
                            "frame producer disconnected, evaluator exiting"
                        );
                        break;
                    }
                }
            }
            tracing::trace!(session_id = ctx.session_id, "evaluator thread exiting");
        });

        Self {
            tx,
            shutdown,
            join_handle: Some(join_handle),
        }
    }

    /// Enqueue one classified frame. Never blocks the producer.
    pub fn push(&self, pose: ClassifiedPose) -> Result<()> {
        self.tx.send(pose).map_err(|_| Error::Closed)
    }
}

impl Drop for CountingPipeline {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);

        // The evaluator exits within one poll interval, or immediately
        // after finishing the event it is currently delivering.
        if let Some(handle) = self.join_handle.take() {
            if let Err(e) = handle.join() {
                tracing::warn!(?e, "evaluator thread panicked during shutdown");
            }
        }
    }
}

/// Apply one rep event: durable mutation first, then the outbound
/// message. Workout completion is driven synchronously from here so no
/// other message for the same event can race past it.
fn deliver_event(ctx: &EvaluatorContext, outcome: RepOutcome, feedback: &str) -> Result<()> {
    match outcome {
        RepOutcome::Success => {
            let applied = lifecycle::record_completed_reps(&*ctx.store, ctx.session_id, 1)?;

            if applied.workout_completed {
                lifecycle::complete_and_close(
                    &*ctx.store,
                    &ctx.outbound,
                    &ctx.flags,
                    ctx.socket_session_id,
                    ctx.session_id,
                )?;
                return Ok(());
            }

            let message = Outbound::RepSuccess(RepResult {
                rep_detected: true,
                failed_detected: false,
                set_completed: applied.set_completed,
                workout_completed: false,
                feedback_message: success_feedback(&applied),
                session: applied.detail,
            });
            ctx.outbound.send(message).map_err(|_| Error::Closed)
        }
        RepOutcome::Failure => {
            let detail = lifecycle::record_failed_reps(&*ctx.store, ctx.session_id, 1)?;

            let message = Outbound::RepSuccess(RepResult {
                rep_detected: false,
                failed_detected: true,
                set_completed: false,
                workout_completed: false,
                feedback_message: feedback.to_string(),
                session: detail,
            });
            ctx.outbound.send(message).map_err(|_| Error::Closed)
        }
    }
}

/// Feedback text for a successful rep: rest prompt on set completion,
/// running total otherwise.
fn success_feedback(applied: &RepApplied) -> String {
    if applied.set_completed {
        format!(
            "{}세트 완료! {} 초 동안 휴식하세요",
            applied.detail.session.current_set - 1,
            applied.detail.level.rest_seconds
        )
    } else {
        format!("{}개 완료", applied.detail.session.total_reps_completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{PUSHUP_ID, SQUAT_ID};
    use crate::counter::{counter_for, DEFAULT_THRESHOLD};
    use crate::lifecycle::start_workout;
    use crate::store::MemoryStore;
    use crate::{ExerciseKind, Position, SessionStatus};

    const RECV_TIMEOUT: Duration = Duration::from_secs(5);

    fn squat_frame(position: Position) -> ClassifiedPose {
        ClassifiedPose::TwoClass {
            position,
            confidence: 0.95,
        }
    }

    fn setup(
        kind: ExerciseKind,
        exercise_id: u32,
    ) -> (
        Arc<MemoryStore>,
        CountingPipeline,
        xch::Receiver<Outbound>,
        Arc<SessionFlags>,
        u64,
    ) {
        let store = Arc::new(MemoryStore::with_default_catalog());
        let (session, socket) = start_workout(&*store, 1, exercise_id, 1).unwrap();
        let (out_tx, out_rx) = xch::unbounded();
        let flags = Arc::new(SessionFlags::new());

        let ctx = EvaluatorContext {
            session_id: session.session_id,
            socket_session_id: socket.socket_session_id,
            store: store.clone(),
            outbound: out_tx,
            flags: flags.clone(),
            poll_interval: Duration::from_millis(10),
        };
        let pipeline = CountingPipeline::spawn(counter_for(kind, DEFAULT_THRESHOLD), ctx);

        (store, pipeline, out_rx, flags, session.session_id)
    }

    #[test]
    fn test_success_events_mutate_session_in_order() {
        let (store, pipeline, out_rx, _flags, session_id) =
            setup(ExerciseKind::Squat, SQUAT_ID);

        // Two full squat cycles
        for _ in 0..2 {
            pipeline.push(squat_frame(Position::Down)).unwrap();
            pipeline.push(squat_frame(Position::Up)).unwrap();
        }

        let first = out_rx.recv_timeout(RECV_TIMEOUT).unwrap();
        let second = out_rx.recv_timeout(RECV_TIMEOUT).unwrap();

        match (first, second) {
            (Outbound::RepSuccess(a), Outbound::RepSuccess(b)) => {
                assert_eq!(a.session.session.total_reps_completed, 1);
                assert_eq!(b.session.session.total_reps_completed, 2);
                assert!(a.rep_detected && b.rep_detected);
            }
            other => panic!("expected two rep_success messages, got {:?}", other),
        }

        assert_eq!(store.session(session_id).unwrap().total_reps_completed, 2);
    }

    #[test]
    fn test_set_completion_feedback_mentions_rest() {
        let (_store, pipeline, out_rx, _flags, _id) = setup(ExerciseKind::Squat, SQUAT_ID);

        // Level 1 squat: 3 reps complete the first set
        for _ in 0..3 {
            pipeline.push(squat_frame(Position::Down)).unwrap();
            pipeline.push(squat_frame(Position::Up)).unwrap();
        }

        let mut last = None;
        for _ in 0..3 {
            last = Some(out_rx.recv_timeout(RECV_TIMEOUT).unwrap());
        }

        match last {
            Some(Outbound::RepSuccess(result)) => {
                assert!(result.set_completed);
                assert!(result.feedback_message.contains("1세트 완료"));
                assert_eq!(result.session.session.current_set, 2);
            }
            other => panic!("expected rep_success, got {:?}", other),
        }
    }

    #[test]
    fn test_workout_completion_closes_session() {
        let (store, pipeline, out_rx, flags, session_id) =
            setup(ExerciseKind::Squat, SQUAT_ID);

        // Level 1 squat: 3 sets x 3 reps = 9 reps total
        for _ in 0..9 {
            pipeline.push(squat_frame(Position::Down)).unwrap();
            pipeline.push(squat_frame(Position::Up)).unwrap();
        }

        // 8 rep_success messages, then workout_completed
        let mut completed = false;
        for _ in 0..9 {
            match out_rx.recv_timeout(RECV_TIMEOUT).unwrap() {
                Outbound::WorkoutCompleted {} => {
                    completed = true;
                    break;
                }
                Outbound::RepSuccess(result) => assert!(!result.workout_completed),
                other => panic!("unexpected message {:?}", other),
            }
        }

        assert!(completed);
        assert!(flags.is_closed());
        assert_eq!(
            store.session(session_id).unwrap().status,
            SessionStatus::Completed
        );
        // Progress was folded in exactly once
        let progress = store.progress(1, SQUAT_ID).unwrap().unwrap();
        assert_eq!(progress.total_sessions, 1);
        assert_eq!(progress.current_level, 2);
    }

    #[test]
    fn test_failure_events_carry_corrective_feedback() {
        let (store, pipeline, out_rx, _flags, session_id) =
            setup(ExerciseKind::Pushup, PUSHUP_ID);

        // up -> mid -> up: shallow rep
        pipeline
            .push(ClassifiedPose::ThreeClass {
                down: 0.05,
                up: 0.05,
                mid: 0.9,
            })
            .unwrap();
        pipeline
            .push(ClassifiedPose::ThreeClass {
                down: 0.05,
                up: 0.9,
                mid: 0.05,
            })
            .unwrap();

        match out_rx.recv_timeout(RECV_TIMEOUT).unwrap() {
            Outbound::RepSuccess(result) => {
                assert!(result.failed_detected);
                assert!(!result.rep_detected);
                assert_eq!(result.feedback_message, "더 깊게 내려가세요!");
                assert_eq!(result.session.session.total_reps_failed, 1);
            }
            other => panic!("expected rep_success, got {:?}", other),
        }

        assert_eq!(store.session(session_id).unwrap().total_reps_failed, 1);
    }

    #[test]
    fn test_frames_after_close_are_not_evaluated() {
        let (store, pipeline, out_rx, flags, session_id) =
            setup(ExerciseKind::Squat, SQUAT_ID);

        flags.close();
        // Give the evaluator a moment to observe the flag
        std::thread::sleep(Duration::from_millis(50));

        pipeline.push(squat_frame(Position::Down)).unwrap();
        pipeline.push(squat_frame(Position::Up)).unwrap();

        assert!(out_rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert_eq!(store.session(session_id).unwrap().total_reps_completed, 0);
    }

    #[test]
    fn test_drop_joins_evaluator() {
        let (_store, pipeline, _out_rx, _flags, _id) = setup(ExerciseKind::Squat, SQUAT_ID);
        // Dropping must not hang or panic
        drop(pipeline);
    }
}
