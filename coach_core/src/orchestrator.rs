//! Per-connection session orchestration.
//!
//! One [`Connection`] per live client runs a message-ordered dispatch
//! loop: inbound control messages mutate session state and wire up the
//! counting pipeline; counter events come back to the client through the
//! shared outbound sender. The [`SessionRegistry`] owns the per-session
//! pipelines with an explicit insert-on-first-frame / remove-on-cleanup
//! lifecycle, injected into each connection rather than living in
//! process-wide globals.

use crate::classifier::PoseClassifier;
use crate::config::CountingConfig;
use crate::counter::counter_for;
use crate::lifecycle;
use crate::pipeline::{CountingPipeline, EvaluatorContext, SessionFlags};
use crate::protocol::{self, Inbound, Outbound, RepResult};
use crate::store::Store;
use crate::{ClassifiedPose, ConnectionStatus, Error, ExerciseKind, Result, SessionId};
use chrono::Utc;
use crossbeam_channel::{Receiver, Sender};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Registry of active counting pipelines, keyed by workout session.
///
/// Detaching drops the pipeline, which joins its evaluator thread and
/// releases the frame channel.
#[derive(Default)]
pub struct SessionRegistry {
    pipelines: Mutex<HashMap<SessionId, CountingPipeline>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, session_id: SessionId, pipeline: CountingPipeline) {
        self.lock().insert(session_id, pipeline);
        tracing::debug!(session_id, "counting pipeline attached");
    }

    pub fn contains(&self, session_id: SessionId) -> bool {
        self.lock().contains_key(&session_id)
    }

    /// Forward one classified frame to the session's pipeline
    pub fn push_frame(&self, session_id: SessionId, pose: ClassifiedPose) -> Result<()> {
        let guard = self.lock();
        let pipeline = guard
            .get(&session_id)
            .ok_or_else(|| Error::NotFound(format!("counting pipeline for session {}", session_id)))?;
        pipeline.push(pose)
    }

    /// Remove and drop the session's pipeline, if present
    pub fn detach(&self, session_id: SessionId) -> bool {
        // Drop outside the lock: dropping joins the evaluator thread
        let removed = self.lock().remove(&session_id);
        let was_attached = removed.is_some();
        drop(removed);
        if was_attached {
            tracing::debug!(session_id, "counting pipeline detached");
        }
        was_attached
    }

    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SessionId, CountingPipeline>> {
        self.pipelines.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Message-dispatch state machine for one live connection.
///
/// Owns the socket-session identity, resolves its workout session at
/// open time, and processes inbound frames strictly in order until the
/// client stops, disconnects, or the session is closed from the
/// evaluator side.
pub struct Connection {
    socket_session_id: Uuid,
    session_id: SessionId,
    exercise_kind: ExerciseKind,
    store: Arc<dyn Store>,
    classifier: Arc<dyn PoseClassifier>,
    registry: Arc<SessionRegistry>,
    outbound: Sender<Outbound>,
    flags: Arc<SessionFlags>,
    counting: CountingConfig,
}

impl Connection {
    /// Bind to an existing socket session, mark it connected and greet
    /// the client.
    pub fn open(
        store: Arc<dyn Store>,
        classifier: Arc<dyn PoseClassifier>,
        registry: Arc<SessionRegistry>,
        socket_session_id: Uuid,
        outbound: Sender<Outbound>,
        counting: CountingConfig,
    ) -> Result<Self> {
        let socket = store.socket_session(socket_session_id)?;
        let detail = store.session_detail(socket.session_id)?;

        let now = Utc::now();
        store.set_connection_status(socket_session_id, ConnectionStatus::Connected, now)?;

        let greeting = Outbound::ConnectionEstablished {
            socket_session_id,
            message: "연결 완료".into(),
            server_time: now.to_rfc3339(),
        };
        outbound.send(greeting).map_err(|_| Error::Closed)?;

        tracing::info!(
            session_id = socket.session_id,
            %socket_session_id,
            "connection established"
        );

        Ok(Self {
            socket_session_id,
            session_id: socket.session_id,
            exercise_kind: detail.exercise.kind,
            store,
            classifier,
            registry,
            outbound,
            flags: Arc::new(SessionFlags::new()),
            counting,
        })
    }

    /// Close signal shared with the counting pipeline
    pub fn flags(&self) -> Arc<SessionFlags> {
        self.flags.clone()
    }

    /// Run the dispatch loop until the inbound channel closes, the
    /// session is closed, or a fatal error occurs. Cleanup runs on every
    /// exit path.
    pub fn run(&mut self, inbound: Receiver<String>) -> Result<()> {
        let result = self.dispatch_loop(&inbound);
        self.teardown();
        result
    }

    fn dispatch_loop(&mut self, inbound: &Receiver<String>) -> Result<()> {
        for raw in inbound.iter() {
            if self.flags.is_closed() {
                break;
            }

            let message = match protocol::parse_inbound(&raw) {
                Ok(Some(message)) => message,
                // Unknown type: ignored without a response
                Ok(None) => continue,
                // Malformed frame: fatal to this message only
                Err(e) => {
                    tracing::warn!(session_id = self.session_id, error = %e, "dropping bad frame");
                    continue;
                }
            };

            match self.handle(message) {
                Ok(Some(reply)) => {
                    if self.outbound.send(reply).is_err() {
                        tracing::debug!(session_id = self.session_id, "outbound receiver gone");
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(
                        session_id = self.session_id,
                        error = %e,
                        "fatal error handling message, closing connection"
                    );
                    return Err(e);
                }
            }

            if self.flags.is_closed() {
                break;
            }
        }
        Ok(())
    }

    /// Exactly one handler per message type
    fn handle(&mut self, message: Inbound) -> Result<Option<Outbound>> {
        match message {
            Inbound::Heartbeat { timestamp } => self.on_heartbeat(timestamp),
            Inbound::PoseFrame { landmarks } => self.on_pose_frame(&landmarks),
            Inbound::ManualRepAdd { reps } => self.on_manual_add(reps),
            Inbound::ManualRepSubtract { reps } => self.on_manual_subtract(reps),
            Inbound::GetStatus => self.on_get_status(),
            Inbound::Pause => self.on_pause(),
            Inbound::Resume => self.on_resume(),
            Inbound::Stop => self.on_stop(),
        }
    }

    fn on_heartbeat(&mut self, timestamp: Option<String>) -> Result<Option<Outbound>> {
        let now = Utc::now();
        self.store.touch_heartbeat(self.socket_session_id, now)?;
        Ok(Some(Outbound::HeartbeatAck {
            timestamp: timestamp.unwrap_or_else(|| now.to_rfc3339()),
        }))
    }

    fn on_pose_frame(&mut self, landmarks: &[[f32; 3]]) -> Result<Option<Outbound>> {
        if self.flags.is_closed() {
            return Ok(None);
        }

        let pose = self.classifier.classify(landmarks, self.exercise_kind)?;

        if !self.registry.contains(self.session_id) {
            self.spawn_pipeline()?;
        }
        match self.registry.push_frame(self.session_id, pose) {
            Ok(()) => {}
            // The evaluator already wound the session down; drop the frame
            Err(Error::Closed) => {}
            Err(e) => return Err(e),
        }

        // Responses arrive asynchronously from the pipeline
        Ok(None)
    }

    fn spawn_pipeline(&mut self) -> Result<()> {
        let counter = counter_for(self.exercise_kind, self.counting.threshold);
        let ctx = EvaluatorContext {
            session_id: self.session_id,
            socket_session_id: self.socket_session_id,
            store: self.store.clone(),
            outbound: self.outbound.clone(),
            flags: self.flags.clone(),
            poll_interval: Duration::from_millis(self.counting.poll_interval_ms),
        };
        self.registry
            .attach(self.session_id, CountingPipeline::spawn(counter, ctx));
        Ok(())
    }

    fn on_manual_add(&mut self, reps: u32) -> Result<Option<Outbound>> {
        let applied = lifecycle::record_completed_reps(&*self.store, self.session_id, reps)?;

        if applied.workout_completed {
            self.drive_completion()?;
            return Ok(None);
        }

        Ok(Some(Outbound::RepSuccess(RepResult {
            rep_detected: true,
            failed_detected: false,
            set_completed: applied.set_completed,
            workout_completed: false,
            feedback_message: format!("{}개 수동 추가", reps),
            session: applied.detail,
        })))
    }

    fn on_manual_subtract(&mut self, reps: u32) -> Result<Option<Outbound>> {
        let detail = lifecycle::record_subtracted_reps(&*self.store, self.session_id, reps)?;

        Ok(Some(Outbound::RepSuccess(RepResult {
            rep_detected: false,
            failed_detected: false,
            set_completed: false,
            workout_completed: false,
            feedback_message: format!("{}개 수동 차감", reps),
            session: detail,
        })))
    }

    fn on_get_status(&mut self) -> Result<Option<Outbound>> {
        let session = self.store.session(self.session_id)?;
        Ok(Some(Outbound::SessionStatus(
            session.status_snapshot(Utc::now()),
        )))
    }

    fn on_pause(&mut self) -> Result<Option<Outbound>> {
        let now = Utc::now();
        let feedback = match self
            .store
            .update_session(self.session_id, &mut |s| s.pause(now))
        {
            Ok(_) => "운동 일시정지",
            Err(Error::IllegalTransition(_)) => "이미 일시정지 상태입니다",
            Err(e) => return Err(e),
        };
        self.soft_reply(feedback)
    }

    fn on_resume(&mut self) -> Result<Option<Outbound>> {
        let now = Utc::now();
        let feedback = match self
            .store
            .update_session(self.session_id, &mut |s| s.resume(now))
        {
            Ok(_) => "운동 재개",
            Err(Error::IllegalTransition(_)) => "이미 활성 상태입니다",
            Err(e) => return Err(e),
        };
        self.soft_reply(feedback)
    }

    fn on_stop(&mut self) -> Result<Option<Outbound>> {
        self.drive_completion()?;
        Ok(None)
    }

    /// Finalize the workout and close the session. Losing the race with
    /// the evaluator's own completion is not an error.
    fn drive_completion(&mut self) -> Result<()> {
        match lifecycle::complete_and_close(
            &*self.store,
            &self.outbound,
            &self.flags,
            self.socket_session_id,
            self.session_id,
        ) {
            Ok(_) => Ok(()),
            Err(Error::IllegalTransition(_)) => {
                self.flags.close();
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Informational rep-result reply with the current session snapshot
    fn soft_reply(&self, feedback: &str) -> Result<Option<Outbound>> {
        let detail = self.store.session_detail(self.session_id)?;
        Ok(Some(Outbound::RepSuccess(RepResult {
            rep_detected: false,
            failed_detected: false,
            set_completed: false,
            workout_completed: false,
            feedback_message: feedback.to_string(),
            session: detail,
        })))
    }

    fn teardown(&mut self) {
        self.flags.close();
        self.registry.detach(self.session_id);

        if let Err(e) = self.store.set_connection_status(
            self.socket_session_id,
            ConnectionStatus::Disconnected,
            Utc::now(),
        ) {
            tracing::warn!(session_id = self.session_id, error = %e, "socket cleanup failed");
        }

        tracing::info!(session_id = self.session_id, "connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SQUAT_ID;
    use crate::classifier::{blank_landmarks, ScriptedClassifier};
    use crate::lifecycle::start_workout;
    use crate::store::MemoryStore;
    use crate::{Position, SessionStatus};
    use crossbeam_channel as xch;

    const RECV_TIMEOUT: Duration = Duration::from_secs(5);

    struct Harness {
        store: Arc<MemoryStore>,
        registry: Arc<SessionRegistry>,
        inbound: Sender<String>,
        outbound: Receiver<Outbound>,
        session_id: SessionId,
        join: Option<std::thread::JoinHandle<Result<()>>>,
    }

    impl Harness {
        /// Start a squat workout and run its connection on a thread
        fn squat(frames: Vec<ClassifiedPose>) -> Self {
            let store = Arc::new(MemoryStore::with_default_catalog());
            let registry = Arc::new(SessionRegistry::new());
            let classifier = Arc::new(ScriptedClassifier::new(frames));

            let (session, socket) = start_workout(&*store, 1, SQUAT_ID, 1).unwrap();
            let (in_tx, in_rx) = xch::unbounded::<String>();
            let (out_tx, out_rx) = xch::unbounded::<Outbound>();

            let mut connection = Connection::open(
                store.clone(),
                classifier,
                registry.clone(),
                socket.socket_session_id,
                out_tx,
                CountingConfig {
                    threshold: 0.7,
                    poll_interval_ms: 10,
                },
            )
            .unwrap();

            let join = std::thread::spawn(move || connection.run(in_rx));

            Self {
                store,
                registry,
                inbound: in_tx,
                outbound: out_rx,
                session_id: session.session_id,
                join: Some(join),
            }
        }

        fn send(&self, message: Inbound) {
            self.inbound.send(message.to_wire()).unwrap();
        }

        fn recv(&self) -> Outbound {
            self.outbound.recv_timeout(RECV_TIMEOUT).unwrap()
        }

        fn finish(mut self) -> Result<()> {
            drop(self.inbound);
            self.join.take().unwrap().join().unwrap()
        }
    }

    fn squat_cycle() -> Vec<ClassifiedPose> {
        vec![
            ClassifiedPose::TwoClass {
                position: Position::Down,
                confidence: 0.9,
            },
            ClassifiedPose::TwoClass {
                position: Position::Up,
                confidence: 0.9,
            },
        ]
    }

    #[test]
    fn test_connect_greets_and_marks_connected() {
        let h = Harness::squat(vec![]);

        match h.recv() {
            Outbound::ConnectionEstablished { message, .. } => assert_eq!(message, "연결 완료"),
            other => panic!("expected connection_established, got {:?}", other),
        }

        h.finish().unwrap();
    }

    #[test]
    fn test_heartbeat_echoes_timestamp() {
        let h = Harness::squat(vec![]);
        h.recv(); // greeting

        h.send(Inbound::Heartbeat {
            timestamp: Some("t-123".into()),
        });

        match h.recv() {
            Outbound::HeartbeatAck { timestamp } => assert_eq!(timestamp, "t-123"),
            other => panic!("expected heartbeat_ack, got {:?}", other),
        }
        h.finish().unwrap();
    }

    #[test]
    fn test_get_status_is_a_read_only_snapshot() {
        let h = Harness::squat(vec![]);
        h.recv(); // greeting

        h.send(Inbound::GetStatus);
        h.send(Inbound::GetStatus);

        let (a, b) = match (h.recv(), h.recv()) {
            (Outbound::SessionStatus(a), Outbound::SessionStatus(b)) => (a, b),
            other => panic!("expected two session_status messages, got {:?}", other),
        };

        assert_eq!(a.total_reps_completed, b.total_reps_completed);
        assert_eq!(a.current_set, b.current_set);
        assert!(b.duration_seconds >= a.duration_seconds);
        h.finish().unwrap();
    }

    #[test]
    fn test_pause_resume_soft_failures() {
        let h = Harness::squat(vec![]);
        h.recv(); // greeting

        h.send(Inbound::Resume);
        match h.recv() {
            Outbound::RepSuccess(r) => assert_eq!(r.feedback_message, "이미 활성 상태입니다"),
            other => panic!("unexpected {:?}", other),
        }

        h.send(Inbound::Pause);
        match h.recv() {
            Outbound::RepSuccess(r) => {
                assert_eq!(r.feedback_message, "운동 일시정지");
                assert_eq!(r.session.session.status, SessionStatus::Paused);
            }
            other => panic!("unexpected {:?}", other),
        }

        h.send(Inbound::Pause);
        match h.recv() {
            Outbound::RepSuccess(r) => {
                assert_eq!(r.feedback_message, "이미 일시정지 상태입니다")
            }
            other => panic!("unexpected {:?}", other),
        }

        h.send(Inbound::Resume);
        match h.recv() {
            Outbound::RepSuccess(r) => assert_eq!(r.feedback_message, "운동 재개"),
            other => panic!("unexpected {:?}", other),
        }

        h.finish().unwrap();
    }

    #[test]
    fn test_unknown_and_malformed_messages_do_not_kill_the_loop() {
        let h = Harness::squat(vec![]);
        h.recv(); // greeting

        h.inbound
            .send(r#"{"type":"telemetry","data":{}}"#.into())
            .unwrap();
        h.inbound.send("{broken".into()).unwrap();
        h.send(Inbound::Heartbeat { timestamp: None });

        assert!(matches!(h.recv(), Outbound::HeartbeatAck { .. }));
        h.finish().unwrap();
    }

    #[test]
    fn test_manual_add_and_subtract() {
        let h = Harness::squat(vec![]);
        h.recv(); // greeting

        h.send(Inbound::ManualRepAdd { reps: 2 });
        match h.recv() {
            Outbound::RepSuccess(r) => {
                assert!(r.rep_detected);
                assert_eq!(r.feedback_message, "2개 수동 추가");
                assert_eq!(r.session.session.total_reps_completed, 2);
                assert!(!r.set_completed);
            }
            other => panic!("unexpected {:?}", other),
        }

        h.send(Inbound::ManualRepSubtract { reps: 100 });
        match h.recv() {
            Outbound::RepSuccess(r) => {
                assert_eq!(r.session.session.total_reps_completed, 0);
                assert_eq!(r.session.session.current_set_reps, 0);
                assert_eq!(r.feedback_message, "100개 수동 차감");
            }
            other => panic!("unexpected {:?}", other),
        }

        h.finish().unwrap();
    }

    #[test]
    fn test_manual_add_completes_set_with_flag() {
        let h = Harness::squat(vec![]);
        h.recv(); // greeting

        // Level 1 squat target is 3 reps per set
        h.send(Inbound::ManualRepAdd { reps: 3 });
        match h.recv() {
            Outbound::RepSuccess(r) => {
                assert!(r.set_completed);
                assert_eq!(r.session.session.current_set, 2);
                assert_eq!(r.session.session.current_set_reps, 0);
            }
            other => panic!("unexpected {:?}", other),
        }
        h.finish().unwrap();
    }

    #[test]
    fn test_manual_add_can_complete_the_workout() {
        let h = Harness::squat(vec![]);
        h.recv(); // greeting

        // 3 sets x 3 reps; each add rolls one set over
        h.send(Inbound::ManualRepAdd { reps: 3 });
        h.recv();
        h.send(Inbound::ManualRepAdd { reps: 3 });
        h.recv();
        h.send(Inbound::ManualRepAdd { reps: 3 });

        assert!(matches!(h.recv(), Outbound::WorkoutCompleted {}));

        let session_id = h.session_id;
        let store = h.store.clone();
        h.finish().unwrap();

        assert_eq!(
            store.session(session_id).unwrap().status,
            SessionStatus::Completed
        );
    }

    #[test]
    fn test_stop_finalizes_and_closes() {
        let h = Harness::squat(vec![]);
        h.recv(); // greeting

        h.send(Inbound::ManualRepAdd { reps: 1 });
        h.recv();
        h.send(Inbound::Stop);

        assert!(matches!(h.recv(), Outbound::WorkoutCompleted {}));

        let store = h.store.clone();
        let session_id = h.session_id;
        h.finish().unwrap();

        let session = store.session(session_id).unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        // 1 rep x 6.0 cal/rep for squats
        assert_eq!(session.total_calories_burned, 6.0);
    }

    #[test]
    fn test_pose_frames_flow_through_the_pipeline() {
        let h = Harness::squat(squat_cycle());
        h.recv(); // greeting

        h.send(Inbound::PoseFrame {
            landmarks: blank_landmarks(),
        });
        h.send(Inbound::PoseFrame {
            landmarks: blank_landmarks(),
        });

        match h.recv() {
            Outbound::RepSuccess(r) => {
                assert!(r.rep_detected);
                assert_eq!(r.session.session.total_reps_completed, 1);
            }
            other => panic!("expected rep_success, got {:?}", other),
        }

        assert_eq!(h.registry.active_count(), 1);
        let registry = h.registry.clone();
        h.finish().unwrap();

        // Teardown released the pipeline on exit
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn test_full_workout_over_pose_frames() {
        // 9 full squat cycles complete level 1 (3 sets x 3 reps)
        let frames: Vec<ClassifiedPose> =
            (0..9).flat_map(|_| squat_cycle()).collect();
        let h = Harness::squat(frames);
        h.recv(); // greeting

        for _ in 0..18 {
            h.send(Inbound::PoseFrame {
                landmarks: blank_landmarks(),
            });
        }

        let mut completed = false;
        for _ in 0..9 {
            match h.recv() {
                Outbound::WorkoutCompleted {} => {
                    completed = true;
                    break;
                }
                Outbound::RepSuccess(r) => assert!(!r.workout_completed),
                other => panic!("unexpected {:?}", other),
            }
        }
        assert!(completed);

        let store = h.store.clone();
        let session_id = h.session_id;
        h.finish().unwrap();

        let session = store.session(session_id).unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.total_reps_completed, 9);
        assert_eq!(store.progress(1, SQUAT_ID).unwrap().unwrap().current_level, 2);
    }
}
