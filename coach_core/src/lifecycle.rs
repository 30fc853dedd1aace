//! Workout lifecycle management.
//!
//! Start and completion semantics for workout sessions: the
//! single-active-session invariant, level gating, set rollover
//! bookkeeping, calorie/experience finalization and progression unlock.
//! Invoked by both the session orchestrator (manual adjustments, stop)
//! and the counting pipeline (detected rep events).

use crate::pipeline::SessionFlags;
use crate::protocol::Outbound;
use crate::store::Store;
use crate::{
    CompletionSummary, ConnectionStatus, Error, ExerciseId, Result, SessionDetail, SessionId,
    SocketSession, UserExerciseProgress, UserId, WorkoutSession,
};
use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;
use uuid::Uuid;

/// Result of applying a rep mutation, with completion detection flags
#[derive(Clone, Debug)]
pub struct RepApplied {
    pub detail: SessionDetail,
    pub set_completed: bool,
    pub workout_completed: bool,
}

/// Start a new workout session for a user at a given exercise level.
///
/// Rejects creation when the user already has a session in active or
/// paused status, when the level does not exist, or when the level is
/// above what the user's progression has unlocked. On success both the
/// workout session and its paired pending socket session exist in the
/// store.
pub fn start_workout(
    store: &dyn Store,
    user_id: UserId,
    exercise_id: ExerciseId,
    level: u32,
) -> Result<(WorkoutSession, SocketSession)> {
    if let Some(existing) = store.active_session_for(user_id)? {
        return Err(Error::ActiveSessionExists(existing.session_id));
    }

    let exercise_level = store.level(exercise_id, level)?;

    let allowed = store
        .progress(user_id, exercise_id)?
        .map(|p| p.current_level)
        .unwrap_or(1);
    if level > allowed {
        return Err(Error::LevelLocked {
            requested: level,
            allowed,
        });
    }

    let now = Utc::now();
    let session_id =
        store.insert_session(WorkoutSession::start(user_id, exercise_id, level, now))?;

    let socket = SocketSession::new(session_id, user_id, now);
    store.insert_socket_session(socket.clone())?;

    tracing::info!(
        session_id,
        user_id,
        exercise_id,
        level = exercise_level.level,
        "workout session started"
    );

    Ok((store.session(session_id)?, socket))
}

/// Record `n` completed reps and detect set/workout completion.
///
/// A set completes when the rep mutation just rolled `current_set_reps`
/// back to 0; the workout completes when `current_set` has passed the
/// level's target set count.
pub fn record_completed_reps(store: &dyn Store, session_id: SessionId, n: u32) -> Result<RepApplied> {
    let session = store.session(session_id)?;
    let level = store.level(session.exercise_id, session.level)?;
    let exercise = store.exercise(session.exercise_id)?;

    let now = Utc::now();
    let mut rolled_over = false;
    let updated = store.update_session(session_id, &mut |s| {
        rolled_over = s.apply_completed_reps(n, level.target_reps, now);
        Ok(())
    })?;

    let workout_completed = updated.current_set > level.target_sets;
    if rolled_over {
        tracing::info!(
            session_id,
            set = updated.current_set,
            "set completed"
        );
    }

    Ok(RepApplied {
        detail: SessionDetail {
            session: updated,
            exercise,
            level,
        },
        set_completed: rolled_over,
        workout_completed,
    })
}

/// Record `n` failed rep attempts. Failures never complete a set.
pub fn record_failed_reps(store: &dyn Store, session_id: SessionId, n: u32) -> Result<SessionDetail> {
    let now = Utc::now();
    store.update_session(session_id, &mut |s| {
        s.apply_failed_reps(n, now);
        Ok(())
    })?;
    store.session_detail(session_id)
}

/// Manually subtract `n` reps, flooring at 0. Subtraction can never
/// complete a set or the workout, so no detection flags are produced.
pub fn record_subtracted_reps(
    store: &dyn Store,
    session_id: SessionId,
    n: u32,
) -> Result<SessionDetail> {
    let now = Utc::now();
    store.update_session(session_id, &mut |s| {
        s.apply_subtracted_reps(n, now);
        Ok(())
    })?;
    store.session_detail(session_id)
}

/// Complete a workout session: finalize calories, close the timer model,
/// and fold the results into the user's exercise progression.
///
/// Calling this on an already-completed session is a caller error.
pub fn finalize_workout(store: &dyn Store, session_id: SessionId) -> Result<CompletionSummary> {
    let detail = store.session_detail(session_id)?;
    if !detail.session.is_open() {
        return Err(Error::IllegalTransition(
            "workout is already completed".into(),
        ));
    }

    let now = Utc::now();
    let calories_per_rep = detail.exercise.calories_per_rep;
    let updated = store.update_session(session_id, &mut |s| {
        s.total_calories_burned = s.total_reps_completed as f64 * calories_per_rep;
        s.complete(now)
    })?;

    let experience_gained = detail.level.experience_points;

    let mut progress = store
        .progress(updated.user_id, updated.exercise_id)?
        .unwrap_or_else(|| UserExerciseProgress::new(updated.user_id, updated.exercise_id));
    progress.record_completion(
        detail.level.level,
        updated.total_reps_completed,
        updated.duration_seconds,
        experience_gained,
        now,
    );
    store.upsert_progress(progress)?;

    let summary = CompletionSummary {
        session_id,
        total_reps_completed: updated.total_reps_completed,
        total_reps_failed: updated.total_reps_failed,
        total_calories_burned: updated.total_calories_burned,
        duration_seconds: updated.duration_seconds,
        duration_minutes: (updated.duration_seconds / 60.0 * 100.0).round() / 100.0,
        experience_gained,
    };

    tracing::info!(
        session_id,
        reps = summary.total_reps_completed,
        calories = summary.total_calories_burned,
        duration = summary.duration_seconds,
        "workout completed"
    );

    Ok(summary)
}

/// Drive the full completion sequence shared by the stop handler and the
/// counting pipeline: finalize the workout, attempt the completion
/// message, mark the socket disconnected and close the session flags.
pub fn complete_and_close(
    store: &dyn Store,
    outbound: &Sender<Outbound>,
    flags: &SessionFlags,
    socket_session_id: Uuid,
    session_id: SessionId,
) -> Result<CompletionSummary> {
    let summary = finalize_workout(store, session_id)?;

    // Best-effort: the receiver may already be gone on abrupt disconnects
    if outbound.send(Outbound::WorkoutCompleted {}).is_err() {
        tracing::warn!(session_id, "completion message could not be delivered");
    }

    if let Err(e) =
        store.set_connection_status(socket_session_id, ConnectionStatus::Disconnected, Utc::now())
    {
        tracing::warn!(session_id, error = %e, "failed to mark socket disconnected");
    }

    flags.close();
    Ok(summary)
}

impl UserExerciseProgress {
    /// Fold one completed session into the aggregate totals and unlock
    /// the next level when a new highest level was completed.
    ///
    /// `current_level` never decreases and always ends at least one past
    /// the highest level ever completed.
    pub fn record_completion(
        &mut self,
        completed_level: u32,
        reps: u32,
        duration_seconds: f64,
        experience: u32,
        now: DateTime<Utc>,
    ) {
        self.total_sessions += 1;
        self.total_reps_completed += reps;
        self.total_time_exercised += duration_seconds.max(0.0) as u64;
        self.total_experience_points += experience;
        self.last_performed = Some(now);

        if completed_level > self.highest_completed_level {
            self.highest_completed_level = completed_level;
            if self.current_level <= completed_level {
                self.current_level = completed_level + 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{PUSHUP_ID, SQUAT_ID};
    use crate::store::MemoryStore;
    use crate::{ConnectionStatus, SessionStatus};

    fn seeded() -> MemoryStore {
        MemoryStore::with_default_catalog()
    }

    #[test]
    fn test_start_creates_session_and_socket() {
        let store = seeded();
        let (session, socket) = start_workout(&store, 1, SQUAT_ID, 1).unwrap();

        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.current_set, 1);
        assert_eq!(socket.session_id, session.session_id);
        assert_eq!(socket.connection_status, ConnectionStatus::Pending);
        assert!(store.socket_session(socket.socket_session_id).is_ok());
    }

    #[test]
    fn test_start_rejects_second_active_session() {
        let store = seeded();
        let (first, _) = start_workout(&store, 1, SQUAT_ID, 1).unwrap();

        let err = start_workout(&store, 1, PUSHUP_ID, 1).unwrap_err();
        assert!(matches!(err, Error::ActiveSessionExists(id) if id == first.session_id));
    }

    #[test]
    fn test_start_rejects_locked_level() {
        let store = seeded();
        let err = start_workout(&store, 1, SQUAT_ID, 3).unwrap_err();
        assert!(matches!(
            err,
            Error::LevelLocked {
                requested: 3,
                allowed: 1
            }
        ));
    }

    #[test]
    fn test_start_rejects_unknown_level() {
        let store = seeded();
        assert!(matches!(
            start_workout(&store, 1, SQUAT_ID, 99),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_rep_recording_rolls_sets_and_detects_completion() {
        let store = seeded();
        // Level 1: 3 sets of 3 reps
        let (session, _) = start_workout(&store, 1, SQUAT_ID, 1).unwrap();
        let id = session.session_id;

        for i in 1..=2 {
            let applied = record_completed_reps(&store, id, 1).unwrap();
            assert!(!applied.set_completed, "rep {} should not complete a set", i);
        }

        let third = record_completed_reps(&store, id, 1).unwrap();
        assert!(third.set_completed);
        assert!(!third.workout_completed);
        assert_eq!(third.detail.session.current_set, 2);
        assert_eq!(third.detail.session.current_set_reps, 0);

        // Finish sets 2 and 3
        for _ in 0..5 {
            record_completed_reps(&store, id, 1).unwrap();
        }
        let last = record_completed_reps(&store, id, 1).unwrap();
        assert!(last.set_completed);
        assert!(last.workout_completed);
        assert_eq!(last.detail.session.current_set, 4);
    }

    #[test]
    fn test_two_set_level_completes_after_six_reps() {
        let store = MemoryStore::new();
        store.seed_exercise(crate::Exercise {
            id: 7,
            name: "Test".into(),
            kind: crate::ExerciseKind::Squat,
            calories_per_rep: 1.0,
        });
        store.seed_level(crate::ExerciseLevel {
            exercise_id: 7,
            level: 1,
            target_sets: 2,
            target_reps: 3,
            rest_seconds: 10,
            experience_points: 10,
        });

        let (session, _) = start_workout(&store, 1, 7, 1).unwrap();
        let id = session.session_id;

        record_completed_reps(&store, id, 1).unwrap();
        record_completed_reps(&store, id, 1).unwrap();
        let third = record_completed_reps(&store, id, 1).unwrap();
        assert!(third.set_completed);
        assert!(!third.workout_completed);
        assert_eq!(third.detail.session.current_set, 2);
        assert_eq!(third.detail.session.current_set_reps, 0);

        record_completed_reps(&store, id, 1).unwrap();
        record_completed_reps(&store, id, 1).unwrap();
        let sixth = record_completed_reps(&store, id, 1).unwrap();
        assert!(sixth.set_completed);
        assert!(sixth.workout_completed);
        assert_eq!(sixth.detail.session.current_set, 3);
    }

    #[test]
    fn test_failed_reps_never_complete_sets() {
        let store = seeded();
        let (session, _) = start_workout(&store, 1, PUSHUP_ID, 1).unwrap();

        let detail = record_failed_reps(&store, session.session_id, 2).unwrap();
        assert_eq!(detail.session.total_reps_failed, 2);
        assert_eq!(detail.session.current_set, 1);
    }

    #[test]
    fn test_finalize_computes_calories_and_summary() {
        let store = seeded();
        let (session, _) = start_workout(&store, 1, SQUAT_ID, 1).unwrap();
        let id = session.session_id;

        record_completed_reps(&store, id, 2).unwrap();
        let summary = finalize_workout(&store, id).unwrap();

        assert_eq!(summary.total_reps_completed, 2);
        // 2 reps x 6.0 cal/rep
        assert_eq!(summary.total_calories_burned, 12.0);
        assert_eq!(summary.experience_gained, 10);

        let completed = store.session(id).unwrap();
        assert_eq!(completed.status, SessionStatus::Completed);
        assert!(completed.end_time.is_some());
    }

    #[test]
    fn test_finalize_twice_is_an_error() {
        let store = seeded();
        let (session, _) = start_workout(&store, 1, SQUAT_ID, 1).unwrap();

        finalize_workout(&store, session.session_id).unwrap();
        assert!(matches!(
            finalize_workout(&store, session.session_id),
            Err(Error::IllegalTransition(_))
        ));
    }

    #[test]
    fn test_finalize_creates_progress_and_unlocks_level_two() {
        let store = seeded();
        let (session, _) = start_workout(&store, 1, SQUAT_ID, 1).unwrap();
        record_completed_reps(&store, session.session_id, 9).unwrap();
        finalize_workout(&store, session.session_id).unwrap();

        let progress = store.progress(1, SQUAT_ID).unwrap().unwrap();
        assert_eq!(progress.highest_completed_level, 1);
        assert_eq!(progress.current_level, 2);
        assert_eq!(progress.total_sessions, 1);
        assert_eq!(progress.total_reps_completed, 9);
        assert!(progress.last_performed.is_some());
    }

    #[test]
    fn test_progression_unlock_rules() {
        let now = Utc::now();
        let mut progress = UserExerciseProgress::new(1, SQUAT_ID);
        progress.highest_completed_level = 1;
        progress.current_level = 2;

        // Completing level 2 raises both
        progress.record_completion(2, 6, 60.0, 20, now);
        assert_eq!(progress.highest_completed_level, 2);
        assert_eq!(progress.current_level, 3);

        // Completing a level at or below the highest is a no-op on levels
        progress.record_completion(1, 3, 30.0, 10, now);
        assert_eq!(progress.highest_completed_level, 2);
        assert_eq!(progress.current_level, 3);

        // current_level never decreases even if already ahead
        progress.current_level = 5;
        progress.record_completion(3, 6, 60.0, 30, now);
        assert_eq!(progress.highest_completed_level, 3);
        assert_eq!(progress.current_level, 5);
    }

    #[test]
    fn test_complete_and_close_sends_message_and_closes() {
        let store = seeded();
        let (session, socket) = start_workout(&store, 1, SQUAT_ID, 1).unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        let flags = SessionFlags::new();

        let summary = complete_and_close(
            &store,
            &tx,
            &flags,
            socket.socket_session_id,
            session.session_id,
        )
        .unwrap();

        assert_eq!(summary.session_id, session.session_id);
        assert!(flags.is_closed());
        assert!(matches!(rx.try_recv(), Ok(Outbound::WorkoutCompleted {})));

        let socket = store.socket_session(socket.socket_session_id).unwrap();
        assert_eq!(socket.connection_status, ConnectionStatus::Disconnected);
    }
}
