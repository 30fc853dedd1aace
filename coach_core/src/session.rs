//! Workout session timer model and rep accounting.
//!
//! All timer math lives here: elapsed active time across pause/resume
//! cycles, the three legal status transitions, and the rep/set mutations
//! applied by the lifecycle manager and orchestrator. Every operation
//! takes an explicit `now` so accounting stays pure and testable.

use crate::{Error, Result, SessionStatus, WorkoutSession};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Read-only status snapshot returned for get-status requests
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionStatusSnapshot {
    pub session_id: u64,
    pub status: SessionStatus,
    pub current_set: u32,
    pub current_set_reps: u32,
    pub total_reps_completed: u32,
    pub total_calories_burned: f64,
    pub duration_seconds: f64,
    pub duration_minutes: f64,
    pub start_time: String,
    pub is_paused: bool,
}

impl WorkoutSession {
    /// Create a fresh active session. The store assigns the real id on insert.
    pub fn start(
        user_id: u64,
        exercise_id: u32,
        level: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: 0,
            user_id,
            exercise_id,
            level,
            status: SessionStatus::Active,
            current_set: 1,
            current_set_reps: 0,
            total_reps_completed: 0,
            total_reps_failed: 0,
            total_calories_burned: 0.0,
            start_time: now,
            end_time: None,
            last_pause_time: None,
            total_pause_duration: 0.0,
            duration_seconds: 0.0,
        }
    }

    /// Elapsed active time in seconds at `now`, floored at 0.
    ///
    /// Defined as wall-clock since start, minus all completed pause
    /// intervals, minus the currently open pause interval if paused.
    /// Completed sessions report their frozen duration.
    pub fn current_duration(&self, now: DateTime<Utc>) -> f64 {
        if self.status == SessionStatus::Completed && self.end_time.is_some() {
            return self.duration_seconds;
        }

        let total_elapsed = seconds_between(self.start_time, now);

        let open_pause = match (self.status, self.last_pause_time) {
            (SessionStatus::Paused, Some(paused_at)) => seconds_between(paused_at, now),
            _ => 0.0,
        };

        (total_elapsed - self.total_pause_duration - open_pause).max(0.0)
    }

    /// Pause an active session. Fails if the session is not active.
    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status != SessionStatus::Active {
            return Err(Error::IllegalTransition(format!(
                "cannot pause workout in {:?} status",
                self.status
            )));
        }

        self.duration_seconds = self.current_duration(now);
        self.status = SessionStatus::Paused;
        self.last_pause_time = Some(now);
        Ok(())
    }

    /// Resume a paused session. Fails if the session is not paused.
    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status != SessionStatus::Paused {
            return Err(Error::IllegalTransition(format!(
                "cannot resume workout in {:?} status",
                self.status
            )));
        }

        if let Some(paused_at) = self.last_pause_time {
            self.total_pause_duration += seconds_between(paused_at, now);
        }
        self.status = SessionStatus::Active;
        self.last_pause_time = None;
        Ok(())
    }

    /// Complete the session, folding any open pause interval first.
    ///
    /// Completing an already-completed session is an illegal transition;
    /// callers (the orchestrator) guard against it.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status == SessionStatus::Completed {
            return Err(Error::IllegalTransition(
                "workout is already completed".into(),
            ));
        }

        if self.status == SessionStatus::Paused {
            if let Some(paused_at) = self.last_pause_time {
                self.total_pause_duration += seconds_between(paused_at, now);
            }
            self.status = SessionStatus::Active;
            self.last_pause_time = None;
        }

        self.duration_seconds = self.current_duration(now);
        self.status = SessionStatus::Completed;
        self.end_time = Some(now);
        self.last_pause_time = None;
        Ok(())
    }

    /// Record `n` completed reps, rolling the set over when the target is
    /// reached. Returns whether this call rolled the set over.
    pub fn apply_completed_reps(&mut self, n: u32, target_reps: u32, now: DateTime<Utc>) -> bool {
        self.current_set_reps += n;
        self.total_reps_completed += n;

        let mut rolled_over = false;
        if self.current_set_reps >= target_reps {
            self.current_set += 1;
            self.current_set_reps = 0;
            rolled_over = true;
        }

        self.duration_seconds = self.current_duration(now);
        rolled_over
    }

    /// Record `n` failed rep attempts. Failures never affect set progress.
    pub fn apply_failed_reps(&mut self, n: u32, now: DateTime<Utc>) {
        self.total_reps_failed += n;
        self.duration_seconds = self.current_duration(now);
    }

    /// Manually subtract `n` reps, flooring both counters at 0.
    /// Failure counts are untouched.
    pub fn apply_subtracted_reps(&mut self, n: u32, now: DateTime<Utc>) {
        self.current_set_reps = self.current_set_reps.saturating_sub(n);
        self.total_reps_completed = self.total_reps_completed.saturating_sub(n);
        self.duration_seconds = self.current_duration(now);
    }

    /// Point-in-time status read model. No mutation.
    pub fn status_snapshot(&self, now: DateTime<Utc>) -> SessionStatusSnapshot {
        let duration = self.current_duration(now);
        SessionStatusSnapshot {
            session_id: self.session_id,
            status: self.status,
            current_set: self.current_set,
            current_set_reps: self.current_set_reps,
            total_reps_completed: self.total_reps_completed,
            total_calories_burned: self.total_calories_burned,
            duration_seconds: duration,
            duration_minutes: (duration / 60.0 * 100.0).round() / 100.0,
            start_time: self.start_time.to_rfc3339(),
            is_paused: self.status == SessionStatus::Paused,
        }
    }

    /// Whether the session still accepts rep events
    pub fn is_open(&self) -> bool {
        matches!(self.status, SessionStatus::Active | SessionStatus::Paused)
    }
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}
