//! Core domain types for the workout coaching engine.
//!
//! This module defines the fundamental types used throughout the system:
//! - Exercises, levels and the classified poses produced for them
//! - Workout sessions and their status/timer fields
//! - Per-user exercise progression
//! - Socket sessions binding a live connection to a workout session

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Workout session identifier (assigned by the store)
pub type SessionId = u64;

/// User identifier
pub type UserId = u64;

/// Exercise identifier
pub type ExerciseId = u32;

/// Number of pose landmarks expected per frame (MediaPipe full-body set)
pub const POSE_LANDMARKS: usize = 33;

// ============================================================================
// Exercise Types
// ============================================================================

/// Kind of tracked exercise; selects the rep counter state machine
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExerciseKind {
    Pushup,
    Squat,
}

/// An exercise definition from the catalog
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Exercise {
    pub id: ExerciseId,
    pub name: String,
    pub kind: ExerciseKind,
    /// Calories burned per completed repetition
    pub calories_per_rep: f64,
}

/// Per-(exercise, level) targets. Immutable once seeded.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExerciseLevel {
    pub exercise_id: ExerciseId,
    pub level: u32,
    pub target_sets: u32,
    pub target_reps: u32,
    pub rest_seconds: u32,
    pub experience_points: u32,
}

// ============================================================================
// Classified Pose Types
// ============================================================================

/// Discrete body position label produced by the classifier
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    Down,
    Up,
    Mid,
}

/// One classified pose frame, shaped by the classifier variant that
/// produced it. Two-class output drives the squat counter, three-class
/// per-position probabilities drive the push-up counter.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum ClassifiedPose {
    TwoClass { position: Position, confidence: f32 },
    ThreeClass { down: f32, up: f32, mid: f32 },
}

// ============================================================================
// Session and Status Types
// ============================================================================

/// Lifecycle status of a workout session
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Paused,
    Completed,
}

/// One attempt at one exercise level, from start to completion.
///
/// The durable source of truth for rep/set counts and timer accounting.
/// Sessions are append-only in the store; they are mutated through the
/// lifecycle manager and orchestrator but never deleted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkoutSession {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub exercise_id: ExerciseId,
    pub level: u32,
    pub status: SessionStatus,
    pub current_set: u32,
    pub current_set_reps: u32,
    pub total_reps_completed: u32,
    pub total_reps_failed: u32,
    pub total_calories_burned: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_pause_time: Option<DateTime<Utc>>,
    /// Cumulative seconds spent paused across all pause/resume cycles
    pub total_pause_duration: f64,
    /// Last computed elapsed active time in seconds
    pub duration_seconds: f64,
}

/// Per-(user, exercise) progression record, mutated only at completion
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserExerciseProgress {
    pub user_id: UserId,
    pub exercise_id: ExerciseId,
    /// Highest level the user may currently attempt
    pub current_level: u32,
    pub highest_completed_level: u32,
    pub total_sessions: u32,
    pub total_reps_completed: u32,
    /// Total active exercise time in seconds
    pub total_time_exercised: u64,
    pub total_experience_points: u32,
    pub last_performed: Option<DateTime<Utc>>,
}

impl UserExerciseProgress {
    /// Fresh progress record for a user who has never completed this exercise
    pub fn new(user_id: UserId, exercise_id: ExerciseId) -> Self {
        Self {
            user_id,
            exercise_id,
            current_level: 1,
            highest_completed_level: 0,
            total_sessions: 0,
            total_reps_completed: 0,
            total_time_exercised: 0,
            total_experience_points: 0,
            last_performed: None,
        }
    }
}

// ============================================================================
// Socket Session Types
// ============================================================================

/// Status of the live connection bound to a workout session
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Pending,
    Connected,
    Disconnected,
}

/// Live-connection identity, one-to-one with a WorkoutSession
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SocketSession {
    pub socket_session_id: Uuid,
    pub session_id: SessionId,
    pub user_id: UserId,
    pub connection_status: ConnectionStatus,
    pub last_heartbeat: DateTime<Utc>,
}

impl SocketSession {
    /// Create a pending socket session for a freshly started workout
    pub fn new(session_id: SessionId, user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            socket_session_id: Uuid::new_v4(),
            session_id,
            user_id,
            connection_status: ConnectionStatus::Pending,
            last_heartbeat: now,
        }
    }
}

// ============================================================================
// Read Models
// ============================================================================

/// A workout session together with its catalog rows, as sent to clients
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionDetail {
    pub session: WorkoutSession,
    pub exercise: Exercise,
    pub level: ExerciseLevel,
}

/// Summary returned by workout completion
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompletionSummary {
    pub session_id: SessionId,
    pub total_reps_completed: u32,
    pub total_reps_failed: u32,
    pub total_calories_burned: f64,
    pub duration_seconds: f64,
    pub duration_minutes: f64,
    pub experience_gained: u32,
}
