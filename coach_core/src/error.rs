//! Error types for the coach_core library.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for coach_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Session status transition that is not allowed (pause while paused, etc.).
    /// Recovered locally and surfaced as an informational message.
    #[error("illegal session transition: {0}")]
    IllegalTransition(String),

    /// A referenced entity (session, socket session, exercise, level) is absent
    #[error("{0} not found")]
    NotFound(String),

    /// The user already has a session in active or paused status
    #[error("an active workout session already exists (session {0})")]
    ActiveSessionExists(u64),

    /// The requested level is above what the user has unlocked
    #[error("level {requested} is locked (maximum available level is {allowed})")]
    LevelLocked { requested: u32, allowed: u32 },

    /// Malformed inbound message envelope or payload
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Durable store failure
    #[error("store error: {0}")]
    Store(String),

    /// The session's connection has been closed; no further work is accepted
    #[error("session closed")]
    Closed,

    /// Generic error
    #[error("{0}")]
    Other(String),
}
