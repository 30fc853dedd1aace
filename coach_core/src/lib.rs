#![forbid(unsafe_code)]

//! Core engine for the Repcoach real-time workout coaching system.
//!
//! This crate provides:
//! - Domain types (exercises, levels, sessions, progression)
//! - Workout session timer model and rep accounting
//! - Rep counter state machines (squat, push-up)
//! - Per-session counting pipeline (frame channel + evaluator thread)
//! - Message-driven session orchestration
//! - Workout lifecycle management and progression unlock
//! - Store contract with an in-memory implementation
//! - Append-only workout history (JSONL + CSV export)

pub mod types;
pub mod error;
pub mod catalog;
pub mod config;
pub mod logging;
pub mod session;
pub mod counter;
pub mod classifier;
pub mod store;
pub mod pipeline;
pub mod protocol;
pub mod lifecycle;
pub mod orchestrator;
pub mod history;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use catalog::{build_default_catalog, default_catalog};
pub use config::Config;
pub use classifier::{PoseClassifier, ScriptedClassifier};
pub use counter::{counter_for, RepCounter, RepEvent, RepOutcome, DEFAULT_THRESHOLD};
pub use history::{HistorySink, JsonlSink, SessionRecord};
pub use lifecycle::{finalize_workout, start_workout};
pub use orchestrator::{Connection, SessionRegistry};
pub use pipeline::{CountingPipeline, SessionFlags};
pub use protocol::{parse_inbound, Inbound, Outbound, RepResult};
pub use store::{MemoryStore, Store};
