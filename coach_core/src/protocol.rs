//! Inbound and outbound message envelopes.
//!
//! Every wire message is a `{"type": ..., "data": ...}` envelope.
//! Inbound parsing is two-stage: the raw envelope first, then a
//! type-keyed payload decode. Unknown types yield no message at all
//! (ignored by the dispatch loop), while a recognized type with a
//! malformed payload is a protocol error fatal to that single message.

use crate::session::SessionStatusSnapshot;
use crate::{Error, Result, SessionDetail};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ============================================================================
// Inbound
// ============================================================================

/// Control and data messages accepted from the client
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    Heartbeat { timestamp: Option<String> },
    PoseFrame { landmarks: Vec<[f32; 3]> },
    ManualRepAdd { reps: u32 },
    ManualRepSubtract { reps: u32 },
    GetStatus,
    Pause,
    Resume,
    Stop,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct HeartbeatData {
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Deserialize)]
struct PoseFrameData {
    landmarks: Vec<[f32; 3]>,
}

#[derive(Deserialize)]
struct RepAdjustData {
    #[serde(default = "default_reps")]
    reps: u32,
}

fn default_reps() -> u32 {
    1
}

/// Parse one raw frame into a typed inbound message.
///
/// Returns `Ok(None)` for unknown message types; returns
/// `Error::Protocol` for unparseable envelopes or bad payloads.
pub fn parse_inbound(text: &str) -> Result<Option<Inbound>> {
    let envelope: Envelope = serde_json::from_str(text)
        .map_err(|e| Error::Protocol(format!("malformed envelope: {}", e)))?;

    let message = match envelope.kind.as_str() {
        "heartbeat" => {
            let data: HeartbeatData = decode(envelope.data)?;
            Inbound::Heartbeat {
                timestamp: data.timestamp,
            }
        }
        "pose_frame" => {
            let data: PoseFrameData = decode(envelope.data)?;
            Inbound::PoseFrame {
                landmarks: data.landmarks,
            }
        }
        "manual_rep_add" => {
            let data: RepAdjustData = decode(envelope.data)?;
            Inbound::ManualRepAdd { reps: data.reps }
        }
        "manual_rep_subtract" => {
            let data: RepAdjustData = decode(envelope.data)?;
            Inbound::ManualRepSubtract { reps: data.reps }
        }
        "get_status" => Inbound::GetStatus,
        "pause" => Inbound::Pause,
        "resume" => Inbound::Resume,
        "stop" => Inbound::Stop,
        other => {
            tracing::debug!(kind = other, "ignoring unknown inbound message type");
            return Ok(None);
        }
    };

    Ok(Some(message))
}

fn decode<T: serde::de::DeserializeOwned>(data: Value) -> Result<T> {
    // An absent data field arrives as null; treat it as an empty payload
    let data = if data.is_null() {
        Value::Object(Default::default())
    } else {
        data
    };
    serde_json::from_value(data).map_err(|e| Error::Protocol(format!("bad payload: {}", e)))
}

impl Inbound {
    /// Serialize back into the wire envelope (used by the simulator)
    pub fn to_wire(&self) -> String {
        let (kind, data) = match self {
            Inbound::Heartbeat { timestamp } => (
                "heartbeat",
                serde_json::json!({ "timestamp": timestamp }),
            ),
            Inbound::PoseFrame { landmarks } => (
                "pose_frame",
                serde_json::json!({ "landmarks": landmarks }),
            ),
            Inbound::ManualRepAdd { reps } => {
                ("manual_rep_add", serde_json::json!({ "reps": reps }))
            }
            Inbound::ManualRepSubtract { reps } => {
                ("manual_rep_subtract", serde_json::json!({ "reps": reps }))
            }
            Inbound::GetStatus => ("get_status", serde_json::json!({})),
            Inbound::Pause => ("pause", serde_json::json!({})),
            Inbound::Resume => ("resume", serde_json::json!({})),
            Inbound::Stop => ("stop", serde_json::json!({})),
        };
        serde_json::json!({ "type": kind, "data": data }).to_string()
    }
}

// ============================================================================
// Outbound
// ============================================================================

/// Payload of a rep-result message
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RepResult {
    pub rep_detected: bool,
    pub failed_detected: bool,
    pub set_completed: bool,
    pub workout_completed: bool,
    pub feedback_message: String,
    pub session: SessionDetail,
}

/// Messages pushed back to the client
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Outbound {
    ConnectionEstablished {
        socket_session_id: Uuid,
        message: String,
        server_time: String,
    },
    HeartbeatAck {
        timestamp: String,
    },
    RepSuccess(RepResult),
    SessionStatus(SessionStatusSnapshot),
    /// Empty payload; signals the connection is about to close
    WorkoutCompleted {},
}
