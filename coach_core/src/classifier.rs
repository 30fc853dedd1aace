//! Pose classifier interface.
//!
//! The classification model itself is an external collaborator: a pure,
//! stateless function from a fixed-length landmark array to a classified
//! pose, replaceable behind [`PoseClassifier`]. This crate ships only a
//! scripted replay implementation for simulation and tests.

use crate::{ClassifiedPose, Error, ExerciseKind, Position, Result, POSE_LANDMARKS};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Contract for the external pose classification model.
///
/// Implementations must be safe to call from the connection dispatch
/// loop and must answer within bounded latency; they hold no per-session
/// state.
pub trait PoseClassifier: Send + Sync {
    fn classify(&self, landmarks: &[[f32; 3]], kind: ExerciseKind) -> Result<ClassifiedPose>;
}

/// Validate the landmark array shape shared by all classifier inputs
pub fn check_landmarks(landmarks: &[[f32; 3]]) -> Result<()> {
    if landmarks.len() != POSE_LANDMARKS {
        return Err(Error::Protocol(format!(
            "expected {} pose landmarks, got {}",
            POSE_LANDMARKS,
            landmarks.len()
        )));
    }
    Ok(())
}

/// A neutral landmark frame of the expected shape, for simulation input
pub fn blank_landmarks() -> Vec<[f32; 3]> {
    vec![[0.0; 3]; POSE_LANDMARKS]
}

/// Replays a pre-scripted sequence of classified poses, ignoring the
/// landmark content. Used by the CLI simulator and tests; once the
/// script is exhausted every frame classifies as inconclusive.
pub struct ScriptedClassifier {
    frames: Mutex<VecDeque<ClassifiedPose>>,
}

impl ScriptedClassifier {
    pub fn new(frames: Vec<ClassifiedPose>) -> Self {
        Self {
            frames: Mutex::new(frames.into()),
        }
    }

    /// Number of scripted frames not yet consumed
    pub fn remaining(&self) -> usize {
        self.frames.lock().map(|f| f.len()).unwrap_or(0)
    }
}

impl PoseClassifier for ScriptedClassifier {
    fn classify(&self, landmarks: &[[f32; 3]], kind: ExerciseKind) -> Result<ClassifiedPose> {
        check_landmarks(landmarks)?;

        let next = self
            .frames
            .lock()
            .map_err(|_| Error::Other("classifier script lock poisoned".into()))?
            .pop_front();

        Ok(next.unwrap_or(match kind {
            ExerciseKind::Squat => ClassifiedPose::TwoClass {
                position: Position::Up,
                confidence: 0.0,
            },
            ExerciseKind::Pushup => ClassifiedPose::ThreeClass {
                down: 0.0,
                up: 0.0,
                mid: 0.0,
            },
        }))
    }
}
