//! Catalog/progress/session store interface and in-memory implementation.
//!
//! Persistent storage is an external collaborator; this module defines
//! the synchronous contract the engine depends on and an in-memory
//! implementation used by the simulator and tests. All session mutations
//! go through [`Store::update_session`], which applies the closure
//! atomically under the store's write lock — the per-session critical
//! section the concurrency model requires. Reads clone under the read
//! lock and therefore observe a consistent point-in-time snapshot.

use crate::{
    catalog, ConnectionStatus, Error, Exercise, ExerciseId, ExerciseLevel, Result, SessionDetail,
    SessionId, SessionStatus, SocketSession, UserExerciseProgress, UserId, WorkoutSession,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// Synchronous store contract for catalog rows, workout sessions,
/// socket sessions and per-user progress. Failures propagate as errors;
/// no partial-failure semantics and no retries at this layer.
pub trait Store: Send + Sync {
    fn exercise(&self, id: ExerciseId) -> Result<Exercise>;
    fn level(&self, exercise_id: ExerciseId, level: u32) -> Result<ExerciseLevel>;

    /// Insert a new session, assigning and returning its id
    fn insert_session(&self, session: WorkoutSession) -> Result<SessionId>;
    fn session(&self, id: SessionId) -> Result<WorkoutSession>;

    /// Apply `mutate` to the session atomically and return the updated row
    fn update_session(
        &self,
        id: SessionId,
        mutate: &mut dyn FnMut(&mut WorkoutSession) -> Result<()>,
    ) -> Result<WorkoutSession>;

    /// The user's session in active or paused status, if any
    fn active_session_for(&self, user_id: UserId) -> Result<Option<WorkoutSession>>;

    fn progress(&self, user_id: UserId, exercise_id: ExerciseId)
        -> Result<Option<UserExerciseProgress>>;
    fn upsert_progress(&self, progress: UserExerciseProgress) -> Result<()>;

    fn insert_socket_session(&self, socket: SocketSession) -> Result<()>;
    fn socket_session(&self, id: Uuid) -> Result<SocketSession>;
    fn set_connection_status(
        &self,
        id: Uuid,
        status: ConnectionStatus,
        now: DateTime<Utc>,
    ) -> Result<()>;
    fn touch_heartbeat(&self, id: Uuid, now: DateTime<Utc>) -> Result<()>;

    /// Session joined with its catalog rows, for outbound snapshots
    fn session_detail(&self, id: SessionId) -> Result<SessionDetail> {
        let session = self.session(id)?;
        let exercise = self.exercise(session.exercise_id)?;
        let level = self.level(session.exercise_id, session.level)?;
        Ok(SessionDetail {
            session,
            exercise,
            level,
        })
    }
}

#[derive(Default)]
struct Inner {
    exercises: HashMap<ExerciseId, Exercise>,
    levels: HashMap<(ExerciseId, u32), ExerciseLevel>,
    sessions: HashMap<SessionId, WorkoutSession>,
    progress: HashMap<(UserId, ExerciseId), UserExerciseProgress>,
    sockets: HashMap<Uuid, SocketSession>,
    next_session_id: SessionId,
}

/// In-memory store over RwLock'd maps. Sessions are append-only: rows
/// are inserted and mutated but never removed.
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                next_session_id: 1,
                ..Inner::default()
            }),
        }
    }

    /// New store seeded with the default exercise catalog
    pub fn with_default_catalog() -> Self {
        let store = Self::new();
        {
            let mut inner = store.write();
            let cat = catalog::default_catalog();
            inner.exercises = cat.exercises.clone();
            inner.levels = cat.levels.clone();
        }
        store
    }

    /// Seed a single exercise (tests)
    pub fn seed_exercise(&self, exercise: Exercise) {
        self.write().exercises.insert(exercise.id, exercise);
    }

    /// Seed a single level (tests)
    pub fn seed_level(&self, level: ExerciseLevel) {
        self.write()
            .levels
            .insert((level.exercise_id, level.level), level);
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        // Lock poisoning only happens if a writer panicked; propagating the
        // inner data is still sound for this store.
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    fn exercise(&self, id: ExerciseId) -> Result<Exercise> {
        self.read()
            .exercises
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("exercise {}", id)))
    }

    fn level(&self, exercise_id: ExerciseId, level: u32) -> Result<ExerciseLevel> {
        self.read()
            .levels
            .get(&(exercise_id, level))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("exercise {} level {}", exercise_id, level)))
    }

    fn insert_session(&self, mut session: WorkoutSession) -> Result<SessionId> {
        let mut inner = self.write();
        let id = inner.next_session_id;
        inner.next_session_id += 1;
        session.session_id = id;
        inner.sessions.insert(id, session);
        Ok(id)
    }

    fn session(&self, id: SessionId) -> Result<WorkoutSession> {
        self.read()
            .sessions
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("session {}", id)))
    }

    fn update_session(
        &self,
        id: SessionId,
        mutate: &mut dyn FnMut(&mut WorkoutSession) -> Result<()>,
    ) -> Result<WorkoutSession> {
        let mut inner = self.write();
        let session = inner
            .sessions
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("session {}", id)))?;
        mutate(session)?;
        Ok(session.clone())
    }

    fn active_session_for(&self, user_id: UserId) -> Result<Option<WorkoutSession>> {
        Ok(self
            .read()
            .sessions
            .values()
            .find(|s| {
                s.user_id == user_id
                    && matches!(s.status, SessionStatus::Active | SessionStatus::Paused)
            })
            .cloned())
    }

    fn progress(
        &self,
        user_id: UserId,
        exercise_id: ExerciseId,
    ) -> Result<Option<UserExerciseProgress>> {
        Ok(self.read().progress.get(&(user_id, exercise_id)).cloned())
    }

    fn upsert_progress(&self, progress: UserExerciseProgress) -> Result<()> {
        self.write()
            .progress
            .insert((progress.user_id, progress.exercise_id), progress);
        Ok(())
    }

    fn insert_socket_session(&self, socket: SocketSession) -> Result<()> {
        self.write()
            .sockets
            .insert(socket.socket_session_id, socket);
        Ok(())
    }

    fn socket_session(&self, id: Uuid) -> Result<SocketSession> {
        self.read()
            .sockets
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("socket session {}", id)))
    }

    fn set_connection_status(
        &self,
        id: Uuid,
        status: ConnectionStatus,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.write();
        let socket = inner
            .sockets
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("socket session {}", id)))?;
        socket.connection_status = status;
        socket.last_heartbeat = now;
        Ok(())
    }

    fn touch_heartbeat(&self, id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let mut inner = self.write();
        let socket = inner
            .sockets
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("socket session {}", id)))?;
        socket.last_heartbeat = now;
        Ok(())
    }
}
