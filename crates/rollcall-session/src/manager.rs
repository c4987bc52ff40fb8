//! The session manager: opens, rotates, displays, and ends sessions.
//!
//! # Ownership of state
//!
//! The manager caches nothing about a session. The current and previous
//! tokens live in the [`SessionStore`] record, which is what the verifier
//! reads, so the display and the verifier can never disagree. The only
//! thing the manager keeps is the cancellation handle of each session's
//! rotation task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use rollcall_protocol::{
    Clock, CourseId, InstructorId, PresenceToken, Session, SessionId,
    SessionStatus, TokenCodec,
};
use rollcall_store::SessionStore;
use tokio::sync::Mutex;

use crate::scheduler::{rotate_token, spawn_rotation, RotationHandle};
use crate::{DisplayToken, SessionConfig, SessionError};

/// Manages every attendance session's lifecycle.
///
/// ## Lifecycle
///
/// ```text
/// start() ──→ [Active] ──rotate() / timer──→ [Active] ──end()──→ [Ended]
///                                                                (terminal)
/// ```
///
/// Cheap to clone; clones share the store, codec, clock, and the table of
/// running rotation tasks.
pub struct SessionManager<S, C> {
    store: Arc<S>,
    codec: Arc<TokenCodec>,
    clock: Arc<C>,
    config: SessionConfig,
    /// Running rotation tasks, keyed by session.
    rotations: Arc<Mutex<HashMap<SessionId, RotationHandle>>>,
}

impl<S, C> Clone for SessionManager<S, C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            codec: Arc::clone(&self.codec),
            clock: Arc::clone(&self.clock),
            config: self.config.clone(),
            rotations: Arc::clone(&self.rotations),
        }
    }
}

impl<S: SessionStore, C: Clock> SessionManager<S, C> {
    /// Creates a manager. `config` is validated here.
    pub fn new(
        store: Arc<S>,
        codec: Arc<TokenCodec>,
        clock: Arc<C>,
        config: SessionConfig,
    ) -> Self {
        let config = config.validated();
        if codec.ttl() <= config.rotation_interval {
            tracing::warn!(
                ttl_secs = codec.ttl().as_secs(),
                interval_secs = config.rotation_interval.as_secs(),
                "token codec ttl leaves no grace after rotation"
            );
        }
        Self {
            store,
            codec,
            clock,
            config,
            rotations: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The effective (validated) configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Opens a session, issues its first token, and arms its rotation.
    ///
    /// `late_threshold_minutes` defaults to the configured value and is
    /// capped at the configured maximum.
    ///
    /// # Errors
    /// [`SessionError::Conflict`] if the instructor already has an active
    /// session for this course.
    pub async fn start(
        &self,
        course_id: CourseId,
        owner_id: InstructorId,
        late_threshold_minutes: Option<u32>,
    ) -> Result<Session, SessionError> {
        // Held across create + spawn so a concurrent `end` can't run
        // between them and miss the task.
        let mut rotations = self.rotations.lock().await;
        // Loops that stopped on their own, e.g. after an end through the store.
        rotations.retain(|_, handle| !handle.is_finished());

        let now = self.clock.now();
        let id = SessionId::new();
        let session = Session {
            id,
            course_id,
            owner_id,
            session_date: now.date_naive(),
            started_at: now,
            ended_at: None,
            current_token: self.codec.issue(id, now),
            previous_token: None,
            rotations: 0,
            late_threshold_minutes: self.config.late_threshold(late_threshold_minutes),
            status: SessionStatus::Active,
        };
        let session = self.store.create_session(session).await?;

        let handle = spawn_rotation(
            id,
            Arc::clone(&self.store),
            Arc::clone(&self.codec),
            Arc::clone(&self.clock),
            self.config.rotation_config(),
        );
        rotations.insert(id, handle);

        tracing::info!(
            session_id = %id,
            %course_id,
            %owner_id,
            late_threshold_minutes = session.late_threshold_minutes,
            "session started"
        );
        Ok(session)
    }

    /// Rotates the token immediately, outside the timer's schedule.
    ///
    /// The replaced token stays acceptable as the previous token until
    /// the next rotation or its own expiry.
    ///
    /// # Errors
    /// [`SessionError::NotActive`] if the session has ended.
    pub async fn rotate(
        &self,
        session_id: SessionId,
    ) -> Result<PresenceToken, SessionError> {
        let token =
            rotate_token(&*self.store, &self.codec, &*self.clock, session_id).await?;
        tracing::debug!(%session_id, issued_at = token.issued_at_millis, "token rotated on demand");
        Ok(token)
    }

    /// Ends the session and stops its rotation task before returning.
    ///
    /// Idempotent: ending an ended session returns it unchanged.
    ///
    /// # Errors
    /// [`SessionError::NotFound`] for an unknown id.
    pub async fn end(&self, session_id: SessionId) -> Result<Session, SessionError> {
        let session = self.store.end_session(session_id, self.clock.now()).await?;

        let handle = self.rotations.lock().await.remove(&session_id);
        if let Some(handle) = handle {
            handle.stop().await;
            tracing::info!(
                %session_id,
                rotations = session.rotations,
                "session ended"
            );
        }
        Ok(session)
    }

    /// The current token of an active session, serialized for display.
    pub async fn display(
        &self,
        session_id: SessionId,
    ) -> Result<DisplayToken, SessionError> {
        let session = self.session(session_id).await?;
        if !session.is_active() {
            return Err(SessionError::NotActive(session_id));
        }

        let token = &session.current_token;
        let now = self.clock.now();
        let interval = self.config.rotation_interval;
        let rotates_at = TimeDelta::from_std(interval)
            .ok()
            .and_then(|delta| token.issued_at().checked_add_signed(delta))
            .unwrap_or(token.expires_at);
        let until_rotation = (rotates_at - now).to_std().unwrap_or(Duration::ZERO);
        let remaining = token.remaining_at(now).min(until_rotation);
        Ok(DisplayToken {
            session_id,
            raw: self.codec.encode(token)?,
            expires_at: token.expires_at,
            seconds_remaining: remaining.as_secs(),
            window_secs: interval.min(self.codec.ttl()).as_secs(),
            rotation: session.rotations,
        })
    }

    /// Loads a session by id.
    pub async fn session(&self, session_id: SessionId) -> Result<Session, SessionError> {
        self.store
            .get_session(session_id)
            .await?
            .ok_or(SessionError::NotFound(session_id))
    }

    /// The instructor's active session for the course, if any.
    pub async fn active_session(
        &self,
        course_id: CourseId,
        owner_id: InstructorId,
    ) -> Result<Option<Session>, SessionError> {
        Ok(self.store.get_active_session(course_id, owner_id).await?)
    }

    /// Whether a rotation task is still running for the session.
    pub async fn is_rotating(&self, session_id: SessionId) -> bool {
        self.rotations
            .lock()
            .await
            .get(&session_id)
            .is_some_and(|h| !h.is_finished())
    }

    /// Number of rotation tasks the manager is tracking. Loops that
    /// stopped on their own are dropped on the next `start`.
    pub async fn rotating_sessions(&self) -> usize {
        self.rotations.lock().await.len()
    }

    /// Stops every rotation task. Sessions stay active in the store.
    pub async fn shutdown(&self) {
        let handles: Vec<(SessionId, RotationHandle)> =
            self.rotations.lock().await.drain().collect();
        let count = handles.len();
        for (_, handle) in handles {
            handle.stop().await;
        }
        tracing::info!(stopped = count, "session manager shut down");
    }
}
