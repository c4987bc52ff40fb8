//! `AttendanceService` builder and facade.
//!
//! This is the entry point for embedding Rollcall. It wires the layers
//! together: store → codec → session manager → verifier + roster feed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rollcall_attendance::{AttendanceVerifier, RosterFeed, RosterSubscription};
use rollcall_protocol::{
    AttendanceRecord, Clock, CourseId, InstructorId, PresenceToken,
    RosterSnapshot, Session, SessionId, StudentId, SystemClock, TokenCodec,
};
use rollcall_session::{DisplayToken, SessionManager};
use rollcall_store::{MemoryStore, SessionStore};
use serde::Serialize;

use crate::{RollcallConfig, RollcallError};

/// Builder for an [`AttendanceService`].
///
/// Defaults to an in-memory store, the system clock, and
/// [`RollcallConfig::default`] (which generates a signing key).
///
/// # Example
///
/// ```rust,no_run
/// use rollcall::prelude::*;
///
/// # fn run() -> Result<(), RollcallError> {
/// let _service = AttendanceService::builder()
///     .config(RollcallConfig::from_env()?)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct AttendanceServiceBuilder<S, C> {
    config: RollcallConfig,
    store: S,
    clock: C,
}

impl AttendanceServiceBuilder<MemoryStore, SystemClock> {
    /// Creates a builder with default settings.
    pub fn new() -> Self {
        Self {
            config: RollcallConfig::default(),
            store: MemoryStore::new(),
            clock: SystemClock,
        }
    }
}

impl Default for AttendanceServiceBuilder<MemoryStore, SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, C> AttendanceServiceBuilder<S, C> {
    /// Sets the configuration.
    pub fn config(mut self, config: RollcallConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses `store` for persistence.
    pub fn store<S2: SessionStore>(self, store: S2) -> AttendanceServiceBuilder<S2, C> {
        AttendanceServiceBuilder {
            config: self.config,
            store,
            clock: self.clock,
        }
    }

    /// Uses `clock` for expiry and lateness.
    pub fn clock<C2: Clock>(self, clock: C2) -> AttendanceServiceBuilder<S, C2> {
        AttendanceServiceBuilder {
            config: self.config,
            store: self.store,
            clock,
        }
    }
}

impl<S: SessionStore, C: Clock> AttendanceServiceBuilder<S, C> {
    /// Builds the service. Must be called inside a Tokio runtime once
    /// sessions are started, since each one spawns its rotation task.
    ///
    /// # Errors
    /// [`RollcallError::Protocol`] if the signing key is unusable.
    pub fn build(self) -> Result<AttendanceService<S, C>, RollcallError> {
        let session_config = self.config.session.clone().validated();
        let codec = TokenCodec::new(&self.config.signing_key)?
            .with_ttl(session_config.token_ttl);
        let codec = Arc::new(codec);
        let store = Arc::new(self.store);
        let clock = Arc::new(self.clock);

        let feed = RosterFeed::new(Arc::clone(&store), self.config.feed.clone());
        let sessions = SessionManager::new(
            Arc::clone(&store),
            Arc::clone(&codec),
            Arc::clone(&clock),
            session_config,
        );
        let verifier = AttendanceVerifier::new(
            Arc::clone(&store),
            codec,
            clock,
            feed.clone(),
        );

        tracing::debug!(
            rotation_secs = sessions.config().rotation_interval.as_secs(),
            token_ttl_secs = sessions.config().token_ttl.as_secs(),
            "attendance service built"
        );

        Ok(AttendanceService {
            store,
            sessions,
            verifier,
            feed,
        })
    }
}

/// Aggregate attendance over every session of a course.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CourseSummary {
    pub course_id: CourseId,
    pub total_sessions: usize,
    /// Students with an active enrollment.
    pub total_students: usize,
    pub total_records: usize,
    pub late_records: usize,
    /// Records as a percentage of possible records, rounded.
    pub average_attendance: u32,
}

impl CourseSummary {
    fn compute(
        course_id: CourseId,
        total_sessions: usize,
        total_students: usize,
        total_records: usize,
        late_records: usize,
    ) -> Self {
        let possible = total_sessions * total_students;
        let average_attendance = if possible == 0 {
            0
        } else {
            ((total_records as f64 / possible as f64) * 100.0).round() as u32
        };
        Self {
            course_id,
            total_sessions,
            total_students,
            total_records,
            late_records,
            average_attendance,
        }
    }
}

/// The attendance core behind one handle.
///
/// Cheap to clone. All methods take `&self` and are safe to call from
/// any number of tasks.
pub struct AttendanceService<S, C> {
    store: Arc<S>,
    sessions: SessionManager<S, C>,
    verifier: AttendanceVerifier<S, C>,
    feed: RosterFeed<S>,
}

impl<S, C> Clone for AttendanceService<S, C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            sessions: self.sessions.clone(),
            verifier: self.verifier.clone(),
            feed: self.feed.clone(),
        }
    }
}

impl AttendanceService<MemoryStore, SystemClock> {
    /// Creates a new builder.
    pub fn builder() -> AttendanceServiceBuilder<MemoryStore, SystemClock> {
        AttendanceServiceBuilder::new()
    }
}

impl<S: SessionStore, C: Clock> AttendanceService<S, C> {
    /// The backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    // -- Instructor side ---------------------------------------------------

    /// Opens a session and starts rotating its token.
    pub async fn start(
        &self,
        course_id: CourseId,
        owner_id: InstructorId,
        late_threshold_minutes: Option<u32>,
    ) -> Result<Session, RollcallError> {
        Ok(self
            .sessions
            .start(course_id, owner_id, late_threshold_minutes)
            .await?)
    }

    /// Issues a fresh token now.
    pub async fn rotate(&self, session_id: SessionId) -> Result<PresenceToken, RollcallError> {
        Ok(self.sessions.rotate(session_id).await?)
    }

    /// Ends the session, stops its rotation, and closes its roster feed.
    pub async fn end(&self, session_id: SessionId) -> Result<Session, RollcallError> {
        let session = self.sessions.end(session_id).await?;
        self.feed.close(session_id, session.ended_at).await;
        Ok(session)
    }

    /// The current token for the display surface.
    pub async fn display(&self, session_id: SessionId) -> Result<DisplayToken, RollcallError> {
        Ok(self.sessions.display(session_id).await?)
    }

    /// Marks a student present without a scan.
    pub async fn mark_manual(
        &self,
        session_id: SessionId,
        owner_id: InstructorId,
        student_id: StudentId,
    ) -> Result<AttendanceRecord, RollcallError> {
        Ok(self
            .verifier
            .mark_manual(session_id, owner_id, student_id)
            .await?)
    }

    /// Loads a session by id.
    pub async fn session(&self, session_id: SessionId) -> Result<Session, RollcallError> {
        Ok(self.sessions.session(session_id).await?)
    }

    /// The instructor's active session for a course, if any.
    pub async fn active_session(
        &self,
        course_id: CourseId,
        owner_id: InstructorId,
    ) -> Result<Option<Session>, RollcallError> {
        Ok(self.sessions.active_session(course_id, owner_id).await?)
    }

    // -- Student side ------------------------------------------------------

    /// Verifies a scanned token and records attendance.
    pub async fn submit(
        &self,
        raw_token: &str,
        student_id: StudentId,
    ) -> Result<AttendanceRecord, RollcallError> {
        Ok(self.verifier.submit(raw_token, student_id).await?)
    }

    /// As [`submit`](Self::submit), as of `now`.
    pub async fn submit_at(
        &self,
        raw_token: &str,
        student_id: StudentId,
        now: DateTime<Utc>,
    ) -> Result<AttendanceRecord, RollcallError> {
        Ok(self.verifier.submit_at(raw_token, student_id, now).await?)
    }

    /// Every record of one student, newest first.
    pub async fn student_history(
        &self,
        student_id: StudentId,
    ) -> Result<Vec<AttendanceRecord>, RollcallError> {
        Ok(self.store.list_student_records(student_id).await?)
    }

    // -- Dashboards --------------------------------------------------------

    /// Subscribes to a session's live roster.
    pub async fn subscribe(
        &self,
        session_id: SessionId,
    ) -> Result<RosterSubscription, RollcallError> {
        Ok(self.feed.subscribe(session_id).await?)
    }

    /// A session's roster as of now.
    pub async fn snapshot(&self, session_id: SessionId) -> Result<RosterSnapshot, RollcallError> {
        Ok(self.feed.snapshot(session_id).await?)
    }

    /// Attendance totals across every session of a course.
    pub async fn course_summary(
        &self,
        course_id: CourseId,
    ) -> Result<CourseSummary, RollcallError> {
        let sessions = self.store.list_course_sessions(course_id).await?;
        let total_students = self.store.count_enrolled(course_id).await?;

        let mut total_records = 0;
        let mut late_records = 0;
        for session in &sessions {
            let records = self.store.list_records(session.id).await?;
            total_records += records.len();
            late_records += records.iter().filter(|r| r.is_late).count();
        }

        Ok(CourseSummary::compute(
            course_id,
            sessions.len(),
            total_students,
            total_records,
            late_records,
        ))
    }

    /// Stops every rotation task and roster actor. Sessions stay active
    /// in the store; a restarted service does not resume their rotation.
    pub async fn shutdown(&self) {
        self.sessions.shutdown().await;
        self.feed.shutdown().await;
        tracing::info!("attendance service shut down");
    }
}
