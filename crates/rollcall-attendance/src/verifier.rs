//! Scan verification: from a scanned payload to a committed record.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rollcall_protocol::{
    AttendanceRecord, Clock, EnrollmentStatus, InstructorId, RecordId, Session,
    SessionId, StudentId, TokenCodec,
};
use rollcall_store::{InsertOutcome, SessionStore};

use crate::{RosterFeed, VerifyError};

/// Validates scanned tokens and records attendance exactly once per
/// student per session.
///
/// The checks run cheapest first: the token is parsed, its expiry and
/// signature checked without touching the store, and only then is the
/// session loaded. The final write is the store's atomic
/// insert-if-absent, which also re-checks that the session is active, so
/// neither a duplicate scan nor a scan racing `end` can slip through.
pub struct AttendanceVerifier<S, C> {
    store: Arc<S>,
    codec: Arc<TokenCodec>,
    clock: Arc<C>,
    feed: RosterFeed<S>,
}

impl<S, C> Clone for AttendanceVerifier<S, C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            codec: Arc::clone(&self.codec),
            clock: Arc::clone(&self.clock),
            feed: self.feed.clone(),
        }
    }
}

impl<S: SessionStore, C: Clock> AttendanceVerifier<S, C> {
    /// Creates a verifier that publishes commits to `feed`.
    pub fn new(
        store: Arc<S>,
        codec: Arc<TokenCodec>,
        clock: Arc<C>,
        feed: RosterFeed<S>,
    ) -> Self {
        Self {
            store,
            codec,
            clock,
            feed,
        }
    }

    /// Verifies a scanned token for `student_id` at the clock's current time.
    pub async fn submit(
        &self,
        raw_token: &str,
        student_id: StudentId,
    ) -> Result<AttendanceRecord, VerifyError> {
        self.submit_at(raw_token, student_id, self.clock.now()).await
    }

    /// Verifies a scanned token as of `now`.
    ///
    /// # Errors
    /// One [`VerifyError`] per failed check, in this order: malformed,
    /// expired, invalid signature, unknown or ended session, stale token,
    /// not enrolled, already marked.
    pub async fn submit_at(
        &self,
        raw_token: &str,
        student_id: StudentId,
        now: DateTime<Utc>,
    ) -> Result<AttendanceRecord, VerifyError> {
        let result = self.verify_scan(raw_token, student_id, now).await;
        log_outcome(&result, student_id, false);
        result
    }

    /// Marks a student present without a scan, on the session owner's
    /// authority. Enrollment, lateness, and once-only still apply.
    ///
    /// # Errors
    /// [`VerifyError::NotSessionOwner`] if `owner_id` does not own the
    /// session, otherwise as for a scan.
    pub async fn mark_manual(
        &self,
        session_id: SessionId,
        owner_id: InstructorId,
        student_id: StudentId,
    ) -> Result<AttendanceRecord, VerifyError> {
        let result = self.verify_manual(session_id, owner_id, student_id).await;
        log_outcome(&result, student_id, true);
        result
    }

    async fn verify_scan(
        &self,
        raw_token: &str,
        student_id: StudentId,
        now: DateTime<Utc>,
    ) -> Result<AttendanceRecord, VerifyError> {
        let token = self
            .codec
            .decode(raw_token)
            .map_err(|e| VerifyError::MalformedToken(e.to_string()))?;

        if token.is_expired_at(now) {
            return Err(VerifyError::Expired {
                expired_at: token.expires_at,
            });
        }
        if !self.codec.verify_signature(&token) {
            return Err(VerifyError::InvalidSignature);
        }

        let session = self.active_session(token.session_id).await?;
        if !session.accepts(&token) {
            return Err(VerifyError::StaleToken(session.id));
        }

        self.record(&session, student_id, now, false).await
    }

    async fn verify_manual(
        &self,
        session_id: SessionId,
        owner_id: InstructorId,
        student_id: StudentId,
    ) -> Result<AttendanceRecord, VerifyError> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or(VerifyError::SessionNotFound(session_id))?;
        if session.owner_id != owner_id {
            return Err(VerifyError::NotSessionOwner {
                caller: owner_id,
                session_id,
            });
        }
        if !session.is_active() {
            return Err(VerifyError::SessionEnded(session_id));
        }

        self.record(&session, student_id, self.clock.now(), true).await
    }

    async fn active_session(&self, session_id: SessionId) -> Result<Session, VerifyError> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or(VerifyError::SessionNotFound(session_id))?;
        if !session.is_active() {
            return Err(VerifyError::SessionEnded(session_id));
        }
        Ok(session)
    }

    /// Enrollment gate, lateness, then the atomic insert.
    async fn record(
        &self,
        session: &Session,
        student_id: StudentId,
        now: DateTime<Utc>,
        is_manual: bool,
    ) -> Result<AttendanceRecord, VerifyError> {
        let enrollment = self
            .store
            .get_enrollment(session.course_id, student_id)
            .await?;
        if enrollment != Some(EnrollmentStatus::Active) {
            return Err(VerifyError::NotEnrolled {
                student_id,
                course_id: session.course_id,
            });
        }

        let record = AttendanceRecord {
            id: RecordId::new(),
            session_id: session.id,
            student_id,
            marked_at: now,
            is_late: session.is_late_at(now),
            is_manual,
            seq: 0,
        };

        match self.store.insert_attendance_if_absent(record).await? {
            InsertOutcome::Created(record) => {
                self.feed.publish(record.clone()).await;
                Ok(record)
            }
            InsertOutcome::AlreadyExists => Err(VerifyError::AlreadyMarked {
                student_id,
                session_id: session.id,
            }),
            InsertOutcome::SessionEnded => Err(VerifyError::SessionEnded(session.id)),
            InsertOutcome::SessionMissing => Err(VerifyError::SessionNotFound(session.id)),
        }
    }
}

fn log_outcome(
    result: &Result<AttendanceRecord, VerifyError>,
    student_id: StudentId,
    is_manual: bool,
) {
    match result {
        Ok(record) => tracing::info!(
            session_id = %record.session_id,
            %student_id,
            is_late = record.is_late,
            is_manual,
            seq = record.seq,
            "attendance recorded"
        ),
        Err(VerifyError::AlreadyMarked { session_id, .. }) => tracing::trace!(
            %session_id,
            %student_id,
            "already marked"
        ),
        Err(err) if err.is_transient() => tracing::warn!(
            %student_id,
            error = %err,
            "attendance not recorded, store unavailable"
        ),
        Err(err) => tracing::debug!(
            %student_id,
            code = err.code(),
            is_manual,
            "scan rejected"
        ),
    }
}
