//! The [`SessionStore`] trait.

use std::future::Future;

use chrono::{DateTime, Utc};
use rollcall_protocol::{
    AttendanceRecord, CourseId, EnrollmentStatus, InstructorId, PresenceToken,
    Session, SessionId, StudentId,
};

use crate::StoreError;

/// Result of [`SessionStore::insert_attendance_if_absent`].
///
/// Every outcome other than `Created` leaves the store unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The record was committed. Carries the stored record with its
    /// per-session `seq` filled in.
    Created(AttendanceRecord),

    /// A record for this (session, student) pair already exists.
    AlreadyExists,

    /// The session had ended by the time the insert ran.
    SessionEnded,

    /// The session does not exist.
    SessionMissing,
}

/// Persistence for sessions, attendance records, and (read-only)
/// enrollments.
///
/// # Atomicity contract
///
/// - `update_session_token` moves the current token to `previous_token`
///   and installs the new one in a single step. Readers see either the old
///   pair or the new pair.
/// - `insert_attendance_if_absent` reads the session status and the
///   (session, student) uniqueness constraint in the same critical section
///   (or transaction) as the write. Two concurrent inserts for the same
///   pair commit at most one record; an insert racing `end_session` either
///   commits before the end or reports `SessionEnded`.
///
/// # Trait bounds
///
/// `Send + Sync + 'static` so one store can be shared behind an `Arc` by
/// the session manager, every rotation task, and the verifier.
pub trait SessionStore: Send + Sync + 'static {
    /// Persists a new active session.
    ///
    /// # Errors
    /// [`StoreError::Conflict`] if (course, owner) already has one.
    fn create_session(
        &self,
        session: Session,
    ) -> impl Future<Output = Result<Session, StoreError>> + Send;

    /// Rotates the session's token: `current → previous`, `token → current`.
    ///
    /// # Errors
    /// [`StoreError::NotFound`] / [`StoreError::NotActive`].
    fn update_session_token(
        &self,
        session_id: SessionId,
        token: PresenceToken,
    ) -> impl Future<Output = Result<Session, StoreError>> + Send;

    /// Marks the session ended at `at`. Idempotent: ending an ended session
    /// returns it unchanged.
    fn end_session(
        &self,
        session_id: SessionId,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<Session, StoreError>> + Send;

    /// Loads a session by id.
    fn get_session(
        &self,
        session_id: SessionId,
    ) -> impl Future<Output = Result<Option<Session>, StoreError>> + Send;

    /// The active session for (course, owner), if any.
    fn get_active_session(
        &self,
        course_id: CourseId,
        owner_id: InstructorId,
    ) -> impl Future<Output = Result<Option<Session>, StoreError>> + Send;

    /// Commits `record` unless the pair already has one or the session is
    /// not active. The store assigns `record.seq`.
    fn insert_attendance_if_absent(
        &self,
        record: AttendanceRecord,
    ) -> impl Future<Output = Result<InsertOutcome, StoreError>> + Send;

    /// Enrollment status of a student in a course, `None` if never enrolled.
    fn get_enrollment(
        &self,
        course_id: CourseId,
        student_id: StudentId,
    ) -> impl Future<Output = Result<Option<EnrollmentStatus>, StoreError>> + Send;

    /// Number of students with an active enrollment in the course.
    fn count_enrolled(
        &self,
        course_id: CourseId,
    ) -> impl Future<Output = Result<usize, StoreError>> + Send;

    /// Records for one session, newest first.
    fn list_records(
        &self,
        session_id: SessionId,
    ) -> impl Future<Output = Result<Vec<AttendanceRecord>, StoreError>> + Send;

    /// Records for one student across all sessions, newest first.
    fn list_student_records(
        &self,
        student_id: StudentId,
    ) -> impl Future<Output = Result<Vec<AttendanceRecord>, StoreError>> + Send;

    /// Every session ever opened for a course, oldest first.
    fn list_course_sessions(
        &self,
        course_id: CourseId,
    ) -> impl Future<Output = Result<Vec<Session>, StoreError>> + Send;
}
