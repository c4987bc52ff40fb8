//! In-process [`SessionStore`] backed by hash maps behind one mutex.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use rollcall_protocol::{
    AttendanceRecord, CourseId, EnrollmentStatus, InstructorId, PresenceToken,
    Session, SessionId, SessionStatus, StudentId,
};
use tokio::sync::Mutex;

use crate::{InsertOutcome, SessionStore, StoreError};

/// An in-memory store.
///
/// Every operation takes the same lock, so each one is trivially atomic
/// with respect to the others. Cloning shares the underlying state.
///
/// Enrollments are owned by an external catalogue in production; here
/// they are seeded with [`set_enrollment`](Self::set_enrollment).
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    /// Fault injection: while set, every call fails with `Unavailable`.
    offline: Arc<AtomicBool>,
}

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<SessionId, Session>,
    /// Index enforcing one active session per (course, owner).
    active: HashMap<(CourseId, InstructorId), SessionId>,
    /// Committed records per session, in commit order.
    records: HashMap<SessionId, Vec<AttendanceRecord>>,
    /// The (session, student) unique constraint.
    marked: HashSet<(SessionId, StudentId)>,
    enrollments: HashMap<(CourseId, StudentId), EnrollmentStatus>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds or replaces a student's enrollment in a course.
    pub async fn set_enrollment(
        &self,
        course_id: CourseId,
        student_id: StudentId,
        status: EnrollmentStatus,
    ) {
        let mut inner = self.inner.lock().await;
        inner.enrollments.insert((course_id, student_id), status);
    }

    /// Enrolls each student as active.
    pub async fn enroll_all(
        &self,
        course_id: CourseId,
        students: impl IntoIterator<Item = StudentId>,
    ) {
        let mut inner = self.inner.lock().await;
        for student_id in students {
            inner
                .enrollments
                .insert((course_id, student_id), EnrollmentStatus::Active);
        }
    }

    /// Simulates the backing storage going away (or coming back).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
        tracing::debug!(offline, "memory store availability changed");
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".into()));
        }
        Ok(())
    }
}

/// Newest first; `seq` breaks ties within a session.
fn newest_first(records: &mut [AttendanceRecord]) {
    records.sort_by(|a, b| {
        b.marked_at.cmp(&a.marked_at).then(b.seq.cmp(&a.seq))
    });
}

impl SessionStore for MemoryStore {
    async fn create_session(
        &self,
        session: Session,
    ) -> Result<Session, StoreError> {
        self.check_online()?;
        let mut inner = self.inner.lock().await;

        let key = (session.course_id, session.owner_id);
        if let Some(&existing) = inner.active.get(&key) {
            return Err(StoreError::Conflict {
                course_id: session.course_id,
                owner_id: session.owner_id,
                existing,
            });
        }

        if session.is_active() {
            inner.active.insert(key, session.id);
        }
        inner.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn update_session_token(
        &self,
        session_id: SessionId,
        token: PresenceToken,
    ) -> Result<Session, StoreError> {
        self.check_online()?;
        let mut inner = self.inner.lock().await;

        let session = inner
            .sessions
            .get_mut(&session_id)
            .ok_or(StoreError::NotFound(session_id))?;
        if !session.is_active() {
            return Err(StoreError::NotActive(session_id));
        }

        let replaced = std::mem::replace(&mut session.current_token, token);
        session.previous_token = Some(replaced);
        session.rotations += 1;
        Ok(session.clone())
    }

    async fn end_session(
        &self,
        session_id: SessionId,
        at: DateTime<Utc>,
    ) -> Result<Session, StoreError> {
        self.check_online()?;
        let mut inner = self.inner.lock().await;

        let session = inner
            .sessions
            .get_mut(&session_id)
            .ok_or(StoreError::NotFound(session_id))?;
        if !session.is_active() {
            return Ok(session.clone());
        }

        session.status = SessionStatus::Ended;
        session.ended_at = Some(at);
        let ended = session.clone();
        inner.active.remove(&(ended.course_id, ended.owner_id));
        Ok(ended)
    }

    async fn get_session(
        &self,
        session_id: SessionId,
    ) -> Result<Option<Session>, StoreError> {
        self.check_online()?;
        let inner = self.inner.lock().await;
        Ok(inner.sessions.get(&session_id).cloned())
    }

    async fn get_active_session(
        &self,
        course_id: CourseId,
        owner_id: InstructorId,
    ) -> Result<Option<Session>, StoreError> {
        self.check_online()?;
        let inner = self.inner.lock().await;
        Ok(inner
            .active
            .get(&(course_id, owner_id))
            .and_then(|id| inner.sessions.get(id))
            .cloned())
    }

    async fn insert_attendance_if_absent(
        &self,
        mut record: AttendanceRecord,
    ) -> Result<InsertOutcome, StoreError> {
        self.check_online()?;
        let mut inner = self.inner.lock().await;

        match inner.sessions.get(&record.session_id) {
            None => return Ok(InsertOutcome::SessionMissing),
            Some(session) if !session.is_active() => {
                return Ok(InsertOutcome::SessionEnded);
            }
            Some(_) => {}
        }
        if !inner.marked.insert((record.session_id, record.student_id)) {
            return Ok(InsertOutcome::AlreadyExists);
        }

        let committed = inner.records.entry(record.session_id).or_default();
        record.seq = committed.len() as u64 + 1;
        committed.push(record.clone());
        Ok(InsertOutcome::Created(record))
    }

    async fn get_enrollment(
        &self,
        course_id: CourseId,
        student_id: StudentId,
    ) -> Result<Option<EnrollmentStatus>, StoreError> {
        self.check_online()?;
        let inner = self.inner.lock().await;
        Ok(inner.enrollments.get(&(course_id, student_id)).copied())
    }

    async fn count_enrolled(
        &self,
        course_id: CourseId,
    ) -> Result<usize, StoreError> {
        self.check_online()?;
        let inner = self.inner.lock().await;
        Ok(inner
            .enrollments
            .iter()
            .filter(|((course, _), status)| {
                *course == course_id && status.is_active()
            })
            .count())
    }

    async fn list_records(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        self.check_online()?;
        let inner = self.inner.lock().await;
        let mut records = inner
            .records
            .get(&session_id)
            .cloned()
            .unwrap_or_default();
        newest_first(&mut records);
        Ok(records)
    }

    async fn list_student_records(
        &self,
        student_id: StudentId,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        self.check_online()?;
        let inner = self.inner.lock().await;
        let mut records: Vec<AttendanceRecord> = inner
            .records
            .values()
            .flatten()
            .filter(|r| r.student_id == student_id)
            .cloned()
            .collect();
        newest_first(&mut records);
        Ok(records)
    }

    async fn list_course_sessions(
        &self,
        course_id: CourseId,
    ) -> Result<Vec<Session>, StoreError> {
        self.check_online()?;
        let inner = self.inner.lock().await;
        let mut sessions: Vec<Session> = inner
            .sessions
            .values()
            .filter(|s| s.course_id == course_id)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.started_at);
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use rollcall_protocol::{RecordId, SigningKey, TokenCodec};

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_760_601_600_000).unwrap()
    }

    fn codec() -> TokenCodec {
        TokenCodec::new(&SigningKey::generate()).unwrap()
    }

    fn session(codec: &TokenCodec, course: u64, owner: u64) -> Session {
        let id = SessionId::new();
        Session {
            id,
            course_id: CourseId(course),
            owner_id: InstructorId(owner),
            session_date: t0().date_naive(),
            started_at: t0(),
            ended_at: None,
            current_token: codec.issue(id, t0()),
            previous_token: None,
            rotations: 0,
            late_threshold_minutes: 10,
            status: SessionStatus::Active,
        }
    }

    fn record(session_id: SessionId, student: u64, at: DateTime<Utc>) -> AttendanceRecord {
        AttendanceRecord {
            id: RecordId::new(),
            session_id,
            student_id: StudentId(student),
            marked_at: at,
            is_late: false,
            is_manual: false,
            seq: 0,
        }
    }

    // =====================================================================
    // create_session() / get_active_session()
    // =====================================================================

    #[tokio::test]
    async fn test_create_session_second_active_for_same_pair_conflicts() {
        let store = MemoryStore::new();
        let codec = codec();
        let first = store.create_session(session(&codec, 1, 1)).await.unwrap();

        let result = store.create_session(session(&codec, 1, 1)).await;

        match result {
            Err(StoreError::Conflict { existing, .. }) => assert_eq!(existing, first.id),
            other => panic!("expected Conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_create_session_other_owner_or_course_is_allowed() {
        let store = MemoryStore::new();
        let codec = codec();
        store.create_session(session(&codec, 1, 1)).await.unwrap();

        assert!(store.create_session(session(&codec, 1, 2)).await.is_ok());
        assert!(store.create_session(session(&codec, 2, 1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_create_session_after_end_is_allowed() {
        let store = MemoryStore::new();
        let codec = codec();
        let first = store.create_session(session(&codec, 1, 1)).await.unwrap();
        store.end_session(first.id, t0()).await.unwrap();

        let second = store.create_session(session(&codec, 1, 1)).await.unwrap();

        let active = store
            .get_active_session(CourseId(1), InstructorId(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.id, second.id);
    }

    // =====================================================================
    // update_session_token()
    // =====================================================================

    #[tokio::test]
    async fn test_update_session_token_shifts_current_to_previous() {
        let store = MemoryStore::new();
        let codec = codec();
        let created = store.create_session(session(&codec, 1, 1)).await.unwrap();
        let next = codec.issue(created.id, t0() + TimeDelta::seconds(120));

        let updated = store
            .update_session_token(created.id, next.clone())
            .await
            .unwrap();

        assert_eq!(updated.current_token, next);
        assert_eq!(updated.previous_token, Some(created.current_token));
        assert_eq!(updated.rotations, 1);
        assert_eq!(updated.started_at, created.started_at);
    }

    #[tokio::test]
    async fn test_update_session_token_on_ended_session_is_not_active() {
        let store = MemoryStore::new();
        let codec = codec();
        let created = store.create_session(session(&codec, 1, 1)).await.unwrap();
        store.end_session(created.id, t0()).await.unwrap();

        let result = store
            .update_session_token(created.id, codec.issue(created.id, t0()))
            .await;

        assert!(matches!(result, Err(StoreError::NotActive(_))));
    }

    #[tokio::test]
    async fn test_update_session_token_unknown_session_is_not_found() {
        let store = MemoryStore::new();
        let id = SessionId::new();
        let result = store.update_session_token(id, codec().issue(id, t0())).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    // =====================================================================
    // end_session()
    // =====================================================================

    #[tokio::test]
    async fn test_end_session_twice_keeps_first_end_time() {
        let store = MemoryStore::new();
        let created = store.create_session(session(&codec(), 1, 1)).await.unwrap();

        let first = store.end_session(created.id, t0()).await.unwrap();
        let second = store
            .end_session(created.id, t0() + TimeDelta::minutes(5))
            .await
            .unwrap();

        assert_eq!(first.status, SessionStatus::Ended);
        assert_eq!(second.ended_at, Some(t0()));
    }

    // =====================================================================
    // insert_attendance_if_absent()
    // =====================================================================

    #[tokio::test]
    async fn test_insert_attendance_assigns_increasing_seq() {
        let store = MemoryStore::new();
        let created = store.create_session(session(&codec(), 1, 1)).await.unwrap();

        let a = store
            .insert_attendance_if_absent(record(created.id, 1, t0()))
            .await
            .unwrap();
        let b = store
            .insert_attendance_if_absent(record(created.id, 2, t0()))
            .await
            .unwrap();

        match (a, b) {
            (InsertOutcome::Created(a), InsertOutcome::Created(b)) => {
                assert_eq!(a.seq, 1);
                assert_eq!(b.seq, 2);
            }
            other => panic!("expected two Created, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_insert_attendance_duplicate_pair_already_exists() {
        let store = MemoryStore::new();
        let created = store.create_session(session(&codec(), 1, 1)).await.unwrap();
        store
            .insert_attendance_if_absent(record(created.id, 1, t0()))
            .await
            .unwrap();

        let again = store
            .insert_attendance_if_absent(record(created.id, 1, t0()))
            .await
            .unwrap();

        assert_eq!(again, InsertOutcome::AlreadyExists);
        assert_eq!(store.list_records(created.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_insert_attendance_ended_or_missing_session_is_rejected() {
        let store = MemoryStore::new();
        let created = store.create_session(session(&codec(), 1, 1)).await.unwrap();
        store.end_session(created.id, t0()).await.unwrap();

        let ended = store
            .insert_attendance_if_absent(record(created.id, 1, t0()))
            .await
            .unwrap();
        let missing = store
            .insert_attendance_if_absent(record(SessionId::new(), 1, t0()))
            .await
            .unwrap();

        assert_eq!(ended, InsertOutcome::SessionEnded);
        assert_eq!(missing, InsertOutcome::SessionMissing);
        assert!(store.list_records(created.id).await.unwrap().is_empty());
    }

    // =====================================================================
    // Enrollment and listings
    // =====================================================================

    #[tokio::test]
    async fn test_count_enrolled_ignores_dropped_and_other_courses() {
        let store = MemoryStore::new();
        store.enroll_all(CourseId(1), [StudentId(1), StudentId(2)]).await;
        store
            .set_enrollment(CourseId(1), StudentId(3), EnrollmentStatus::Dropped)
            .await;
        store.enroll_all(CourseId(2), [StudentId(4)]).await;

        assert_eq!(store.count_enrolled(CourseId(1)).await.unwrap(), 2);
        assert_eq!(
            store.get_enrollment(CourseId(1), StudentId(3)).await.unwrap(),
            Some(EnrollmentStatus::Dropped)
        );
        assert_eq!(
            store.get_enrollment(CourseId(1), StudentId(9)).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_list_student_records_spans_sessions_newest_first() {
        let store = MemoryStore::new();
        let codec = codec();
        let monday = store.create_session(session(&codec, 1, 1)).await.unwrap();
        let tuesday = store.create_session(session(&codec, 2, 1)).await.unwrap();
        let later = t0() + TimeDelta::days(1);

        store
            .insert_attendance_if_absent(record(monday.id, 5, t0()))
            .await
            .unwrap();
        store
            .insert_attendance_if_absent(record(tuesday.id, 5, later))
            .await
            .unwrap();
        store
            .insert_attendance_if_absent(record(tuesday.id, 6, later))
            .await
            .unwrap();

        let history = store.list_student_records(StudentId(5)).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].session_id, tuesday.id);
        assert_eq!(history[1].session_id, monday.id);
    }

    #[tokio::test]
    async fn test_offline_store_fails_transiently() {
        let store = MemoryStore::new();
        store.set_offline(true);

        let err = store.get_session(SessionId::new()).await.unwrap_err();
        assert!(err.is_transient());

        store.set_offline(false);
        assert!(store.get_session(SessionId::new()).await.unwrap().is_none());
    }
}
