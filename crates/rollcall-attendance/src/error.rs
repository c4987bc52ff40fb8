//! Error types for the attendance layer.

use chrono::{DateTime, Utc};
use rollcall_protocol::{CourseId, InstructorId, SessionId, StudentId};
use rollcall_store::StoreError;

/// Why a scan (or a manual mark) was not recorded.
///
/// Every variant is terminal for that submission and leaves no state
/// behind. [`code`](Self::code) gives the scanning client a stable string
/// to pick its message from ("already marked" vs "expired, rescan").
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// The payload is not a presence token.
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// The token's lifetime is over.
    #[error("token expired at {expired_at}")]
    Expired { expired_at: DateTime<Utc> },

    /// The signature does not match the claimed fields.
    #[error("token signature is invalid")]
    InvalidSignature,

    /// The token names a session that does not exist.
    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    /// The session has ended.
    #[error("session {0} has ended")]
    SessionEnded(SessionId),

    /// Genuine, unexpired, but neither the current nor the previous token.
    #[error("token is no longer current for session {0}")]
    StaleToken(SessionId),

    /// The student has no active enrollment in the session's course.
    #[error("{student_id} is not enrolled in {course_id}")]
    NotEnrolled {
        student_id: StudentId,
        course_id: CourseId,
    },

    /// The student already has a record for this session. An expected
    /// outcome of rescans, not an anomaly.
    #[error("{student_id} is already marked for session {session_id}")]
    AlreadyMarked {
        student_id: StudentId,
        session_id: SessionId,
    },

    /// A manual mark was requested by someone other than the owner.
    #[error("{caller} does not own session {session_id}")]
    NotSessionOwner {
        caller: InstructorId,
        session_id: SessionId,
    },

    /// Transient persistence failure; the caller may retry.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl VerifyError {
    /// Stable machine-readable identifier for client rendering.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedToken(_) => "malformed_token",
            Self::Expired { .. } => "expired",
            Self::InvalidSignature => "invalid_signature",
            Self::SessionNotFound(_) => "session_not_found",
            Self::SessionEnded(_) => "session_ended",
            Self::StaleToken(_) => "stale_token",
            Self::NotEnrolled { .. } => "not_enrolled",
            Self::AlreadyMarked { .. } => "already_marked",
            Self::NotSessionOwner { .. } => "not_session_owner",
            Self::Store(_) => "unavailable",
        }
    }

    /// Whether resubmitting the same scan may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Errors from the roster feed.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// No session with this id.
    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    /// The roster actor for the session has stopped.
    #[error("roster for session {0} is unavailable")]
    Unavailable(SessionId),

    /// Loading roster state from the store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl FeedError {
    /// Whether retrying may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::Unavailable(_) => true,
            Self::SessionNotFound(_) => false,
        }
    }
}
