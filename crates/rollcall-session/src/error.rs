//! Error types for the session layer.

use rollcall_protocol::{CourseId, InstructorId, ProtocolError, SessionId};
use rollcall_store::StoreError;

/// Errors that can occur while managing a session's lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The instructor already has an active session for this course.
    #[error("{owner_id} already has active session {existing} for {course_id}")]
    Conflict {
        course_id: CourseId,
        owner_id: InstructorId,
        existing: SessionId,
    },

    /// The session has ended; it can no longer rotate or be displayed.
    #[error("session {0} is not active")]
    NotActive(SessionId),

    /// No session with this id.
    #[error("session {0} not found")]
    NotFound(SessionId),

    /// Transient persistence failure.
    #[error(transparent)]
    Store(StoreError),

    /// Token serialization failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl SessionError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Store outcomes with a session-level meaning become their own variants.
impl From<StoreError> for SessionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict {
                course_id,
                owner_id,
                existing,
            } => Self::Conflict {
                course_id,
                owner_id,
                existing,
            },
            StoreError::NotActive(id) => Self::NotActive(id),
            StoreError::NotFound(id) => Self::NotFound(id),
            other => Self::Store(other),
        }
    }
}
