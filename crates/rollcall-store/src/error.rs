//! Error types for the store layer.

use rollcall_protocol::{CourseId, InstructorId, SessionId};

/// Errors returned by a [`SessionStore`](crate::SessionStore).
///
/// Only [`Unavailable`](Self::Unavailable) is transient. The others are
/// domain outcomes the caller maps onto its own error type.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing storage could not be reached. Retrying may help.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// An active session already exists for this (course, owner) pair.
    #[error("{owner_id} already has active session {existing} for {course_id}")]
    Conflict {
        course_id: CourseId,
        owner_id: InstructorId,
        existing: SessionId,
    },

    /// No session with this id.
    #[error("session {0} not found")]
    NotFound(SessionId),

    /// The session has ended and no longer accepts token updates.
    #[error("session {0} is not active")]
    NotActive(SessionId),
}

impl StoreError {
    /// Whether the failure is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}
