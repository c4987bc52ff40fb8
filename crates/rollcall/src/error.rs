//! Unified error type for Rollcall.

use rollcall_attendance::{FeedError, VerifyError};
use rollcall_protocol::ProtocolError;
use rollcall_session::SessionError;
use rollcall_store::StoreError;

use crate::config::ConfigError;

/// Top-level error that wraps every layer's error.
///
/// `#[from]` on each variant lets `?` lift layer errors into this one, so
/// callers of [`AttendanceService`](crate::AttendanceService) handle a
/// single type and can still match on the layer that failed.
#[derive(Debug, thiserror::Error)]
pub enum RollcallError {
    /// Token encoding or key material.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Persistence, outside any higher-level operation.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Session lifecycle (conflict, not active, not found).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A scan or manual mark was not recorded.
    #[error(transparent)]
    Verify(#[from] VerifyError),

    /// Roster subscription or snapshot.
    #[error(transparent)]
    Feed(#[from] FeedError),

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl RollcallError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::Session(e) => e.is_transient(),
            Self::Verify(e) => e.is_transient(),
            Self::Feed(e) => e.is_transient(),
            Self::Protocol(_) | Self::Config(_) => false,
        }
    }

    /// Stable code for the scanning client, when this is a rejected scan.
    pub fn verify_code(&self) -> Option<&'static str> {
        match self {
            Self::Verify(e) => Some(e.code()),
            _ => None,
        }
    }
}
