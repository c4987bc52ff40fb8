//! # Rollcall
//!
//! Proof-of-presence attendance with rotating, signed, short-lived tokens.
//!
//! An instructor opens a session; its token is shown as a 2-D barcode and
//! reissued every two minutes. Students scan it, and each scan is checked
//! for expiry, signature, freshness, and enrollment before a single
//! attendance record per student is committed. Dashboards follow the
//! roster live.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rollcall::prelude::*;
//!
//! # async fn run() -> Result<(), RollcallError> {
//! let service = AttendanceService::builder().build()?;
//! service.store().enroll_all(CourseId(101), [StudentId(42)]).await;
//! let session = service.start(CourseId(101), InstructorId(7), None).await?;
//!
//! let shown = service.display(session.id).await?;
//! // A student's phone decodes the barcode back into `shown.raw`:
//! let record = service.submit(&shown.raw, StudentId(42)).await?;
//! assert!(!record.is_late);
//!
//! service.end(session.id).await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod service;
pub mod telemetry;

pub use config::{vars, ConfigError, RollcallConfig, DEFAULT_LOG_FILTER};
pub use error::RollcallError;
pub use service::{AttendanceService, AttendanceServiceBuilder, CourseSummary};

pub use rollcall_attendance as attendance;
pub use rollcall_protocol as protocol;
pub use rollcall_rotation as rotation;
pub use rollcall_session as session;
pub use rollcall_store as store;

/// Everything most callers need.
pub mod prelude {
    pub use crate::{
        AttendanceService, AttendanceServiceBuilder, CourseSummary, RollcallConfig,
        RollcallError,
    };
    pub use rollcall_attendance::{FeedConfig, RosterSubscription, VerifyError};
    pub use rollcall_protocol::{
        AttendanceRecord, Clock, CourseId, EnrollmentStatus, InstructorId,
        ManualClock, PresenceToken, RosterCounts, RosterDelta, RosterSnapshot,
        Session, SessionId, SessionStatus, SigningKey, StudentId, SystemClock,
    };
    pub use rollcall_session::{DisplayToken, RotationPolicy, SessionConfig};
    pub use rollcall_store::{MemoryStore, SessionStore};
}
