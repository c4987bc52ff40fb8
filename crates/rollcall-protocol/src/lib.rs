//! Wire protocol and data model for Rollcall.
//!
//! This crate defines everything that crosses a boundary between the
//! instructor's display, the scanning client, and the attendance core:
//!
//! - **Types** ([`Session`], [`AttendanceRecord`], [`RosterDelta`], ids) —
//!   the records the store persists and the feed publishes.
//! - **Tokens** ([`PresenceToken`], [`TokenCodec`]) — the signed,
//!   short-lived proof-of-presence code rendered as a 2-D barcode.
//! - **Clock** ([`Clock`]) — the wall-time seam used for expiry and
//!   lateness, with a [`ManualClock`] for deterministic tests.
//! - **Codec** ([`Codec`], [`JsonCodec`]) — how structured values become
//!   bytes for the transport in front of this core.
//!
//! ```text
//! display surface ← serialized token ← TokenCodec ← SessionManager
//! scanning client → serialized token → TokenCodec → AttendanceVerifier
//! ```

mod clock;
mod codec;
mod error;
mod token;
mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use token::{PresenceToken, SigningKey, TokenCodec, DEFAULT_TOKEN_TTL, MAX_TOKEN_TTL};
pub use types::{
    AttendanceRecord, CourseId, EnrollmentStatus, InstructorId, RecordId,
    RosterCounts, RosterDelta, RosterSnapshot, Session, SessionId,
    SessionStatus, StudentId,
};
