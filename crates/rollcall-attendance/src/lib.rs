//! Scan verification and the live roster for Rollcall.
//!
//! Two components sit here because they meet at the moment a record is
//! committed:
//!
//! - [`AttendanceVerifier`] — turns a scanned token into an
//!   [`AttendanceRecord`](rollcall_protocol::AttendanceRecord), or a
//!   precise [`VerifyError`] saying why not.
//! - [`RosterFeed`] — mirrors each watched session's roster in its own
//!   actor task and streams [`RosterDelta`](rollcall_protocol::RosterDelta)s
//!   to subscribers in commit order.
//!
//! ```text
//! scan ──→ AttendanceVerifier ──insert──→ SessionStore
//!                 │
//!                 └──publish──→ RosterFeed ──deltas──→ dashboards
//! ```

mod config;
mod error;
mod feed;
mod roster;
mod subscription;
mod verifier;

pub use config::FeedConfig;
pub use error::{FeedError, VerifyError};
pub use feed::RosterFeed;
pub use subscription::RosterSubscription;
pub use verifier::AttendanceVerifier;
