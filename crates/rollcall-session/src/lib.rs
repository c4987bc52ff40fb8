//! Attendance session lifecycle for Rollcall.
//!
//! This crate owns everything about a session except verifying scans:
//!
//! 1. **Lifecycle** ([`SessionManager`]) — `start → rotate* → end`, with at
//!    most one active session per (course, instructor).
//! 2. **Rotation** — one background task per active session reissues the
//!    presence token on a fixed interval, independent of whether anyone
//!    is watching the display, and stops before `end` returns.
//! 3. **Display** ([`DisplayToken`]) — the serialized token and its
//!    countdown for the surface that renders the barcode.
//!
//! # How it fits in the stack
//!
//! ```text
//! Attendance Layer (beside)  ← verifies scans against the tokens issued here
//!     ↕
//! Session Layer (this crate) ← issues, rotates, and retires tokens
//!     ↕
//! Store + Protocol (below)   ← persistence seam, token codec, clock
//! ```

mod config;
mod display;
mod error;
mod manager;
mod scheduler;

pub use config::SessionConfig;
pub use display::DisplayToken;
pub use error::SessionError;
pub use manager::SessionManager;
pub use rollcall_rotation::RotationPolicy;
