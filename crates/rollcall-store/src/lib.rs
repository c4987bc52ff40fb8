//! Persistence seam for Rollcall.
//!
//! The attendance core keeps no authoritative state in memory. Sessions
//! (with their current/previous token pair) and attendance records live
//! behind the [`SessionStore`] trait, which is the single mutation
//! boundary:
//!
//! - rotation writes go through [`SessionStore::update_session_token`],
//!   which replaces both token fields in one step;
//! - record creation goes through
//!   [`SessionStore::insert_attendance_if_absent`], which checks session
//!   status and (session, student) uniqueness in the same critical section
//!   as the write.
//!
//! [`MemoryStore`] is the in-process implementation used by the demo and
//! the test suites. A database-backed store implements the same trait with
//! a unique index on `(session_id, student_id)` and a transactional insert.
//!
//! ```text
//! SessionManager ──rotate──→ SessionStore ←──insert── AttendanceVerifier
//!                                 ↑
//!                          RosterFeed (reads)
//! ```

#![allow(async_fn_in_trait)]

mod error;
mod memory;
mod store;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use store::{InsertOutcome, SessionStore};
