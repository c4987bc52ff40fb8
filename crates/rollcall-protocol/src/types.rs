//! Core data model for Rollcall.
//!
//! These are the records the store persists ([`Session`],
//! [`AttendanceRecord`], [`EnrollmentStatus`]) and the values the roster
//! feed publishes ([`RosterSnapshot`], [`RosterDelta`]).

use std::fmt;

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::PresenceToken;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Opaque identifier of an attendance session.
///
/// Serialized as a bare hyphenated UUID string; this is the `sessionId`
/// field of every presence token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Generates a fresh random session id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a committed attendance record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub Uuid);

impl RecordId {
    /// Generates a fresh random record id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A course, owned by the external course catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CourseId(pub u64);

impl fmt::Display for CourseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C-{}", self.0)
    }
}

/// The instructor who opens and owns a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstructorId(pub u64);

impl fmt::Display for InstructorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "I-{}", self.0)
    }
}

/// An already-authenticated student.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudentId(pub u64);

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Lifecycle state of a session.
///
/// ```text
///   Active ──(end)──→ Ended   (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Ended,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Ended => write!(f, "ended"),
        }
    }
}

/// Enrollment of a student in a course. Read-only to this core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentStatus {
    Active,
    Dropped,
}

impl EnrollmentStatus {
    /// Only active enrollments may mark attendance.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A bounded attendance window for one course meeting.
///
/// The current token and the one it replaced travel together in this
/// record, so a reader always sees a consistent pair; a rotation replaces
/// both fields in one store write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub course_id: CourseId,
    pub owner_id: InstructorId,
    /// Calendar date of the meeting (UTC date of `started_at`).
    pub session_date: NaiveDate,
    /// The late clock runs from here. Rotation never moves it.
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub current_token: PresenceToken,
    /// The token `current_token` replaced, accepted during rotation grace.
    pub previous_token: Option<PresenceToken>,
    /// Number of rotations applied since the session started.
    pub rotations: u64,
    pub late_threshold_minutes: u32,
    pub status: SessionStatus,
}

impl Session {
    /// Whether the session still accepts scans and rotations.
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Whether `token` is the current token or the immediately-previous one.
    ///
    /// Every field is compared, including the unsigned `expires_at`.
    pub fn accepts(&self, token: &PresenceToken) -> bool {
        self.current_token == *token
            || self.previous_token.as_ref() == Some(token)
    }

    /// The instant after which a scan counts as late.
    pub fn late_after(&self) -> DateTime<Utc> {
        self.started_at
            + TimeDelta::minutes(i64::from(self.late_threshold_minutes))
    }

    /// Late iff strictly more than the threshold has elapsed since start.
    pub fn is_late_at(&self, now: DateTime<Utc>) -> bool {
        now > self.late_after()
    }
}

// ---------------------------------------------------------------------------
// AttendanceRecord
// ---------------------------------------------------------------------------

/// A write-once proof that a student attended a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: RecordId,
    pub session_id: SessionId,
    pub student_id: StudentId,
    pub marked_at: DateTime<Utc>,
    pub is_late: bool,
    /// `true` for an instructor override, `false` for a scanned token.
    pub is_manual: bool,
    /// Per-session commit order, assigned by the store (starts at 1).
    pub seq: u64,
}

// ---------------------------------------------------------------------------
// Roster
// ---------------------------------------------------------------------------

/// Aggregate head-counts for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterCounts {
    /// Students with an active enrollment in the course.
    pub enrolled: usize,
    /// Students with a committed record (on time or late).
    pub present: usize,
    /// Subset of `present` marked late.
    pub late: usize,
}

impl RosterCounts {
    /// Students present and on time.
    pub fn on_time(&self) -> usize {
        self.present.saturating_sub(self.late)
    }

    /// Rounded percentage of enrolled students present (0 if none enrolled).
    pub fn attendance_percent(&self) -> u32 {
        if self.enrolled == 0 {
            return 0;
        }
        ((self.present as f64 / self.enrolled as f64) * 100.0).round() as u32
    }

    /// Folds one newly committed record into the counts.
    pub fn record(&mut self, record: &AttendanceRecord) {
        self.present += 1;
        if record.is_late {
            self.late += 1;
        }
    }
}

/// Full roster state at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterSnapshot {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub counts: RosterCounts,
    /// Most recent records first.
    pub recent: Vec<AttendanceRecord>,
}

/// One message on a roster subscription.
///
/// `#[serde(tag = "type")]` gives dashboards a flat JSON shape:
/// `{ "type": "Marked", "record": { ... }, "counts": { ... } }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RosterDelta {
    /// Sent first on every subscription, and again if a slow subscriber
    /// fell behind and missed deltas.
    Snapshot(RosterSnapshot),

    /// A record was committed.
    Marked {
        record: AttendanceRecord,
        counts: RosterCounts,
    },

    /// The session ended; no further deltas follow.
    Closed {
        session_id: SessionId,
        ended_at: Option<DateTime<Utc>>,
        counts: RosterCounts,
    },
}
