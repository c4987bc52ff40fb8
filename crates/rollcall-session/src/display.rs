//! What the display surface renders.

use chrono::{DateTime, Utc};
use rollcall_protocol::SessionId;
use serde::Serialize;

/// The current token of an active session, ready to be drawn as a 2-D
/// barcode, with the countdown the display shows beside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayToken {
    pub session_id: SessionId,
    /// The serialized token; the barcode payload.
    pub raw: String,
    pub expires_at: DateTime<Utc>,
    /// Whole seconds until this token is replaced on screen, rounded down:
    /// the next scheduled rotation or its expiry, whichever is sooner.
    pub seconds_remaining: u64,
    /// Time a token is shown before rotation, for progress bars.
    pub window_secs: u64,
    /// How many rotations the session has gone through.
    pub rotation: u64,
}

impl DisplayToken {
    /// Remaining time as `m:ss`.
    pub fn countdown(&self) -> String {
        format!(
            "{}:{:02}",
            self.seconds_remaining / 60,
            self.seconds_remaining % 60
        )
    }

    /// Share of the window still left, 0–100.
    pub fn progress_percent(&self) -> u8 {
        if self.window_secs == 0 {
            return 0;
        }
        (self.seconds_remaining.min(self.window_secs) * 100 / self.window_secs) as u8
    }
}
