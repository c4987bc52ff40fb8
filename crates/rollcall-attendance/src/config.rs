//! Roster feed configuration.

use serde::{Deserialize, Serialize};

/// Settings for the per-session roster actors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// How many recent records a snapshot carries.
    pub recent_limit: usize,

    /// Broadcast buffer per session. A subscriber that falls further
    /// behind than this gets a fresh snapshot instead of the missed deltas.
    pub channel_capacity: usize,

    /// Command queue size of each roster actor.
    pub command_buffer: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            recent_limit: 50,
            channel_capacity: 256,
            command_buffer: 64,
        }
    }
}

impl FeedConfig {
    /// Forces every size to at least 1.
    pub fn validated(mut self) -> Self {
        self.recent_limit = self.recent_limit.max(1);
        self.channel_capacity = self.channel_capacity.max(1);
        self.command_buffer = self.command_buffer.max(1);
        self
    }
}
