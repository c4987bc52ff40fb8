//! Session-layer configuration.

use std::time::Duration;

use rollcall_rotation::{RotationConfig, RotationPolicy};
use tracing::warn;

/// Configuration for the session manager.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Time between token rotations while a session is active.
    pub rotation_interval: Duration,

    /// Late-wakeup handling for the rotation timer.
    pub rotation_policy: RotationPolicy,

    /// Lifetime of each issued token. Always longer than the rotation
    /// interval, so a token is still valid while it is the previous one.
    /// The default also outlasts the rotation after that, so a token two
    /// rotations old is reported stale rather than expired.
    pub token_ttl: Duration,

    /// Late threshold used when `start` is called without one.
    pub default_late_threshold_minutes: u32,

    /// Upper bound on any late threshold.
    pub max_late_threshold_minutes: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            rotation_interval: Duration::from_secs(120),
            rotation_policy: RotationPolicy::Skip,
            token_ttl: Duration::from_secs(300),
            default_late_threshold_minutes: 10,
            max_late_threshold_minutes: 240,
        }
    }
}

impl SessionConfig {
    /// Clamp out-of-range values. Rules:
    /// - `rotation_interval` goes through [`RotationConfig::validated`].
    /// - `token_ttl` raised to two intervals unless it exceeds one.
    /// - `default_late_threshold_minutes` capped to the maximum.
    pub fn validated(mut self) -> Self {
        self.rotation_interval = self.rotation_config().validated().interval;

        if self.token_ttl <= self.rotation_interval {
            warn!(
                ttl_secs = self.token_ttl.as_secs(),
                interval_secs = self.rotation_interval.as_secs(),
                "token ttl leaves no grace after rotation, raising"
            );
            self.token_ttl = self.rotation_interval * 2;
        }
        self.default_late_threshold_minutes = self
            .default_late_threshold_minutes
            .min(self.max_late_threshold_minutes);
        self
    }

    /// The effective late threshold for a session.
    pub fn late_threshold(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_late_threshold_minutes)
            .min(self.max_late_threshold_minutes)
    }

    /// Rotation timer settings derived from this config.
    pub fn rotation_config(&self) -> RotationConfig {
        RotationConfig {
            interval: self.rotation_interval,
            policy: self.rotation_policy,
            ..RotationConfig::default()
        }
    }
}
