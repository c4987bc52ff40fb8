//! Fixed-interval rotation timer for Rollcall sessions.
//!
//! Every active session owns one [`RotationTimer`]. The timer only decides
//! *when* a rotation is due; issuing and persisting the new token is the
//! session layer's job. Rotation is a property of the session, so the timer
//! runs whether or not anyone is looking at the display.
//!
//! # Integration
//!
//! The timer sits inside the session's rotation task next to a cancellation
//! branch:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         _ = &mut cancel_rx => break,
//!         tick = timer.wait_for_rotation() => {
//!             match rotate_once().await {
//!                 Ok(_) => timer.record_success(),
//!                 Err(_) => timer.record_failure(),
//!             }
//!         }
//!     }
//! }
//! ```
//!
//! A failed rotation is not retried early: the next scheduled tick tries
//! again, and verification keeps trusting the last token that was
//! persisted.

use std::time::{Duration, Instant};

use rand::Rng;
use tokio::time::{self, Instant as TokioInstant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What to do when the timer wakes up late (runtime stall, long store
/// write on the previous tick).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationPolicy {
    /// Rotate once now and schedule the next rotation a full interval
    /// later. Missed rotations are never replayed.
    #[default]
    Skip,
    /// Rotate once now but keep the original cadence: the next rotation
    /// lands on the first future slot of the original schedule.
    Drop,
}

/// Configuration for one session's rotation timer.
#[derive(Debug, Clone)]
pub struct RotationConfig {
    /// Time between rotations.
    pub interval: Duration,
    /// Late-wakeup handling.
    pub policy: RotationPolicy,
    /// Random delay (0..max) added to the *first* rotation so sessions
    /// opened together don't all hit the store on the same instant.
    pub initial_jitter: Duration,
    /// A store write slower than this is logged at `warn`.
    pub slow_rotation_warn: Duration,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            interval: Self::DEFAULT_INTERVAL,
            policy: RotationPolicy::default(),
            initial_jitter: Duration::ZERO,
            slow_rotation_warn: Duration::from_secs(2),
        }
    }
}

impl RotationConfig {
    /// Two minutes, the same as a token's lifetime.
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(120);
    /// Shortest interval accepted.
    pub const MIN_INTERVAL: Duration = Duration::from_secs(1);
    /// Longest interval accepted.
    pub const MAX_INTERVAL: Duration = Duration::from_secs(3600);

    /// A config with the given interval and default settings.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }

    /// Clamp out-of-range values so the config is safe to use.
    ///
    /// Called by [`RotationTimer::new`]. Rules:
    /// - `interval` clamped to `MIN_INTERVAL..=MAX_INTERVAL`.
    /// - `initial_jitter` capped to a tenth of the interval.
    pub fn validated(mut self) -> Self {
        let clamped = self.interval.clamp(Self::MIN_INTERVAL, Self::MAX_INTERVAL);
        if clamped != self.interval {
            warn!(
                requested_ms = self.interval.as_millis() as u64,
                clamped_ms = clamped.as_millis() as u64,
                "rotation interval out of range, clamping"
            );
            self.interval = clamped;
        }
        self.initial_jitter = self.initial_jitter.min(self.interval / 10);
        self
    }
}

// ---------------------------------------------------------------------------
// Tick info
// ---------------------------------------------------------------------------

/// A due rotation, returned by [`RotationTimer::wait_for_rotation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationTick {
    /// Monotonically increasing tick number (starts at 1).
    pub rotation: u64,
    /// `true` if the timer woke noticeably late.
    pub overrun: bool,
    /// Whole intervals that passed unserved while late (0 normally).
    pub missed: u64,
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Counters for one session's rotation loop.
#[derive(Debug, Clone, Default)]
pub struct RotationMetrics {
    /// Ticks fired.
    pub total_ticks: u64,
    /// Rotations the caller reported as persisted.
    pub total_rotations: u64,
    /// Rotations the caller reported as failed.
    pub total_failures: u64,
    /// Failures since the last success.
    pub consecutive_failures: u64,
    /// Late wakeups.
    pub total_overruns: u64,
    /// Intervals skipped by late wakeups.
    pub total_missed: u64,
    /// Longest time between a tick firing and its outcome being recorded.
    pub max_rotation_time: Duration,
}

// ---------------------------------------------------------------------------
// Timer
// ---------------------------------------------------------------------------

/// Fixed-interval timer for one session.
pub struct RotationTimer {
    config: RotationConfig,
    tick_count: u64,
    /// When the next rotation is due (Tokio instant for `sleep_until`).
    next_due: TokioInstant,
    /// Set when a tick fires, consumed by `record_success`/`record_failure`.
    tick_start: Option<Instant>,
    metrics: RotationMetrics,
}

impl RotationTimer {
    /// Creates a timer whose first rotation is one interval (plus jitter)
    /// from now.
    pub fn new(config: RotationConfig) -> Self {
        let config = config.validated();

        let jitter = if config.initial_jitter.is_zero() {
            Duration::ZERO
        } else {
            let max_ms = config.initial_jitter.as_millis() as u64;
            Duration::from_millis(rand::rng().random_range(0..=max_ms))
        };
        let next_due = TokioInstant::now() + config.interval + jitter;

        debug!(
            interval_ms = config.interval.as_millis() as u64,
            policy = ?config.policy,
            "rotation timer armed"
        );

        Self {
            config,
            tick_count: 0,
            next_due,
            tick_start: None,
            metrics: RotationMetrics::default(),
        }
    }

    /// A timer with the given interval and default settings.
    pub fn with_interval(interval: Duration) -> Self {
        Self::new(RotationConfig::with_interval(interval))
    }

    /// Waits until the next rotation is due.
    ///
    /// Cancel-safe: dropping the future before it resolves leaves the
    /// schedule untouched.
    pub async fn wait_for_rotation(&mut self) -> RotationTick {
        let due = self.next_due;
        let interval = self.config.interval;

        time::sleep_until(due).await;

        let now = TokioInstant::now();
        self.tick_count += 1;
        self.tick_start = Some(Instant::now());

        let late_by = now.saturating_duration_since(due);
        let overrun = late_by > interval / 10;
        let missed = if overrun {
            (late_by.as_nanos() / interval.as_nanos()) as u64
        } else {
            0
        };

        self.next_due = match self.config.policy {
            RotationPolicy::Skip => now + interval,
            RotationPolicy::Drop => due + interval * (missed as u32 + 1),
        };

        if overrun {
            warn!(
                rotation = self.tick_count,
                late_ms = late_by.as_millis() as u64,
                missed,
                policy = ?self.config.policy,
                "rotation timer woke late"
            );
            self.metrics.total_overruns += 1;
        }
        self.metrics.total_missed += missed;
        self.metrics.total_ticks += 1;

        trace!(rotation = self.tick_count, overrun, "rotation due");

        RotationTick {
            rotation: self.tick_count,
            overrun,
            missed,
        }
    }

    /// Records that the rotation for the current tick was persisted.
    pub fn record_success(&mut self) {
        self.finish_tick();
        self.metrics.total_rotations += 1;
        self.metrics.consecutive_failures = 0;
    }

    /// Records that the rotation for the current tick failed. The next
    /// scheduled tick is the retry.
    pub fn record_failure(&mut self) {
        self.finish_tick();
        self.metrics.total_failures += 1;
        self.metrics.consecutive_failures += 1;
    }

    fn finish_tick(&mut self) {
        let Some(start) = self.tick_start.take() else {
            return;
        };
        let elapsed = start.elapsed();

        if elapsed >= self.config.slow_rotation_warn {
            warn!(
                rotation = self.tick_count,
                elapsed_ms = elapsed.as_millis() as u64,
                "slow rotation"
            );
        }
        if elapsed > self.metrics.max_rotation_time {
            self.metrics.max_rotation_time = elapsed;
        }
    }

    /// Ticks fired so far.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// The configured interval (after clamping).
    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    /// When the next rotation is due.
    pub fn next_due(&self) -> TokioInstant {
        self.next_due
    }

    /// Snapshot of current metrics.
    pub fn metrics(&self) -> &RotationMetrics {
        &self.metrics
    }
}
