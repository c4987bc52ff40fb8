//! Service configuration, loaded from the environment.

use std::str::FromStr;
use std::time::Duration;

use rollcall_attendance::FeedConfig;
use rollcall_protocol::{ProtocolError, SigningKey};
use rollcall_session::SessionConfig;

/// Environment variable names.
pub mod vars {
    pub const SIGNING_KEY: &str = "ROLLCALL_SIGNING_KEY";
    pub const ROTATION_SECS: &str = "ROLLCALL_ROTATION_SECS";
    pub const TOKEN_TTL_SECS: &str = "ROLLCALL_TOKEN_TTL_SECS";
    pub const LATE_THRESHOLD_MINUTES: &str = "ROLLCALL_LATE_THRESHOLD_MINUTES";
    pub const RECENT_LIMIT: &str = "ROLLCALL_RECENT_LIMIT";
    pub const LOG: &str = "ROLLCALL_LOG";
}

/// Default tracing filter when neither `RUST_LOG` nor `ROLLCALL_LOG` is set.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// A configuration value could not be used.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The variable is set but does not parse.
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },

    /// The signing key is not valid hex or is too short.
    #[error("invalid signing key: {0}")]
    SigningKey(#[source] ProtocolError),
}

/// Everything needed to build an [`AttendanceService`](crate::AttendanceService).
#[derive(Debug, Clone)]
pub struct RollcallConfig {
    /// HMAC key for presence tokens. Stays on the server.
    pub signing_key: SigningKey,
    pub session: SessionConfig,
    pub feed: FeedConfig,
    /// `tracing-subscriber` filter directive.
    pub log_filter: String,
}

impl Default for RollcallConfig {
    /// Defaults with a freshly generated signing key.
    fn default() -> Self {
        Self {
            signing_key: SigningKey::generate(),
            session: SessionConfig::default(),
            feed: FeedConfig::default(),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl RollcallConfig {
    /// Loads `.env` if present, then reads `ROLLCALL_*` variables.
    ///
    /// Missing variables keep their defaults. Without
    /// `ROLLCALL_SIGNING_KEY` a random key is generated, which means tokens
    /// do not survive a restart.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable source.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        match lookup(vars::SIGNING_KEY) {
            Some(hex_key) => {
                config.signing_key = SigningKey::from_hex(hex_key.trim())
                    .map_err(ConfigError::SigningKey)?;
            }
            None => tracing::warn!(
                "{} not set, using a per-process signing key",
                vars::SIGNING_KEY
            ),
        }

        if let Some(secs) = parse(&lookup, vars::ROTATION_SECS)? {
            config.session.rotation_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse(&lookup, vars::TOKEN_TTL_SECS)? {
            config.session.token_ttl = Duration::from_secs(secs);
        }
        if let Some(minutes) = parse(&lookup, vars::LATE_THRESHOLD_MINUTES)? {
            config.session.default_late_threshold_minutes = minutes;
        }
        if let Some(limit) = parse(&lookup, vars::RECENT_LIMIT)? {
            config.feed.recent_limit = limit;
        }
        if let Some(filter) = lookup(vars::LOG) {
            config.log_filter = filter;
        }

        Ok(config)
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    let Some(value) = lookup(key) else {
        return Ok(None);
    };
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::Invalid { key, value })
}
