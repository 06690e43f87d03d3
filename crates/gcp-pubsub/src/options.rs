//! Tuning knobs for [`Subscription::listen`](crate::Subscription::listen).

use std::time::Duration;

use crate::types::{Error, Result};

pub const DEFAULT_MAX_MESSAGES: u32 = 1;
pub const DEFAULT_POLL_SLEEP: Duration = Duration::from_secs(30);
/// Watchdog budget as a multiple of the poll interval when not set explicitly.
const TIMEOUT_POLL_FACTOR: u32 = 3;
/// Environment variable holding the health endpoint port.
pub const HEALTH_PORT_ENV: &str = "HEALTH_CHECK_PORT";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenOptions {
    /// Upper bound on envelopes per pull.
    pub max_messages: u32,
    /// Skip (but still ack) messages older than this at processing time.
    /// Zero means no limit.
    pub limit_message_time: Option<Duration>,
    /// Sleep after an empty pull or a failed iteration.
    pub poll_sleep: Duration,
    /// Liveness budget. Defaults to three poll intervals.
    pub max_timeout: Option<Duration>,
    /// Serve `GET /status` on this port while listening.
    pub health_port: Option<u16>,
}

impl Default for ListenOptions {
    fn default() -> Self {
        Self {
            max_messages: DEFAULT_MAX_MESSAGES,
            limit_message_time: None,
            poll_sleep: DEFAULT_POLL_SLEEP,
            max_timeout: None,
            health_port: None,
        }
    }
}

impl ListenOptions {
    /// Defaults, with the health port taken from `HEALTH_CHECK_PORT` if set.
    pub fn from_env() -> Result<Self> {
        let health_port = match std::env::var(HEALTH_PORT_ENV) {
            Ok(raw) if !raw.trim().is_empty() => Some(parse_port(&raw)?),
            _ => None,
        };
        Ok(Self {
            health_port,
            ..Self::default()
        })
    }

    pub fn effective_timeout(&self) -> Duration {
        self.max_timeout
            .unwrap_or(self.poll_sleep * TIMEOUT_POLL_FACTOR)
    }

    /// The age limit in force; a zero limit disables expiry.
    pub fn message_age_limit(&self) -> Option<Duration> {
        self.limit_message_time.filter(|limit| !limit.is_zero())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_messages == 0 {
            return Err(Error::InvalidArgument(
                "max_messages must be at least 1".into(),
            ));
        }
        if self.poll_sleep.is_zero() {
            return Err(Error::InvalidArgument("poll_sleep must be non-zero".into()));
        }
        if self.effective_timeout().is_zero() {
            return Err(Error::InvalidArgument("max_timeout must be non-zero".into()));
        }
        Ok(())
    }
}

fn parse_port(raw: &str) -> Result<u16> {
    raw.trim()
        .parse()
        .map_err(|e| Error::InvalidArgument(format!("{HEALTH_PORT_ENV}={raw}: {e}")))
}
