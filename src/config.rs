use std::env;
use std::time::Duration;

use crate::error::TrackingError;

#[derive(Debug, Clone)]
pub struct Config {
    pub ws_url: String,
    pub api_url: String,
    pub poll_interval: Duration,
    pub http_timeout: Duration,
    pub outbound_buffer_size: usize,
    pub reconnect: ReconnectPolicy,
    pub log_level: String,
    pub track_order_id: Option<String>,
}

/// Backoff used by the WebSocket transport between reconnect attempts.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// 0 means retry forever.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(30_000),
            multiplier: 2.0,
            max_attempts: 0,
        }
    }
}

impl ReconnectPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(32) as i32);
        let millis = (self.initial_delay.as_millis() as f64 * factor)
            .min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts != 0 && attempt >= self.max_attempts
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ws_url: "ws://localhost:3000/ws".to_string(),
            api_url: "http://localhost:3000/api".to_string(),
            poll_interval: Duration::from_millis(15_000),
            http_timeout: Duration::from_secs(10),
            outbound_buffer_size: 64,
            reconnect: ReconnectPolicy::default(),
            log_level: "info".to_string(),
            track_order_id: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, TrackingError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, TrackingError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let poll_interval_ms: u64 = parse_or_default(&lookup, "POLL_INTERVAL_MS", 15_000)?;
        if poll_interval_ms == 0 {
            return Err(TrackingError::Config(
                "POLL_INTERVAL_MS must be greater than 0".to_string(),
            ));
        }

        let outbound_buffer_size = parse_or_default(&lookup, "OUTBOUND_BUFFER_SIZE", 64)?;
        if outbound_buffer_size == 0 {
            return Err(TrackingError::Config(
                "OUTBOUND_BUFFER_SIZE must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            ws_url: lookup("TRACKING_WS_URL").unwrap_or(defaults.ws_url),
            api_url: lookup("TRACKING_API_URL").unwrap_or(defaults.api_url),
            poll_interval: Duration::from_millis(poll_interval_ms),
            http_timeout: Duration::from_secs(parse_or_default(&lookup, "HTTP_TIMEOUT_SECS", 10)?),
            outbound_buffer_size,
            reconnect: ReconnectPolicy {
                initial_delay: Duration::from_millis(parse_or_default(
                    &lookup,
                    "RECONNECT_INITIAL_DELAY_MS",
                    1_000,
                )?),
                max_delay: Duration::from_millis(parse_or_default(
                    &lookup,
                    "RECONNECT_MAX_DELAY_MS",
                    30_000,
                )?),
                multiplier: defaults.reconnect.multiplier,
                max_attempts: parse_or_default(&lookup, "RECONNECT_MAX_ATTEMPTS", 0)?,
            },
            log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),
            track_order_id: lookup("TRACK_ORDER_ID").filter(|id| !id.trim().is_empty()),
        })
    }
}

fn parse_or_default<F, T>(lookup: &F, key: &str, default: T) -> Result<T, TrackingError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|err| TrackingError::Config(format!("invalid {key}: {err}"))),
        None => Ok(default),
    }
}
