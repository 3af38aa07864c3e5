use crate::error::ClientError;
use resilience::{realtime_transport_config, ExponentialBackoff};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Client transport configuration
///
/// Endpoints are opaque; any of the three may be absent. Transports are tried
/// in the order primary, server-push, poll, skipping the unconfigured ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Full-duplex WebSocket endpoint
    pub primary_url: Option<String>,
    /// Server-push (SSE) endpoint
    pub push_url: Option<String>,
    /// Pull endpoint
    pub poll_url: Option<String>,
    pub poll_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    pub play_sounds: bool,
    /// Consecutive pull failures before the poll transport reports closure
    pub max_consecutive_poll_failures: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let preset = realtime_transport_config();
        Self {
            primary_url: None,
            push_url: None,
            poll_url: None,
            poll_interval_ms: 3_000,
            connect_timeout_ms: preset.connect_timeout.duration.as_millis() as u64,
            base_delay_ms: preset.reconnect.base_delay.as_millis() as u64,
            max_delay_ms: preset.reconnect.max_delay.as_millis() as u64,
            max_reconnect_attempts: preset.reconnect.max_attempts,
            play_sounds: true,
            max_consecutive_poll_failures: 5,
        }
    }
}

impl ClientConfig {
    /// Load from `REALTIME_CLIENT_*` environment variables
    pub fn from_env() -> Result<Self, ClientError> {
        envy::prefixed("REALTIME_CLIENT_")
            .from_env::<ClientConfig>()
            .map_err(|e| ClientError::Config(e.to_string()))
    }

    pub fn with_primary_url(mut self, url: impl Into<String>) -> Self {
        self.primary_url = Some(url.into());
        self
    }

    pub fn with_push_url(mut self, url: impl Into<String>) -> Self {
        self.push_url = Some(url.into());
        self
    }

    pub fn with_poll_url(mut self, url: impl Into<String>) -> Self {
        self.poll_url = Some(url.into());
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_reconnect(mut self, base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        self.base_delay_ms = base_delay.as_millis() as u64;
        self.max_delay_ms = max_delay.as_millis() as u64;
        self.max_reconnect_attempts = max_attempts;
        self
    }

    pub fn with_sounds(mut self, enabled: bool) -> Self {
        self.play_sounds = enabled;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.max_reconnect_attempts,
        )
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if self.poll_url.is_some() && self.poll_interval_ms == 0 {
            return Err(ClientError::Config("poll_interval_ms must be greater than zero".into()));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ClientError::Config("connect_timeout_ms must be greater than zero".into()));
        }
        if self.max_consecutive_poll_failures == 0 {
            return Err(ClientError::Config(
                "max_consecutive_poll_failures must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
