/// Preset configurations for realtime transports
use crate::backoff::ExponentialBackoff;
use crate::timeout::TimeoutConfig;
use std::time::Duration;

/// Configuration bundle for a reconnecting transport
#[derive(Debug, Clone)]
pub struct TransportResilience {
    pub connect_timeout: TimeoutConfig,
    pub reconnect: ExponentialBackoff,
}

/// Persistent client channels (WebSocket / SSE / polling)
///
/// - Connect timeout: 10s per transport attempt
/// - Reconnect: 1s base, ×1.5 per attempt, ±10% jitter, 30s cap, 10 attempts
pub fn realtime_transport_config() -> TransportResilience {
    TransportResilience {
        connect_timeout: TimeoutConfig {
            duration: Duration::from_secs(10),
        },
        reconnect: ExponentialBackoff::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_realtime_transport_config() {
        let config = realtime_transport_config();
        assert_eq!(config.connect_timeout.duration, Duration::from_secs(10));
        assert_eq!(config.reconnect.base_delay, Duration::from_secs(1));
        assert_eq!(config.reconnect.max_delay, Duration::from_secs(30));
        assert_eq!(config.reconnect.max_attempts, 10);
    }
}
