use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub realtime: RealtimeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Health sweep period in seconds (default: 30)
    pub health_interval_secs: u64,
    /// Largest inbound WebSocket frame accepted, in bytes (default: 256 KB)
    pub max_frame_bytes: usize,
    /// Number of topics reported in the stats snapshot (default: 10)
    pub stats_top_topics: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            health_interval_secs: 30,
            max_frame_bytes: 262_144,
            stats_top_topics: 10,
        }
    }
}

impl RealtimeConfig {
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let defaults = RealtimeConfig::default();
        let config = Config {
            app: AppConfig {
                host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_var("APP_PORT", 8000)?,
            },
            realtime: RealtimeConfig {
                health_interval_secs: parse_var(
                    "REALTIME_HEALTH_INTERVAL_SECS",
                    defaults.health_interval_secs,
                )?,
                max_frame_bytes: parse_var("REALTIME_MAX_FRAME_BYTES", defaults.max_frame_bytes)?,
                stats_top_topics: parse_var("REALTIME_STATS_TOP_TOPICS", defaults.stats_top_topics)?,
            },
        };

        if config.realtime.health_interval_secs == 0 {
            return Err(AppError::Config(
                "REALTIME_HEALTH_INTERVAL_SECS must be greater than zero".into(),
            ));
        }

        Ok(config)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.app.host, self.app.port)
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("{name} is invalid: {e}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_realtime_defaults() {
        let realtime = RealtimeConfig::default();
        assert_eq!(realtime.health_interval(), Duration::from_secs(30));
        assert_eq!(realtime.max_frame_bytes, 262_144);
        assert_eq!(realtime.stats_top_topics, 10);
    }

    #[test]
    fn test_parse_var_rejects_garbage() {
        std::env::set_var("REALTIME_TEST_PARSE_VAR", "not-a-number");
        let result: Result<u64, _> = parse_var("REALTIME_TEST_PARSE_VAR", 5);
        assert!(matches!(result, Err(AppError::Config(_))));
        std::env::remove_var("REALTIME_TEST_PARSE_VAR");
    }

    #[test]
    fn test_parse_var_uses_default_when_missing() {
        let value: u64 = parse_var("REALTIME_TEST_UNSET_VAR", 7).unwrap();
        assert_eq!(value, 7);
    }
}
