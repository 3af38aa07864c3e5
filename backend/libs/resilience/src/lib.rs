/// Resilience patterns for realtime transports
///
/// This library provides:
/// - **Backoff**: Exponential reconnect delays with bounded jitter and an attempt cap
/// - **Timeout**: Deadlines for connection attempts
/// - **Preset Configurations**: Pre-tuned settings for persistent client channels
///
/// # Example: Reconnect Delay
///
/// ```rust
/// use resilience::ExponentialBackoff;
/// use std::time::Duration;
///
/// let backoff = ExponentialBackoff::default();
/// assert_eq!(backoff.base_delay_for(1), Duration::from_millis(1500));
/// assert!(!backoff.allows(10));
/// ```

pub mod backoff;
pub mod presets;
pub mod timeout;

// Re-export main types for convenience
pub use backoff::ExponentialBackoff;
pub use presets::{realtime_transport_config, TransportResilience};
pub use timeout::{with_timeout, with_timeout_result, TimeoutConfig, TimeoutError};
