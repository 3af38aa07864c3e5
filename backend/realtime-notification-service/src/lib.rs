pub mod config;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod metrics;
pub mod websocket;

pub use config::{Config, RealtimeConfig};
pub use error::{AppError, ChannelError, Result};
pub use websocket::{ConnectionMetadata, ConnectionPool, ConnectionType, HealthMonitor, PoolStats};
