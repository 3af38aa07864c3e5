/// Realtime connection management
///
/// 1. `channel`: transport-neutral channel pair shared by socket owners and the pool
/// 2. `pool`: connection records and the subscriber/topic/category/role indices
/// 3. `broadcast`: payload fan-out with per-connection failure isolation
/// 4. `health`: periodic liveness sweep
/// 5. `stats`: read-only aggregation for the admin API
/// 6. `session` / `sse`: WebSocket actor and server-push stream that own real sockets
pub mod broadcast;
pub mod channel;
pub mod health;
pub mod messages;
pub mod metadata;
pub mod pool;
pub mod session;
pub mod sse;
pub mod stats;

pub use channel::{channel_pair, ChannelEndpoint, ChannelEvent, ChannelHandle, ChannelStatus, Outbound, ServerChannel};
pub use health::{HealthMonitor, SweepReport};
pub use messages::{apply_control, ClientControl, ServerMessage};
pub use metadata::{ConnectionMetadata, ConnectionType, HandshakeParams};
pub use pool::{ConnectionPool, PooledConnection, TrafficCounters};
pub use session::WsSession;
pub use stats::{PoolStats, TopicCount, TrafficSnapshot};
