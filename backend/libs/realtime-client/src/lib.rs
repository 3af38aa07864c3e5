//! Client side of the realtime notification channel
//!
//! - **Transports**: WebSocket primary, server-push (SSE) and HTTP poll fallbacks
//!   behind one adapter contract ([`transport`])
//! - **Session**: connection state machine with ordered fallback and
//!   backoff-driven reconnection ([`RealtimeClient`])
//! - **Events**: per-kind listeners isolated from each other ([`events`])
//! - **Sounds**: category lookup for notification cues ([`sound`])

pub mod config;
pub mod decode;
pub mod error;
pub mod events;
pub mod session;
pub mod sound;
pub mod transport;

pub use config::ClientConfig;
pub use decode::InboundMessage;
pub use error::{ClientError, Result, TransportError};
pub use events::{ClientEvent, DisconnectReason, EventBus, EventKind, ListenerId};
pub use session::{ClientBuilder, ConnectionState, RealtimeClient, SessionSnapshot};
pub use sound::{sound_for, SilentPlayer, SoundCue, SoundError, SoundPlayer};
pub use transport::{
    AdapterEvent, ChannelStatus, DefaultConnector, OpenRequest, OpenedTransport, TransportAdapter,
    TransportConnector, TransportKind,
};
