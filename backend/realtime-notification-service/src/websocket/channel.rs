/// Transport-neutral server channel
///
/// A channel is split into two halves:
/// - [`ServerChannel`]: handed to the [`ConnectionPool`](super::ConnectionPool), which keeps
///   the [`ChannelHandle`] for outbound traffic and consumes the inbound event stream.
/// - [`ChannelEndpoint`]: held by whatever owns the real socket (WebSocket actor, SSE
///   stream, or a test), which applies outbound commands and reports inbound events.
use crate::error::ChannelError;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Normal closure (RFC 6455)
pub const CLOSE_NORMAL: u16 = 1000;
/// Server going away (shutdown)
pub const CLOSE_GOING_AWAY: u16 = 1001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Connecting,
    Open,
    Closed,
}

impl ChannelStatus {
    fn as_u8(self) -> u8 {
        match self {
            ChannelStatus::Connecting => 0,
            ChannelStatus::Open => 1,
            ChannelStatus::Closed => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => ChannelStatus::Connecting,
            1 => ChannelStatus::Open,
            _ => ChannelStatus::Closed,
        }
    }
}

/// Commands from the pool to the socket owner
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Text(Arc<str>),
    Ping,
    Close { code: u16, reason: String },
    /// Drop the socket without a closing handshake
    Terminate,
}

/// Events from the socket owner to the pool
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Frame { bytes: usize },
    Pong,
    Error(String),
    Closed,
}

#[derive(Debug, Clone)]
struct SharedStatus(Arc<AtomicU8>);

impl SharedStatus {
    fn get(&self) -> ChannelStatus {
        ChannelStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, status: ChannelStatus) {
        self.0.store(status.as_u8(), Ordering::Release);
    }
}

/// Pool-side sending half of a channel
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    outbound: mpsc::UnboundedSender<Outbound>,
    status: SharedStatus,
}

impl ChannelHandle {
    pub fn status(&self) -> ChannelStatus {
        if self.outbound.is_closed() {
            return ChannelStatus::Closed;
        }
        self.status.get()
    }

    pub fn is_open(&self) -> bool {
        self.status() == ChannelStatus::Open
    }

    pub fn send_text(&self, text: Arc<str>) -> Result<(), ChannelError> {
        self.send(Outbound::Text(text))
    }

    pub fn ping(&self) -> Result<(), ChannelError> {
        self.send(Outbound::Ping)
    }

    /// Close with a closing handshake. Closing an already closed channel is a no-op.
    pub fn close(&self, code: u16, reason: &str) {
        if self.status() == ChannelStatus::Closed {
            return;
        }
        self.status.set(ChannelStatus::Closed);
        let _ = self.outbound.send(Outbound::Close {
            code,
            reason: reason.to_string(),
        });
    }

    /// Forcibly drop the socket regardless of its reported state
    pub fn terminate(&self) {
        self.status.set(ChannelStatus::Closed);
        let _ = self.outbound.send(Outbound::Terminate);
    }

    fn send(&self, command: Outbound) -> Result<(), ChannelError> {
        if self.status() != ChannelStatus::Open {
            return Err(ChannelError::NotOpen);
        }
        self.outbound.send(command).map_err(|_| ChannelError::Closed)
    }
}

/// Channel as registered into the pool
#[derive(Debug)]
pub struct ServerChannel {
    pub(crate) handle: ChannelHandle,
    pub(crate) events: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl ServerChannel {
    pub fn handle(&self) -> &ChannelHandle {
        &self.handle
    }
}

/// Socket-owner side of a channel
#[derive(Debug)]
pub struct ChannelEndpoint {
    outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    status: SharedStatus,
}

impl ChannelEndpoint {
    pub fn mark_open(&self) {
        self.status.set(ChannelStatus::Open);
    }

    pub fn status(&self) -> ChannelStatus {
        self.status.get()
    }

    /// Report an inbound event. Returns false once the pool stopped listening.
    pub fn report(&self, event: ChannelEvent) -> bool {
        self.events.send(event).is_ok()
    }

    /// Mark the socket gone and tell the pool
    pub fn report_closed(&self) {
        self.status.set(ChannelStatus::Closed);
        let _ = self.events.send(ChannelEvent::Closed);
    }

    pub async fn recv(&mut self) -> Option<Outbound> {
        self.outbound.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Outbound> {
        self.outbound.try_recv().ok()
    }

    /// Split into the raw outbound stream and a reporter, for owners that drive
    /// the outbound side as a stream (the WebSocket actor).
    pub fn split(self) -> (mpsc::UnboundedReceiver<Outbound>, ChannelReporter) {
        (
            self.outbound,
            ChannelReporter {
                events: self.events,
                status: self.status,
            },
        )
    }
}

/// Inbound-event half of a split [`ChannelEndpoint`]
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    events: mpsc::UnboundedSender<ChannelEvent>,
    status: SharedStatus,
}

impl ChannelReporter {
    pub fn mark_open(&self) {
        self.status.set(ChannelStatus::Open);
    }

    pub fn report(&self, event: ChannelEvent) -> bool {
        self.events.send(event).is_ok()
    }

    pub fn report_closed(&self) {
        self.status.set(ChannelStatus::Closed);
        let _ = self.events.send(ChannelEvent::Closed);
    }
}

/// Create a connected channel pair in the `Connecting` state
pub fn channel_pair() -> (ServerChannel, ChannelEndpoint) {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let status = SharedStatus(Arc::new(AtomicU8::new(ChannelStatus::Connecting.as_u8())));

    (
        ServerChannel {
            handle: ChannelHandle {
                outbound: outbound_tx,
                status: status.clone(),
            },
            events: events_rx,
        },
        ChannelEndpoint {
            outbound: outbound_rx,
            events: events_tx,
            status,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, assert_ready_eq, task};

    #[test]
    fn test_send_requires_open() {
        let (channel, endpoint) = channel_pair();
        assert_eq!(channel.handle().status(), ChannelStatus::Connecting);
        assert_eq!(
            channel.handle().send_text(Arc::from("early")),
            Err(ChannelError::NotOpen)
        );

        endpoint.mark_open();
        assert!(channel.handle().send_text(Arc::from("hello")).is_ok());
    }

    #[test]
    fn test_endpoint_recv_wakes_on_command() {
        let (channel, mut endpoint) = channel_pair();
        endpoint.mark_open();
        let handle = channel.handle().clone();

        let mut next = task::spawn(endpoint.recv());
        assert_pending!(next.poll());

        handle.ping().unwrap();
        assert!(next.is_woken());
        assert_ready_eq!(next.poll(), Some(Outbound::Ping));
        drop(next);

        drop(handle);
        drop(channel);
        let mut end = task::spawn(endpoint.recv());
        assert_eq!(assert_ready!(end.poll()), None);
    }

    #[test]
    fn test_dropped_endpoint_reports_closed() {
        let (channel, endpoint) = channel_pair();
        endpoint.mark_open();
        drop(endpoint);

        assert_eq!(channel.handle().status(), ChannelStatus::Closed);
        assert_eq!(channel.handle().ping(), Err(ChannelError::NotOpen));
    }

    #[test]
    fn test_close_is_idempotent() {
        let (channel, mut endpoint) = channel_pair();
        endpoint.mark_open();

        channel.handle().close(CLOSE_NORMAL, "bye");
        channel.handle().close(CLOSE_NORMAL, "bye again");

        assert_eq!(
            endpoint.try_recv(),
            Some(Outbound::Close {
                code: CLOSE_NORMAL,
                reason: "bye".to_string()
            })
        );
        assert_eq!(endpoint.try_recv(), None);
    }

    #[test]
    fn test_outbound_order_preserved() {
        let (channel, mut endpoint) = channel_pair();
        endpoint.mark_open();

        for text in ["one", "two", "three"] {
            channel.handle().send_text(Arc::from(text)).unwrap();
        }

        for text in ["one", "two", "three"] {
            assert_eq!(endpoint.try_recv(), Some(Outbound::Text(Arc::from(text))));
        }
    }
}
