/// Connection pool: primary connection map plus derived lookup indices
///
/// Every live connection has exactly one [`PooledConnection`] keyed by its
/// connection id, and is indexed by subscriber id, topic, category and role.
/// The primary map and all four indices sit behind a single lock, so an index
/// never names a connection that is absent from the map and empty index sets
/// are dropped in the same critical section that empties them.
///
/// Each connection gets a listener task that consumes its inbound
/// [`ChannelEvent`]s (frames, pongs, errors, closure). `remove` detaches that
/// listener before the channel handle is released.
use super::channel::{ChannelEvent, ChannelHandle, ServerChannel, CLOSE_GOING_AWAY, CLOSE_NORMAL};
use super::metadata::ConnectionMetadata;
use crate::error::{AppError, Result};
use crate::metrics;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Monotonic traffic counters
#[derive(Debug, Default)]
pub struct TrafficCounters {
    pub messages_sent: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub messages_received: AtomicU64,
    pub bytes_received: AtomicU64,
    pub errors: AtomicU64,
}

impl TrafficCounters {
    pub(crate) fn record_sent(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_received(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }
}

/// One registered connection: metadata, live channel handle and liveness state
#[derive(Debug)]
pub struct PooledConnection {
    id: String,
    metadata: RwLock<ConnectionMetadata>,
    channel: ChannelHandle,
    is_active: AtomicBool,
    last_activity: Mutex<Instant>,
    last_ping: Mutex<Option<Instant>>,
    counters: TrafficCounters,
    listener: Mutex<Option<AbortHandle>>,
}

impl PooledConnection {
    fn new(metadata: ConnectionMetadata, channel: ChannelHandle) -> Self {
        Self {
            id: metadata.connection_id.clone(),
            metadata: RwLock::new(metadata),
            channel,
            is_active: AtomicBool::new(true),
            last_activity: Mutex::new(Instant::now()),
            last_ping: Mutex::new(None),
            counters: TrafficCounters::default(),
            listener: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Copy of the current metadata
    pub fn metadata(&self) -> ConnectionMetadata {
        self.metadata.read().clone()
    }

    pub(crate) fn with_metadata<R>(&self, f: impl FnOnce(&ConnectionMetadata) -> R) -> R {
        f(&self.metadata.read())
    }

    pub fn channel(&self) -> &ChannelHandle {
        &self.channel
    }

    pub fn is_active(&self) -> bool {
        self.is_active.load(Ordering::Acquire)
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.is_active.store(active, Ordering::Release);
    }

    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    pub fn last_ping(&self) -> Option<Instant> {
        *self.last_ping.lock()
    }

    pub(crate) fn record_ping(&self) {
        *self.last_ping.lock() = Some(Instant::now());
    }

    pub fn counters(&self) -> &TrafficCounters {
        &self.counters
    }

    /// Any proof of life: refresh activity and restore the active flag
    pub(crate) fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
        self.set_active(true);
    }

    fn detach_listener(&self) {
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Registry {
    pub(crate) connections: HashMap<String, Arc<PooledConnection>>,
    pub(crate) by_subscriber: HashMap<i64, HashSet<String>>,
    pub(crate) by_topic: HashMap<i64, HashSet<String>>,
    pub(crate) by_category: HashMap<String, HashSet<String>>,
    pub(crate) by_role: HashMap<String, HashSet<String>>,
}

fn index_insert<K: Hash + Eq>(index: &mut HashMap<K, HashSet<String>>, key: K, id: &str) {
    index.entry(key).or_default().insert(id.to_string());
}

fn index_remove<K: Hash + Eq>(index: &mut HashMap<K, HashSet<String>>, key: &K, id: &str) {
    if let Some(ids) = index.get_mut(key) {
        ids.remove(id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

impl Registry {
    fn index(&mut self, metadata: &ConnectionMetadata) {
        let id = metadata.connection_id.as_str();
        if let Some(subscriber_id) = metadata.subscriber_id {
            index_insert(&mut self.by_subscriber, subscriber_id, id);
        }
        if let Some(role) = &metadata.role {
            index_insert(&mut self.by_role, role.clone(), id);
        }
        for topic_id in &metadata.topics {
            index_insert(&mut self.by_topic, *topic_id, id);
        }
        for category in &metadata.categories {
            index_insert(&mut self.by_category, category.clone(), id);
        }
    }

    fn unindex(&mut self, metadata: &ConnectionMetadata) {
        let id = metadata.connection_id.as_str();
        if let Some(subscriber_id) = metadata.subscriber_id {
            index_remove(&mut self.by_subscriber, &subscriber_id, id);
        }
        if let Some(role) = &metadata.role {
            index_remove(&mut self.by_role, role, id);
        }
        for topic_id in &metadata.topics {
            index_remove(&mut self.by_topic, topic_id, id);
        }
        for category in &metadata.categories {
            index_remove(&mut self.by_category, category, id);
        }
    }

    fn resolve(&self, ids: Option<&HashSet<String>>) -> Vec<Arc<PooledConnection>> {
        ids.map(|ids| {
            ids.iter()
                .filter_map(|id| self.connections.get(id).cloned())
                .collect()
        })
        .unwrap_or_default()
    }

    fn clear(&mut self) -> Vec<Arc<PooledConnection>> {
        self.by_subscriber.clear();
        self.by_topic.clear();
        self.by_category.clear();
        self.by_role.clear();
        self.connections.drain().map(|(_, conn)| conn).collect()
    }
}

pub(crate) struct PoolInner {
    pub(crate) registry: RwLock<Registry>,
    pub(crate) totals: TrafficCounters,
    pub(crate) health_task: Mutex<Option<AbortHandle>>,
    closed: AtomicBool,
}

/// Shared, cloneable connection pool
///
/// Constructed explicitly by the process and handed to the accept handlers.
#[derive(Clone)]
pub struct ConnectionPool {
    pub(crate) inner: Arc<PoolInner>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PoolInner {
                registry: RwLock::new(Registry::default()),
                totals: TrafficCounters::default(),
                health_task: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Register a channel and start listening to its events
    ///
    /// Must be called from within a tokio runtime.
    pub fn add(&self, channel: ServerChannel, metadata: ConnectionMetadata) -> Result<Arc<PooledConnection>> {
        let ServerChannel { handle, events } = channel;

        if self.inner.closed.load(Ordering::Acquire) {
            handle.close(CLOSE_GOING_AWAY, "server shutting down");
            return Err(AppError::PoolClosed);
        }

        let connection = Arc::new(PooledConnection::new(metadata, handle));
        let id = connection.id().to_string();

        let replaced = {
            let mut registry = self.inner.registry.write();
            let replaced = registry.connections.remove(&id);
            if let Some(previous) = &replaced {
                previous.with_metadata(|m| registry.unindex(m));
            }
            connection.with_metadata(|m| registry.index(m));
            registry.connections.insert(id.clone(), connection.clone());
            replaced
        };

        if let Some(previous) = replaced {
            warn!(connection_id = %id, "connection id reused while live; replacing previous channel");
            previous.detach_listener();
            previous.channel().close(CLOSE_NORMAL, "replaced");
        }

        let listener = tokio::spawn(listen(
            Arc::downgrade(&self.inner),
            connection.clone(),
            events,
        ));
        *connection.listener.lock() = Some(listener.abort_handle());

        metrics::set_active_connections(self.connection_count());
        connection.with_metadata(|m| {
            info!(
                connection_id = %id,
                subscriber_id = ?m.subscriber_id,
                role = ?m.role,
                connection_type = %m.connection_type,
                "connection registered"
            );
        });

        Ok(connection)
    }

    /// Remove a connection, clean its index entries, detach its listener and
    /// close its channel. Unknown ids are a no-op.
    pub fn remove(&self, connection_id: &str) -> Option<Arc<PooledConnection>> {
        let removed = self.take(connection_id)?;
        removed.detach_listener();
        removed.channel().close(CLOSE_NORMAL, "connection removed");
        Some(removed)
    }

    /// Like `remove`, but drops the socket without a closing handshake
    pub(crate) fn terminate(&self, connection_id: &str) -> Option<Arc<PooledConnection>> {
        let removed = self.take(connection_id)?;
        removed.detach_listener();
        removed.channel().terminate();
        Some(removed)
    }

    fn take(&self, connection_id: &str) -> Option<Arc<PooledConnection>> {
        let removed = {
            let mut registry = self.inner.registry.write();
            let removed = registry.connections.remove(connection_id)?;
            removed.with_metadata(|m| registry.unindex(m));
            removed
        };

        metrics::set_active_connections(self.connection_count());
        debug!(connection_id, "connection removed from pool");
        Some(removed)
    }

    pub fn get(&self, connection_id: &str) -> Option<Arc<PooledConnection>> {
        self.inner.registry.read().connections.get(connection_id).cloned()
    }

    pub fn get_by_subscriber(&self, subscriber_id: i64) -> Vec<Arc<PooledConnection>> {
        let registry = self.inner.registry.read();
        registry.resolve(registry.by_subscriber.get(&subscriber_id))
    }

    pub fn get_by_topic(&self, topic_id: i64) -> Vec<Arc<PooledConnection>> {
        let registry = self.inner.registry.read();
        registry.resolve(registry.by_topic.get(&topic_id))
    }

    pub fn get_by_category(&self, category: &str) -> Vec<Arc<PooledConnection>> {
        let registry = self.inner.registry.read();
        registry.resolve(registry.by_category.get(category))
    }

    pub fn get_by_role(&self, role: &str) -> Vec<Arc<PooledConnection>> {
        let registry = self.inner.registry.read();
        registry.resolve(registry.by_role.get(role))
    }

    /// Subscribe a connection to a topic. Returns false for unknown connections.
    /// Subscribing twice is a no-op.
    pub fn subscribe_to_topic(&self, connection_id: &str, topic_id: i64) -> bool {
        let mut registry = self.inner.registry.write();
        let Some(connection) = registry.connections.get(connection_id).cloned() else {
            return false;
        };
        if connection.metadata.write().topics.insert(topic_id) {
            index_insert(&mut registry.by_topic, topic_id, connection_id);
        }
        true
    }

    pub fn unsubscribe_from_topic(&self, connection_id: &str, topic_id: i64) -> bool {
        let mut registry = self.inner.registry.write();
        let Some(connection) = registry.connections.get(connection_id).cloned() else {
            return false;
        };
        if connection.metadata.write().topics.remove(&topic_id) {
            index_remove(&mut registry.by_topic, &topic_id, connection_id);
        }
        true
    }

    pub fn subscribe_to_category(&self, connection_id: &str, category: &str) -> bool {
        let mut registry = self.inner.registry.write();
        let Some(connection) = registry.connections.get(connection_id).cloned() else {
            return false;
        };
        if connection.metadata.write().categories.insert(category.to_string()) {
            index_insert(&mut registry.by_category, category.to_string(), connection_id);
        }
        true
    }

    pub fn unsubscribe_from_category(&self, connection_id: &str, category: &str) -> bool {
        let mut registry = self.inner.registry.write();
        let Some(connection) = registry.connections.get(connection_id).cloned() else {
            return false;
        };
        if connection.metadata.write().categories.remove(category) {
            index_remove(&mut registry.by_category, &category.to_string(), connection_id);
        }
        true
    }

    pub fn connection_count(&self) -> usize {
        self.inner.registry.read().connections.len()
    }

    /// Point-in-time copy of every live connection
    pub(crate) fn snapshot(&self) -> Vec<Arc<PooledConnection>> {
        self.inner.registry.read().connections.values().cloned().collect()
    }

    pub fn totals(&self) -> &TrafficCounters {
        &self.inner.totals
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Stop the health monitor, close every channel with a normal closure and
    /// clear the map and all indices in one critical section.
    pub fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(task) = self.inner.health_task.lock().take() {
            task.abort();
        }

        let drained = self.inner.registry.write().clear();
        for connection in &drained {
            connection.detach_listener();
            connection.channel().close(CLOSE_NORMAL, "server shutdown");
        }

        metrics::set_active_connections(0);
        info!(closed = drained.len(), "connection pool shut down");
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-connection listener: keeps counters and liveness current and removes
/// the connection once its channel reports closure.
async fn listen(
    pool: Weak<PoolInner>,
    connection: Arc<PooledConnection>,
    mut events: mpsc::UnboundedReceiver<ChannelEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = pool.upgrade() else {
            return;
        };
        match event {
            ChannelEvent::Frame { bytes } => {
                connection.touch();
                connection.counters.record_received(bytes);
                inner.totals.record_received(bytes);
            }
            ChannelEvent::Pong => connection.touch(),
            ChannelEvent::Error(error) => {
                connection.counters.record_error();
                inner.totals.record_error();
                warn!(connection_id = %connection.id(), %error, "channel error");
            }
            ChannelEvent::Closed => break,
        }
    }

    if let Some(inner) = pool.upgrade() {
        let pool = ConnectionPool { inner };
        // Only drop the registration if it still belongs to this channel.
        let current = pool.get(connection.id());
        if current.is_some_and(|c| Arc::ptr_eq(&c, &connection)) {
            debug!(connection_id = %connection.id(), "channel closed by peer");
            if let Some(removed) = pool.take(connection.id()) {
                removed.listener.lock().take();
            }
        }
    }
}
