use super::pool::{ConnectionPool, TrafficCounters};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::Ordering;

/// Point-in-time view of pool traffic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrafficSnapshot {
    pub messages_sent: u64,
    pub bytes_sent: u64,
    pub messages_received: u64,
    pub bytes_received: u64,
    pub errors: u64,
}

impl From<&TrafficCounters> for TrafficSnapshot {
    fn from(counters: &TrafficCounters) -> Self {
        Self {
            messages_sent: counters.messages_sent.load(Ordering::Relaxed),
            bytes_sent: counters.bytes_sent.load(Ordering::Relaxed),
            messages_received: counters.messages_received.load(Ordering::Relaxed),
            bytes_received: counters.bytes_received.load(Ordering::Relaxed),
            errors: counters.errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicCount {
    pub topic_id: i64,
    pub connections: usize,
}

/// Aggregate statistics served by the admin API
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total_connections: usize,
    pub active_connections: usize,
    pub inactive_connections: usize,
    pub unique_subscribers: usize,
    pub by_role: BTreeMap<String, usize>,
    pub by_type: BTreeMap<String, usize>,
    pub top_topics: Vec<TopicCount>,
    pub traffic: TrafficSnapshot,
}

impl ConnectionPool {
    /// Aggregate statistics; `top_topics` holds at most `top_n` entries,
    /// busiest first, ties broken by topic id.
    pub fn stats(&self, top_n: usize) -> PoolStats {
        let registry = self.inner.registry.read();

        let total_connections = registry.connections.len();
        let mut active_connections = 0;
        let mut subscribers = HashSet::new();
        let mut by_type = BTreeMap::new();

        for connection in registry.connections.values() {
            if connection.is_active() {
                active_connections += 1;
            }
            connection.with_metadata(|m| {
                if let Some(subscriber_id) = m.subscriber_id {
                    subscribers.insert(subscriber_id);
                }
                *by_type.entry(m.connection_type.to_string()).or_insert(0) += 1;
            });
        }

        let by_role = registry
            .by_role
            .iter()
            .map(|(role, ids)| (role.clone(), ids.len()))
            .collect();

        let mut top_topics: Vec<TopicCount> = registry
            .by_topic
            .iter()
            .map(|(topic_id, ids)| TopicCount {
                topic_id: *topic_id,
                connections: ids.len(),
            })
            .collect();
        top_topics.sort_by(|a, b| b.connections.cmp(&a.connections).then(a.topic_id.cmp(&b.topic_id)));
        top_topics.truncate(top_n);

        PoolStats {
            total_connections,
            active_connections,
            inactive_connections: total_connections - active_connections,
            unique_subscribers: subscribers.len(),
            by_role,
            by_type,
            top_topics,
            traffic: TrafficSnapshot::from(&self.inner.totals),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::channel::{channel_pair, ChannelEndpoint};
    use super::super::metadata::{ConnectionMetadata, ConnectionType};
    use super::*;

    fn register(pool: &ConnectionPool, metadata: ConnectionMetadata) -> ChannelEndpoint {
        let (channel, endpoint) = channel_pair();
        endpoint.mark_open();
        pool.add(channel, metadata).unwrap();
        endpoint
    }

    #[tokio::test]
    async fn test_empty_pool_stats() {
        let stats = ConnectionPool::new().stats(10);
        assert_eq!(stats.total_connections, 0);
        assert!(stats.by_role.is_empty());
        assert!(stats.top_topics.is_empty());
        assert_eq!(stats.traffic, TrafficSnapshot::default());
    }

    #[tokio::test]
    async fn test_stats_aggregate_by_role_type_and_topic() {
        let pool = ConnectionPool::new();
        let _a = register(
            &pool,
            ConnectionMetadata::new("a").with_subscriber(1).with_role("buyer").with_topics([7, 8]),
        );
        let _b = register(
            &pool,
            ConnectionMetadata::new("b").with_subscriber(1).with_role("buyer").with_topics([7]),
        );
        let _c = register(
            &pool,
            ConnectionMetadata::new("c")
                .with_subscriber(2)
                .with_role("seller")
                .with_topics([9])
                .with_type(ConnectionType::Monitoring),
        );
        pool.get("c").unwrap().set_active(false);

        let stats = pool.stats(2);

        assert_eq!(stats.total_connections, 3);
        assert_eq!(stats.active_connections, 2);
        assert_eq!(stats.inactive_connections, 1);
        assert_eq!(stats.unique_subscribers, 2);
        assert_eq!(stats.by_role["buyer"], 2);
        assert_eq!(stats.by_role["seller"], 1);
        assert_eq!(stats.by_type["user"], 2);
        assert_eq!(stats.by_type["monitoring"], 1);
        assert_eq!(
            stats.top_topics,
            vec![
                TopicCount { topic_id: 7, connections: 2 },
                TopicCount { topic_id: 8, connections: 1 },
            ]
        );
    }

    #[tokio::test]
    async fn test_traffic_reflects_sends() {
        let pool = ConnectionPool::new();
        let _a = register(&pool, ConnectionMetadata::new("a"));

        pool.broadcast(&serde_json::json!({"k": "v"})).unwrap();

        let stats = pool.stats(10);
        assert_eq!(stats.traffic.messages_sent, 1);
        assert_eq!(stats.traffic.bytes_sent, r#"{"k":"v"}"#.len() as u64);
    }
}
