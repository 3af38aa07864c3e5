/// Fan-out of one serialized payload to a set of pooled connections
///
/// The payload is serialized once; each target whose channel is open (and
/// which passes the optional predicate) gets the same shared text. A failed
/// send bumps that connection's error counter and is skipped; the remaining
/// targets still receive the payload.
use super::metadata::ConnectionMetadata;
use super::pool::{ConnectionPool, PooledConnection};
use crate::error::{AppError, Result};
use crate::metrics;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

impl ConnectionPool {
    /// Send to every open connection. Returns the number of successful sends.
    pub fn broadcast<T: Serialize + ?Sized>(&self, payload: &T) -> Result<usize> {
        let text = encode(payload)?;
        Ok(self.deliver(self.snapshot(), &text, |_| true))
    }

    /// Send to every open connection whose metadata matches `predicate`
    pub fn broadcast_where<T, F>(&self, payload: &T, predicate: F) -> Result<usize>
    where
        T: Serialize + ?Sized,
        F: Fn(&ConnectionMetadata) -> bool,
    {
        let text = encode(payload)?;
        Ok(self.deliver(self.snapshot(), &text, predicate))
    }

    pub fn send_to_subscriber<T: Serialize + ?Sized>(&self, subscriber_id: i64, payload: &T) -> Result<usize> {
        let text = encode(payload)?;
        Ok(self.deliver(self.get_by_subscriber(subscriber_id), &text, |_| true))
    }

    pub fn broadcast_to_topic<T: Serialize + ?Sized>(&self, topic_id: i64, payload: &T) -> Result<usize> {
        let text = encode(payload)?;
        Ok(self.deliver(self.get_by_topic(topic_id), &text, |_| true))
    }

    pub fn broadcast_to_role<T: Serialize + ?Sized>(&self, role: &str, payload: &T) -> Result<usize> {
        let text = encode(payload)?;
        Ok(self.deliver(self.get_by_role(role), &text, |_| true))
    }

    pub fn broadcast_to_category<T: Serialize + ?Sized>(&self, category: &str, payload: &T) -> Result<usize> {
        let text = encode(payload)?;
        Ok(self.deliver(self.get_by_category(category), &text, |_| true))
    }

    /// Send to a single connection, surfacing the failure to the caller
    pub fn send_to_connection<T: Serialize + ?Sized>(&self, connection_id: &str, payload: &T) -> Result<()> {
        let connection = self
            .get(connection_id)
            .ok_or_else(|| AppError::ConnectionNotFound(connection_id.to_string()))?;
        let text = encode(payload)?;
        self.send_one(&connection, &text)
    }

    fn deliver<F>(&self, targets: Vec<Arc<PooledConnection>>, text: &Arc<str>, predicate: F) -> usize
    where
        F: Fn(&ConnectionMetadata) -> bool,
    {
        let mut delivered = 0;
        let mut failed = 0;

        for connection in targets {
            if !connection.channel().is_open() {
                continue;
            }
            if !connection.with_metadata(&predicate) {
                continue;
            }
            match self.send_one(&connection, text) {
                Ok(()) => delivered += 1,
                Err(_) => failed += 1,
            }
        }

        debug!(delivered, failed, bytes = text.len(), "broadcast complete");
        delivered
    }

    fn send_one(&self, connection: &PooledConnection, text: &Arc<str>) -> Result<()> {
        match connection.channel().send_text(text.clone()) {
            Ok(()) => {
                connection.counters().record_sent(text.len());
                self.totals().record_sent(text.len());
                metrics::record_message_sent();
                Ok(())
            }
            Err(e) => {
                connection.counters().record_error();
                self.totals().record_error();
                metrics::record_send_error();
                warn!(connection_id = %connection.id(), error = %e, "send to connection failed");
                Err(e.into())
            }
        }
    }
}

fn encode<T: Serialize + ?Sized>(payload: &T) -> Result<Arc<str>> {
    Ok(Arc::from(serde_json::to_string(payload)?))
}

#[cfg(test)]
mod tests {
    use super::super::channel::{channel_pair, ChannelEndpoint, Outbound};
    use super::*;
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn register(pool: &ConnectionPool, metadata: ConnectionMetadata) -> ChannelEndpoint {
        let (channel, endpoint) = channel_pair();
        endpoint.mark_open();
        pool.add(channel, metadata).unwrap();
        endpoint
    }

    fn received(endpoint: &mut ChannelEndpoint) -> Vec<String> {
        let mut texts = Vec::new();
        while let Some(command) = endpoint.try_recv() {
            if let Outbound::Text(text) = command {
                texts.push(text.to_string());
            }
        }
        texts
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_open_connections() {
        let pool = ConnectionPool::new();
        let mut endpoints: Vec<_> = (0..3)
            .map(|i| register(&pool, ConnectionMetadata::new(format!("c{i}"))))
            .collect();

        let sent = pool.broadcast(&json!({"type": "bid_update", "amount": 10})).unwrap();

        assert_eq!(sent, 3);
        for endpoint in &mut endpoints {
            let texts = received(endpoint);
            assert_eq!(texts.len(), 1);
            assert!(texts[0].contains("bid_update"));
        }
        assert_eq!(pool.totals().messages_sent.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_predicate_matching_nothing_sends_nothing() {
        let pool = ConnectionPool::new();
        let mut endpoint = register(&pool, ConnectionMetadata::new("c1").with_role("buyer"));

        let sent = pool
            .broadcast_where(&json!({"x": 1}), |m| m.role.as_deref() == Some("admin"))
            .unwrap();

        assert_eq!(sent, 0);
        assert!(received(&mut endpoint).is_empty());
        assert_eq!(pool.totals().messages_sent.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_failing_connection_does_not_block_others() {
        let pool = ConnectionPool::new();
        let mut healthy_a = register(&pool, ConnectionMetadata::new("a"));
        let broken = register(&pool, ConnectionMetadata::new("b"));
        let mut healthy_c = register(&pool, ConnectionMetadata::new("c"));

        // Receiver gone but the registration is still in the pool.
        let broken_conn = pool.get("b").unwrap();
        drop(broken);

        let sent = pool.broadcast(&json!({"type": "shipment"})).unwrap();

        assert_eq!(sent, 2);
        assert_eq!(received(&mut healthy_a).len(), 1);
        assert_eq!(received(&mut healthy_c).len(), 1);
        assert_eq!(broken_conn.counters().messages_sent.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_send_failure_counts_error() {
        let pool = ConnectionPool::new();
        let (channel, endpoint) = channel_pair();
        endpoint.mark_open();
        let conn = pool.add(channel, ConnectionMetadata::new("c1")).unwrap();

        // Closed locally while still registered; the write is refused.
        conn.channel().close(1000, "closing");
        let result = pool.send_to_connection("c1", &json!({"n": 1}));

        assert!(matches!(result, Err(AppError::Send(_))));
        assert_eq!(conn.counters().errors.load(Ordering::Relaxed), 1);
        drop(endpoint);
    }

    #[tokio::test]
    async fn test_targeted_helpers_use_indices() {
        let pool = ConnectionPool::new();
        let mut buyer = register(
            &pool,
            ConnectionMetadata::new("buyer")
                .with_subscriber(1)
                .with_role("buyer")
                .with_topics([10])
                .with_categories(["bid"]),
        );
        let mut seller = register(
            &pool,
            ConnectionMetadata::new("seller")
                .with_subscriber(2)
                .with_role("seller")
                .with_topics([20])
                .with_categories(["shipment"]),
        );

        assert_eq!(pool.send_to_subscriber(1, &json!({"to": "buyer"})).unwrap(), 1);
        assert_eq!(pool.broadcast_to_topic(20, &json!({"to": "topic-20"})).unwrap(), 1);
        assert_eq!(pool.broadcast_to_role("buyer", &json!({"to": "role"})).unwrap(), 1);
        assert_eq!(pool.broadcast_to_category("shipment", &json!({"to": "cat"})).unwrap(), 1);
        assert_eq!(pool.broadcast_to_topic(99, &json!({"to": "nobody"})).unwrap(), 0);

        assert_eq!(received(&mut buyer).len(), 2);
        assert_eq!(received(&mut seller).len(), 2);
    }

    #[tokio::test]
    async fn test_send_to_unknown_connection() {
        let pool = ConnectionPool::new();
        assert!(matches!(
            pool.send_to_connection("nope", &json!({})),
            Err(AppError::ConnectionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_per_connection_order_preserved() {
        let pool = ConnectionPool::new();
        let mut endpoint = register(&pool, ConnectionMetadata::new("c1").with_subscriber(5));

        for n in 0..5 {
            pool.send_to_subscriber(5, &json!({ "seq": n })).unwrap();
        }

        let texts = received(&mut endpoint);
        let seqs: Vec<i64> = texts
            .iter()
            .map(|t| serde_json::from_str::<serde_json::Value>(t).unwrap()["seq"].as_i64().unwrap())
            .collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    }
}
