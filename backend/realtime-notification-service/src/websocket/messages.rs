/// Control frames exchanged on a realtime channel
///
/// Application payloads are opaque to the server; only frames whose `type`
/// names a control message are interpreted.
use super::pool::ConnectionPool;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const CONTROL_TYPES: &[&str] = &[
    "subscribe",
    "unsubscribe",
    "subscribe_category",
    "unsubscribe_category",
    "ping",
];

/// Client-to-server control message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientControl {
    Subscribe { topic_id: i64 },
    Unsubscribe { topic_id: i64 },
    SubscribeCategory { category: String },
    UnsubscribeCategory { category: String },
    Ping,
}

impl ClientControl {
    /// Parse a control message out of an arbitrary JSON value.
    ///
    /// `None` means the value is not a control message at all; `Some(Err)`
    /// means it claims a control type but is malformed.
    pub fn from_value(value: &Value) -> Option<Result<Self, serde_json::Error>> {
        let kind = value.get("type")?.as_str()?;
        if !CONTROL_TYPES.contains(&kind) {
            return None;
        }
        Some(serde_json::from_value(value.clone()))
    }

    pub fn parse(text: &str) -> Option<Result<Self, serde_json::Error>> {
        let value: Value = serde_json::from_str(text).ok()?;
        Self::from_value(&value)
    }
}

/// Server-to-client control reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Subscribed {
        #[serde(skip_serializing_if = "Option::is_none")]
        topic_id: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        category: Option<String>,
    },
    Unsubscribed {
        #[serde(skip_serializing_if = "Option::is_none")]
        topic_id: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        category: Option<String>,
    },
    Pong { timestamp: i64 },
    Error { code: String, message: String },
}

impl ServerMessage {
    pub fn pong() -> Self {
        ServerMessage::Pong {
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Apply a control message to the pool on behalf of `connection_id`
pub fn apply_control(pool: &ConnectionPool, connection_id: &str, control: ClientControl) -> ServerMessage {
    let (applied, reply) = match control {
        ClientControl::Ping => return ServerMessage::pong(),
        ClientControl::Subscribe { topic_id } => (
            pool.subscribe_to_topic(connection_id, topic_id),
            ServerMessage::Subscribed {
                topic_id: Some(topic_id),
                category: None,
            },
        ),
        ClientControl::Unsubscribe { topic_id } => (
            pool.unsubscribe_from_topic(connection_id, topic_id),
            ServerMessage::Unsubscribed {
                topic_id: Some(topic_id),
                category: None,
            },
        ),
        ClientControl::SubscribeCategory { category } => (
            pool.subscribe_to_category(connection_id, &category),
            ServerMessage::Subscribed {
                topic_id: None,
                category: Some(category),
            },
        ),
        ClientControl::UnsubscribeCategory { category } => (
            pool.unsubscribe_from_category(connection_id, &category),
            ServerMessage::Unsubscribed {
                topic_id: None,
                category: Some(category),
            },
        ),
    };

    if applied {
        reply
    } else {
        ServerMessage::error(
            "CONNECTION_NOT_FOUND",
            format!("connection {connection_id} is not registered"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::super::channel::channel_pair;
    use super::super::metadata::ConnectionMetadata;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_control_frames() {
        assert_eq!(
            ClientControl::parse(r#"{"type":"subscribe","topic_id":7}"#).unwrap().unwrap(),
            ClientControl::Subscribe { topic_id: 7 }
        );
        assert_eq!(
            ClientControl::parse(r#"{"type":"ping"}"#).unwrap().unwrap(),
            ClientControl::Ping
        );
        assert_eq!(
            ClientControl::parse(r#"{"type":"subscribe_category","category":"bid"}"#)
                .unwrap()
                .unwrap(),
            ClientControl::SubscribeCategory {
                category: "bid".into()
            }
        );
    }

    #[test]
    fn test_non_control_payloads_are_ignored() {
        assert!(ClientControl::parse("not json").is_none());
        assert!(ClientControl::parse(r#"{"type":"chat","body":"hi"}"#).is_none());
        assert!(ClientControl::parse(r#"[1,2,3]"#).is_none());
    }

    #[test]
    fn test_malformed_control_is_an_error() {
        assert!(matches!(
            ClientControl::parse(r#"{"type":"subscribe","topic_id":"seven"}"#),
            Some(Err(_))
        ));
    }

    #[test]
    fn test_reply_wire_format() {
        let reply = ServerMessage::Subscribed {
            topic_id: Some(3),
            category: None,
        };
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({"type": "subscribed", "topic_id": 3})
        );
    }

    #[tokio::test]
    async fn test_apply_control_updates_pool() {
        let pool = ConnectionPool::new();
        let (channel, endpoint) = channel_pair();
        endpoint.mark_open();
        pool.add(channel, ConnectionMetadata::new("c1")).unwrap();

        let reply = apply_control(&pool, "c1", ClientControl::Subscribe { topic_id: 11 });
        assert!(matches!(reply, ServerMessage::Subscribed { topic_id: Some(11), .. }));
        assert_eq!(pool.get_by_topic(11).len(), 1);

        apply_control(&pool, "c1", ClientControl::Unsubscribe { topic_id: 11 });
        assert!(pool.get_by_topic(11).is_empty());

        let reply = apply_control(&pool, "ghost", ClientControl::Subscribe { topic_id: 1 });
        assert!(matches!(reply, ServerMessage::Error { .. }));

        assert!(matches!(
            apply_control(&pool, "ghost", ClientControl::Ping),
            ServerMessage::Pong { .. }
        ));
    }
}
