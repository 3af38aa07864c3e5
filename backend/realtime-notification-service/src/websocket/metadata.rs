use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Class of the peer behind a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    #[default]
    User,
    System,
    Monitoring,
}

impl ConnectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionType::User => "user",
            ConnectionType::System => "system",
            ConnectionType::Monitoring => "monitoring",
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Indexable description of one open connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionMetadata {
    pub connection_id: String,
    pub subscriber_id: Option<i64>,
    pub role: Option<String>,
    pub topics: BTreeSet<i64>,
    pub categories: BTreeSet<String>,
    pub connection_type: ConnectionType,
}

impl ConnectionMetadata {
    pub fn new(connection_id: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            subscriber_id: None,
            role: None,
            topics: BTreeSet::new(),
            categories: BTreeSet::new(),
            connection_type: ConnectionType::User,
        }
    }

    pub fn with_subscriber(mut self, subscriber_id: i64) -> Self {
        self.subscriber_id = Some(subscriber_id);
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_topics(mut self, topics: impl IntoIterator<Item = i64>) -> Self {
        self.topics.extend(topics);
        self
    }

    pub fn with_categories<S: Into<String>>(mut self, categories: impl IntoIterator<Item = S>) -> Self {
        self.categories.extend(categories.into_iter().map(Into::into));
        self
    }

    pub fn with_type(mut self, connection_type: ConnectionType) -> Self {
        self.connection_type = connection_type;
        self
    }
}

/// Query string accepted on `/ws` and `/sse`
///
/// `?subscriber_id=42&role=buyer&topics=7,9&categories=bid,payment&connection_type=user`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HandshakeParams {
    pub subscriber_id: Option<i64>,
    pub role: Option<String>,
    pub topics: Option<String>,
    pub categories: Option<String>,
    pub connection_type: Option<ConnectionType>,
}

impl HandshakeParams {
    pub fn into_metadata(self, connection_id: impl Into<String>) -> Result<ConnectionMetadata, AppError> {
        let topics = split_list(self.topics.as_deref())
            .map(|raw| {
                raw.parse::<i64>()
                    .map_err(|_| AppError::BadRequest(format!("invalid topic id: {raw}")))
            })
            .collect::<Result<BTreeSet<_>, _>>()?;

        Ok(ConnectionMetadata {
            connection_id: connection_id.into(),
            subscriber_id: self.subscriber_id,
            role: self.role.filter(|r| !r.trim().is_empty()),
            topics,
            categories: split_list(self.categories.as_deref())
                .map(str::to_string)
                .collect(),
            connection_type: self.connection_type.unwrap_or_default(),
        })
    }
}

fn split_list(raw: Option<&str>) -> impl Iterator<Item = &str> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_into_metadata() {
        let params = HandshakeParams {
            subscriber_id: Some(42),
            role: Some("buyer".into()),
            topics: Some("7, 9,,7".into()),
            categories: Some("bid,payment".into()),
            connection_type: None,
        };

        let metadata = params.into_metadata("conn-1").unwrap();
        assert_eq!(metadata.subscriber_id, Some(42));
        assert_eq!(metadata.role.as_deref(), Some("buyer"));
        assert_eq!(metadata.topics.into_iter().collect::<Vec<_>>(), vec![7, 9]);
        assert!(metadata.categories.contains("payment"));
        assert_eq!(metadata.connection_type, ConnectionType::User);
    }

    #[test]
    fn test_handshake_rejects_bad_topic() {
        let params = HandshakeParams {
            topics: Some("7,abc".into()),
            ..Default::default()
        };

        assert!(matches!(
            params.into_metadata("conn-1"),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn test_blank_role_is_dropped() {
        let params = HandshakeParams {
            role: Some("  ".into()),
            ..Default::default()
        };
        assert_eq!(params.into_metadata("c").unwrap().role, None);
    }

    #[test]
    fn test_connection_type_wire_names() {
        let parsed: ConnectionType = serde_json::from_str("\"monitoring\"").unwrap();
        assert_eq!(parsed, ConnectionType::Monitoring);
        assert_eq!(ConnectionType::System.to_string(), "system");
    }
}
