use serde_json::Value;

/// An inbound payload; never dropped, even when it is not JSON
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Structured(Value),
    Raw(String),
}

impl InboundMessage {
    pub fn decode(payload: String) -> Self {
        match serde_json::from_str::<Value>(&payload) {
            Ok(value) => InboundMessage::Structured(value),
            Err(_) => InboundMessage::Raw(payload),
        }
    }

    /// Declared kind (the `type` field)
    pub fn kind(&self) -> Option<&str> {
        self.as_json()?.get("type")?.as_str()
    }

    pub fn is_notification(&self) -> bool {
        self.kind() == Some("notification")
    }

    /// Integer message id, used as the resynchronization cursor
    pub fn id(&self) -> Option<i64> {
        self.as_json()?.get("id")?.as_i64()
    }

    /// Category label, read from the top level or from a nested `data` object
    pub fn category(&self) -> Option<&str> {
        let json = self.as_json()?;
        json.get("category")
            .or_else(|| json.get("data").and_then(|d| d.get("category")))
            .and_then(Value::as_str)
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            InboundMessage::Structured(value) => Some(value),
            InboundMessage::Raw(_) => None,
        }
    }
}
