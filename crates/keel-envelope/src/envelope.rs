//! The message envelope exchanged between nodes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Correlation id as carried on the wire.
///
/// Ids set in code are `Uuid`. Ids read from a serialized envelope are kept as
/// `Text` until validation coerces them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CorrelationId {
    Uuid(Uuid),
    Text(String),
}

impl CorrelationId {
    /// The id as a UUID, parsing `Text` if needed.
    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            CorrelationId::Uuid(id) => Some(*id),
            CorrelationId::Text(text) => Uuid::parse_str(text.trim()).ok(),
        }
    }
}

impl From<String> for CorrelationId {
    fn from(text: String) -> Self {
        CorrelationId::Text(text)
    }
}

impl From<CorrelationId> for String {
    fn from(id: CorrelationId) -> Self {
        match id {
            CorrelationId::Uuid(id) => id.to_string(),
            CorrelationId::Text(text) => text,
        }
    }
}

impl From<Uuid> for CorrelationId {
    fn from(id: Uuid) -> Self {
        CorrelationId::Uuid(id)
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CorrelationId::Uuid(id) => write!(f, "{id}"),
            CorrelationId::Text(text) => f.write_str(text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default = "Uuid::new_v4")]
    pub envelope_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
    #[serde(default)]
    pub source_node: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_node: Option<String>,
    #[serde(default)]
    pub operation: String,
    #[serde(default)]
    pub payload: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envelope_version: Option<String>,
}

impl Envelope {
    pub fn new(source_node: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            envelope_id: Uuid::new_v4(),
            correlation_id: None,
            source_node: source_node.into(),
            target_node: None,
            operation: operation.into(),
            payload: serde_json::Map::new(),
            envelope_version: None,
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<CorrelationId>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_target(mut self, target_node: impl Into<String>) -> Self {
        self.target_node = Some(target_node.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.envelope_version = Some(version.into());
        self
    }

    pub fn with_payload_entry(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    pub fn from_json(text: &str) -> keel_types::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
