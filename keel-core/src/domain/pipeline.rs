//! Pipeline domain types

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Pipeline definition as persisted in the coordination store
///
/// The record is owned by the CRUD layer; fields this crate does not know
/// about are carried in `extra` so a stored value survives a decode/encode
/// cycle unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Ordered task references; opaque to the control plane
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tasks: Vec<String>,
    /// Node identifiers this pipeline is bound to
    #[serde(default, deserialize_with = "null_as_empty")]
    pub nodes: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl Pipeline {
    /// Creates a pipeline with the given id and no tasks or nodes
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            description: None,
            tasks: Vec::new(),
            nodes: Vec::new(),
            extra: Map::new(),
        }
    }

    /// Binds the pipeline to the given nodes
    pub fn with_nodes<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.nodes = nodes.into_iter().map(Into::into).collect();
        self
    }

    /// Returns true if `node_id` appears in the pipeline's node list
    pub fn is_bound_to(&self, node_id: &str) -> bool {
        self.nodes.iter().any(|node| node == node_id)
    }

    /// Decodes a pipeline from its stored JSON form
    pub fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// Encodes the pipeline to its stored JSON form
    pub fn to_vec(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Accepts `null` where a list is expected; writers encode an unset list
/// that way
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}
