//! Job graph model: nodes keyed by id, plus auxiliary top-level fields
//!
//! A template is a JSON object. Entries whose value is an object with a string
//! `class_type` and an object `inputs` are nodes; anything else (an embedded
//! image payload, its filename, ...) is kept as an opaque auxiliary entry and
//! never forwarded to the engine.

use crate::error::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::path::Path;
use std::str::FromStr;

pub const CLASS_TYPE_KEY: &str = "class_type";
pub const INPUTS_KEY: &str = "inputs";

/// Node types the mutation engine knows how to patch.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    KSampler,
    ClipTextEncode,
    LoadImage,
    CheckpointLoaderSimple,
    EmptyLatentImage,
    EmptySd3LatentImage,
    Other(String),
}

impl NodeKind {
    pub fn from_class_type(class_type: &str) -> Self {
        match class_type {
            "KSampler" => Self::KSampler,
            "CLIPTextEncode" => Self::ClipTextEncode,
            "LoadImage" => Self::LoadImage,
            "CheckpointLoaderSimple" => Self::CheckpointLoaderSimple,
            "EmptyLatentImage" => Self::EmptyLatentImage,
            "EmptySD3LatentImage" => Self::EmptySd3LatentImage,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::KSampler => "KSampler",
            Self::ClipTextEncode => "CLIPTextEncode",
            Self::LoadImage => "LoadImage",
            Self::CheckpointLoaderSimple => "CheckpointLoaderSimple",
            Self::EmptyLatentImage => "EmptyLatentImage",
            Self::EmptySd3LatentImage => "EmptySD3LatentImage",
            Self::Other(s) => s,
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An edge to another node's output slot, encoded on the wire as `["4", 0]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeLink {
    pub node: String,
    pub slot: u32,
}

/// A node input: either a literal or a link. Links are structural and are
/// never rewritten by field patches.
#[derive(Clone, Debug, PartialEq)]
pub enum InputValue {
    Scalar(Value),
    Link(NodeLink),
}

impl InputValue {
    pub fn from_value(value: Value) -> Self {
        if let Value::Array(items) = &value {
            if let [Value::String(node), Value::Number(slot)] = items.as_slice() {
                if let Some(slot) = slot.as_u64().and_then(|s| u32::try_from(s).ok()) {
                    return Self::Link(NodeLink {
                        node: node.clone(),
                        slot,
                    });
                }
            }
        }
        Self::Scalar(value)
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Scalar(v) => v.clone(),
            Self::Link(link) => Value::Array(vec![
                Value::String(link.node.clone()),
                Value::from(link.slot),
            ]),
        }
    }

    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            Self::Scalar(v) => Some(v),
            Self::Link(_) => None,
        }
    }

    pub fn is_link(&self) -> bool {
        matches!(self, Self::Link(_))
    }
}

impl From<Value> for InputValue {
    fn from(value: Value) -> Self {
        Self::from_value(value)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    kind: NodeKind,
    pub inputs: IndexMap<String, InputValue>,
    /// The node object as loaded. `class_type` and `inputs` are held as null
    /// slots so re-serialization keeps every key where it was.
    fields: Map<String, Value>,
}

impl Node {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            inputs: IndexMap::new(),
            fields: Map::new(),
        }
    }

    pub fn with_input(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inputs
            .insert(name.into(), InputValue::from_value(value.into()));
        self
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn class_type(&self) -> &str {
        self.kind.as_str()
    }

    pub fn input(&self, name: &str) -> Option<&InputValue> {
        self.inputs.get(name)
    }

    pub fn scalar(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name).and_then(InputValue::as_scalar)
    }

    pub fn has_scalar(&self, name: &str) -> bool {
        self.scalar(name).is_some()
    }

    /// Overwrite (or insert) a literal input. Returns false, leaving the node
    /// untouched, when the field is a link.
    pub fn set_scalar(&mut self, name: &str, value: impl Into<Value>) -> bool {
        match self.inputs.get_mut(name) {
            Some(InputValue::Link(_)) => false,
            Some(slot) => {
                *slot = InputValue::Scalar(value.into());
                true
            }
            None => {
                self.inputs
                    .insert(name.to_string(), InputValue::Scalar(value.into()));
                true
            }
        }
    }

    /// Overwrite a literal input only if the field is already present.
    pub fn replace_scalar(&mut self, name: &str, value: impl Into<Value>) -> bool {
        if self.has_scalar(name) {
            self.set_scalar(name, value)
        } else {
            false
        }
    }

    fn from_object(id: &str, mut obj: Map<String, Value>) -> Result<Self> {
        let class_type = match obj.get_mut(CLASS_TYPE_KEY).map(Value::take) {
            Some(Value::String(s)) => s,
            Some(other) => {
                return Err(Error::malformed(format!(
                    "node {id}: class_type must be a string, got {other}"
                )))
            }
            None => return Err(Error::malformed(format!("node {id}: missing class_type"))),
        };
        let inputs = match obj.get_mut(INPUTS_KEY).map(Value::take) {
            Some(Value::Object(map)) => map
                .into_iter()
                .map(|(k, v)| (k, InputValue::from_value(v)))
                .collect(),
            Some(_) => {
                return Err(Error::malformed(format!(
                    "node {id}: inputs must be an object"
                )))
            }
            None => return Err(Error::malformed(format!("node {id}: missing inputs"))),
        };
        Ok(Self {
            kind: NodeKind::from_class_type(&class_type),
            inputs,
            fields: obj,
        })
    }

    pub fn to_value(&self) -> Value {
        let inputs: Map<String, Value> = self
            .inputs
            .iter()
            .map(|(k, v)| (k.clone(), v.to_value()))
            .collect();
        // Existing keys keep their position; a built node gets inputs first.
        let mut obj = self.fields.clone();
        obj.insert(INPUTS_KEY.to_string(), Value::Object(inputs));
        obj.insert(
            CLASS_TYPE_KEY.to_string(),
            Value::String(self.class_type().to_string()),
        );
        Value::Object(obj)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Entry {
    Node(Node),
    Auxiliary(Value),
}

/// A job graph loaded from a template.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GraphTemplate {
    entries: IndexMap<String, Entry>,
}

impl GraphTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(source: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(source)
            .map_err(|e| Error::malformed(format!("not valid JSON: {e}")))?;
        Self::from_value(value)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_json_str(&source)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(top) = value else {
            return Err(Error::malformed("top level must be an object"));
        };
        let mut entries = IndexMap::with_capacity(top.len());
        for (id, value) in top {
            let entry = match value {
                Value::Object(obj) if obj.contains_key(CLASS_TYPE_KEY) => {
                    Entry::Node(Node::from_object(&id, obj)?)
                }
                other => Entry::Auxiliary(other),
            };
            entries.insert(id, entry);
        }
        Ok(Self { entries })
    }

    /// Every entry, auxiliary fields included.
    pub fn to_value(&self) -> Value {
        let obj: Map<String, Value> = self
            .entries
            .iter()
            .map(|(id, entry)| {
                let v = match entry {
                    Entry::Node(node) => node.to_value(),
                    Entry::Auxiliary(v) => v.clone(),
                };
                (id.clone(), v)
            })
            .collect();
        Value::Object(obj)
    }

    /// Nodes only: the graph as the engine's enqueue endpoint expects it.
    pub fn to_prompt(&self) -> Value {
        let obj: Map<String, Value> = self
            .nodes()
            .map(|(id, node)| (id.to_string(), node.to_value()))
            .collect();
        Value::Object(obj)
    }

    pub fn insert_node(&mut self, id: impl Into<String>, node: Node) {
        self.entries.insert(id.into(), Entry::Node(node));
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        match self.entries.get(id) {
            Some(Entry::Node(node)) => Some(node),
            _ => None,
        }
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        match self.entries.get_mut(id) {
            Some(Entry::Node(node)) => Some(node),
            _ => None,
        }
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.entries.iter().filter_map(|(id, entry)| match entry {
            Entry::Node(node) => Some((id.as_str(), node)),
            Entry::Auxiliary(_) => None,
        })
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = (&str, &mut Node)> {
        self.entries.iter_mut().filter_map(|(id, entry)| match entry {
            Entry::Node(node) => Some((id.as_str(), node)),
            Entry::Auxiliary(_) => None,
        })
    }

    pub fn nodes_of_kind<'a>(&'a self, kind: &'a NodeKind) -> impl Iterator<Item = (&'a str, &'a Node)> {
        self.nodes().filter(move |(_, node)| node.kind() == kind)
    }

    pub fn node_count(&self) -> usize {
        self.nodes().count()
    }

    pub fn auxiliary(&self, key: &str) -> Option<&Value> {
        match self.entries.get(key) {
            Some(Entry::Auxiliary(v)) => Some(v),
            _ => None,
        }
    }

    pub fn insert_auxiliary(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), Entry::Auxiliary(value));
    }

    /// Remove and return an auxiliary entry. Nodes are never removed this way.
    pub fn take_auxiliary(&mut self, key: &str) -> Option<Value> {
        if !matches!(self.entries.get(key), Some(Entry::Auxiliary(_))) {
            return None;
        }
        match self.entries.shift_remove(key) {
            Some(Entry::Auxiliary(v)) => Some(v),
            _ => None,
        }
    }

    pub fn has_auxiliary(&self) -> bool {
        self.entries
            .values()
            .any(|e| matches!(e, Entry::Auxiliary(_)))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromStr for GraphTemplate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_json_str(s)
    }
}

impl Serialize for GraphTemplate {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for GraphTemplate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn link_requires_string_and_slot() {
        assert!(InputValue::from_value(json!(["4", 0])).is_link());
        assert!(!InputValue::from_value(json!(["4", "0"])).is_link());
        assert!(!InputValue::from_value(json!(["4", 0, 1])).is_link());
        assert!(!InputValue::from_value(json!(["4", -1])).is_link());
    }

    #[test]
    fn set_scalar_refuses_links() {
        let mut node = Node::new(NodeKind::KSampler).with_input("seed", json!(["9", 0]));
        assert!(!node.set_scalar("seed", 42));
        assert!(node.input("seed").map(InputValue::is_link).unwrap_or(false));
    }
}
