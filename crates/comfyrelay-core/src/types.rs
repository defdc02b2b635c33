//! Core types for Comfyrelay

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Client identity presented to the engine when opening the event channel
/// and when enqueueing. Cheaply cloneable.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct SessionId(Arc<str>);

impl SessionId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(Arc::from(s.into()))
    }

    pub fn generate() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identifier the engine assigns at enqueue time (`prompt_id`).
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionId(String);

impl SubmissionId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubmissionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// An enqueued job: the id the engine handed back and the exact graph sent.
#[derive(Clone, Debug)]
pub struct Submission {
    id: SubmissionId,
    graph: Arc<Value>,
}

impl Submission {
    pub fn new(id: SubmissionId, graph: Value) -> Self {
        Self {
            id,
            graph: Arc::new(graph),
        }
    }

    pub fn id(&self) -> &SubmissionId {
        &self.id
    }

    pub fn graph(&self) -> &Value {
        &self.graph
    }
}

/// Pointer into the engine's output store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default = "default_store_class")]
    pub store_class: String,
}

fn default_store_class() -> String {
    "output".to_string()
}

impl ArtifactRef {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            subfolder: String::new(),
            store_class: default_store_class(),
        }
    }

    pub fn in_subfolder(mut self, subfolder: impl Into<String>) -> Self {
        self.subfolder = subfolder.into();
        self
    }
}

pub const CONTENT_TYPE_PNG: &str = "image/png";
pub const CONTENT_TYPE_JPEG: &str = "image/jpeg";

/// Resolved output bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl Artifact {
    pub fn new(bytes: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: content_type.into(),
        }
    }

    pub fn is_png(&self) -> bool {
        self.content_type.eq_ignore_ascii_case(CONTENT_TYPE_PNG)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Strip parameters (`; charset=...`) and normalize case.
pub fn essence_of(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Input image carried alongside a job, uploaded before submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputImage {
    pub name: String,
    pub bytes: Vec<u8>,
}
