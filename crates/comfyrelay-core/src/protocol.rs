//! Engine wire protocol: enqueue envelope, progress events, history, upload receipt

use crate::error::{Error, Result};
use crate::types::{ArtifactRef, SubmissionId};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `POST /prompt` body.
#[derive(Debug, Serialize)]
pub struct EnqueueRequest<'a> {
    pub prompt: &'a Value,
    pub client_id: &'a str,
}

/// `POST /prompt` success body.
#[derive(Debug, Clone, Deserialize)]
pub struct EnqueueResponse {
    pub prompt_id: String,
    #[serde(default)]
    pub number: Option<u64>,
    #[serde(default)]
    pub node_errors: Value,
}

impl EnqueueResponse {
    pub fn has_node_errors(&self) -> bool {
        match &self.node_errors {
            Value::Object(map) => !map.is_empty(),
            Value::Null => false,
            _ => true,
        }
    }
}

/// One frame read from the event channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    /// Preview images. Received and discarded.
    Binary(Vec<u8>),
}

impl Frame {
    /// Does this frame announce that `submission` has finished executing?
    pub fn completes(&self, submission: &SubmissionId) -> bool {
        match self {
            Frame::Text(text) => ProgressEvent::parse(text)
                .map(|event| event.completes(submission))
                .unwrap_or(false),
            Frame::Binary(_) => false,
        }
    }
}

pub const EVENT_EXECUTING: &str = "executing";

/// Textual control/progress event: `{"type": ..., "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutingData {
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

impl ProgressEvent {
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }

    pub fn executing(node: Option<&str>, prompt_id: &str) -> Self {
        Self {
            kind: EVENT_EXECUTING.to_string(),
            data: serde_json::json!({ "node": node, "prompt_id": prompt_id }),
        }
    }

    pub fn executing_data(&self) -> Option<ExecutingData> {
        if self.kind != EVENT_EXECUTING {
            return None;
        }
        serde_json::from_value(self.data.clone()).ok()
    }

    /// Completion: an `executing` event with no current node for our id.
    pub fn completes(&self, submission: &SubmissionId) -> bool {
        match self.executing_data() {
            Some(data) => {
                data.node.is_none() && data.prompt_id.as_deref() == Some(submission.as_str())
            }
            None => false,
        }
    }

    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// What a single output-producing node recorded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeOutput {
    #[serde(default)]
    pub images: Vec<ArtifactRef>,
}

/// History record for one submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub outputs: IndexMap<String, NodeOutput>,
    #[serde(default)]
    pub status: Option<Value>,
}

impl HistoryEntry {
    /// Every artifact reference across every output node, in history order.
    pub fn artifact_refs(&self) -> Vec<ArtifactRef> {
        self.outputs
            .values()
            .flat_map(|output| output.images.iter().cloned())
            .collect()
    }

    /// Pick a submission's record out of a `GET /history/{id}` body, which is
    /// keyed by prompt id. `None` if the engine has no record yet.
    pub fn from_history_body(body: Value, submission: &SubmissionId) -> Result<Option<Self>> {
        let Value::Object(mut map) = body else {
            return Err(Error::Engine("history response is not an object".into()));
        };
        match map.remove(submission.as_str()) {
            Some(entry) => serde_json::from_value(entry)
                .map(Some)
                .map_err(|e| Error::Engine(format!("unreadable history entry: {e}"))),
            None => Ok(None),
        }
    }
}

/// `POST /upload/image` success body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub name: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default)]
    pub store_class: String,
}

impl UploadReceipt {
    /// Name a LoadImage node must reference to find the stored file.
    pub fn stored_path(&self) -> String {
        if self.subfolder.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.subfolder, self.name)
        }
    }
}
