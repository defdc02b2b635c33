//! In-process engine for tests and offline runs.
//!
//! `MockEngine` implements both [`EngineApi`] and [`Connector`]. Every enqueue
//! plays a short event sequence onto the submitting session's channel: a
//! progress event, a binary preview, a completion for some other submission,
//! then (depending on [`Completion`]) the real completion.

use crate::channel::{Connector, EventChannel};
use crate::engine::EngineApi;
use comfyrelay_core::{
    Artifact, ArtifactRef, Error, Frame, HistoryEntry, InputImage, NodeOutput, ProgressEvent,
    Result, SessionId, SubmissionId, UploadReceipt, CONTENT_TYPE_PNG,
};
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// How the mock ends each submission's event sequence.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Completion {
    #[default]
    Normal,
    /// Never send the terminal event.
    Silent,
    /// Drop the channel instead of completing.
    CloseChannel,
}

#[derive(Clone, Debug)]
pub struct RecordedSubmission {
    pub id: SubmissionId,
    pub session: SessionId,
    pub prompt: Value,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedUpload {
    pub name: String,
    pub overwrite: bool,
    pub len: usize,
}

#[derive(Default)]
struct MockState {
    next_id: u64,
    channels: HashMap<SessionId, mpsc::UnboundedSender<Frame>>,
    outputs: Vec<(String, ArtifactRef)>,
    files: HashMap<String, Artifact>,
    submissions: Vec<RecordedSubmission>,
    uploads: Vec<RecordedUpload>,
    connected: Vec<SessionId>,
    refuse_connects: usize,
    reject: Option<String>,
    fail_uploads: bool,
    upload_subfolder: String,
    history_misses: u32,
    unhealthy: bool,
    completion: Completion,
}

pub struct MockEngine {
    state: Mutex<MockState>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        // Poisoning only means another test thread panicked.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn edit(self, f: impl FnOnce(&mut MockState)) -> Self {
        f(&mut self.state());
        self
    }

    /// Record an output for `node` and serve `artifact` under `filename`.
    pub fn with_output(self, node: &str, filename: &str, artifact: Artifact) -> Self {
        self.edit(|s| {
            s.outputs.push((node.to_string(), ArtifactRef::new(filename)));
            s.files.insert(filename.to_string(), artifact);
        })
    }

    /// Record an output the view endpoint cannot resolve.
    pub fn with_dangling_output(self, node: &str, filename: &str) -> Self {
        self.edit(|s| s.outputs.push((node.to_string(), ArtifactRef::new(filename))))
    }

    pub fn refuse_connects(self, times: usize) -> Self {
        self.edit(|s| s.refuse_connects = times)
    }

    pub fn reject_submissions(self, message: &str) -> Self {
        self.edit(|s| s.reject = Some(message.to_string()))
    }

    pub fn fail_uploads(self) -> Self {
        self.edit(|s| s.fail_uploads = true)
    }

    pub fn with_upload_subfolder(self, subfolder: &str) -> Self {
        self.edit(|s| s.upload_subfolder = subfolder.to_string())
    }

    /// Answer "no record" to the first `times` history lookups.
    pub fn history_misses(self, times: u32) -> Self {
        self.edit(|s| s.history_misses = times)
    }

    pub fn unhealthy(self) -> Self {
        self.edit(|s| s.unhealthy = true)
    }

    pub fn with_completion(self, completion: Completion) -> Self {
        self.edit(|s| s.completion = completion)
    }

    /// Switch completion mode on an engine already shared with a session.
    pub fn set_completion(&self, completion: Completion) {
        self.state().completion = completion;
    }

    pub fn submissions(&self) -> Vec<RecordedSubmission> {
        self.state().submissions.clone()
    }

    pub fn uploads(&self) -> Vec<RecordedUpload> {
        self.state().uploads.clone()
    }

    /// Session ids of every successful connect, in order.
    pub fn connected_sessions(&self) -> Vec<SessionId> {
        self.state().connected.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.state().connected.len()
    }
}

#[async_trait::async_trait]
impl EngineApi for MockEngine {
    async fn enqueue(&self, prompt: &Value, session: &SessionId) -> Result<SubmissionId> {
        let mut state = self.state();
        if let Some(message) = &state.reject {
            return Err(Error::SubmissionRejected(message.clone()));
        }
        state.next_id += 1;
        let id = SubmissionId::new(format!("mock-{}", state.next_id));
        state.submissions.push(RecordedSubmission {
            id: id.clone(),
            session: session.clone(),
            prompt: prompt.clone(),
        });

        let completion = state.completion;
        if completion == Completion::CloseChannel {
            state.channels.remove(session);
            return Ok(id);
        }
        if let Some(tx) = state.channels.get(session) {
            let other = format!("{}-other", id);
            let mut frames = vec![
                Frame::Text(ProgressEvent::executing(Some("3"), id.as_str()).to_text()),
                Frame::Binary(vec![0, 0, 0, 1, 0, 0, 0, 2]),
                Frame::Text(ProgressEvent::executing(None, &other).to_text()),
            ];
            if completion == Completion::Normal {
                frames.push(Frame::Text(ProgressEvent::executing(None, id.as_str()).to_text()));
            }
            for frame in frames {
                let _ = tx.send(frame);
            }
        }
        Ok(id)
    }

    async fn history(&self, submission: &SubmissionId) -> Result<Option<HistoryEntry>> {
        let mut state = self.state();
        if state.history_misses > 0 {
            state.history_misses -= 1;
            return Ok(None);
        }
        if !state.submissions.iter().any(|s| &s.id == submission) {
            return Ok(None);
        }
        let mut outputs: IndexMap<String, NodeOutput> = IndexMap::new();
        for (node, artifact_ref) in &state.outputs {
            outputs
                .entry(node.clone())
                .or_default()
                .images
                .push(artifact_ref.clone());
        }
        Ok(Some(HistoryEntry {
            outputs,
            status: None,
        }))
    }

    async fn fetch_artifact(&self, artifact: &ArtifactRef) -> Result<Artifact> {
        self.state()
            .files
            .get(&artifact.filename)
            .cloned()
            .ok_or_else(|| Error::artifact_unresolvable(&artifact.filename, "404 Not Found"))
    }

    async fn upload_image(&self, image: &InputImage, overwrite: bool) -> Result<UploadReceipt> {
        let mut state = self.state();
        if state.fail_uploads {
            return Err(Error::UploadFailed("500 Internal Server Error".into()));
        }
        state.uploads.push(RecordedUpload {
            name: image.name.clone(),
            overwrite,
            len: image.bytes.len(),
        });
        Ok(UploadReceipt {
            name: image.name.clone(),
            subfolder: state.upload_subfolder.clone(),
            store_class: "input".into(),
        })
    }

    async fn is_healthy(&self) -> bool {
        !self.state().unhealthy
    }
}

#[async_trait::async_trait]
impl Connector for MockEngine {
    async fn connect(&self, session: &SessionId) -> Result<Box<dyn EventChannel>> {
        let mut state = self.state();
        if state.refuse_connects > 0 {
            state.refuse_connects -= 1;
            return Err(Error::ChannelUnavailable("connection refused".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.channels.insert(session.clone(), tx);
        state.connected.push(session.clone());
        Ok(Box::new(MockChannel { rx }))
    }
}

pub struct MockChannel {
    rx: mpsc::UnboundedReceiver<Frame>,
}

#[async_trait::async_trait]
impl EventChannel for MockChannel {
    async fn next_frame(&mut self) -> Result<Option<Frame>> {
        Ok(self.rx.recv().await)
    }
}

/// A small RGBA gradient, PNG encoded.
pub fn sample_png(width: u32, height: u32) -> Result<Vec<u8>> {
    let img = image::RgbaImage::from_fn(width, height, |x, y| {
        image::Rgba([(x * 255 / width.max(1)) as u8, (y * 255 / height.max(1)) as u8, 128, 200])
    });
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png)
        .map_err(|e| Error::PostProcess(format!("PNG encode: {e}")))?;
    Ok(out.into_inner())
}

/// `sample_png` wrapped as an engine artifact.
pub fn sample_artifact(width: u32, height: u32) -> Result<Artifact> {
    Ok(Artifact::new(sample_png(width, height)?, CONTENT_TYPE_PNG))
}
