//! Engine HTTP API: enqueue, history, artifact view, image upload, health

use comfyrelay_core::{
    essence_of, Artifact, ArtifactRef, EnqueueRequest, EnqueueResponse, Error, HistoryEntry,
    InputImage, Result, SessionId, SubmissionId, UploadReceipt, CONTENT_TYPE_PNG,
};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// The engine's request/response surface. The event channel lives in
/// `crate::channel`.
#[async_trait::async_trait]
pub trait EngineApi: Send + Sync {
    /// Enqueue a node graph on behalf of `session`.
    async fn enqueue(&self, prompt: &Value, session: &SessionId) -> Result<SubmissionId>;

    /// History record for a submission, `None` if the engine has none yet.
    async fn history(&self, submission: &SubmissionId) -> Result<Option<HistoryEntry>>;

    /// Resolve one output reference into bytes.
    async fn fetch_artifact(&self, artifact: &ArtifactRef) -> Result<Artifact>;

    /// Store an image in the engine's input store.
    async fn upload_image(&self, image: &InputImage, overwrite: bool) -> Result<UploadReceipt>;

    /// HEAD the engine root; true on a 2xx answer.
    async fn is_healthy(&self) -> bool;
}

pub struct HttpEngine {
    client: Client,
    base_url: String,
}

impl HttpEngine {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// `host:port` form, as used by the engine's own examples.
    pub fn from_address(address: &str) -> Self {
        Self::new(format!("http://{}", address))
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn transport(e: reqwest::Error) -> Error {
    Error::Engine(e.to_string())
}

#[async_trait::async_trait]
impl EngineApi for HttpEngine {
    async fn enqueue(&self, prompt: &Value, session: &SessionId) -> Result<SubmissionId> {
        let body = EnqueueRequest {
            prompt,
            client_id: session.as_str(),
        };

        let response = self
            .client
            .post(self.url("/prompt"))
            .json(&body)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Engine rejected submission {}: {}", status, error_text);
            return Err(Error::SubmissionRejected(format!("{}: {}", status, error_text)));
        }

        let parsed: EnqueueResponse = response
            .json()
            .await
            .map_err(|e| Error::Engine(format!("unreadable enqueue response: {e}")))?;
        if parsed.has_node_errors() {
            return Err(Error::SubmissionRejected(parsed.node_errors.to_string()));
        }
        debug!("Enqueued prompt {} (queue #{:?})", parsed.prompt_id, parsed.number);
        Ok(SubmissionId::new(parsed.prompt_id))
    }

    async fn history(&self, submission: &SubmissionId) -> Result<Option<HistoryEntry>> {
        let response = self
            .client
            .get(self.url(&format!("/history/{}", submission)))
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Engine(format!("history lookup failed: {}", status)));
        }
        let body: Value = response.json().await.map_err(transport)?;
        HistoryEntry::from_history_body(body, submission)
    }

    async fn fetch_artifact(&self, artifact: &ArtifactRef) -> Result<Artifact> {
        let unresolvable = |message: String| Error::artifact_unresolvable(&artifact.filename, message);

        let response = self
            .client
            .get(self.url("/view"))
            .query(&[
                ("filename", artifact.filename.as_str()),
                ("subfolder", artifact.subfolder.as_str()),
                ("type", artifact.store_class.as_str()),
            ])
            .send()
            .await
            .map_err(|e| unresolvable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(unresolvable(status.to_string()));
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(essence_of)
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let bytes = response
            .bytes()
            .await
            .map_err(|e| unresolvable(e.to_string()))?;

        debug!("Fetched {} ({}, {} bytes)", artifact.filename, content_type, bytes.len());
        Ok(Artifact::new(bytes.to_vec(), content_type))
    }

    async fn upload_image(&self, image: &InputImage, overwrite: bool) -> Result<UploadReceipt> {
        let part = Part::bytes(image.bytes.clone())
            .file_name(image.name.clone())
            .mime_str(CONTENT_TYPE_PNG)
            .map_err(|e| Error::UploadFailed(e.to_string()))?;
        let form = Form::new()
            .part("image", part)
            .text("type", "input")
            .text("overwrite", overwrite.to_string());

        let response = self
            .client
            .post(self.url("/upload/image"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::UploadFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::UploadFailed(format!("{}: {}", status, error_text)));
        }
        response
            .json()
            .await
            .map_err(|e| Error::UploadFailed(format!("unreadable upload response: {e}")))
    }

    async fn is_healthy(&self) -> bool {
        match self
            .client
            .head(self.url("/"))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Health check failed: {}", e);
                false
            }
        }
    }
}
