//! Execution client: upload, submit, wait, fetch history, resolve artifacts

use crate::engine::EngineApi;
use crate::session::{ExecutionSession, SessionLease};
use crate::wait::{wait_for_completion, WaitOutcome};
use comfyrelay_core::{
    Artifact, Error, GraphTemplate, HistoryEntry, InputImage, MutationEngine, Patch, Result,
    SessionId, Submission, SubmissionId,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Clone, Debug)]
pub struct ClientOptions {
    /// Upper bound on the completion wait.
    pub wait_timeout: Duration,
    /// Sent as the upload's `overwrite` field.
    pub overwrite_uploads: bool,
    /// History lookups attempted after completion before giving up.
    pub history_attempts: u32,
    pub history_retry_delay: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_secs(900),
            overwrite_uploads: true,
            history_attempts: 5,
            history_retry_delay: Duration::from_millis(200),
        }
    }
}

/// A graph ready to run, plus an optional image to upload first.
#[derive(Clone, Debug)]
pub struct Job {
    pub graph: GraphTemplate,
    pub input_image: Option<InputImage>,
}

impl Job {
    pub fn new(graph: GraphTemplate) -> Self {
        Self {
            graph,
            input_image: None,
        }
    }

    pub fn with_input_image(mut self, image: InputImage) -> Self {
        self.input_image = Some(image);
        self
    }
}

#[derive(Clone, Debug)]
pub struct ExecutionOutput {
    pub submission: Submission,
    pub artifacts: Vec<Artifact>,
}

impl ExecutionOutput {
    pub fn count(&self) -> usize {
        self.artifacts.len()
    }
}

#[derive(Clone)]
pub struct ExecutionClient {
    engine: Arc<dyn EngineApi>,
    session: Arc<ExecutionSession>,
    options: ClientOptions,
}

impl ExecutionClient {
    pub fn new(engine: Arc<dyn EngineApi>, session: Arc<ExecutionSession>) -> Self {
        Self {
            engine,
            session,
            options: ClientOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    pub fn engine(&self) -> &Arc<dyn EngineApi> {
        &self.engine
    }

    pub fn session(&self) -> &Arc<ExecutionSession> {
        &self.session
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Upload an input image and return the name LoadImage nodes must use.
    pub async fn upload_input_image(&self, image: &InputImage) -> Result<String> {
        let receipt = self
            .engine
            .upload_image(image, self.options.overwrite_uploads)
            .await?;
        let stored = receipt.stored_path();
        info!("Uploaded input image {} as {}", image.name, stored);
        Ok(stored)
    }

    /// Run a job to completion and return every artifact it produced.
    ///
    /// The session lease is held from submission until the artifacts are
    /// resolved, so jobs sharing a session run one at a time.
    pub async fn execute(&self, job: Job, cancel: &CancellationToken) -> Result<ExecutionOutput> {
        let Job {
            mut graph,
            input_image,
        } = job;

        // A failed upload aborts here, before anything is submitted.
        if let Some(image) = input_image {
            let stored = self.upload_input_image(&image).await?;
            MutationEngine::new()
                .with(Patch::InputImage(stored))
                .apply(&mut graph);
        }
        let prompt = graph.to_prompt();

        let mut lease = self.session.acquire().await?;
        let session_id = lease.id().clone();
        let submission = self.submit(&session_id, prompt).await?;
        self.await_completion(&mut lease, &submission, cancel).await?;
        let artifacts = self.collect_artifacts(submission.id()).await?;
        drop(lease);

        info!(
            "Submission {} produced {} artifact(s)",
            submission.id(),
            artifacts.len()
        );
        Ok(ExecutionOutput {
            submission,
            artifacts,
        })
    }

    pub async fn submit(&self, session: &SessionId, prompt: Value) -> Result<Submission> {
        let id = self.engine.enqueue(&prompt, session).await?;
        info!("Submitted {} on session {}", id, session);
        Ok(Submission::new(id, prompt))
    }

    async fn await_completion(
        &self,
        lease: &mut SessionLease<'_>,
        submission: &Submission,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let timeout = self.options.wait_timeout;
        let outcome = wait_for_completion(lease.channel()?, submission.id(), timeout, cancel).await;
        match outcome {
            WaitOutcome::Completed => Ok(()),
            WaitOutcome::TimedOut => Err(Error::TimedOut {
                submission: submission.id().to_string(),
                secs: timeout.as_secs(),
            }),
            WaitOutcome::Cancelled => Err(Error::Cancelled(submission.id().to_string())),
            WaitOutcome::ChannelClosed(reason) => {
                lease.invalidate();
                Err(Error::ChannelClosed(reason))
            }
        }
    }

    /// History can trail the completion event slightly, so a missing record
    /// is retried a bounded number of times.
    pub async fn fetch_history(&self, submission: &SubmissionId) -> Result<HistoryEntry> {
        let attempts = self.options.history_attempts.max(1);
        for attempt in 1..=attempts {
            if let Some(entry) = self.engine.history(submission).await? {
                return Ok(entry);
            }
            if attempt < attempts {
                warn!("No history for {} yet (attempt {}/{})", submission, attempt, attempts);
                tokio::time::sleep(self.options.history_retry_delay).await;
            }
        }
        Err(Error::Engine(format!("no history recorded for {}", submission)))
    }

    /// Every artifact from every output node, in history order. Any
    /// unresolvable reference fails the whole call.
    pub async fn collect_artifacts(&self, submission: &SubmissionId) -> Result<Vec<Artifact>> {
        let history = self.fetch_history(submission).await?;
        let refs = history.artifact_refs();
        let mut artifacts = Vec::with_capacity(refs.len());
        for artifact_ref in &refs {
            artifacts.push(self.engine.fetch_artifact(artifact_ref).await?);
        }
        Ok(artifacts)
    }
}
