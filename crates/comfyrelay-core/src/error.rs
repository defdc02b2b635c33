//! Error types for Comfyrelay

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed template: {0}")]
    MalformedTemplate(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("event channel unavailable: {0}")]
    ChannelUnavailable(String),

    #[error("event channel closed: {0}")]
    ChannelClosed(String),

    #[error("submission rejected: {0}")]
    SubmissionRejected(String),

    #[error("upload failed: {0}")]
    UploadFailed(String),

    #[error("artifact {filename} unresolvable: {message}")]
    ArtifactUnresolvable { filename: String, message: String },

    #[error("timed out after {secs}s waiting for submission {submission}")]
    TimedOut { submission: String, secs: u64 },

    #[error("cancelled while waiting for submission {0}")]
    Cancelled(String),

    #[error("engine error: {0}")]
    Engine(String),

    #[error("post-processing failed: {0}")]
    PostProcess(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedTemplate(message.into())
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn artifact_unresolvable(filename: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ArtifactUnresolvable {
            filename: filename.into(),
            message: message.into(),
        }
    }

    /// Stable machine-readable name, used in structured failure bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedTemplate(_) => "malformed_template",
            Self::InvalidRequest(_) => "invalid_request",
            Self::ChannelUnavailable(_) => "channel_unavailable",
            Self::ChannelClosed(_) => "channel_closed",
            Self::SubmissionRejected(_) => "submission_rejected",
            Self::UploadFailed(_) => "upload_failed",
            Self::ArtifactUnresolvable { .. } => "artifact_unresolvable",
            Self::TimedOut { .. } => "timed_out",
            Self::Cancelled(_) => "cancelled",
            Self::Engine(_) => "engine_error",
            Self::PostProcess(_) => "post_process_failed",
            Self::Config(_) => "config_error",
            Self::Io(_) => "io_error",
            Self::Json(_) => "json_error",
        }
    }
}
