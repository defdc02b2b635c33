//! Comfyrelay Client - engine API, event channel, session, execution, post-processing

pub mod channel;
pub mod client;
pub mod engine;
pub mod mock;
pub mod postprocess;
pub mod session;
pub mod wait;

pub use channel::{Connector, EventChannel, WsConnector};
pub use client::{ClientOptions, ExecutionClient, ExecutionOutput, Job};
pub use engine::{EngineApi, HttpEngine};
pub use postprocess::{ArtifactPostProcessor, Preference, DEFAULT_JPEG_QUALITY};
pub use session::{ExecutionSession, SessionLease};
pub use tokio_util::sync::CancellationToken;
pub use wait::{wait_for_completion, WaitOutcome};
