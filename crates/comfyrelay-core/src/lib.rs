//! Comfyrelay Core - graph model, mutation engine, wire protocol, errors

pub mod config;
pub mod error;
pub mod graph;
pub mod mutation;
pub mod protocol;
pub mod types;

pub use config::{RelayConfig, ResponseMode};
pub use error::{Error, Result};
pub use graph::{Entry, GraphTemplate, InputValue, Node, NodeKind, NodeLink};
pub use mutation::{
    JobParams, MutationEngine, MutationReport, Patch, SamplerSettings, SeedChoice,
    LEGACY_POSITIVE_PROMPT_PLACEHOLDER, NEGATIVE_PROMPT_PLACEHOLDER, POSITIVE_PROMPT_PLACEHOLDER,
    SEED_RANGE_END,
};
pub use protocol::*;
pub use types::*;
