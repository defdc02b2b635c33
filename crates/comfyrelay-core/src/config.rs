//! Relay configuration
//!
//! Loaded from an optional TOML file, then overridden by environment
//! variables. Missing fields fall back to defaults.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_ENGINE_ADDRESS: &str = "COMFYUI_ADDRESS";
pub const ENV_LISTEN: &str = "COMFYRELAY_LISTEN";
pub const ENV_JPEG_QUALITY: &str = "JPEG_QUALITY";
pub const ENV_DEBUG_HEADER: &str = "DEBUG_HEADER";
pub const ENV_WORKFLOW_DIR: &str = "COMFYRELAY_WORKFLOW_DIR";
pub const ENV_WAIT_TIMEOUT: &str = "COMFYRELAY_WAIT_TIMEOUT_SECS";
pub const ENV_RESPONSE_MODE: &str = "COMFYRELAY_RESPONSE_MODE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Engine `host:port`.
    pub engine_address: String,
    /// Gateway bind address.
    pub listen: String,
    /// JPEG quality used when a caller accepts JPEG (1-100).
    pub jpeg_quality: u8,
    /// Log inbound request headers.
    pub debug_headers: bool,
    /// Directory `/generate` loads templates from.
    pub workflow_dir: PathBuf,
    /// Upper bound on the completion wait.
    pub wait_timeout_secs: u64,
    /// Name an embedded input image is uploaded under when none is given.
    pub upload_name: String,
    pub response_mode: ResponseMode,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    /// JSON `{images: [...], total_images}`.
    #[default]
    Envelope,
    /// Raw artifact body when exactly one artifact was produced.
    Body,
}

impl std::str::FromStr for ResponseMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "envelope" | "json" => Ok(Self::Envelope),
            "body" | "raw" => Ok(Self::Body),
            other => Err(Error::Config(format!("unknown response mode '{other}'"))),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            engine_address: "127.0.0.1:8188".to_string(),
            listen: "0.0.0.0:8080".to_string(),
            jpeg_quality: 90,
            debug_headers: false,
            workflow_dir: PathBuf::from("./workflow"),
            wait_timeout_secs: 900,
            upload_name: "input1.png".to_string(),
            response_mode: ResponseMode::Envelope,
        }
    }
}

impl RelayConfig {
    /// Load from a TOML file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| Error::Config(format!("invalid TOML: {e}")))?;
        config.validated()
    }

    /// Optional file, then process environment.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(p) => Self::load(p)?,
            None => Self::default(),
        };
        base.with_env(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an environment lookup.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(v) = lookup(ENV_ENGINE_ADDRESS) {
            self.engine_address = v;
        }
        if let Some(v) = lookup(ENV_LISTEN) {
            self.listen = v;
        }
        if let Some(v) = lookup(ENV_JPEG_QUALITY) {
            let q: i64 = v
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("{ENV_JPEG_QUALITY} must be an integer, got '{v}'")))?;
            self.jpeg_quality = q.clamp(1, 100) as u8;
        }
        if let Some(v) = lookup(ENV_DEBUG_HEADER) {
            self.debug_headers = matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "t");
        }
        if let Some(v) = lookup(ENV_WORKFLOW_DIR) {
            self.workflow_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup(ENV_WAIT_TIMEOUT) {
            self.wait_timeout_secs = v
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("{ENV_WAIT_TIMEOUT} must be an integer, got '{v}'")))?;
        }
        if let Some(v) = lookup(ENV_RESPONSE_MODE) {
            self.response_mode = v.parse()?;
        }
        self.validated()
    }

    fn validated(mut self) -> Result<Self> {
        if self.engine_address.trim().is_empty() {
            return Err(Error::Config("engine_address is empty".into()));
        }
        if self.wait_timeout_secs == 0 {
            return Err(Error::Config("wait_timeout_secs must be positive".into()));
        }
        self.jpeg_quality = self.jpeg_quality.clamp(1, 100);
        Ok(self)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    pub fn engine_http_url(&self) -> String {
        format!("http://{}", self.engine_address)
    }

    pub fn engine_ws_url(&self) -> String {
        format!("ws://{}/ws", self.engine_address)
    }
}
