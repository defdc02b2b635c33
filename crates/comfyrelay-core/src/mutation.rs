//! Mutation engine: type-selected field patches over a GraphTemplate
//!
//! Each `Patch` names the node kinds it targets in `Patch::targets`; the
//! per-field rewrite is one exhaustive match in `Patch::apply_to_node`.
//! Patches only ever write literal inputs; links are left alone. A patch that
//! matches no node is a silent no-op.

use crate::graph::{GraphTemplate, Node, NodeKind};
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

pub const POSITIVE_PROMPT_PLACEHOLDER: &str = "POSITIVE_PROMPT_PLACEHOLDER";
pub const NEGATIVE_PROMPT_PLACEHOLDER: &str = "NEGATIVE_PROMPT_PLACEHOLDER";
/// Misspelled positive placeholder found in older workflow files.
pub const LEGACY_POSITIVE_PROMPT_PLACEHOLDER: &str = "POSITIVE_PROMT_PLACEHOLDER";

/// Random seeds are drawn from `[0, SEED_RANGE_END)`.
pub const SEED_RANGE_END: i64 = 10_000_000_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeedChoice {
    Random,
    /// Written as given; the engine decides whether it is in range.
    Fixed(i64),
}

impl SeedChoice {
    fn draw<R: Rng + ?Sized>(self, rng: &mut R) -> i64 {
        match self {
            SeedChoice::Random => rng.random_range(0..SEED_RANGE_END),
            SeedChoice::Fixed(seed) => seed,
        }
    }
}

impl From<Option<i64>> for SeedChoice {
    fn from(seed: Option<i64>) -> Self {
        seed.map_or(SeedChoice::Random, SeedChoice::Fixed)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SamplerSettings {
    pub steps: u32,
    pub denoise: f64,
    pub cfg: f64,
    pub sampler_name: String,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            steps: default_steps(),
            denoise: default_denoise(),
            cfg: default_cfg(),
            sampler_name: default_sampler_name(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Patch {
    /// KSampler `seed`.
    Seed(SeedChoice),
    /// EmptyLatentImage / EmptySD3LatentImage `width` + `height`.
    Canvas { width: u32, height: u32 },
    /// KSampler `steps`, `denoise`, `cfg`, `sampler_name`; only on nodes
    /// that already declare `steps`.
    Sampler(SamplerSettings),
    /// CLIPTextEncode `text`, only where it holds a placeholder.
    PromptText { positive: String, negative: String },
    /// CheckpointLoaderSimple `ckpt_name`.
    Checkpoint(String),
    /// LoadImage `image`.
    InputImage(String),
}

impl Patch {
    pub fn targets(&self, kind: &NodeKind) -> bool {
        matches!(
            (self, kind),
            (Patch::Seed(_), NodeKind::KSampler)
                | (Patch::Sampler(_), NodeKind::KSampler)
                | (
                    Patch::Canvas { .. },
                    NodeKind::EmptyLatentImage | NodeKind::EmptySd3LatentImage
                )
                | (Patch::PromptText { .. }, NodeKind::ClipTextEncode)
                | (Patch::Checkpoint(_), NodeKind::CheckpointLoaderSimple)
                | (Patch::InputImage(_), NodeKind::LoadImage)
        )
    }

    /// Apply to a single node. Returns true if any field was written.
    pub fn apply_to_node<R: Rng + ?Sized>(&self, node: &mut Node, rng: &mut R) -> bool {
        if !self.targets(node.kind()) {
            return false;
        }
        match self {
            Patch::Seed(choice) => {
                node.has_scalar("seed") && node.replace_scalar("seed", choice.draw(rng))
            }
            Patch::Canvas { width, height } => {
                let w = node.replace_scalar("width", *width);
                let h = node.replace_scalar("height", *height);
                w || h
            }
            Patch::Sampler(settings) => {
                if !node.has_scalar("steps") {
                    return false;
                }
                node.set_scalar("steps", settings.steps);
                node.set_scalar("denoise", settings.denoise);
                node.set_scalar("cfg", settings.cfg);
                node.set_scalar("sampler_name", settings.sampler_name.clone());
                true
            }
            Patch::PromptText { positive, negative } => {
                let replacement = match node.scalar("text").and_then(Value::as_str) {
                    Some(POSITIVE_PROMPT_PLACEHOLDER | LEGACY_POSITIVE_PROMPT_PLACEHOLDER) => {
                        positive.clone()
                    }
                    Some(NEGATIVE_PROMPT_PLACEHOLDER) => negative.clone(),
                    _ => return false,
                };
                node.replace_scalar("text", replacement)
            }
            Patch::Checkpoint(name) => node.replace_scalar("ckpt_name", name.clone()),
            Patch::InputImage(name) => node.replace_scalar("image", name.clone()),
        }
    }
}

/// Number of node rewrites performed by one `MutationEngine::apply` call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MutationReport {
    pub patched_nodes: usize,
}

/// An ordered list of patches. Patches target disjoint fields, so the order
/// only matters for reproducibility of random draws.
#[derive(Clone, Debug, Default)]
pub struct MutationEngine {
    patches: Vec<Patch>,
}

impl MutationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, patch: Patch) -> Self {
        self.patches.push(patch);
        self
    }

    pub fn push(&mut self, patch: Patch) {
        self.patches.push(patch);
    }

    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    /// Patch list for an invocation parameter record: seed, text, canvas,
    /// sampler, then the optional checkpoint and input-image overrides.
    pub fn from_params(params: &JobParams) -> Self {
        let mut engine = Self::new()
            .with(Patch::Seed(params.seed.into()))
            .with(Patch::PromptText {
                positive: params.positive_prompt.clone(),
                negative: params.negative_prompt.clone(),
            })
            .with(Patch::Canvas {
                width: params.width,
                height: params.height,
            })
            .with(Patch::Sampler(params.sampler_settings()));
        if let Some(ckpt) = &params.tensors_file_name {
            engine.push(Patch::Checkpoint(ckpt.clone()));
        }
        // An embedded image is patched in after upload, with the stored name.
        if params.input_image.is_none() {
            if let Some(name) = &params.input_image_name {
                engine.push(Patch::InputImage(name.clone()));
            }
        }
        engine
    }

    pub fn apply(&self, graph: &mut GraphTemplate) -> MutationReport {
        self.apply_with_rng(graph, &mut rand::rng())
    }

    pub fn apply_with_rng<R: Rng + ?Sized>(
        &self,
        graph: &mut GraphTemplate,
        rng: &mut R,
    ) -> MutationReport {
        let mut report = MutationReport::default();
        for patch in &self.patches {
            for (id, node) in graph.nodes_mut() {
                if patch.apply_to_node(node, rng) {
                    debug!("patched node {} ({})", id, node.class_type());
                    report.patched_nodes += 1;
                }
            }
        }
        report
    }
}

/// Invocation parameter record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobParams {
    #[serde(default = "default_prompt_file")]
    pub prompt_file: String,
    pub positive_prompt: String,
    #[serde(default)]
    pub negative_prompt: String,
    #[serde(default, deserialize_with = "de_opt_seed")]
    pub seed: Option<i64>,
    #[serde(default = "default_dimension", deserialize_with = "de_u32")]
    pub width: u32,
    #[serde(default = "default_dimension", deserialize_with = "de_u32")]
    pub height: u32,
    #[serde(default = "default_steps", deserialize_with = "de_u32")]
    pub steps: u32,
    #[serde(default = "default_denoise")]
    pub denoise: f64,
    #[serde(default = "default_cfg")]
    pub cfg: f64,
    #[serde(default = "default_sampler_name")]
    pub sampler_name: String,
    #[serde(default)]
    pub tensors_file_name: Option<String>,
    /// Base64-encoded PNG.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_image_name: Option<String>,
}

impl JobParams {
    pub fn new(positive_prompt: impl Into<String>) -> Self {
        Self {
            prompt_file: default_prompt_file(),
            positive_prompt: positive_prompt.into(),
            negative_prompt: String::new(),
            seed: None,
            width: default_dimension(),
            height: default_dimension(),
            steps: default_steps(),
            denoise: default_denoise(),
            cfg: default_cfg(),
            sampler_name: default_sampler_name(),
            tensors_file_name: None,
            input_image: None,
            input_image_name: None,
        }
    }

    pub fn sampler_settings(&self) -> SamplerSettings {
        SamplerSettings {
            steps: self.steps,
            denoise: self.denoise,
            cfg: self.cfg,
            sampler_name: self.sampler_name.clone(),
        }
    }
}

fn default_prompt_file() -> String {
    "SDXL.json".to_string()
}

fn default_dimension() -> u32 {
    1024
}

fn default_steps() -> u32 {
    20
}

fn default_denoise() -> f64 {
    1.0
}

fn default_cfg() -> f64 {
    8.0
}

fn default_sampler_name() -> String {
    "euler".to_string()
}

/// Accept integers, floats (truncated) and numeric strings.
pub fn coerce_integer(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0 && *f < u64::MAX as f64)
                .map(|f| f.trunc() as u64)
        }),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite() && *f >= 0.0 && *f < u64::MAX as f64)
                    .map(|f| f.trunc() as u64)
            })
        }
        _ => None,
    }
}

fn de_u32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let value = Value::deserialize(deserializer)?;
    coerce_integer(&value)
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| serde::de::Error::custom(format!("expected a non-negative integer, got {value}")))
}

/// Like [`coerce_integer`], but signed. Seeds are passed through unchecked.
pub fn coerce_signed(value: &Value) -> Option<i64> {
    let from_float = |f: f64| {
        Some(f)
            .filter(|f| f.is_finite() && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
            .map(|f| f.trunc() as i64)
    };
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(from_float)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(from_float))
        }
        _ => None,
    }
}

fn de_opt_seed<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(value) => coerce_signed(&value).map(Some).ok_or_else(|| {
            serde::de::Error::custom(format!("expected an integer seed, got {value}"))
        }),
    }
}
