//! Inbound request decoding: templates, parameter records, embedded images

use base64::{engine::general_purpose::STANDARD, Engine as _};
use comfyrelay_client::Job;
use comfyrelay_core::{Error, GraphTemplate, InputImage, JobParams, MutationEngine, Patch, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Auxiliary keys a raw graph may carry next to its nodes.
pub const AUX_INPUT_IMAGE: &str = "input_image";
pub const AUX_INPUT_IMAGE_NAME: &str = "input_image_name";

/// Resolve a template name inside `dir`. Only bare file names are allowed.
pub fn template_path(dir: &Path, name: &str) -> Result<PathBuf> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::invalid_request("template name is empty"));
    }
    if name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(Error::invalid_request(format!("template name '{name}' is not a plain file name")));
    }
    Ok(dir.join(name))
}

pub fn load_template(dir: &Path, name: &str) -> Result<GraphTemplate> {
    let path = template_path(dir, name)?;
    if !path.is_file() {
        return Err(Error::invalid_request(format!("unknown template '{name}'")));
    }
    debug!("Loading template {}", path.display());
    GraphTemplate::from_path(&path)
}

/// Base64 (optionally a `data:` URL) to upload-ready bytes.
pub fn decode_input_image(encoded: &str, name: impl Into<String>) -> Result<InputImage> {
    let payload = match encoded.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => encoded,
    };
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| Error::invalid_request(format!("input_image is not valid base64: {e}")))?;
    if bytes.is_empty() {
        return Err(Error::invalid_request("input_image is empty"));
    }
    Ok(InputImage {
        name: name.into(),
        bytes,
    })
}

fn optional_string(value: Option<Value>, key: &str) -> Result<Option<String>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(Error::invalid_request(format!(
            "{key} must be a string, got {other}"
        ))),
    }
}

/// A raw graph body. Auxiliary fields are taken out so they never reach the
/// engine; an embedded image becomes an upload.
pub fn job_from_graph(mut graph: GraphTemplate, default_upload_name: &str) -> Result<Job> {
    let image = optional_string(graph.take_auxiliary(AUX_INPUT_IMAGE), AUX_INPUT_IMAGE)?;
    let name = optional_string(graph.take_auxiliary(AUX_INPUT_IMAGE_NAME), AUX_INPUT_IMAGE_NAME)?;
    if graph.node_count() == 0 {
        return Err(Error::malformed("graph has no nodes"));
    }

    match (image, name) {
        (Some(encoded), name) => {
            let name = name.unwrap_or_else(|| default_upload_name.to_string());
            Ok(Job::new(graph).with_input_image(decode_input_image(&encoded, name)?))
        }
        // A name alone points at an image already in the engine's store.
        (None, Some(name)) => {
            MutationEngine::new().with(Patch::InputImage(name)).apply(&mut graph);
            Ok(Job::new(graph))
        }
        (None, None) => Ok(Job::new(graph)),
    }
}

/// A parameter record: load its template, apply the parameter patches, and
/// attach the embedded image if any.
pub fn job_from_params(params: &JobParams, workflow_dir: &Path, default_upload_name: &str) -> Result<Job> {
    let mut graph = load_template(workflow_dir, &params.prompt_file)?;
    let report = MutationEngine::from_params(params).apply(&mut graph);
    debug!("{} node(s) patched in {}", report.patched_nodes, params.prompt_file);

    // Templates on disk may carry auxiliary fields too.
    let _ = graph.take_auxiliary(AUX_INPUT_IMAGE);
    let _ = graph.take_auxiliary(AUX_INPUT_IMAGE_NAME);

    let job = Job::new(graph);
    match &params.input_image {
        Some(encoded) => {
            let name = params
                .input_image_name
                .clone()
                .unwrap_or_else(|| default_upload_name.to_string());
            Ok(job.with_input_image(decode_input_image(encoded, name)?))
        }
        None => Ok(job),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_names_must_be_plain() {
        let dir = Path::new("/srv/workflow");
        assert_eq!(template_path(dir, "SDXL.json").unwrap(), dir.join("SDXL.json"));
        assert!(template_path(dir, "../etc/passwd").is_err());
        assert!(template_path(dir, "sub/x.json").is_err());
        assert!(template_path(dir, "..").is_err());
        assert!(template_path(dir, "  ").is_err());
    }

    #[test]
    fn data_url_prefix_is_accepted() {
        let img = decode_input_image("data:image/png;base64,aGVsbG8=", "a.png").unwrap();
        assert_eq!(img.bytes, b"hello");
        assert!(decode_input_image("!!!", "a.png").is_err());
        assert!(decode_input_image("", "a.png").is_err());
    }
}
