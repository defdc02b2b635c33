//! Outbound response shapes

use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use comfyrelay_core::{Artifact, ResponseMode};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct EncodedImage {
    pub data: String,
    pub content_type: String,
}

/// `{"images": [...], "total_images": n}`
#[derive(Debug, Serialize)]
pub struct ImageEnvelope {
    pub images: Vec<EncodedImage>,
    pub total_images: usize,
}

impl ImageEnvelope {
    pub fn from_artifacts(artifacts: &[Artifact]) -> Self {
        let images: Vec<EncodedImage> = artifacts
            .iter()
            .map(|a| EncodedImage {
                data: STANDARD.encode(&a.bytes),
                content_type: a.content_type.clone(),
            })
            .collect();
        Self {
            total_images: images.len(),
            images,
        }
    }
}

/// Body mode only applies to a single artifact. Anything else is enveloped
/// so no artifact is ever dropped.
pub fn render(mut artifacts: Vec<Artifact>, mode: ResponseMode) -> Response {
    if mode == ResponseMode::Body && artifacts.len() == 1 {
        if let Some(artifact) = artifacts.pop() {
            return ([(header::CONTENT_TYPE, artifact.content_type)], artifact.bytes).into_response();
        }
    }
    Json(ImageEnvelope::from_artifacts(&artifacts)).into_response()
}
