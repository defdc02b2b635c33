//! Artifact post-processing: PNG to JPEG when the caller accepts JPEG

use comfyrelay_core::{Artifact, Error, Result, CONTENT_TYPE_JPEG};
use image::codecs::jpeg::JpegEncoder;
use image::ImageFormat;
use tracing::debug;

pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// What the caller asked for via content negotiation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Preference {
    /// Keep whatever the engine produced.
    #[default]
    Original,
    Jpeg,
}

impl Preference {
    /// JPEG when the most specific range matching `image/jpeg` (`image/jpeg`,
    /// then `image/*`, then `*/*`) has a non-zero quality. No header keeps
    /// the original encoding.
    pub fn from_accept(accept: Option<&str>) -> Self {
        let Some(accept) = accept else {
            return Self::Original;
        };
        // (specificity, q) of the best match so far.
        let mut best: Option<(u8, f32)> = None;
        for range in accept.split(',') {
            let mut parts = range.split(';');
            let media = parts.next().unwrap_or_default().trim();
            let specificity = if media.eq_ignore_ascii_case(CONTENT_TYPE_JPEG) {
                2
            } else if media.eq_ignore_ascii_case("image/*") {
                1
            } else if media == "*/*" {
                0
            } else {
                continue;
            };
            let q = parts
                .filter_map(|p| p.trim().strip_prefix("q="))
                .find_map(|q| q.trim().parse::<f32>().ok())
                .unwrap_or(1.0);
            if best.map_or(true, |(s, _)| specificity > s) {
                best = Some((specificity, q));
            }
        }
        match best {
            Some((_, q)) if q > 0.0 => Self::Jpeg,
            _ => Self::Original,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ArtifactPostProcessor {
    quality: u8,
}

impl Default for ArtifactPostProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

impl ArtifactPostProcessor {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// PNG + JPEG preference is transcoded; everything else passes through.
    pub fn process(&self, artifact: Artifact, preference: Preference) -> Result<Artifact> {
        if preference != Preference::Jpeg || !artifact.is_png() {
            return Ok(artifact);
        }
        let jpeg = self.png_to_jpeg(&artifact.bytes)?;
        debug!(
            "Transcoded PNG ({} bytes) to JPEG q{} ({} bytes)",
            artifact.len(),
            self.quality,
            jpeg.len()
        );
        Ok(Artifact::new(jpeg, CONTENT_TYPE_JPEG))
    }

    pub fn process_all(&self, artifacts: Vec<Artifact>, preference: Preference) -> Result<Vec<Artifact>> {
        artifacts
            .into_iter()
            .map(|a| self.process(a, preference))
            .collect()
    }

    /// Decode, drop alpha, encode.
    fn png_to_jpeg(&self, png: &[u8]) -> Result<Vec<u8>> {
        let rgb = image::load_from_memory_with_format(png, ImageFormat::Png)
            .map_err(|e| Error::PostProcess(format!("PNG decode: {e}")))?
            .to_rgb8();
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, self.quality)
            .encode_image(&rgb)
            .map_err(|e| Error::PostProcess(format!("JPEG encode: {e}")))?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_parsing() {
        assert_eq!(Preference::from_accept(None), Preference::Original);
        assert_eq!(Preference::from_accept(Some("*/*")), Preference::Jpeg);
        assert_eq!(Preference::from_accept(Some("image/*")), Preference::Jpeg);
        assert_eq!(Preference::from_accept(Some("image/png")), Preference::Original);
        assert_eq!(Preference::from_accept(Some("text/*, */*;q=0")), Preference::Original);
        assert_eq!(
            Preference::from_accept(Some("*/*, image/jpeg;q=0")),
            Preference::Original
        );
        assert_eq!(
            Preference::from_accept(Some("image/*;q=0, image/jpeg")),
            Preference::Jpeg
        );
        assert_eq!(Preference::from_accept(Some("image/jpeg")), Preference::Jpeg);
        assert_eq!(
            Preference::from_accept(Some("image/png, image/jpeg;q=0.8")),
            Preference::Jpeg
        );
        assert_eq!(
            Preference::from_accept(Some("image/JPEG; q=0")),
            Preference::Original
        );
    }

    #[test]
    fn quality_is_clamped() {
        assert_eq!(ArtifactPostProcessor::new(0).quality(), 1);
        assert_eq!(ArtifactPostProcessor::new(200).quality(), 100);
    }
}
