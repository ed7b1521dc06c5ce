use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};

use crate::config::ImageTransportConfig;
use crate::error::EncodeError;
use crate::record::mime_type_for;
use crate::sanitize;

/// An image prepared for transport inside an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    /// Standard base64 without line breaks.
    pub base64: String,
    pub mime_type: &'static str,
}

/// Downscales, re-encodes as JPEG and base64-encodes images for events.
#[derive(Debug, Clone)]
pub struct ImageTransportEncoder {
    config: ImageTransportConfig,
}

impl ImageTransportEncoder {
    pub fn new(config: ImageTransportConfig) -> Self {
        Self { config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Encodes the image at `path`. `original_name` selects the advertised
    /// MIME type. Returns `None` when transport encoding is disabled.
    pub fn encode_file(
        &self,
        path: &Path,
        original_name: &str,
    ) -> Result<Option<EncodedImage>, EncodeError> {
        if !self.config.enabled {
            return Ok(None);
        }
        let _span =
            tracing::debug_span!("encode_image", file = %sanitize::redact_path(path)).entered();

        let image = image::ImageReader::open(path)
            .and_then(|reader| reader.with_guessed_format())
            .map_err(|e| EncodeError::Read {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?
            .decode()
            .map_err(|e| EncodeError::Read {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        self.encode(&image, original_name)
    }

    pub fn encode(
        &self,
        image: &DynamicImage,
        original_name: &str,
    ) -> Result<Option<EncodedImage>, EncodeError> {
        if !self.config.enabled {
            return Ok(None);
        }

        let (width, height) = image.dimensions();
        let (target_w, target_h) =
            fit_within(width, height, self.config.max_width, self.config.max_height);

        let rgb = if (target_w, target_h) == (width, height) {
            image.to_rgb8()
        } else {
            image
                .resize_exact(target_w, target_h, FilterType::Triangle)
                .to_rgb8()
        };

        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, jpeg_quality(self.config.quality))
            .encode_image(&rgb)
            .map_err(|e| EncodeError::Jpeg(e.to_string()))?;

        Ok(Some(EncodedImage {
            base64: STANDARD.encode(&jpeg),
            mime_type: mime_type_for(original_name),
        }))
    }
}

/// Largest size with the source aspect ratio that fits the bounding box.
/// Sources already inside the box are returned unchanged.
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width <= max_width && height <= max_height {
        return (width, height);
    }
    let ratio = f64::min(
        max_width as f64 / width as f64,
        max_height as f64 / height as f64,
    );
    let new_w = ((width as f64 * ratio).floor() as u32).clamp(1, max_width);
    let new_h = ((height as f64 * ratio).floor() as u32).clamp(1, max_height);
    (new_w, new_h)
}

/// Maps a `[0, 1]` quality to the JPEG encoder's `1..=100` scale.
fn jpeg_quality(quality: f32) -> u8 {
    (quality * 100.0).round().clamp(1.0, 100.0) as u8
}
