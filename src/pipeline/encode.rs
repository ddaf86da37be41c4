//! Image encoding: `RgbImage` → JPEG or PNG bytes, optionally as a data URI.
//!
//! Two encodings are produced per composite. The JPEG preview is small enough
//! to display inline; the PNG copy is lossless so a downloaded diff keeps its
//! exact highlight colours (JPEG chroma subsampling smears thin red/blue
//! strokes into purple fringes).

use crate::error::{ComparisonError, Stage};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default quality of lossy previews.
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Target encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodeFormat {
    /// Lossy, `quality` 1–100.
    Jpeg { quality: u8 },
    /// Lossless.
    Png,
}

impl EncodeFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            EncodeFormat::Jpeg { .. } => "image/jpeg",
            EncodeFormat::Png => "image/png",
        }
    }
}

impl Default for EncodeFormat {
    fn default() -> Self {
        EncodeFormat::Jpeg {
            quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Encoded image bytes tagged with their format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub format: EncodeFormat,
    pub bytes: Vec<u8>,
}

impl EncodedImage {
    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }

    /// `data:<mime>;base64,<payload>`
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type(), STANDARD.encode(&self.bytes))
    }
}

/// Encode a raster in the requested format.
pub fn encode(img: &RgbImage, format: EncodeFormat) -> Result<EncodedImage, ComparisonError> {
    let mut bytes = Vec::new();
    let (w, h) = img.dimensions();

    let result = match format {
        EncodeFormat::Jpeg { quality } => {
            JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100)).write_image(
                img.as_raw(),
                w,
                h,
                ExtendedColorType::Rgb8,
            )
        }
        EncodeFormat::Png => {
            PngEncoder::new(&mut bytes).write_image(img.as_raw(), w, h, ExtendedColorType::Rgb8)
        }
    };
    result.map_err(|e| {
        ComparisonError::processing(
            Stage::Encode,
            format!("{} encoding of {w}x{h} raster failed: {e}", format.mime_type()),
        )
    })?;

    debug!(
        "Encoded {}x{} raster → {} bytes {}",
        w,
        h,
        bytes.len(),
        format.mime_type()
    );
    Ok(EncodedImage { format, bytes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn striped(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            if (x / 3 + y) % 2 == 0 {
                Rgb([0, 0, 255])
            } else {
                Rgb([255, 255, 255])
            }
        })
    }

    #[test]
    fn png_round_trip_is_exact() {
        let img = striped(37, 21);
        let encoded = encode(&img, EncodeFormat::Png).expect("encode should succeed");
        let decoded = image::load_from_memory(&encoded.bytes)
            .expect("valid png")
            .to_rgb8();
        assert_eq!(decoded, img);
    }

    #[test]
    fn jpeg_round_trip_is_close() {
        let img = RgbImage::from_pixel(32, 32, Rgb([200, 40, 40]));
        let encoded = encode(&img, EncodeFormat::Jpeg { quality: 90 }).unwrap();
        assert_eq!(encoded.mime_type(), "image/jpeg");
        let decoded = image::load_from_memory(&encoded.bytes).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (32, 32));
        let px = decoded.get_pixel(16, 16);
        for (got, want) in px.0.iter().zip([200u8, 40, 40]) {
            assert!((*got as i32 - want as i32).abs() <= 8, "got {:?}", px);
        }
    }

    #[test]
    fn data_uri_prefix_and_payload() {
        let img = striped(4, 4);
        let encoded = encode(&img, EncodeFormat::Png).unwrap();
        let uri = encoded.to_data_uri();
        let payload = uri
            .strip_prefix("data:image/png;base64,")
            .expect("png data uri prefix");
        let decoded = STANDARD.decode(payload).expect("valid base64");
        assert_eq!(decoded, encoded.bytes);
    }
}
