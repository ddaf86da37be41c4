//! Result types produced by a comparison.
//!
//! [`ComparisonResult`] keeps the decoded rasters alongside their encodings so
//! library callers can post-process pixels without decoding again.
//! [`ComparisonPayload`] is the transport form: every image as a base64 data
//! URI plus [`ComparisonMetadata`], ready for `serde_json`.

use crate::config::CompareMode;
use crate::pipeline::encode::EncodedImage;
use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Complete outcome of one comparison. Immutable once built.
#[derive(Debug, Clone)]
pub struct ComparisonResult {
    /// Difference or overlay composite in the first document's pixel grid.
    pub composite: RgbImage,
    /// Per-side highlight images (difference mode only).
    pub per_side: Option<[RgbImage; 2]>,
    /// JPEG preview of the composite.
    pub composite_lossy: EncodedImage,
    /// PNG archival copy of the composite.
    pub composite_lossless: EncodedImage,
    /// JPEG previews of the per-side images (difference mode only).
    pub per_side_lossy: Option<[EncodedImage; 2]>,
    pub metadata: ComparisonMetadata,
}

impl ComparisonResult {
    /// Transport form with every image inlined as a data URI.
    pub fn to_payload(&self) -> ComparisonPayload {
        ComparisonPayload {
            result_lossy: self.composite_lossy.to_data_uri(),
            result_lossless: self.composite_lossless.to_data_uri(),
            per_side_lossy: self
                .per_side_lossy
                .as_ref()
                .map(|[a, b]| [a.to_data_uri(), b.to_data_uri()]),
            metadata: self.metadata.clone(),
        }
    }
}

/// Serialisable response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonPayload {
    pub result_lossy: String,
    pub result_lossless: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub per_side_lossy: Option<[String; 2]>,
    pub metadata: ComparisonMetadata,
}

/// What happened during a comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonMetadata {
    pub mode: CompareMode,
    /// Total pages of each input (1 for flat images).
    pub page_counts: [usize; 2],
    /// Inlier fraction, or `matches / 10` when too few matches survived.
    pub match_quality: f64,
    /// `true` when the geometric fallback replaced feature alignment.
    pub alignment_failed: bool,
    pub output_width: u32,
    pub output_height: u32,
    /// `"{width}x{height}"` of the composite.
    pub result_size: String,
    pub alignment: AlignmentSummary,
    pub timings: StageTimings,
}

/// Feature-alignment diagnostics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlignmentSummary {
    pub keypoints: [usize; 2],
    /// Matches that survived the ratio test.
    pub matches: usize,
    pub inliers: usize,
    /// Row-major target → reference homography, when one was estimated.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub homography: Option<[f64; 9]>,
}

/// Wall-clock milliseconds per stage.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StageTimings {
    pub load_ms: u64,
    pub align_ms: u64,
    pub compose_ms: u64,
    pub encode_ms: u64,
    pub total_ms: u64,
}
