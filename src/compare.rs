//! Comparison entry points.
//!
//! [`process_comparison`] runs the whole pipeline synchronously on the
//! calling thread. [`compare`] moves it onto tokio's blocking pool,
//! [`compare_sync`] wraps that in a private runtime, and [`compare_files`]
//! reads both inputs from disk first.
//!
//! A comparison either yields a complete [`ComparisonResult`] or an error;
//! weak alignment is not an error but a switch to the geometric fallback,
//! recorded as `alignment_failed` in the metadata.

use crate::config::{CompareMode, ComparisonConfig};
use crate::error::ComparisonError;
use crate::output::{AlignmentSummary, ComparisonMetadata, ComparisonResult, StageTimings};
use crate::pipeline::align::{self, AlignmentResult};
use crate::pipeline::compose;
use crate::pipeline::encode::{self, EncodeFormat, EncodedImage};
use crate::pipeline::load::{self, MediaKind, PageSource};
use crate::pipeline::normalize::normalize;
use image::RgbImage;
use nalgebra::Matrix3;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Compare page `a.page` of `a` with page `b.page` of `b`.
///
/// Blocking and CPU-heavy; call from a worker thread. The first document is
/// the reference: the result is drawn in its pixel grid.
///
/// # Errors
/// - [`ComparisonError::Decode`] when either input cannot be decoded
/// - [`ComparisonError::InvalidConfig`] when `config` fails validation
/// - [`ComparisonError::Processing`] on unexpected compose/encode failures
pub fn process_comparison(
    a: &PageSource,
    b: &PageSource,
    config: &ComparisonConfig,
) -> Result<ComparisonResult, ComparisonError> {
    config.validate()?;
    let total_start = Instant::now();
    info!(
        mode = %config.mode,
        page_a = a.page,
        page_b = b.page,
        "Starting comparison"
    );

    // ── Step 1: Load ─────────────────────────────────────────────────────
    let load_start = Instant::now();
    let loaded_a = load::load(a, config.dpi).inspect_err(|e| report_load_failure(e, a))?;
    let loaded_b = load::load(b, config.dpi).inspect_err(|e| report_load_failure(e, b))?;
    let page_counts = [loaded_a.page_count, loaded_b.page_count];

    // ── Step 2: Normalise ────────────────────────────────────────────────
    let raster_a = normalize(loaded_a.raster, config.max_dimension);
    let raster_b = normalize(loaded_b.raster, config.max_dimension);
    let load_ms = load_start.elapsed().as_millis() as u64;
    debug!(
        "Loaded inputs in {}ms: {}x{} and {}x{}",
        load_ms,
        raster_a.width(),
        raster_a.height(),
        raster_b.width(),
        raster_b.height()
    );

    // ── Step 3: Align ────────────────────────────────────────────────────
    let align_start = Instant::now();
    let AlignmentResult {
        reference,
        warped,
        homography,
        match_quality,
        keypoints,
        matches,
        inliers,
    } = align::align(raster_a, &raster_b, config.feature_count);

    let (aligned, alignment_failed) =
        match usable_alignment(warped, match_quality, config.min_match_quality) {
            Some(warped) => (warped, false),
            None => {
                warn!(
                    match_quality,
                    threshold = config.min_match_quality,
                    "Feature alignment unusable, falling back to geometric fit"
                );
                (align::fallback_align(&reference, &raster_b), true)
            }
        };
    drop(raster_b);
    let align_ms = align_start.elapsed().as_millis() as u64;

    // ── Step 4: Compose ──────────────────────────────────────────────────
    let compose_start = Instant::now();
    let (composite, per_side) = match config.mode {
        CompareMode::Difference => {
            let images = compose::compose_difference(
                &reference,
                &aligned,
                config.diff_threshold,
                config.bin_threshold,
                &config.colors,
            )
            .inspect_err(|e| report_failure(e, config.mode, &reference, &aligned))?;
            (images.composite, Some([images.highlighted_a, images.highlighted_b]))
        }
        CompareMode::Overlay => {
            let composite =
                compose::compose_overlay(&reference, &aligned, config.bin_threshold, &config.colors)
                    .inspect_err(|e| report_failure(e, config.mode, &reference, &aligned))?;
            (composite, None)
        }
    };
    let compose_ms = compose_start.elapsed().as_millis() as u64;

    // ── Step 5: Encode ───────────────────────────────────────────────────
    let encode_start = Instant::now();
    let (composite_lossy, composite_lossless, per_side_lossy) =
        encode_outputs(&composite, per_side.as_ref(), config.jpeg_quality)
            .inspect_err(|e| report_failure(e, config.mode, &reference, &aligned))?;
    let encode_ms = encode_start.elapsed().as_millis() as u64;

    let (output_width, output_height) = composite.dimensions();
    let metadata = ComparisonMetadata {
        mode: config.mode,
        page_counts,
        match_quality,
        alignment_failed,
        output_width,
        output_height,
        result_size: format!("{output_width}x{output_height}"),
        alignment: AlignmentSummary {
            keypoints,
            matches,
            inliers,
            homography: homography.as_ref().map(row_major),
        },
        timings: StageTimings {
            load_ms,
            align_ms,
            compose_ms,
            encode_ms,
            total_ms: total_start.elapsed().as_millis() as u64,
        },
    };

    info!(
        match_quality,
        alignment_failed,
        size = %metadata.result_size,
        "Comparison complete in {}ms",
        metadata.timings.total_ms
    );

    Ok(ComparisonResult {
        composite,
        per_side,
        composite_lossy,
        composite_lossless,
        per_side_lossy,
        metadata,
    })
}

/// Async wrapper around [`process_comparison`]; the pipeline runs on
/// tokio's blocking pool.
pub async fn compare(
    a: PageSource,
    b: PageSource,
    config: &ComparisonConfig,
) -> Result<ComparisonResult, ComparisonError> {
    let config = config.clone();
    tokio::task::spawn_blocking(move || process_comparison(&a, &b, &config))
        .await
        .map_err(|e| ComparisonError::Internal(format!("comparison task failed: {e}")))?
}

/// Synchronous wrapper around [`compare`].
///
/// Creates a temporary tokio runtime internally.
pub fn compare_sync(
    a: PageSource,
    b: PageSource,
    config: &ComparisonConfig,
) -> Result<ComparisonResult, ComparisonError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ComparisonError::Internal(format!("Failed to create tokio runtime: {e}")))?
        .block_on(compare(a, b, config))
}

/// Compare two files on disk.
///
/// Media types come from the file extensions; unknown extensions are sniffed
/// from content. Pages come from `config.page_a` and `config.page_b`.
pub async fn compare_files(
    path_a: impl AsRef<Path>,
    path_b: impl AsRef<Path>,
    config: &ComparisonConfig,
) -> Result<ComparisonResult, ComparisonError> {
    let a = read_source(path_a.as_ref(), config.page_a).await?;
    let b = read_source(path_b.as_ref(), config.page_b).await?;
    compare(a, b, config).await
}

async fn read_source(path: &Path, page: usize) -> Result<PageSource, ComparisonError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| ComparisonError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
    let media_type = path
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(MediaKind::media_type_for_extension)
        .unwrap_or("application/octet-stream");
    debug!("Read {} ({} bytes, {})", path.display(), bytes.len(), media_type);
    Ok(PageSource::new(bytes, media_type).with_page(page))
}

type EncodedOutputs = (EncodedImage, EncodedImage, Option<[EncodedImage; 2]>);

/// Lossy and lossless composite, plus lossy per-side images when present.
fn encode_outputs(
    composite: &RgbImage,
    per_side: Option<&[RgbImage; 2]>,
    jpeg_quality: u8,
) -> Result<EncodedOutputs, ComparisonError> {
    let lossy = EncodeFormat::Jpeg {
        quality: jpeg_quality,
    };
    let composite_lossy = encode::encode(composite, lossy)?;
    let composite_lossless = encode::encode(composite, EncodeFormat::Png)?;
    let per_side_lossy = match per_side {
        Some([a, b]) => Some([encode::encode(a, lossy)?, encode::encode(b, lossy)?]),
        None => None,
    };
    Ok((composite_lossy, composite_lossless, per_side_lossy))
}

/// The warped target, when there is one and its match quality clears the floor.
fn usable_alignment(
    warped: Option<RgbImage>,
    match_quality: f64,
    min_match_quality: f64,
) -> Option<RgbImage> {
    warped.filter(|_| match_quality >= min_match_quality)
}

fn row_major(h: &Matrix3<f64>) -> [f64; 9] {
    std::array::from_fn(|i| h[(i / 3, i % 3)])
}

/// Internal failures after a successful load are bugs or resource problems;
/// log enough to reproduce them.
fn report_failure(err: &ComparisonError, mode: CompareMode, a: &RgbImage, b: &RgbImage) {
    if !err.is_user_error() {
        error!(
            %mode,
            reference = %format!("{}x{}", a.width(), a.height()),
            aligned = %format!("{}x{}", b.width(), b.height()),
            "Comparison failed: {}",
            err
        );
    }
}

/// Decode failures are the caller's problem; anything else while loading
/// (pdfium missing, for one) is logged here.
fn report_load_failure(err: &ComparisonError, source: &PageSource) {
    if !err.is_user_error() {
        error!(
            media_type = %source.media_type,
            page = source.page,
            bytes = source.bytes.len(),
            "Loading input failed: {}",
            err
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;

    /// Collects formatted log output.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn logged(f: impl FnOnce()) -> String {
        let out = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(out.clone())
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        out.text()
    }

    #[test]
    fn homography_is_reported_row_major() {
        let h = Matrix3::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0);
        assert_eq!(row_major(&h), [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
    }

    #[test]
    fn low_quality_warp_is_not_used() {
        let warped = RgbImage::new(4, 4);
        assert!(usable_alignment(Some(warped.clone()), 0.25, 0.3).is_none());
        assert!(usable_alignment(Some(warped.clone()), 0.3, 0.3).is_some());
        assert!(usable_alignment(Some(warped), 0.9, 0.3).is_some());
        assert!(usable_alignment(None, 1.0, 0.3).is_none());
    }

    #[test]
    fn internal_load_failures_are_logged() {
        let source = PageSource::new(vec![0u8; 12], "application/pdf").with_page(3);
        let err = ComparisonError::PdfiumBindingFailed("libpdfium.so: not found".into());
        let out = logged(|| report_load_failure(&err, &source));
        assert!(out.contains("ERROR"), "got: {out}");
        assert!(out.contains("Loading input failed"), "got: {out}");
        assert!(out.contains("application/pdf"), "got: {out}");
        assert!(out.contains("page=3"), "got: {out}");
    }

    #[test]
    fn decode_failures_are_left_to_the_caller() {
        let source = PageSource::new(vec![1, 2, 3], "image/png");
        let err = ComparisonError::decode("image/png", "bad header");
        let out = logged(|| report_load_failure(&err, &source));
        assert!(out.is_empty(), "got: {out}");
    }

    #[test]
    fn invalid_config_is_rejected_before_loading() {
        let config = ComparisonConfig {
            feature_count: 0,
            ..ComparisonConfig::default()
        };
        let empty = PageSource::new(Vec::new(), "image/png");
        let err = process_comparison(&empty, &empty, &config).unwrap_err();
        assert!(matches!(err, ComparisonError::InvalidConfig(_)));
    }
}
