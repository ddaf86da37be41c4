//! # docdiff
//!
//! Visual comparison of two documents: flat images, PDFs and multi-page
//! TIFFs.
//!
//! ## Why this crate?
//!
//! A pixel diff of two scans is useless when one sheet went through the
//! scanner a few degrees off or at a different resolution: every line of text
//! shows up as changed. This crate first aligns the second document onto the
//! first with ORB keypoints and a RANSAC homography, then classifies every
//! pixel as shared ink, ink only in the first document, or ink only in the
//! second, and paints a colour-coded composite.
//!
//! ## Pipeline Overview
//!
//! ```text
//! bytes (PDF / TIFF / JPEG / PNG / GIF)
//!  │
//!  ├─ 1. Load       decode one page; PDFs rasterised via pdfium
//!  ├─ 2. Normalize  cap the longer side (area downscale)
//!  ├─ 3. Align      ORB + RANSAC homography, or centred fallback fit
//!  ├─ 4. Compose    difference (3-colour) or overlay (2-colour)
//!  └─ 5. Encode     JPEG preview + lossless PNG, base64 data URIs
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docdiff::{compare_files, ComparisonConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ComparisonConfig::default();
//!     let result = compare_files("v1.png", "v2.png", &config).await?;
//!     std::fs::write("diff.png", &result.composite_lossless.bytes)?;
//!     eprintln!(
//!         "quality {:.2}, fallback: {}",
//!         result.metadata.match_quality, result.metadata.alignment_failed
//!     );
//!     Ok(())
//! }
//! ```
//!
//! Servers accepting uploads should go through [`ComparisonService`], which
//! validates inputs and caps the number of pipelines running at once.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docdiff` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! docdiff = { version = "0.3", default-features = false }
//! ```
//!
//! PDF inputs need a pdfium shared library at runtime; see
//! [`pipeline::render::bind_pdfium`] for the lookup order.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod compare;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod ratelimit;
pub mod service;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use compare::{compare, compare_files, compare_sync, process_comparison};
pub use config::{Color, ColorScheme, CompareMode, ComparisonConfig, ComparisonConfigBuilder};
pub use error::{ComparisonError, Stage};
pub use output::{
    AlignmentSummary, ComparisonMetadata, ComparisonPayload, ComparisonResult, StageTimings,
};
pub use pipeline::encode::{EncodeFormat, EncodedImage};
pub use pipeline::load::{MediaKind, PageSource};
pub use ratelimit::{
    Clock, RateLimitError, RateLimitUsage, RateLimits, SystemClock, TokenRateLimiter,
};
pub use service::{ComparisonRequest, ComparisonService, ServiceConfig};
