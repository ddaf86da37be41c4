//! Configuration types for document comparison.
//!
//! Every knob of a comparison lives in [`ComparisonConfig`], built via its
//! [`ComparisonConfigBuilder`]. Keeping the request parameters in one struct
//! makes it trivial to hand a config to a worker thread, log it, and diff two
//! runs to understand why their outputs differ.
//!
//! Colours are grouped in [`ColorScheme`], which (de)serialises as `#RRGGBB`
//! strings so a caller can forward a JSON mapping of overrides unchanged.

use crate::error::ComparisonError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Configuration for a single comparison.
///
/// # Example
/// ```rust
/// use docdiff::{ComparisonConfig, CompareMode};
///
/// let config = ComparisonConfig::builder()
///     .mode(CompareMode::Overlay)
///     .bin_threshold(180)
///     .feature_count(2000)
///     .build()
///     .unwrap();
/// assert_eq!(config.mode, CompareMode::Overlay);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparisonConfig {
    /// Visualisation mode. Default: [`CompareMode::Difference`].
    pub mode: CompareMode,

    /// Minimum absolute luminance difference (0–255) for a pixel to count as
    /// changed. Default: 30.
    ///
    /// Below ~20 anti-aliasing and JPEG ringing start to register as change;
    /// above ~60 faint pencil edits disappear.
    pub diff_threshold: u8,

    /// Luminance at or below which a pixel counts as ink (0–255). Default: 200.
    pub bin_threshold: u8,

    /// Upper bound on keypoints detected per document. Default: 4000.
    pub feature_count: usize,

    /// 0-based page of the first document (PDF/TIFF only). Default: 0.
    pub page_a: usize,

    /// 0-based page of the second document (PDF/TIFF only). Default: 0.
    pub page_b: usize,

    /// Highlight colours. Default: [`ColorScheme::default()`].
    pub colors: ColorScheme,

    /// PDF rasterisation resolution. Range: 72–400. Default: 150.
    pub dpi: u32,

    /// Longest raster side after normalisation. Default: 4000.
    ///
    /// Keypoint detection and matching scale with pixel count; a 600-DPI scan
    /// of an A3 sheet is ~7000 × 9900 px and would hold several hundred MB of
    /// rasters per request without this cap.
    pub max_dimension: u32,

    /// Feature alignment below this inlier fraction is discarded in favour of
    /// the geometric fallback. Default: 0.3.
    pub min_match_quality: f64,

    /// Quality of the lossy preview encodings (1–100). Default: 85.
    pub jpeg_quality: u8,
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            mode: CompareMode::default(),
            diff_threshold: 30,
            bin_threshold: 200,
            feature_count: 4000,
            page_a: 0,
            page_b: 0,
            colors: ColorScheme::default(),
            dpi: 150,
            max_dimension: 4000,
            min_match_quality: 0.3,
            jpeg_quality: 85,
        }
    }
}

impl ComparisonConfig {
    /// Create a new builder for `ComparisonConfig`.
    pub fn builder() -> ComparisonConfigBuilder {
        ComparisonConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ComparisonConfig`].
#[derive(Debug)]
pub struct ComparisonConfigBuilder {
    config: ComparisonConfig,
}

impl ComparisonConfigBuilder {
    pub fn mode(mut self, mode: CompareMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn diff_threshold(mut self, t: u8) -> Self {
        self.config.diff_threshold = t;
        self
    }

    pub fn bin_threshold(mut self, t: u8) -> Self {
        self.config.bin_threshold = t;
        self
    }

    pub fn feature_count(mut self, n: usize) -> Self {
        self.config.feature_count = n;
        self
    }

    pub fn page_a(mut self, page: usize) -> Self {
        self.config.page_a = page;
        self
    }

    pub fn page_b(mut self, page: usize) -> Self {
        self.config.page_b = page;
        self
    }

    pub fn colors(mut self, colors: ColorScheme) -> Self {
        self.config.colors = colors;
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_dimension(mut self, px: u32) -> Self {
        self.config.max_dimension = px.max(64);
        self
    }

    pub fn min_match_quality(mut self, q: f64) -> Self {
        self.config.min_match_quality = q;
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q.clamp(1, 100);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ComparisonConfig, ComparisonError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl ComparisonConfig {
    /// Check the constraints the builder enforces. Configs deserialised from
    /// a request body bypass the builder, so callers re-run this.
    pub fn validate(&self) -> Result<(), ComparisonError> {
        if self.feature_count == 0 {
            return Err(ComparisonError::InvalidConfig(
                "feature_count must be ≥ 1".into(),
            ));
        }
        if !(72..=400).contains(&self.dpi) {
            return Err(ComparisonError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                self.dpi
            )));
        }
        if self.max_dimension < 64 {
            return Err(ComparisonError::InvalidConfig(format!(
                "max_dimension must be ≥ 64, got {}",
                self.max_dimension
            )));
        }
        if !(0.0..=1.0).contains(&self.min_match_quality) {
            return Err(ComparisonError::InvalidConfig(format!(
                "min_match_quality must be within 0–1, got {}",
                self.min_match_quality
            )));
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(ComparisonError::InvalidConfig(format!(
                "jpeg_quality must be 1–100, got {}",
                self.jpeg_quality
            )));
        }
        Ok(())
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How the two aligned documents are visualised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareMode {
    /// Classify every pixel as only-in-A, only-in-B or common. (default)
    #[default]
    Difference,
    /// Raw superposition of both documents' ink, B painted over A.
    Overlay,
}

impl CompareMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareMode::Difference => "difference",
            CompareMode::Overlay => "overlay",
        }
    }
}

impl fmt::Display for CompareMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompareMode {
    type Err = ComparisonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "difference" | "diff" => Ok(CompareMode::Difference),
            "overlay" => Ok(CompareMode::Overlay),
            other => Err(ComparisonError::InvalidConfig(format!(
                "unknown mode '{other}' (expected 'difference' or 'overlay')"
            ))),
        }
    }
}

// ── Colours ──────────────────────────────────────────────────────────────

/// An RGB colour that (de)serialises as `#RRGGBB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color(pub [u8; 3]);

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Color([r, g, b])
    }

    /// Parse `#RRGGBB` (the leading `#` is optional).
    pub fn from_hex(hex: &str) -> Option<Self> {
        let digits = hex.trim().trim_start_matches('#');
        if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).ok();
        Some(Color([channel(0)?, channel(2)?, channel(4)?]))
    }

    pub fn to_hex(&self) -> String {
        let [r, g, b] = self.0;
        format!("#{r:02X}{g:02X}{b:02X}")
    }
}

impl TryFrom<String> for Color {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Color::from_hex(&value).ok_or_else(|| format!("invalid colour '{value}', expected #RRGGBB"))
    }
}

impl From<Color> for String {
    fn from(c: Color) -> Self {
        c.to_hex()
    }
}

impl From<Color> for image::Rgb<u8> {
    fn from(c: Color) -> Self {
        image::Rgb(c.0)
    }
}

/// The five highlight colours.
///
/// Defaults are pure primaries: blue for content only in the first document,
/// red for content only in the second, black for shared content, and
/// orange/green for the overlay mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorScheme {
    pub diff_file1: Color,
    pub diff_file2: Color,
    pub diff_common: Color,
    pub overlay_file1: Color,
    pub overlay_file2: Color,
}

impl Default for ColorScheme {
    fn default() -> Self {
        Self {
            diff_file1: Color::rgb(0x00, 0x00, 0xFF),
            diff_file2: Color::rgb(0xFF, 0x00, 0x00),
            diff_common: Color::rgb(0x00, 0x00, 0x00),
            overlay_file1: Color::rgb(0xFF, 0xA5, 0x00),
            overlay_file2: Color::rgb(0x00, 0xFF, 0x00),
        }
    }
}

impl ColorScheme {
    /// Keys accepted by [`ColorScheme::set`].
    pub const KEYS: [&'static str; 5] = [
        "diff_file1",
        "diff_file2",
        "diff_common",
        "overlay_file1",
        "overlay_file2",
    ];

    /// Override one colour by key.
    pub fn set(&mut self, key: &str, hex: &str) -> Result<(), ComparisonError> {
        let color = Color::from_hex(hex).ok_or_else(|| ComparisonError::InvalidColor {
            key: key.to_string(),
            value: hex.to_string(),
        })?;
        let slot = match key {
            "diff_file1" => &mut self.diff_file1,
            "diff_file2" => &mut self.diff_file2,
            "diff_common" => &mut self.diff_common,
            "overlay_file1" => &mut self.overlay_file1,
            "overlay_file2" => &mut self.overlay_file2,
            other => {
                return Err(ComparisonError::InvalidConfig(format!(
                    "unknown colour key '{other}' (expected one of {})",
                    Self::KEYS.join(", ")
                )))
            }
        };
        *slot = color;
        Ok(())
    }

    /// Defaults with the given `key → #RRGGBB` overrides applied.
    pub fn with_overrides(overrides: &HashMap<String, String>) -> Result<Self, ComparisonError> {
        let mut scheme = Self::default();
        for (key, hex) in overrides {
            scheme.set(key, hex)?;
        }
        Ok(scheme)
    }
}
