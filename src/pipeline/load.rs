//! Document loading: turn an input buffer of unknown format into an RGB
//! raster plus the document's page count.
//!
//! Dispatch follows the declared media type. PDFs go to
//! [`crate::pipeline::render`], multi-frame TIFFs are walked IFD by IFD, and
//! everything else is handed to the `image` crate's format sniffing. Page
//! indices past the end of a document fall back to page 0 rather than
//! failing: a viewer that remembered "page 3" for the previous upload should
//! still get a comparison for a shorter replacement.

use crate::error::ComparisonError;
use crate::pipeline::render;
use image::{ImageFormat, RgbImage};
use std::fmt;
use std::io::Cursor;
use tiff::decoder::{Decoder as TiffDecoder, DecodingResult};
use tiff::ColorType;
use tracing::{debug, info};

/// Input buffer tagged with its declared media type and requested page.
#[derive(Clone)]
pub struct PageSource {
    pub bytes: Vec<u8>,
    pub media_type: String,
    /// 0-based page for PDFs and multi-frame TIFFs; ignored otherwise.
    pub page: usize,
}

impl PageSource {
    pub fn new(bytes: impl Into<Vec<u8>>, media_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            media_type: media_type.into(),
            page: 0,
        }
    }

    pub fn with_page(mut self, page: usize) -> Self {
        self.page = page;
        self
    }

    pub fn kind(&self) -> MediaKind {
        MediaKind::resolve(&self.media_type, &self.bytes)
    }
}

impl fmt::Debug for PageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageSource")
            .field("bytes", &format_args!("<{} bytes>", self.bytes.len()))
            .field("media_type", &self.media_type)
            .field("page", &self.page)
            .finish()
    }
}

/// Decoder family for an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Pdf,
    Tiff,
    /// Single-frame raster (JPEG, PNG, GIF, ...).
    Image,
}

impl MediaKind {
    /// Resolve from the declared media type, sniffing magic bytes only when
    /// the declaration is empty or `application/octet-stream`.
    pub fn resolve(media_type: &str, bytes: &[u8]) -> Self {
        let declared = media_type.trim().to_ascii_lowercase();
        if declared.is_empty() || declared == "application/octet-stream" {
            return Self::sniff(bytes);
        }
        if declared.contains("pdf") {
            MediaKind::Pdf
        } else if declared.contains("tif") {
            MediaKind::Tiff
        } else {
            MediaKind::Image
        }
    }

    fn sniff(bytes: &[u8]) -> Self {
        if bytes.starts_with(b"%PDF") {
            MediaKind::Pdf
        } else if bytes.starts_with(b"II*\0") || bytes.starts_with(b"MM\0*") {
            MediaKind::Tiff
        } else {
            MediaKind::Image
        }
    }

    /// Media type guessed from a file extension, for path-based callers.
    pub fn media_type_for_extension(ext: &str) -> Option<&'static str> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some("application/pdf"),
            "tif" | "tiff" => Some("image/tiff"),
            "png" => Some("image/png"),
            "jpg" | "jpeg" => Some("image/jpeg"),
            "gif" => Some("image/gif"),
            _ => None,
        }
    }
}

/// A decoded page.
#[derive(Debug, Clone)]
pub struct LoadedPage {
    pub raster: RgbImage,
    /// Total pages in the source document (1 for flat images).
    pub page_count: usize,
}

/// Decode `source` into an RGB raster. PDFs are rendered at `dpi`.
pub fn load(source: &PageSource, dpi: u32) -> Result<LoadedPage, ComparisonError> {
    let kind = source.kind();
    debug!(
        "Loading {} bytes as {:?} (declared '{}', page {})",
        source.bytes.len(),
        kind,
        source.media_type,
        source.page
    );

    let (raster, page_count) = match kind {
        MediaKind::Pdf => render::render_page(&source.bytes, source.page, dpi)?,
        MediaKind::Tiff => load_tiff(&source.bytes, source.page, &source.media_type)?,
        MediaKind::Image => (load_flat(&source.bytes, &source.media_type)?, 1),
    };

    if raster.width() == 0 || raster.height() == 0 {
        return Err(ComparisonError::decode(&source.media_type, "decoded an empty raster"));
    }

    info!(
        width = raster.width(),
        height = raster.height(),
        page_count,
        "Loaded {:?} input",
        kind
    );
    Ok(LoadedPage { raster, page_count })
}

fn load_flat(bytes: &[u8], media_type: &str) -> Result<RgbImage, ComparisonError> {
    image::load_from_memory(bytes)
        .map(|img| img.to_rgb8())
        .map_err(|e| ComparisonError::decode(media_type, e))
}

/// Decode frame `page` of a (possibly multi-frame) TIFF.
fn load_tiff(
    bytes: &[u8],
    page: usize,
    media_type: &str,
) -> Result<(RgbImage, usize), ComparisonError> {
    let total = count_tiff_frames(bytes).map_err(|e| ComparisonError::decode(media_type, e))?;
    let frame = if page >= total {
        info!("TIFF frame {} out of range (total={}), using frame 0", page, total);
        0
    } else {
        page
    };

    // The first IFD goes through `image`, which handles palette and
    // WhiteIsZero photometrics; later frames need the raw decoder.
    let raster = if frame == 0 {
        image::load_from_memory_with_format(bytes, ImageFormat::Tiff)
            .map(|img| img.to_rgb8())
            .map_err(|e| ComparisonError::decode(media_type, e))?
    } else {
        decode_tiff_frame(bytes, frame).map_err(|e| ComparisonError::decode(media_type, e))?
    };

    Ok((raster, total))
}

fn count_tiff_frames(bytes: &[u8]) -> Result<usize, String> {
    let mut decoder = TiffDecoder::new(Cursor::new(bytes)).map_err(|e| e.to_string())?;
    let mut count = 1;
    while decoder.more_images() {
        decoder.next_image().map_err(|e| e.to_string())?;
        count += 1;
    }
    Ok(count)
}

fn decode_tiff_frame(bytes: &[u8], frame: usize) -> Result<RgbImage, String> {
    let mut decoder = TiffDecoder::new(Cursor::new(bytes)).map_err(|e| e.to_string())?;
    for _ in 0..frame {
        decoder.next_image().map_err(|e| e.to_string())?;
    }

    let (w, h) = decoder.dimensions().map_err(|e| e.to_string())?;
    let color = decoder.colortype().map_err(|e| e.to_string())?;
    let data = decoder.read_image().map_err(|e| e.to_string())?;
    let n = w as usize * h as usize;

    let samples: Vec<u8> = match data {
        DecodingResult::U8(v) => v,
        DecodingResult::U16(v) => v.into_iter().map(|s| (s >> 8) as u8).collect(),
        _ => return Err("unsupported TIFF sample format (expected 8 or 16 bit)".into()),
    };

    let rgb: Vec<u8> = match color {
        ColorType::RGB(_) => expect_len(samples, n * 3)?,
        ColorType::RGBA(_) => expect_len(samples, n * 4)?
            .chunks_exact(4)
            .flat_map(|p| [p[0], p[1], p[2]])
            .collect(),
        ColorType::Gray(1) => unpack_bilevel(&samples, w as usize, h as usize)?,
        ColorType::Gray(_) => expect_len(samples, n)?
            .into_iter()
            .flat_map(|g| [g, g, g])
            .collect(),
        ColorType::GrayA(_) => expect_len(samples, n * 2)?
            .chunks_exact(2)
            .flat_map(|p| [p[0], p[0], p[0]])
            .collect(),
        ColorType::CMYK(_) => expect_len(samples, n * 4)?
            .chunks_exact(4)
            .flat_map(|p| {
                let k = 255 - p[3] as u16;
                let ch = |c: u8| ((255 - c as u16) * k / 255) as u8;
                [ch(p[0]), ch(p[1]), ch(p[2])]
            })
            .collect(),
        other => return Err(format!("unsupported TIFF colour type {other:?}")),
    };

    RgbImage::from_raw(w, h, rgb).ok_or_else(|| "TIFF frame buffer size mismatch".to_string())
}

fn expect_len(samples: Vec<u8>, want: usize) -> Result<Vec<u8>, String> {
    if samples.len() < want {
        return Err(format!(
            "TIFF frame truncated: {} samples, expected {}",
            samples.len(),
            want
        ));
    }
    let mut samples = samples;
    samples.truncate(want);
    Ok(samples)
}

/// Bilevel frames arrive either one byte per pixel or packed MSB-first with
/// byte-aligned rows. Set bits are white.
fn unpack_bilevel(samples: &[u8], w: usize, h: usize) -> Result<Vec<u8>, String> {
    if samples.len() >= w * h {
        return Ok(samples[..w * h]
            .iter()
            .flat_map(|&s| {
                let v = if s > 0 { 255 } else { 0 };
                [v, v, v]
            })
            .collect());
    }
    let row_bytes = w.div_ceil(8);
    if samples.len() < row_bytes * h {
        return Err("bilevel TIFF frame truncated".into());
    }
    let mut out = Vec::with_capacity(w * h * 3);
    for row in samples.chunks_exact(row_bytes).take(h) {
        for x in 0..w {
            let bit = (row[x / 8] >> (7 - (x % 8))) & 1;
            let v = if bit == 1 { 255 } else { 0 };
            out.extend_from_slice(&[v, v, v]);
        }
    }
    Ok(out)
}
