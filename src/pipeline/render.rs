//! PDF rasterisation: render one page of an in-memory PDF via pdfium.
//!
//! ## Threading
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps global state and
//! blocks for the whole render. Callers run this on a worker thread (the
//! service's rayon pool or `spawn_blocking`), never on an async executor
//! thread.
//!
//! ## Why a fixed DPI?
//!
//! Both documents of a comparison are usually the same paper size, so a
//! common DPI puts them at the same pixel scale before alignment. 150 DPI
//! keeps 10-pt text legible to the keypoint detector; oversized pages are
//! capped at [`MAX_RENDER_EDGE`] and later bounded by the normaliser.

use crate::error::ComparisonError;
use image::RgbImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Hard cap on either rendered edge, applied before normalisation.
pub const MAX_RENDER_EDGE: i32 = 12_000;

#[cfg(target_os = "windows")]
const PDFIUM_LIB_NAME: &str = "pdfium.dll";
#[cfg(target_os = "macos")]
const PDFIUM_LIB_NAME: &str = "libpdfium.dylib";
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
const PDFIUM_LIB_NAME: &str = "libpdfium.so";

static LIBRARY_PATH: OnceLock<Option<PathBuf>> = OnceLock::new();

/// Library file named by `PDFIUM_LIB_PATH` (a file or the directory holding
/// it), or one sitting in the working directory.
fn local_library_path() -> Option<PathBuf> {
    LIBRARY_PATH
        .get_or_init(|| {
            if let Ok(p) = std::env::var("PDFIUM_LIB_PATH") {
                let p = PathBuf::from(p);
                let candidate = if p.is_dir() { p.join(PDFIUM_LIB_NAME) } else { p };
                if candidate.exists() {
                    return Some(candidate);
                }
                warn!(
                    "PDFIUM_LIB_PATH '{}' not found; falling back to system pdfium",
                    candidate.display()
                );
            }
            let cwd = Path::new(".").join(PDFIUM_LIB_NAME);
            cwd.exists().then_some(cwd)
        })
        .clone()
}

/// Bind to pdfium: `PDFIUM_LIB_PATH`, then the working directory, then the
/// system library search path.
pub fn bind_pdfium() -> Result<Pdfium, ComparisonError> {
    let bindings = match local_library_path() {
        Some(path) => Pdfium::bind_to_library(&path).map_err(|e| {
            ComparisonError::PdfiumBindingFailed(format!("{}: {e}", path.display()))
        })?,
        None => Pdfium::bind_to_system_library()
            .map_err(|e| ComparisonError::PdfiumBindingFailed(e.to_string()))?,
    };
    Ok(Pdfium::new(bindings))
}

/// `true` when a pdfium library can be bound in this environment.
pub fn pdfium_available() -> bool {
    bind_pdfium().is_ok()
}

/// Render `page` (0-based) of the PDF in `bytes` at `dpi`.
///
/// A page index past the end silently falls back to page 0.
///
/// # Returns
/// The rendered page and the document's total page count.
pub fn render_page(
    bytes: &[u8],
    page: usize,
    dpi: u32,
) -> Result<(RgbImage, usize), ComparisonError> {
    let pdfium = bind_pdfium()?;

    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| ComparisonError::decode("application/pdf", format!("{:?}", e)))?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    if total_pages == 0 {
        return Err(ComparisonError::decode("application/pdf", "document has no pages"));
    }

    let idx = if page >= total_pages {
        info!(
            "Page {} out of range (total={}), rendering page 0",
            page, total_pages
        );
        0
    } else {
        page
    };

    let pdf_page = pages
        .get(idx as u16)
        .map_err(|e| ComparisonError::decode("application/pdf", format!("page {idx}: {:?}", e)))?;

    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(dpi as f32 / 72.0)
        .set_maximum_width(MAX_RENDER_EDGE)
        .set_maximum_height(MAX_RENDER_EDGE);

    let bitmap = pdf_page.render_with_config(&render_config).map_err(|e| {
        ComparisonError::decode("application/pdf", format!("rasterising page {idx}: {:?}", e))
    })?;

    let raster = bitmap.as_image().to_rgb8();
    if raster.width() == 0 || raster.height() == 0 {
        return Err(ComparisonError::decode(
            "application/pdf",
            format!("page {idx} rendered to an empty raster"),
        ));
    }

    debug!(
        "Rendered PDF page {}/{} → {}x{} px at {} DPI",
        idx + 1,
        total_pages,
        raster.width(),
        raster.height(),
        dpi
    );

    Ok((raster, total_pages))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_name_matches_platform() {
        assert!(PDFIUM_LIB_NAME.contains("pdfium"));
    }

    #[test]
    fn garbage_is_a_decode_error_when_pdfium_is_present() {
        if !pdfium_available() {
            println!("SKIP: no pdfium library available");
            return;
        }
        let err = render_page(b"%PDF-1.4 definitely not a pdf", 0, 150).unwrap_err();
        assert!(err.is_user_error(), "got: {err}");
    }
}
