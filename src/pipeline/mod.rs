//! Pipeline stages for document comparison.
//!
//! Each submodule implements exactly one transformation step and is testable
//! on its own. All stages are synchronous and CPU-bound; the async entry
//! points in [`crate::compare`] and [`crate::service`] move them off the
//! executor.
//!
//! ## Data Flow
//!
//! ```text
//! load ──▶ normalize ──▶ align ──▶ compose ──▶ encode
//! (pdfium/  (area       (ORB +    (diff or    (JPEG/PNG)
//!  image)    downscale)  RANSAC)   overlay)
//! ```
//!
//! 1. [`load`] / [`render`]: decode one page of a PDF, TIFF or flat image
//! 2. [`normalize`]: cap the longer side so alignment cost stays bounded
//! 3. [`align`]: keypoint alignment ([`features`], [`homography`]) with a
//!    purely geometric fallback
//! 4. [`compose`]: per-pixel classification into common / only-A / only-B
//! 5. [`encode`]: lossy previews and a lossless archival copy

pub mod align;
pub mod compose;
pub mod encode;
pub mod features;
pub mod homography;
pub mod load;
pub mod normalize;
pub mod render;
