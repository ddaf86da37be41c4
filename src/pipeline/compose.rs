//! Difference and overlay composition of two aligned rasters.
//!
//! Both inputs must share one pixel grid. Each pixel is classified once into
//! a [`PixelClass`] over a whole-grid mask built row-parallel with rayon, and
//! the output images are painted from that mask.
//!
//! A pixel is *ink* when its luminance is at or below `bin_threshold`, and
//! *changed* when the two luminances differ by more than `diff_threshold`.
//! Ink present on both sides but with a large tonal difference is credited
//! to the darker side: a faint stroke overdrawn in bold on one side is an
//! edit, not shared content.

use crate::config::ColorScheme;
use crate::error::{ComparisonError, Stage};
use crate::pipeline::align::luma;
use image::{Rgb, RgbImage};
use rayon::prelude::*;
use tracing::debug;

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

/// Per-pixel classification of a difference composite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelClass {
    Background,
    Common,
    OnlyA,
    OnlyB,
}

/// Difference-mode outputs, all in the reference grid.
#[derive(Debug, Clone)]
pub struct DifferenceImages {
    pub composite: RgbImage,
    /// Common content plus what only the first document has.
    pub highlighted_a: RgbImage,
    /// Common content plus what only the second document has.
    pub highlighted_b: RgbImage,
}

fn check_dimensions(a: &RgbImage, b: &RgbImage) -> Result<(), ComparisonError> {
    if a.dimensions() != b.dimensions() {
        return Err(ComparisonError::processing(
            Stage::Compose,
            format!(
                "raster size mismatch: {}x{} vs {}x{}",
                a.width(),
                a.height(),
                b.width(),
                b.height()
            ),
        ));
    }
    Ok(())
}

/// Classify every pixel of two same-sized rasters.
pub fn classify(
    reference: &RgbImage,
    aligned: &RgbImage,
    diff_threshold: u8,
    bin_threshold: u8,
) -> Result<Vec<PixelClass>, ComparisonError> {
    check_dimensions(reference, aligned)?;
    let row_len = reference.width() as usize * 3;
    let width = reference.width() as usize;
    let mut mask = vec![PixelClass::Background; width * reference.height() as usize];

    mask.par_chunks_mut(width)
        .zip(reference.as_raw().par_chunks(row_len))
        .zip(aligned.as_raw().par_chunks(row_len))
        .for_each(|((out, row_a), row_b)| {
            for ((slot, pa), pb) in out
                .iter_mut()
                .zip(row_a.chunks_exact(3))
                .zip(row_b.chunks_exact(3))
            {
                let la = luma(pa[0], pa[1], pa[2]);
                let lb = luma(pb[0], pb[1], pb[2]);
                *slot = classify_pixel(la, lb, diff_threshold, bin_threshold);
            }
        });

    Ok(mask)
}

#[inline]
fn classify_pixel(la: u8, lb: u8, diff_threshold: u8, bin_threshold: u8) -> PixelClass {
    let ink_a = la <= bin_threshold;
    let ink_b = lb <= bin_threshold;
    let changed = la.abs_diff(lb) > diff_threshold;
    match (ink_a, ink_b) {
        (true, false) => PixelClass::OnlyA,
        (false, true) => PixelClass::OnlyB,
        (true, true) if changed && la < lb => PixelClass::OnlyA,
        (true, true) if changed && lb < la => PixelClass::OnlyB,
        (true, true) if !changed => PixelClass::Common,
        _ => PixelClass::Background,
    }
}

fn paint(
    width: u32,
    height: u32,
    mask: &[PixelClass],
    color: impl Fn(PixelClass) -> Option<Rgb<u8>> + Sync,
) -> RgbImage {
    let mut img = RgbImage::from_pixel(width, height, WHITE);
    let row_len = width as usize * 3;
    let mask_rows = mask.par_chunks(width as usize);
    // `ImageBuffer` derefs to its flat sample slice.
    let samples: &mut [u8] = &mut img;
    samples
        .par_chunks_mut(row_len)
        .zip(mask_rows)
        .for_each(|(row, classes)| {
            for (px, &class) in row.chunks_exact_mut(3).zip(classes) {
                if let Some(Rgb(c)) = color(class) {
                    px.copy_from_slice(&c);
                }
            }
        });
    img
}

/// Difference composite plus per-side highlight images.
pub fn compose_difference(
    reference: &RgbImage,
    aligned: &RgbImage,
    diff_threshold: u8,
    bin_threshold: u8,
    colors: &ColorScheme,
) -> Result<DifferenceImages, ComparisonError> {
    let mask = classify(reference, aligned, diff_threshold, bin_threshold)?;
    let (w, h) = reference.dimensions();
    let common: Rgb<u8> = colors.diff_common.into();
    let file1: Rgb<u8> = colors.diff_file1.into();
    let file2: Rgb<u8> = colors.diff_file2.into();

    let composite = paint(w, h, &mask, |class| match class {
        PixelClass::Common => Some(common),
        PixelClass::OnlyA => Some(file1),
        PixelClass::OnlyB => Some(file2),
        PixelClass::Background => None,
    });
    let highlighted_a = paint(w, h, &mask, |class| match class {
        PixelClass::Common => Some(common),
        PixelClass::OnlyA => Some(file1),
        _ => None,
    });
    let highlighted_b = paint(w, h, &mask, |class| match class {
        PixelClass::Common => Some(common),
        PixelClass::OnlyB => Some(file2),
        _ => None,
    });

    if tracing::enabled!(tracing::Level::DEBUG) {
        let count = |c: PixelClass| mask.iter().filter(|&&m| m == c).count();
        debug!(
            common = count(PixelClass::Common),
            only_a = count(PixelClass::OnlyA),
            only_b = count(PixelClass::OnlyB),
            "Composed {}x{} difference",
            w,
            h
        );
    }

    Ok(DifferenceImages {
        composite,
        highlighted_a,
        highlighted_b,
    })
}

/// Ink of the first raster in `overlay_file1`, then ink of the second in
/// `overlay_file2` on top, over white.
pub fn compose_overlay(
    reference: &RgbImage,
    aligned: &RgbImage,
    bin_threshold: u8,
    colors: &ColorScheme,
) -> Result<RgbImage, ComparisonError> {
    check_dimensions(reference, aligned)?;
    let first: Rgb<u8> = colors.overlay_file1.into();
    let second: Rgb<u8> = colors.overlay_file2.into();
    let mut out = RgbImage::from_pixel(reference.width(), reference.height(), WHITE);
    let row_len = reference.width() as usize * 3;

    let samples: &mut [u8] = &mut out;
    samples
        .par_chunks_mut(row_len)
        .zip(reference.as_raw().par_chunks(row_len))
        .zip(aligned.as_raw().par_chunks(row_len))
        .for_each(|((row, row_a), row_b)| {
            for ((px, pa), pb) in row
                .chunks_exact_mut(3)
                .zip(row_a.chunks_exact(3))
                .zip(row_b.chunks_exact(3))
            {
                if luma(pb[0], pb[1], pb[2]) <= bin_threshold {
                    px.copy_from_slice(&second.0);
                } else if luma(pa[0], pa[1], pa[2]) <= bin_threshold {
                    px.copy_from_slice(&first.0);
                }
            }
        });

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Color;

    const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

    fn with_square(w: u32, h: u32, x0: u32, y0: u32, side: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            if (x0..x0 + side).contains(&x) && (y0..y0 + side).contains(&y) {
                BLACK
            } else {
                WHITE
            }
        })
    }

    #[test]
    fn shifted_square_splits_into_three_regions() {
        let a = with_square(100, 100, 20, 20, 40);
        let b = with_square(100, 100, 30, 30, 40);
        let colors = ColorScheme::default();
        let out = compose_difference(&a, &b, 30, 200, &colors).unwrap();

        let common = Rgb(colors.diff_common.0);
        let file1 = Rgb(colors.diff_file1.0);
        let file2 = Rgb(colors.diff_file2.0);

        assert_eq!(*out.composite.get_pixel(45, 45), common);
        assert_eq!(*out.composite.get_pixel(22, 22), file1);
        assert_eq!(*out.composite.get_pixel(65, 65), file2);
        assert_eq!(*out.composite.get_pixel(5, 5), WHITE);
        assert_eq!(*out.composite.get_pixel(65, 22), WHITE);

        assert_eq!(*out.highlighted_a.get_pixel(22, 22), file1);
        assert_eq!(*out.highlighted_a.get_pixel(65, 65), WHITE);
        assert_eq!(*out.highlighted_b.get_pixel(65, 65), file2);
        assert_eq!(*out.highlighted_b.get_pixel(22, 22), WHITE);
        assert_eq!(*out.highlighted_b.get_pixel(45, 45), common);
    }

    #[test]
    fn identical_inputs_are_all_common() {
        let a = with_square(64, 48, 10, 10, 20);
        let colors = ColorScheme::default();
        let out = compose_difference(&a, &a, 30, 200, &colors).unwrap();
        let common = Rgb(colors.diff_common.0);
        assert!(out
            .composite
            .pixels()
            .all(|p| *p == common || *p == WHITE));
        assert!(out.composite.pixels().any(|p| *p == common));
    }

    #[test]
    fn darker_ink_wins_when_both_sides_have_ink() {
        assert_eq!(classify_pixel(20, 150, 30, 200), PixelClass::OnlyA);
        assert_eq!(classify_pixel(150, 20, 30, 200), PixelClass::OnlyB);
        assert_eq!(classify_pixel(100, 110, 30, 200), PixelClass::Common);
        assert_eq!(classify_pixel(230, 250, 30, 200), PixelClass::Background);
        // Ink threshold is inclusive.
        assert_eq!(classify_pixel(200, 255, 30, 200), PixelClass::OnlyA);
    }

    #[test]
    fn colour_override_is_used() {
        let a = with_square(40, 40, 5, 5, 10);
        let b = with_square(40, 40, 5, 5, 10);
        let mut colors = ColorScheme::default();
        colors.diff_common = Color::rgb(0x12, 0x34, 0x56);
        let out = compose_difference(&a, &b, 30, 200, &colors).unwrap();
        assert_eq!(*out.composite.get_pixel(8, 8), Rgb([0x12, 0x34, 0x56]));
    }

    #[test]
    fn overlay_paints_second_over_first() {
        let a = with_square(50, 50, 0, 0, 30);
        let b = with_square(50, 50, 20, 20, 30);
        let colors = ColorScheme::default();
        let out = compose_overlay(&a, &b, 200, &colors).unwrap();
        assert_eq!(*out.get_pixel(5, 5), Rgb(colors.overlay_file1.0));
        assert_eq!(*out.get_pixel(25, 25), Rgb(colors.overlay_file2.0));
        assert_eq!(*out.get_pixel(45, 45), Rgb(colors.overlay_file2.0));
        assert_eq!(*out.get_pixel(45, 5), WHITE);
    }

    #[test]
    fn mismatched_sizes_are_a_compose_error() {
        let a = RgbImage::from_pixel(10, 10, WHITE);
        let b = RgbImage::from_pixel(10, 11, WHITE);
        let err = compose_difference(&a, &b, 30, 200, &ColorScheme::default()).unwrap_err();
        assert!(matches!(
            err,
            ComparisonError::Processing {
                stage: Stage::Compose,
                ..
            }
        ));
        assert!(compose_overlay(&a, &b, 200, &ColorScheme::default()).is_err());
    }
}
