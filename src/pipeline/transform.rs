//! Colour-mode transform applied to every rendered page before encoding.
//!
//! Gray levels use ITU-R 601 weights in 16-bit fixed point, so a page
//! thresholds the same way it would through a classic `L` conversion.

use crate::config::ColorMode;
use image::{DynamicImage, GrayImage, Luma};

/// Luminance values below this become black; everything else becomes white.
pub const BW_THRESHOLD: u8 = 128;

/// Convert `img` to the pixel layout demanded by `mode`.
///
/// Pure and idempotent: applying the same mode twice yields the same pixels.
pub fn transform(img: DynamicImage, mode: ColorMode) -> DynamicImage {
    match mode {
        ColorMode::Truecolor => match img {
            DynamicImage::ImageRgb8(_) => img,
            other => DynamicImage::ImageRgb8(other.to_rgb8()),
        },
        ColorMode::Grayscale => match img {
            DynamicImage::ImageLuma8(_) => img,
            other => DynamicImage::ImageLuma8(luminance(&other)),
        },
        ColorMode::ThresholdBw => DynamicImage::ImageLuma8(threshold(luminance(&img))),
    }
}

/// 8-bit luminance of `img`. Alpha is ignored; gray inputs pass through.
pub fn luminance(img: &DynamicImage) -> GrayImage {
    match img {
        DynamicImage::ImageLuma8(gray) => gray.clone(),
        DynamicImage::ImageLumaA8(_)
        | DynamicImage::ImageLuma16(_)
        | DynamicImage::ImageLumaA16(_) => img.to_luma8(),
        _ => {
            let rgb = img.to_rgb8();
            GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
                let [r, g, b] = rgb.get_pixel(x, y).0;
                Luma([luma_601(r, g, b)])
            })
        }
    }
}

#[inline]
fn luma_601(r: u8, g: u8, b: u8) -> u8 {
    let l = r as u32 * 19595 + g as u32 * 38470 + b as u32 * 7471 + 0x8000;
    (l >> 16) as u8
}

fn threshold(mut gray: GrayImage) -> GrayImage {
    for px in gray.pixels_mut() {
        px.0[0] = if px.0[0] < BW_THRESHOLD { 0 } else { 255 };
    }
    gray
}
