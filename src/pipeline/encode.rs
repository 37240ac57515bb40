//! Page encoding: transformed `DynamicImage` → bytes in the target format.
//!
//! | Format | Truecolor | Grayscale | ThresholdBw |
//! |--------|-----------|-----------|-------------|
//! | JPEG   | RGB8, quality | L8, quality | widened to L8, quality |
//! | WebP   | lossy, quality | lossy, quality | lossy, quality |
//! | PNG    | RGB8 | L8 | 1-bit, best compression |
//!
//! `image` only writes lossless WebP and has no sub-byte PNG depths, so lossy
//! WebP goes through the `webp` crate and bilevel PNG through `png` directly.

use crate::config::{ColorMode, OutputFormat};
use crate::error::PageError;
use crate::pipeline::transform::luminance;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GrayImage, ImageFormat};
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

/// Encode one page. `quality` is ignored for PNG.
pub fn encode_page(
    img: &DynamicImage,
    mode: ColorMode,
    format: OutputFormat,
    quality: u8,
) -> Result<Vec<u8>, String> {
    let quality = quality.clamp(1, 100);
    let bytes = match format {
        OutputFormat::Jpeg => encode_jpeg(img, mode, quality)?,
        OutputFormat::Webp => encode_webp(img, quality)?,
        OutputFormat::Png if mode.is_bilevel() => encode_png_1bit(&luminance(img))?,
        OutputFormat::Png => {
            let mut buf = Vec::new();
            img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
                .map_err(|e| e.to_string())?;
            buf
        }
    };
    debug!(
        "Encoded {}x{} page as {} → {} bytes",
        img.width(),
        img.height(),
        format,
        bytes.len()
    );
    Ok(bytes)
}

/// Encode page `page` and write it to `path`.
pub fn write_page(
    img: &DynamicImage,
    mode: ColorMode,
    format: OutputFormat,
    quality: u8,
    path: &Path,
    page: usize,
) -> Result<(), PageError> {
    let bytes = encode_page(img, mode, format, quality)
        .map_err(|detail| PageError::EncodeFailed { page, detail })?;
    std::fs::write(path, bytes).map_err(|e| PageError::WriteFailed {
        page,
        path: path.to_path_buf(),
        detail: e.to_string(),
    })
}

/// `{stem}_{page}.{ext}`
pub fn page_file_name(stem: &str, page: usize, format: OutputFormat) -> String {
    format!("{}_{}.{}", stem, page, format.extension())
}

fn encode_jpeg(img: &DynamicImage, mode: ColorMode, quality: u8) -> Result<Vec<u8>, String> {
    // JPEG has no 1-bit layout; bilevel pages are stored as 8-bit gray.
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    match mode {
        ColorMode::Truecolor => encoder.encode_image(&img.to_rgb8()),
        ColorMode::Grayscale | ColorMode::ThresholdBw => encoder.encode_image(&luminance(img)),
    }
    .map_err(|e| e.to_string())?;
    Ok(buf)
}

fn encode_webp(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, String> {
    let rgb = img.to_rgb8();
    let (w, h) = rgb.dimensions();
    if w == 0 || h == 0 {
        return Err(format!("cannot encode empty {w}x{h} image as WebP"));
    }
    // libwebp rejects sides over 16383 px; surface that as an error.
    let encoded = webp::Encoder::from_rgb(rgb.as_raw(), w, h)
        .encode_simple(false, quality as f32)
        .map_err(|e| format!("WebP encoding of {w}x{h} image failed: {e:?}"))?;
    Ok(encoded.to_vec())
}

/// 1-bit grayscale PNG. Pixels `>= 128` become white (bit set).
fn encode_png_1bit(gray: &GrayImage) -> Result<Vec<u8>, String> {
    let (w, h) = gray.dimensions();
    let packed = pack_bits(gray);

    let mut buf = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut buf, w, h);
        encoder.set_color(png::ColorType::Grayscale);
        encoder.set_depth(png::BitDepth::One);
        encoder.set_compression(png::Compression::Best);
        let mut writer = encoder.write_header().map_err(|e| e.to_string())?;
        writer
            .write_image_data(&packed)
            .map_err(|e| e.to_string())?;
        writer.finish().map_err(|e| e.to_string())?;
    }
    Ok(buf)
}

/// Pack rows MSB-first, each row padded to a whole byte.
fn pack_bits(gray: &GrayImage) -> Vec<u8> {
    let (w, h) = gray.dimensions();
    let row_bytes = (w as usize).div_ceil(8);
    let mut packed = vec![0u8; row_bytes * h as usize];
    for (x, y, px) in gray.enumerate_pixels() {
        if px.0[0] >= 128 {
            let idx = y as usize * row_bytes + x as usize / 8;
            packed[idx] |= 0x80 >> (x % 8);
        }
    }
    packed
}
