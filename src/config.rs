//! Configuration types for PDF-to-image conversion and folder assembly.
//!
//! Conversion behaviour is controlled through [`ConversionConfig`] and folder
//! assembly through [`AssemblyConfig`], each built via its builder. Both are
//! small `Copy` value objects: a task receives its own copy at submission
//! time, so changing the caller's config afterwards never affects work that
//! is already queued or running.

use crate::error::Pdf2ImgError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Accepted rendering resolution range (dots per inch).
pub const DPI_RANGE: std::ops::RangeInclusive<u32> = 36..=1200;

/// Configuration for a PDF-to-image conversion.
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_pdf2img::{ColorMode, ConversionConfig, OutputFormat};
///
/// let config = ConversionConfig::builder()
///     .dpi(150)
///     .format(OutputFormat::Png)
///     .color_mode(ColorMode::ThresholdBw)
///     .concurrency(4)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionConfig {
    /// Rendering DPI used when rasterising each page. Default: 120.
    ///
    /// 120 DPI keeps body text legible on screen while a WebP page stays in
    /// the 50–150 KB range. Use 200–300 for print or OCR.
    pub dpi: u32,

    /// Output container format. Default: [`OutputFormat::Webp`].
    pub format: OutputFormat,

    /// Encoder quality 1–100. Only meaningful for lossy formats. Default: 60.
    pub quality: u8,

    /// Colour policy applied to each rendered page. Default: [`ColorMode::Grayscale`].
    pub color_mode: ColorMode,

    /// Number of documents converted in parallel. Default: 2.
    ///
    /// Each worker renders one document at a time, page by page, so this is
    /// also the number of pdfium instances alive at once.
    pub concurrency: usize,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            dpi: 120,
            format: OutputFormat::Webp,
            quality: 60,
            color_mode: ColorMode::Grayscale,
            concurrency: 2,
        }
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    /// Stored as given; [`build`](Self::build) rejects values outside [`DPI_RANGE`].
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn format(mut self, format: OutputFormat) -> Self {
        self.config.format = format;
        self
    }

    pub fn quality(mut self, quality: u8) -> Self {
        self.config.quality = quality.clamp(1, 100);
        self
    }

    pub fn color_mode(mut self, mode: ColorMode) -> Self {
        self.config.color_mode = mode;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, Pdf2ImgError> {
        let c = &self.config;
        if !DPI_RANGE.contains(&c.dpi) {
            return Err(Pdf2ImgError::InvalidConfig(format!(
                "DPI must be {}–{}, got {}",
                DPI_RANGE.start(),
                DPI_RANGE.end(),
                c.dpi
            )));
        }
        if !(1..=100).contains(&c.quality) {
            return Err(Pdf2ImgError::InvalidConfig(format!(
                "Quality must be 1–100, got {}",
                c.quality
            )));
        }
        if c.concurrency == 0 {
            return Err(Pdf2ImgError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

/// Configuration for assembling a folder of images into one PDF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyConfig {
    /// Images wider than this are downscaled (aspect preserved). `0` disables
    /// resizing. Default: 1250.
    pub max_width: u32,

    /// JPEG quality used for the embedded pages, 1–100. Default: 65.
    pub quality: u8,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            max_width: 1250,
            quality: 65,
        }
    }
}

impl AssemblyConfig {
    /// Create a new builder for `AssemblyConfig`.
    pub fn builder() -> AssemblyConfigBuilder {
        AssemblyConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`AssemblyConfig`].
#[derive(Debug)]
pub struct AssemblyConfigBuilder {
    config: AssemblyConfig,
}

impl AssemblyConfigBuilder {
    pub fn max_width(mut self, px: u32) -> Self {
        self.config.max_width = px;
        self
    }

    pub fn quality(mut self, quality: u8) -> Self {
        self.config.quality = quality.clamp(1, 100);
        self
    }

    pub fn build(self) -> Result<AssemblyConfig, Pdf2ImgError> {
        if !(1..=100).contains(&self.config.quality) {
            return Err(Pdf2ImgError::InvalidConfig(format!(
                "Assembly quality must be 1–100, got {}",
                self.config.quality
            )));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Target container format for converted pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Photographic lossy. Cannot hold 1-bit data; bilevel pages are widened
    /// to 8-bit grayscale first.
    #[serde(alias = "JPEG", alias = "jpg")]
    Jpeg,
    /// General-purpose lossy. (default)
    #[default]
    #[serde(alias = "WEBP")]
    Webp,
    /// Lossless. Bilevel pages are stored as 1-bit PNG.
    #[serde(alias = "PNG")]
    Png,
}

impl OutputFormat {
    /// File extension written for this format, without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Webp => "webp",
            OutputFormat::Png => "png",
        }
    }

    /// Whether the `quality` setting has any effect.
    pub fn is_lossy(self) -> bool {
        !matches!(self, OutputFormat::Png)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Webp => "webp",
            OutputFormat::Png => "png",
        };
        f.write_str(name)
    }
}

impl FromStr for OutputFormat {
    type Err = Pdf2ImgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(OutputFormat::Jpeg),
            "webp" => Ok(OutputFormat::Webp),
            "png" => Ok(OutputFormat::Png),
            other => Err(Pdf2ImgError::InvalidConfig(format!(
                "Unknown format '{other}' (expected jpeg, webp or png)"
            ))),
        }
    }
}

/// Colour policy applied to every rendered page before encoding.
///
/// | Mode | Output |
/// |------|--------|
/// | `Truecolor` | 8-bit RGB |
/// | `Grayscale` | 8-bit luminance (default) |
/// | `ThresholdBw` | luminance hard-thresholded at 128 to pure black/white |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorMode {
    #[serde(alias = "RGB", alias = "rgb")]
    Truecolor,
    #[default]
    #[serde(alias = "L", alias = "l")]
    Grayscale,
    /// No dithering: `v < 128 → 0`, everything else `→ 255`.
    #[serde(alias = "1", alias = "bw")]
    ThresholdBw,
}

impl ColorMode {
    /// Whether pages in this mode carry only two pixel values.
    pub fn is_bilevel(self) -> bool {
        matches!(self, ColorMode::ThresholdBw)
    }
}

impl fmt::Display for ColorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColorMode::Truecolor => "truecolor",
            ColorMode::Grayscale => "grayscale",
            ColorMode::ThresholdBw => "threshold_bw",
        };
        f.write_str(name)
    }
}

impl FromStr for ColorMode {
    type Err = Pdf2ImgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "rgb" | "truecolor" | "color" => Ok(ColorMode::Truecolor),
            "l" | "gray" | "grey" | "grayscale" => Ok(ColorMode::Grayscale),
            "1" | "bw" | "threshold" | "threshold_bw" => Ok(ColorMode::ThresholdBw),
            other => Err(Pdf2ImgError::InvalidConfig(format!(
                "Unknown colour mode '{other}' (expected rgb, l or 1)"
            ))),
        }
    }
}
