//! Persisted user settings: one flat JSON record.
//!
//! ```json
//! { "dpi": 120, "format": "webp", "quality": 60, "mode": "grayscale",
//!   "workers": 2, "remember": true, "merge_quality": 65, "merge_max_width": 1250 }
//! ```
//!
//! Missing keys take their defaults. A file that cannot be read or parsed is
//! ignored with a warning. The core never reads this file; the CLI resolves
//! it into [`ConversionConfig`] and [`AssemblyConfig`] values.

use crate::config::{AssemblyConfig, ColorMode, ConversionConfig, OutputFormat};
use crate::error::Pdf2ImgError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const SETTINGS_FILE: &str = "settings.json";
pub const APP_DIR: &str = "pdf2img";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub dpi: u32,
    pub format: OutputFormat,
    pub quality: u8,
    pub mode: ColorMode,
    pub workers: usize,
    /// Write the effective settings back after each run.
    pub remember: bool,
    pub merge_quality: u8,
    pub merge_max_width: u32,
}

impl Default for Settings {
    fn default() -> Self {
        let conv = ConversionConfig::default();
        let asm = AssemblyConfig::default();
        Self {
            dpi: conv.dpi,
            format: conv.format,
            quality: conv.quality,
            mode: conv.color_mode,
            workers: conv.concurrency,
            remember: true,
            merge_quality: asm.quality,
            merge_max_width: asm.max_width,
        }
    }
}

impl Settings {
    /// `{config dir}/pdf2img/settings.json`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR).join(SETTINGS_FILE))
    }

    /// Read settings from `path`, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No settings at {}; using defaults", path.display());
                return Self::default();
            }
            Err(e) => {
                warn!("Cannot read settings {}: {}; using defaults", path.display(), e);
                return Self::default();
            }
        };
        match serde_json::from_str(&text) {
            Ok(s) => s,
            Err(e) => {
                warn!("Ignoring malformed settings {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Write settings to `path` as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), Pdf2ImgError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| Pdf2ImgError::OutputDirFailed {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Pdf2ImgError::Internal(format!("settings serialisation: {}", e)))?;
        std::fs::write(path, json).map_err(|source| Pdf2ImgError::OutputWriteFailed {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Saved settings to {}", path.display());
        Ok(())
    }

    pub fn to_conversion_config(&self) -> Result<ConversionConfig, Pdf2ImgError> {
        ConversionConfig::builder()
            .dpi(self.dpi)
            .format(self.format)
            .quality(self.quality)
            .color_mode(self.mode)
            .concurrency(self.workers)
            .build()
    }

    pub fn to_assembly_config(&self) -> Result<AssemblyConfig, Pdf2ImgError> {
        AssemblyConfig::builder()
            .max_width(self.merge_max_width)
            .quality(self.merge_quality)
            .build()
    }
}
