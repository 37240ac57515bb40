//! Error types for the edgequake-pdf2img library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`Pdf2ImgError`] — **Task-level**: one task cannot proceed at all
//!   (destination directory unwritable, document unrenderable, folder empty).
//!   The task terminates with a `TaskFailed` event; sibling tasks in the same
//!   batch are unaffected.
//!
//! * [`PageError`] — **Non-fatal**: a single page failed to render, encode,
//!   or write. The page is skipped, progress still advances, and the error is
//!   recorded in [`crate::task::ConversionSummary::failures`].
//!
//! A failed page-count probe is neither: it degrades to "unknown" and the
//! conversion falls back to a whole-document render.

use std::path::PathBuf;
use thiserror::Error;

/// Task-level errors returned by the edgequake-pdf2img library.
///
/// Page-level failures use [`PageError`] and are stored in the task result
/// rather than propagated here.
#[derive(Debug, Error)]
pub enum Pdf2ImgError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input path does not exist.
    #[error("Input not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the input.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// Requested page number is outside the document.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    /// pdfium returned an error while rasterising.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    // ── Output errors ─────────────────────────────────────────────────────
    /// Could not create the per-document destination directory.
    #[error("Failed to create output directory '{path}': {source}")]
    OutputDirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Folder assembly errors ────────────────────────────────────────────
    /// The folder holds no recognised raster images.
    #[error("empty folder: '{path}' contains no .jpg/.jpeg/.png/.webp/.bmp images")]
    EmptyFolder { path: PathBuf },

    /// The folder could not be listed.
    #[error("Failed to read folder '{path}': {source}")]
    FolderUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An image in the folder could not be decoded.
    #[error("Failed to load image '{path}': {detail}")]
    ImageLoadFailed { path: PathBuf, detail: String },

    /// lopdf or the JPEG encoder failed while building the output PDF.
    #[error("Failed to assemble PDF '{path}': {detail}")]
    PdfAssemblyFailed { path: PathBuf, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Install libpdfium for your platform, or set PDFIUM_LIB_PATH=/path/to/libpdfium\n\
to point at an existing copy.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single page.
///
/// Stored in [`crate::task::ConversionSummary::failures`] and carried by the
/// `PageSkipped` progress event. The conversion continues with the next page.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Page rasterisation failed.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// Encoding to the target format failed.
    #[error("Page {page}: encoding failed: {detail}")]
    EncodeFailed { page: usize, detail: String },

    /// The encoded bytes could not be written.
    #[error("Page {page}: write to '{path}' failed: {detail}")]
    WriteFailed {
        page: usize,
        path: PathBuf,
        detail: String,
    },
}

impl PageError {
    /// 1-indexed page number the error refers to.
    pub fn page(&self) -> usize {
        match self {
            PageError::RenderFailed { page, .. }
            | PageError::EncodeFailed { page, .. }
            | PageError::WriteFailed { page, .. } => *page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_folder_display_mentions_empty() {
        let e = Pdf2ImgError::EmptyFolder {
            path: PathBuf::from("/scans/book"),
        };
        let msg = e.to_string();
        assert!(msg.starts_with("empty folder"), "got: {msg}");
        assert!(msg.contains("/scans/book"));
    }

    #[test]
    fn output_dir_failed_keeps_source() {
        use std::error::Error as _;
        let e = Pdf2ImgError::OutputDirFailed {
            path: PathBuf::from("/ro/out"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
        };
        assert!(e.to_string().contains("/ro/out"));
        assert!(e.source().is_some());
    }

    #[test]
    fn page_error_reports_page() {
        let e = PageError::EncodeFailed {
            page: 7,
            detail: "bad quality".into(),
        };
        assert_eq!(e.page(), 7);
        assert!(e.to_string().contains("Page 7"));
    }

    #[test]
    fn page_error_round_trips_through_json() {
        let e = PageError::RenderFailed {
            page: 2,
            detail: "glyph cache".into(),
        };
        let json = serde_json::to_string(&e).expect("serialize");
        let back: PageError = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, e);
    }
}
