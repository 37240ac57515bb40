//! Input classification: decide whether a user-supplied path is a PDF to
//! convert or a folder of images to assemble.
//!
//! PDFs are checked for the `%PDF` magic bytes here so callers get a
//! meaningful error instead of a pdfium failure deep inside a worker.

use crate::error::Pdf2ImgError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A classified input path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedInput {
    /// A readable file starting with `%PDF`.
    Document(PathBuf),
    /// A directory whose images are assembled into one PDF.
    Folder(PathBuf),
}

impl ResolvedInput {
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Document(p) | ResolvedInput::Folder(p) => p,
        }
    }
}

/// Classify `path`, validating existence, readability and PDF magic bytes.
pub fn resolve_input(path: impl AsRef<Path>) -> Result<ResolvedInput, Pdf2ImgError> {
    let path = path.as_ref().to_path_buf();

    let meta = match std::fs::metadata(&path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(Pdf2ImgError::PermissionDenied { path });
        }
        Err(_) => return Err(Pdf2ImgError::FileNotFound { path }),
    };

    if meta.is_dir() {
        debug!("Resolved image folder: {}", path.display());
        return Ok(ResolvedInput::Folder(path));
    }

    match std::fs::File::open(&path) {
        Ok(mut f) => {
            let mut magic = [0u8; 4];
            let read = f.read(&mut magic).unwrap_or(0);
            if read < 4 || &magic != b"%PDF" {
                return Err(Pdf2ImgError::NotAPdf { path, magic });
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(Pdf2ImgError::PermissionDenied { path });
        }
        Err(_) => return Err(Pdf2ImgError::FileNotFound { path }),
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(ResolvedInput::Document(path))
}
