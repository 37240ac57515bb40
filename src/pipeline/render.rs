//! PDF rasterisation behind the [`RenderService`] seam.
//!
//! Everything above this module talks to a `&dyn RenderService`, so tests can
//! drive the whole conversion pipeline with an in-memory fake while
//! production code uses [`PdfiumRenderer`].
//!
//! All methods are blocking. Callers on a Tokio runtime run them inside
//! `spawn_blocking` (the scheduler does this for every task).

use crate::error::Pdf2ImgError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// PDF points per inch. Render scale is `dpi / POINTS_PER_INCH`.
pub const POINTS_PER_INCH: f32 = 72.0;

/// Environment variable naming an explicit pdfium library (file or directory).
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// A service that can count and rasterise the pages of a PDF.
pub trait RenderService: Send + Sync {
    /// Number of pages in the document.
    fn page_count(&self, pdf_path: &Path) -> Result<usize, Pdf2ImgError>;

    /// Rasterise one page (1-indexed) at `dpi`.
    fn render_page(
        &self,
        pdf_path: &Path,
        page: usize,
        dpi: u32,
    ) -> Result<DynamicImage, Pdf2ImgError>;

    /// Rasterise every page in document order.
    ///
    /// Used when the page count could not be determined up front.
    fn render_all(&self, pdf_path: &Path, dpi: u32) -> Result<Vec<DynamicImage>, Pdf2ImgError>;
}

/// [`RenderService`] backed by the pdfium C++ library.
///
/// The library is bound per call. A `PdfDocument` borrows its `Pdfium`
/// instance, so binding alongside each load keeps both on the blocking
/// thread that uses them.
#[derive(Debug, Clone, Default)]
pub struct PdfiumRenderer {
    library_path: Option<PathBuf>,
    password: Option<String>,
}

impl PdfiumRenderer {
    /// Renderer that binds `PDFIUM_LIB_PATH` when set, else the system library.
    pub fn new() -> Self {
        Self {
            library_path: std::env::var_os(PDFIUM_LIB_PATH_ENV).map(PathBuf::from),
            password: None,
        }
    }

    /// Bind an explicit library file, or a directory holding the
    /// platform-named library.
    pub fn with_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.library_path = Some(path.into());
        self
    }

    /// Password used to open encrypted documents.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    fn bind(&self) -> Result<Pdfium, Pdf2ImgError> {
        let bindings = match &self.library_path {
            Some(path) if path.is_dir() => {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(path))
            }
            Some(path) => Pdfium::bind_to_library(path),
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| Pdf2ImgError::PdfiumBindingFailed(format!("{:?}", e)))?;
        Ok(Pdfium::new(bindings))
    }

    fn open<'a>(
        &'a self,
        pdfium: &'a Pdfium,
        pdf_path: &Path,
    ) -> Result<PdfDocument<'a>, Pdf2ImgError> {
        if !pdf_path.exists() {
            return Err(Pdf2ImgError::FileNotFound {
                path: pdf_path.to_path_buf(),
            });
        }
        let password = self.password.as_deref();
        pdfium
            .load_pdf_from_file(pdf_path, password)
            .map_err(|e| map_load_error(pdf_path, password.is_some(), e))
    }
}

fn map_load_error(pdf_path: &Path, had_password: bool, e: PdfiumError) -> Pdf2ImgError {
    let err_str = format!("{:?}", e);
    if err_str.contains("Password") || err_str.contains("password") {
        if had_password {
            Pdf2ImgError::WrongPassword {
                path: pdf_path.to_path_buf(),
            }
        } else {
            Pdf2ImgError::PasswordRequired {
                path: pdf_path.to_path_buf(),
            }
        }
    } else {
        Pdf2ImgError::CorruptPdf {
            path: pdf_path.to_path_buf(),
            detail: err_str,
        }
    }
}

fn render_config(dpi: u32) -> PdfRenderConfig {
    PdfRenderConfig::new().scale_page_by_factor(dpi as f32 / POINTS_PER_INCH)
}

fn rasterise(
    page: &PdfPage,
    page_num: usize,
    config: &PdfRenderConfig,
) -> Result<DynamicImage, Pdf2ImgError> {
    let bitmap =
        page.render_with_config(config)
            .map_err(|e| Pdf2ImgError::RasterisationFailed {
                page: page_num,
                detail: format!("{:?}", e),
            })?;
    let image = bitmap.as_image();
    debug!(
        "Rendered page {} → {}x{} px",
        page_num,
        image.width(),
        image.height()
    );
    Ok(image)
}

impl RenderService for PdfiumRenderer {
    fn page_count(&self, pdf_path: &Path) -> Result<usize, Pdf2ImgError> {
        let pdfium = self.bind()?;
        let document = self.open(&pdfium, pdf_path)?;
        Ok(document.pages().len() as usize)
    }

    fn render_page(
        &self,
        pdf_path: &Path,
        page: usize,
        dpi: u32,
    ) -> Result<DynamicImage, Pdf2ImgError> {
        let pdfium = self.bind()?;
        let document = self.open(&pdfium, pdf_path)?;
        let pages = document.pages();
        let total = pages.len() as usize;
        if page == 0 || page > total {
            return Err(Pdf2ImgError::PageOutOfRange { page, total });
        }

        let pdf_page = pages
            .get((page - 1) as u16)
            .map_err(|e| Pdf2ImgError::RasterisationFailed {
                page,
                detail: format!("{:?}", e),
            })?;
        rasterise(&pdf_page, page, &render_config(dpi))
    }

    fn render_all(&self, pdf_path: &Path, dpi: u32) -> Result<Vec<DynamicImage>, Pdf2ImgError> {
        let pdfium = self.bind()?;
        let document = self.open(&pdfium, pdf_path)?;
        let pages = document.pages();
        info!("PDF loaded: {} pages", pages.len());

        let config = render_config(dpi);
        pages
            .iter()
            .enumerate()
            .map(|(idx, page)| rasterise(&page, idx + 1, &config))
            .collect()
    }
}
