//! Cheap page-count probing.
//!
//! A probe failure is not an error: the caller falls back to rendering the
//! whole document in one pass and counts the images it gets back.

use crate::pipeline::render::RenderService;
use crate::task::Document;
use std::path::Path;
use tracing::debug;

/// Number of pages in `pdf_path`, or `None` if it cannot be determined.
///
/// A reported count of zero is treated as unknown.
pub fn probe_page_count(renderer: &dyn RenderService, pdf_path: &Path) -> Option<usize> {
    match renderer.page_count(pdf_path) {
        Ok(0) => {
            debug!("Probe of {} reported 0 pages", pdf_path.display());
            None
        }
        Ok(n) => Some(n),
        Err(e) => {
            debug!("Probe of {} failed: {}", pdf_path.display(), e);
            None
        }
    }
}

/// Probe every document without a known count, fill in `page_count`, and
/// return the sum of all known counts.
///
/// The sum seeds the aggregator's expected-pages figure before the batch
/// starts. Documents whose probe fails contribute nothing.
pub fn estimate_pages(renderer: &dyn RenderService, documents: &mut [Document]) -> usize {
    documents
        .iter_mut()
        .map(|doc| {
            if doc.page_count.is_none() {
                doc.page_count = probe_page_count(renderer, &doc.path);
            }
            doc.page_count.unwrap_or(0)
        })
        .sum()
}
