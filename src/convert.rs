//! PDF → page images: the per-document worker and batch entry points.
//!
//! [`run_conversion`] is the body of one conversion task. It runs on a
//! blocking thread and walks the document page by page:
//!
//! ```text
//! create destination ──▶ page count? ──yes──▶ for p in 1..=N: render p → transform → encode → write
//!                               │
//!                               └──no───▶ render all → transform → encode → write each
//! ```
//!
//! A page that fails to render, encode or write is skipped and recorded; the
//! task carries on. Only a destination directory that cannot be created or a
//! failed whole-document render fails the task.
//!
//! [`convert_batch`] and [`convert_files`] wrap the scheduler and the
//! aggregator for callers that just want a [`BatchReport`] at the end.

use crate::config::ConversionConfig;
use crate::error::{PageError, Pdf2ImgError};
use crate::pipeline::encode::{page_file_name, write_page};
use crate::pipeline::probe::{estimate_pages, probe_page_count};
use crate::pipeline::render::{PdfiumRenderer, RenderService};
use crate::pipeline::transform::transform;
use crate::progress::{BatchReport, ProgressAggregator, SharedObserver, DEFAULT_POLL_INTERVAL};
use crate::scheduler::TaskScheduler;
use crate::task::{
    ConversionJob, ConversionSummary, Document, Task, TaskEvents, TaskOutcome, TaskResult,
};
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Convert one document, emitting a page event per page.
///
/// Blocking. Returns [`TaskOutcome::Cancelled`] when cancellation was
/// observed before a page; files already written are left in place.
///
/// # Errors
/// Task-level failures only:
/// - destination directory cannot be created
/// - the page count is unknown and the whole-document render fails
pub fn run_conversion(
    job: &ConversionJob,
    renderer: &dyn RenderService,
    events: &TaskEvents,
) -> Result<TaskOutcome, Pdf2ImgError> {
    let start = Instant::now();
    let doc = &job.document;
    info!(
        "Converting {} → {}",
        doc.path.display(),
        job.destination.display()
    );

    std::fs::create_dir_all(&job.destination).map_err(|source| Pdf2ImgError::OutputDirFailed {
        path: job.destination.clone(),
        source,
    })?;

    let stem = doc.stem();
    let mut summary = ConversionSummary {
        document: doc.path.clone(),
        destination: job.destination.clone(),
        pages: 0,
        pages_written: 0,
        failures: Vec::new(),
        used_fallback: false,
    };

    let known = doc
        .page_count
        .filter(|&n| n > 0)
        .or_else(|| probe_page_count(renderer, &doc.path));

    match known {
        Some(total) => {
            summary.pages = total;
            for page in 1..=total {
                if events.is_cancelled() {
                    info!("{}: cancelled before page {}", stem, page);
                    return Ok(TaskOutcome::Cancelled);
                }
                let result = renderer
                    .render_page(&doc.path, page, job.config.dpi)
                    .map_err(|e| PageError::RenderFailed {
                        page,
                        detail: e.to_string(),
                    })
                    .and_then(|img| save_page(img, page, &stem, job));
                record_page(&mut summary, events, page, total, result);
            }
        }
        None => {
            if events.is_cancelled() {
                return Ok(TaskOutcome::Cancelled);
            }
            warn!(
                "Page count of {} unknown; rendering whole document",
                doc.path.display()
            );
            let images = renderer.render_all(&doc.path, job.config.dpi)?;
            let total = images.len();
            summary.pages = total;
            summary.used_fallback = true;
            for (idx, img) in images.into_iter().enumerate() {
                let page = idx + 1;
                if events.is_cancelled() {
                    info!("{}: cancelled before page {}", stem, page);
                    return Ok(TaskOutcome::Cancelled);
                }
                let result = save_page(img, page, &stem, job);
                record_page(&mut summary, events, page, total, result);
            }
        }
    }

    info!(
        "{}: {}/{} pages written in {}ms",
        stem,
        summary.pages_written,
        summary.pages,
        start.elapsed().as_millis()
    );
    Ok(TaskOutcome::Finished(TaskResult::Converted(summary)))
}

fn save_page(
    img: DynamicImage,
    page: usize,
    stem: &str,
    job: &ConversionJob,
) -> Result<(), PageError> {
    let cfg = &job.config;
    let img = transform(img, cfg.color_mode);
    let path = job.destination.join(page_file_name(stem, page, cfg.format));
    write_page(&img, cfg.color_mode, cfg.format, cfg.quality, &path, page)?;
    debug!("Wrote {}", path.display());
    Ok(())
}

fn record_page(
    summary: &mut ConversionSummary,
    events: &TaskEvents,
    page: usize,
    total: usize,
    result: Result<(), PageError>,
) {
    match result {
        Ok(()) => {
            summary.pages_written += 1;
            events.page_done(page, total);
        }
        Err(e) => {
            warn!("Skipping page {}/{}: {}", page, total, e);
            summary.failures.push(e.clone());
            events.page_skipped(page, total, e);
        }
    }
}

/// Run `tasks` on a pool of `concurrency` workers and wait for the report.
///
/// `observer`, when given, is notified as events are folded.
pub async fn convert_batch(
    tasks: Vec<Task>,
    renderer: Arc<dyn RenderService>,
    concurrency: usize,
    observer: Option<SharedObserver>,
) -> BatchReport {
    let mut aggregator = ProgressAggregator::for_batch(&tasks);
    if let Some(observer) = observer {
        aggregator = aggregator.with_observer(observer);
    }
    TaskScheduler::new(renderer, concurrency)
        .submit(tasks)
        .wait(aggregator, DEFAULT_POLL_INTERVAL)
        .await
}

/// Convert PDFs with pdfium into `{output_root}/{stem}/`.
///
/// Page counts are probed up front so progress has a total from the start.
pub async fn convert_files(
    paths: &[PathBuf],
    output_root: &Path,
    config: &ConversionConfig,
) -> Result<BatchReport, Pdf2ImgError> {
    let renderer: Arc<dyn RenderService> = Arc::new(PdfiumRenderer::new());
    let mut documents: Vec<Document> = paths.iter().cloned().map(Document::new).collect();

    let probe = renderer.clone();
    let documents = tokio::task::spawn_blocking(move || {
        let expected = estimate_pages(probe.as_ref(), &mut documents);
        info!("Estimated {} pages across {} documents", expected, documents.len());
        documents
    })
    .await
    .map_err(|e| Pdf2ImgError::Internal(format!("Probe task panicked: {}", e)))?;

    let tasks = documents
        .into_iter()
        .map(|doc| Task::Convert(ConversionJob::new(doc, output_root, config)))
        .collect();
    Ok(convert_batch(tasks, renderer, config.concurrency, None).await)
}

/// Synchronous wrapper around [`convert_files`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_files_sync(
    paths: &[PathBuf],
    output_root: &Path,
    config: &ConversionConfig,
) -> Result<BatchReport, Pdf2ImgError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Pdf2ImgError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert_files(paths, output_root, config))
}

/// Page count of a PDF, via pdfium, without rendering anything.
pub async fn inspect(pdf_path: impl AsRef<Path>) -> Result<usize, Pdf2ImgError> {
    let path = pdf_path.as_ref().to_path_buf();
    tokio::task::spawn_blocking(move || PdfiumRenderer::new().page_count(&path))
        .await
        .map_err(|e| Pdf2ImgError::Internal(format!("Inspect task panicked: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::config::{ColorMode, OutputFormat};
    use crate::progress::ProgressEvent;
    use crate::task::TaskId;
    use image::{Rgb, RgbImage};
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    /// Pages render as solid images; page `fail_page` errors; page
    /// `wide_page` is too wide for WebP; `count` of `None` makes the probe
    /// fail and the fallback render `fallback_pages` pages.
    #[derive(Default)]
    struct Fake {
        count: Option<usize>,
        fail_page: Option<usize>,
        wide_page: Option<usize>,
        fail_all: bool,
        fallback_pages: usize,
    }

    impl Fake {
        fn pages(n: usize) -> Self {
            Self {
                count: Some(n),
                ..Self::default()
            }
        }

        fn unknown(fallback_pages: usize) -> Self {
            Self {
                fallback_pages,
                ..Self::default()
            }
        }
    }

    impl RenderService for Fake {
        fn page_count(&self, p: &Path) -> Result<usize, Pdf2ImgError> {
            self.count.ok_or_else(|| Pdf2ImgError::CorruptPdf {
                path: p.to_path_buf(),
                detail: "no trailer".into(),
            })
        }
        fn render_page(&self, _: &Path, page: usize, _: u32) -> Result<DynamicImage, Pdf2ImgError> {
            if Some(page) == self.fail_page {
                return Err(Pdf2ImgError::RasterisationFailed {
                    page,
                    detail: "bad glyph".into(),
                });
            }
            let width = if Some(page) == self.wide_page { 16_400 } else { 8 };
            Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(
                width,
                10,
                Rgb([200, 30, 30]),
            )))
        }
        fn render_all(&self, p: &Path, dpi: u32) -> Result<Vec<DynamicImage>, Pdf2ImgError> {
            if self.fail_all {
                return Err(Pdf2ImgError::CorruptPdf {
                    path: p.to_path_buf(),
                    detail: "unreadable".into(),
                });
            }
            (1..=self.fallback_pages)
                .map(|n| self.render_page(p, n, dpi))
                .collect()
        }
    }

    fn job(out: &Path, format: OutputFormat) -> ConversionJob {
        let cfg = ConversionConfig::builder()
            .format(format)
            .color_mode(ColorMode::ThresholdBw)
            .build()
            .unwrap();
        ConversionJob::new(Document::new("/in/Scan #7.pdf"), out, &cfg)
    }

    fn events() -> (TaskEvents, UnboundedReceiver<ProgressEvent>, CancellationToken) {
        let (tx, rx) = unbounded_channel();
        let cancel = CancellationToken::new();
        (TaskEvents::new(TaskId(0), tx, cancel.clone()), rx, cancel)
    }

    fn collect(mut rx: UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut out = Vec::new();
        while let Ok(e) = rx.try_recv() {
            out.push(e);
        }
        out
    }

    #[test]
    fn known_count_writes_every_page_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let (ev, rx, _) = events();
        let fake = Fake::pages(3);
        let job = job(dir.path(), OutputFormat::Png);

        let outcome = run_conversion(&job, &fake, &ev).unwrap();
        let TaskOutcome::Finished(TaskResult::Converted(summary)) = outcome else {
            panic!("unexpected outcome");
        };
        assert_eq!(summary.pages, 3);
        assert_eq!(summary.pages_written, 3);
        assert!(!summary.used_fallback);

        for p in 1..=3 {
            assert!(dir.path().join("Scan 7").join(format!("Scan 7_{p}.png")).is_file());
        }
        drop(ev);
        let pages: Vec<usize> = collect(rx)
            .into_iter()
            .map(|e| match e {
                ProgressEvent::PageDone { page_index, pages_total: 3, .. } => page_index,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(pages, vec![1, 2, 3]);
    }

    #[test]
    fn failed_page_is_skipped_and_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let (ev, rx, _) = events();
        let fake = Fake {
            fail_page: Some(2),
            ..Fake::pages(3)
        };

        let outcome = run_conversion(&job(dir.path(), OutputFormat::Jpeg), &fake, &ev).unwrap();
        let TaskOutcome::Finished(TaskResult::Converted(summary)) = outcome else {
            panic!("unexpected outcome");
        };
        assert_eq!(summary.pages_written, 2);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].page(), 2);
        assert!(!dir.path().join("Scan 7/Scan 7_2.jpeg").exists());

        drop(ev);
        let events = collect(rx);
        assert_eq!(events.len(), 3);
        assert!(matches!(events[1], ProgressEvent::PageSkipped { page_index: 2, .. }));
    }

    #[test]
    fn unknown_count_falls_back_to_whole_document() {
        let dir = tempfile::tempdir().unwrap();
        let (ev, _rx, _) = events();
        let fake = Fake::unknown(2);

        let outcome = run_conversion(&job(dir.path(), OutputFormat::Webp), &fake, &ev).unwrap();
        let TaskOutcome::Finished(TaskResult::Converted(summary)) = outcome else {
            panic!("unexpected outcome");
        };
        assert!(summary.used_fallback);
        assert_eq!(summary.pages, 2);
        assert!(dir.path().join("Scan 7/Scan 7_2.webp").is_file());
    }

    #[test]
    fn failed_fallback_render_fails_the_task() {
        let dir = tempfile::tempdir().unwrap();
        let (ev, _rx, _) = events();
        let fake = Fake {
            fail_all: true,
            ..Fake::unknown(2)
        };
        let err = run_conversion(&job(dir.path(), OutputFormat::Png), &fake, &ev).unwrap_err();
        assert!(matches!(err, Pdf2ImgError::CorruptPdf { .. }));
    }

    #[test]
    fn unwritable_destination_fails_the_task() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let (ev, _rx, _) = events();
        let fake = Fake::pages(1);
        let err = run_conversion(&job(&blocker, OutputFormat::Png), &fake, &ev).unwrap_err();
        assert!(matches!(err, Pdf2ImgError::OutputDirFailed { .. }));
    }

    #[test]
    fn cancelled_before_first_page_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (ev, rx, cancel) = events();
        cancel.cancel();
        let fake = Fake::pages(4);
        let outcome = run_conversion(&job(dir.path(), OutputFormat::Png), &fake, &ev).unwrap();
        assert_eq!(outcome, TaskOutcome::Cancelled);
        assert_eq!(std::fs::read_dir(dir.path().join("Scan 7")).unwrap().count(), 0);
        drop(ev);
        assert!(collect(rx).is_empty());
    }

    #[test]
    fn empty_fallback_render_is_a_zero_page_success() {
        let dir = tempfile::tempdir().unwrap();
        let (ev, rx, _) = events();
        let fake = Fake::unknown(0);

        let outcome = run_conversion(&job(dir.path(), OutputFormat::Png), &fake, &ev).unwrap();
        let TaskOutcome::Finished(TaskResult::Converted(summary)) = outcome else {
            panic!("unexpected outcome");
        };
        assert!(summary.used_fallback);
        assert_eq!(summary.pages, 0);
        assert_eq!(summary.pages_written, 0);
        assert!(summary.failures.is_empty());

        drop(ev);
        assert!(collect(rx).is_empty());
    }

    #[test]
    fn oversize_webp_page_is_skipped_and_later_pages_written() {
        let dir = tempfile::tempdir().unwrap();
        let (ev, rx, _) = events();
        let fake = Fake {
            wide_page: Some(1),
            ..Fake::pages(2)
        };
        let mut job = job(dir.path(), OutputFormat::Webp);
        job.config.color_mode = ColorMode::Grayscale;

        let outcome = run_conversion(&job, &fake, &ev).unwrap();
        let TaskOutcome::Finished(TaskResult::Converted(summary)) = outcome else {
            panic!("unexpected outcome");
        };
        assert_eq!(summary.pages_written, 1);
        assert!(matches!(summary.failures[..], [PageError::EncodeFailed { page: 1, .. }]));
        assert!(!dir.path().join("Scan 7/Scan 7_1.webp").exists());
        assert!(dir.path().join("Scan 7/Scan 7_2.webp").is_file());

        drop(ev);
        let events = collect(rx);
        assert!(matches!(events[0], ProgressEvent::PageSkipped { page_index: 1, .. }));
        assert!(matches!(events[1], ProgressEvent::PageDone { page_index: 2, .. }));
    }

    #[test]
    fn sync_wrapper_reports_unreadable_document_as_failed_task() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.pdf");
        let report = convert_files_sync(&[missing], dir.path(), &ConversionConfig::default())
            .expect("runtime starts");
        assert_eq!(report.outcome, crate::progress::BatchOutcome::Completed);
        assert_eq!(report.progress.tasks_failed, 1);
        assert_eq!(report.progress.completed_pages, 0);
    }
}
