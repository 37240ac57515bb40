//! # edgequake-pdf2img
//!
//! Convert PDF documents into one image per page, and assemble folders of
//! images back into a PDF, across many documents at once with live progress
//! and cooperative cancellation.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF ──┬─ 1. Probe      page count (failure → whole-document fallback)
//!       ├─ 2. Render     rasterise page p via pdfium at the configured DPI
//!       ├─ 3. Transform  truecolor / grayscale / hard B&W threshold at 128
//!       ├─ 4. Encode     JPEG · lossy WebP · PNG (1-bit for B&W)
//!       └─ 5. Write      {out}/{stem}/{stem}_{p}.{ext}, emit PageDone
//!
//! Folder ── list images → sort by last number → RGB → fit width → {folder}/{name}.pdf
//! ```
//!
//! Tasks run on a bounded pool ([`TaskScheduler`]); each sends
//! [`ProgressEvent`]s into one channel drained by a [`ProgressAggregator`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdf2img::{convert_files, ConversionConfig, OutputFormat};
//! use std::path::{Path, PathBuf};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConversionConfig::builder()
//!         .dpi(150)
//!         .format(OutputFormat::Png)
//!         .build()?;
//!     let inputs = [PathBuf::from("report.pdf")];
//!     let report = convert_files(&inputs, Path::new("out"), &config).await?;
//!     eprintln!("{}/{} pages", report.progress.completed_pages, report.progress.expected_pages);
//!     Ok(())
//! }
//! ```
//!
//! ## Driving a batch yourself
//!
//! ```rust,no_run
//! use edgequake_pdf2img::*;
//! use std::sync::Arc;
//! use std::path::Path;
//!
//! # async fn run() {
//! let renderer: Arc<dyn RenderService> = Arc::new(PdfiumRenderer::new());
//! let cfg = ConversionConfig::default();
//! let tasks = vec![
//!     Task::Convert(ConversionJob::new(Document::new("a.pdf"), Path::new("out"), &cfg)),
//!     Task::Assemble(AssemblyJob::new("scans/book", &AssemblyConfig::default())),
//! ];
//! let aggregator = ProgressAggregator::for_batch(&tasks);
//! let handle = TaskScheduler::new(renderer, cfg.concurrency).submit(tasks);
//! let cancel = handle.cancel_token(); // cancel.cancel() from anywhere
//! let report = handle.wait(aggregator, DEFAULT_POLL_INTERVAL).await;
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2img` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! pdfium is loaded at runtime: set `PDFIUM_LIB_PATH` to a library file or
//! directory, or install it where the system loader finds it.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod assemble;
pub mod cancel;
pub mod config;
pub mod convert;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod scheduler;
pub mod settings;
pub mod task;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use assemble::{assemble_folder, list_images, page_sort_key};
pub use cancel::CancellationToken;
pub use config::{
    AssemblyConfig, AssemblyConfigBuilder, ColorMode, ConversionConfig, ConversionConfigBuilder,
    OutputFormat,
};
pub use convert::{convert_batch, convert_files, convert_files_sync, inspect, run_conversion};
pub use error::{PageError, Pdf2ImgError};
pub use pipeline::probe::{estimate_pages, probe_page_count};
pub use pipeline::render::{PdfiumRenderer, RenderService};
pub use progress::{
    BatchOutcome, BatchReport, GlobalProgress, NoopProgressObserver, ProgressAggregator,
    ProgressEvent, ProgressObserver, SharedObserver, TaskProgress, TaskState,
    DEFAULT_POLL_INTERVAL,
};
pub use scheduler::{BatchHandle, TaskScheduler};
pub use settings::Settings;
pub use task::{
    safe_name, AssemblyJob, AssemblySummary, ConversionJob, ConversionSummary, Document, Task,
    TaskId, TaskOutcome, TaskResult,
};
