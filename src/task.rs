//! Task model: what a batch is made of and what each task produces.
//!
//! A [`Task`] owns everything it needs (document path, destination, a copy of
//! its config) so it can be moved onto a worker thread and run without
//! touching shared state. The only thing it shares is the [`TaskEvents`]
//! emitter, which sends into the batch's event channel.

use crate::cancel::CancellationToken;
use crate::config::{AssemblyConfig, ConversionConfig};
use crate::error::{PageError, Pdf2ImgError};
use crate::pipeline::render::RenderService;
use crate::progress::ProgressEvent;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::UnboundedSender;

/// Longest sanitized file stem, in characters.
pub const MAX_STEM_CHARS: usize = 200;

/// Stem used when sanitizing leaves nothing.
pub const FALLBACK_STEM: &str = "document";

/// Position of a task in its submitted batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub usize);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A PDF to convert, with its page count once known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub path: PathBuf,
    /// `None` until probed. A pre-resolved count skips the probe in the worker.
    pub page_count: Option<usize>,
}

impl Document {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            page_count: None,
        }
    }

    /// Sanitized file stem used for the destination folder and page files.
    pub fn stem(&self) -> String {
        let raw = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        safe_name(&raw)
    }
}

/// Make `name` safe to use as a file or directory name.
///
/// Keeps Unicode alphanumerics plus space, `.`, `_` and `-`; drops everything
/// else; trims surrounding whitespace; truncates to [`MAX_STEM_CHARS`]
/// characters. An empty result becomes [`FALLBACK_STEM`].
pub fn safe_name(name: &str) -> String {
    let kept: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '.' | '_' | '-'))
        .collect();
    let out: String = kept.trim().chars().take(MAX_STEM_CHARS).collect();
    if out.is_empty() {
        FALLBACK_STEM.to_string()
    } else {
        out
    }
}

/// Convert one PDF into `{destination}/{stem}_{page}.{ext}` files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionJob {
    pub document: Document,
    pub destination: PathBuf,
    pub config: ConversionConfig,
}

impl ConversionJob {
    /// Job writing into `{output_root}/{sanitized stem}`.
    ///
    /// `config` is copied; later changes to the caller's value do not reach
    /// the job.
    pub fn new(document: Document, output_root: &Path, config: &ConversionConfig) -> Self {
        let destination = output_root.join(document.stem());
        Self {
            document,
            destination,
            config: *config,
        }
    }
}

/// Assemble every image in `folder` into `{folder}/{folder name}.pdf`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyJob {
    pub folder: PathBuf,
    pub config: AssemblyConfig,
}

impl AssemblyJob {
    pub fn new(folder: impl Into<PathBuf>, config: &AssemblyConfig) -> Self {
        Self {
            folder: folder.into(),
            config: *config,
        }
    }
}

/// A unit of work submitted to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    Convert(ConversionJob),
    Assemble(AssemblyJob),
}

impl Task {
    /// Short human-readable name (file or folder name).
    pub fn label(&self) -> String {
        let path = match self {
            Task::Convert(job) => &job.document.path,
            Task::Assemble(job) => &job.folder,
        };
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string())
    }

    /// Pages this task is known to produce up front, if any.
    pub fn expected_pages(&self) -> Option<usize> {
        match self {
            Task::Convert(job) => job.document.page_count,
            Task::Assemble(_) => None,
        }
    }

    /// Run to completion on the current (blocking) thread.
    pub fn run(
        &self,
        renderer: &dyn RenderService,
        events: &TaskEvents,
    ) -> Result<TaskOutcome, Pdf2ImgError> {
        match self {
            Task::Convert(job) => crate::convert::run_conversion(job, renderer, events),
            Task::Assemble(job) => crate::assemble::assemble_folder(job, events.cancel_token()),
        }
    }
}

/// What a finished conversion produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionSummary {
    pub document: PathBuf,
    pub destination: PathBuf,
    /// Pages attempted (the resolved page count).
    pub pages: usize,
    /// Pages whose file was written.
    pub pages_written: usize,
    /// Pages that were skipped, in page order.
    pub failures: Vec<PageError>,
    /// Whether the whole-document fallback render was used.
    pub used_fallback: bool,
}

/// What a finished folder assembly produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblySummary {
    pub output: PathBuf,
    /// Number of images embedded.
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskResult {
    Converted(ConversionSummary),
    Assembled(AssemblySummary),
}

/// How a task body ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Finished(TaskResult),
    /// Stopped at a page boundary after cancellation.
    Cancelled,
}

/// Per-task handle for emitting progress into the batch channel.
///
/// Once the batch is cancelled every send is dropped, so the final
/// `Cancelled` marker is the only event a consumer sees afterwards.
#[derive(Debug, Clone)]
pub struct TaskEvents {
    task_id: TaskId,
    tx: UnboundedSender<ProgressEvent>,
    cancel: CancellationToken,
}

impl TaskEvents {
    pub fn new(
        task_id: TaskId,
        tx: UnboundedSender<ProgressEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            task_id,
            tx,
            cancel,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn page_done(&self, page_index: usize, pages_total: usize) {
        self.send(ProgressEvent::PageDone {
            task_id: self.task_id,
            page_index,
            pages_total,
        });
    }

    pub fn page_skipped(&self, page_index: usize, pages_total: usize, error: PageError) {
        self.send(ProgressEvent::PageSkipped {
            task_id: self.task_id,
            page_index,
            pages_total,
            error,
        });
    }

    pub(crate) fn send(&self, event: ProgressEvent) {
        if self.cancel.is_cancelled() {
            return;
        }
        // A closed receiver means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_name_filters_and_trims() {
        assert_eq!(safe_name("  Informe: 2024/Q1*  "), "Informe 2024Q1");
        assert_eq!(safe_name("año_fiscal-v1.2"), "año_fiscal-v1.2");
        assert_eq!(safe_name("???"), FALLBACK_STEM);
        assert_eq!(safe_name(""), FALLBACK_STEM);
    }

    #[test]
    fn safe_name_truncates_by_chars() {
        let long = "é".repeat(250);
        let out = safe_name(&long);
        assert_eq!(out.chars().count(), MAX_STEM_CHARS);
    }

    #[test]
    fn job_destination_uses_sanitized_stem() {
        let doc = Document::new("/in/My Report (final).pdf");
        let job = ConversionJob::new(doc, Path::new("/out"), &ConversionConfig::default());
        assert_eq!(job.destination, PathBuf::from("/out/My Report final"));
    }

    #[test]
    fn labels_and_expected_pages() {
        let convert = Task::Convert(ConversionJob::new(
            Document {
                path: PathBuf::from("/in/a.pdf"),
                page_count: Some(4),
            },
            Path::new("/out"),
            &ConversionConfig::default(),
        ));
        assert_eq!(convert.label(), "a.pdf");
        assert_eq!(convert.expected_pages(), Some(4));

        let assemble = Task::Assemble(AssemblyJob::new("/scans/book", &AssemblyConfig::default()));
        assert_eq!(assemble.label(), "book");
        assert_eq!(assemble.expected_pages(), None);
    }

    #[test]
    fn events_are_dropped_after_cancel() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let events = TaskEvents::new(TaskId(3), tx, cancel.clone());

        events.page_done(1, 2);
        cancel.cancel();
        events.page_done(2, 2);
        drop(events);

        let first = rx.try_recv().expect("first event");
        assert_eq!(
            first,
            ProgressEvent::PageDone {
                task_id: TaskId(3),
                page_index: 1,
                pages_total: 2
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn task_result_is_tagged() {
        let r = TaskResult::Assembled(AssemblySummary {
            output: PathBuf::from("/scans/book/book.pdf"),
            count: 12,
        });
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["kind"], "assembled");
        assert_eq!(json["count"], 12);
    }
}
