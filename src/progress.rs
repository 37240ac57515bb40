//! Progress events, the aggregator that folds them, and an observer hook.
//!
//! Workers never touch shared counters. Each task sends [`ProgressEvent`]s
//! into one unbounded channel; a single [`ProgressAggregator`] drains that
//! channel on a fixed cadence and owns the [`GlobalProgress`] snapshot read
//! by the presentation layer.
//!
//! # Expected pages ratchet
//!
//! `expected_pages` starts as the sum of the page counts known before the
//! batch starts. Documents whose count was unknown still produce page events,
//! so after every page the aggregator raises `expected_pages` to at least
//! `completed_pages`. The displayed total may grow during a run but never
//! falls behind what is already done.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdf2img::{ProgressObserver, GlobalProgress, TaskId};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct PageCounter(AtomicUsize);
//!
//! impl ProgressObserver for PageCounter {
//!     fn on_page(&self, _task: TaskId, _page: usize, _total: usize, progress: &GlobalProgress) {
//!         self.0.store(progress.completed_pages, Ordering::Relaxed);
//!     }
//! }
//! ```

use crate::error::PageError;
use crate::task::{Task, TaskId, TaskResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// How often [`ProgressAggregator::run`] drains the channel by default.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(150);

/// One message on the batch event channel.
///
/// Events of one task arrive in the order the task sent them. Events of
/// different tasks interleave arbitrarily.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    TaskStarted {
        task_id: TaskId,
        label: String,
    },
    /// Page `page_index` (1-indexed) of `pages_total` was written.
    PageDone {
        task_id: TaskId,
        page_index: usize,
        pages_total: usize,
    },
    /// Page `page_index` failed and was skipped. Still counts as progress.
    PageSkipped {
        task_id: TaskId,
        page_index: usize,
        pages_total: usize,
        error: PageError,
    },
    TaskDone {
        task_id: TaskId,
        result: TaskResult,
    },
    TaskFailed {
        task_id: TaskId,
        error: String,
    },
    /// Every task resolved. Always the last event of an uncancelled batch.
    BatchDone,
    /// The batch was cancelled; `not_started` tasks never ran.
    /// Always the last event of a cancelled batch.
    Cancelled {
        not_started: usize,
    },
}

impl ProgressEvent {
    /// Whether this event ends the batch stream.
    pub fn is_batch_terminal(&self) -> bool {
        matches!(self, ProgressEvent::BatchDone | ProgressEvent::Cancelled { .. })
    }

    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            ProgressEvent::TaskStarted { task_id, .. }
            | ProgressEvent::PageDone { task_id, .. }
            | ProgressEvent::PageSkipped { task_id, .. }
            | ProgressEvent::TaskDone { task_id, .. }
            | ProgressEvent::TaskFailed { task_id, .. } => Some(*task_id),
            ProgressEvent::BatchDone | ProgressEvent::Cancelled { .. } => None,
        }
    }
}

/// Batch-wide counters.
///
/// Invariant: `completed_pages <= expected_pages` after every update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalProgress {
    /// Pages written or skipped so far.
    pub completed_pages: usize,
    pub expected_pages: usize,
    pub tasks_total: usize,
    /// Tasks that finished successfully.
    pub tasks_done: usize,
    pub tasks_failed: usize,
}

impl GlobalProgress {
    /// Completed fraction in `0.0..=1.0`; `0.0` while nothing is expected.
    pub fn fraction(&self) -> f64 {
        if self.expected_pages == 0 {
            0.0
        } else {
            self.completed_pages as f64 / self.expected_pages as f64
        }
    }

    /// Tasks that reached a terminal state.
    pub fn tasks_resolved(&self) -> usize {
        self.tasks_done + self.tasks_failed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

/// What the aggregator knows about one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub task_id: TaskId,
    pub label: String,
    pub state: TaskState,
    pub pages_done: usize,
    pub pages_skipped: usize,
    /// Known page count; updated from page events.
    pub pages_total: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    /// Task-level error text, verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskProgress {
    fn queued(task_id: TaskId, label: String, pages_total: Option<usize>) -> Self {
        Self {
            task_id,
            label,
            state: TaskState::Queued,
            pages_done: 0,
            pages_skipped: 0,
            pages_total,
            result: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BatchOutcome {
    Completed,
    Cancelled { not_started: usize },
    /// The channel closed without a terminal event.
    Interrupted,
}

/// Final state of a batch after its event stream closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub progress: GlobalProgress,
    pub tasks: Vec<TaskProgress>,
    pub outcome: BatchOutcome,
}

impl BatchReport {
    pub fn failed(&self) -> impl Iterator<Item = &TaskProgress> {
        self.tasks.iter().filter(|t| t.state == TaskState::Failed)
    }

    pub fn is_success(&self) -> bool {
        self.outcome == BatchOutcome::Completed && self.progress.tasks_failed == 0
    }
}

/// Notified from the consumer side for every folded event.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Calls come from whichever task drives the
/// aggregator, never from worker threads.
pub trait ProgressObserver: Send + Sync {
    fn on_task_started(&self, task_id: TaskId, label: &str) {
        let _ = (task_id, label);
    }

    /// Called after a page was written and the counters were updated.
    fn on_page(
        &self,
        task_id: TaskId,
        page_index: usize,
        pages_total: usize,
        progress: &GlobalProgress,
    ) {
        let _ = (task_id, page_index, pages_total, progress);
    }

    fn on_page_skipped(&self, task_id: TaskId, error: &PageError, progress: &GlobalProgress) {
        let _ = (task_id, error, progress);
    }

    fn on_task_done(&self, task_id: TaskId, result: &TaskResult) {
        let _ = (task_id, result);
    }

    fn on_task_failed(&self, task_id: TaskId, error: &str) {
        let _ = (task_id, error);
    }

    fn on_batch_done(&self, progress: &GlobalProgress) {
        let _ = progress;
    }

    fn on_cancelled(&self, not_started: usize, progress: &GlobalProgress) {
        let _ = (not_started, progress);
    }
}

/// Observer that ignores everything.
pub struct NoopProgressObserver;

impl ProgressObserver for NoopProgressObserver {}

pub type SharedObserver = Arc<dyn ProgressObserver>;

/// Sole consumer of a batch's event channel.
#[derive(Default)]
pub struct ProgressAggregator {
    progress: GlobalProgress,
    tasks: BTreeMap<TaskId, TaskProgress>,
    outcome: Option<BatchOutcome>,
    observer: Option<SharedObserver>,
}

impl std::fmt::Debug for ProgressAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressAggregator")
            .field("progress", &self.progress)
            .field("tasks", &self.tasks.len())
            .field("outcome", &self.outcome)
            .finish()
    }
}

impl ProgressAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every task as queued and seed `expected_pages` with the sum
    /// of the page counts already known.
    pub fn for_batch(tasks: &[Task]) -> Self {
        let mut agg = Self::new();
        for (idx, task) in tasks.iter().enumerate() {
            let id = TaskId(idx);
            agg.tasks
                .insert(id, TaskProgress::queued(id, task.label(), task.expected_pages()));
        }
        agg.progress.tasks_total = tasks.len();
        agg.progress.expected_pages = tasks.iter().filter_map(Task::expected_pages).sum();
        agg
    }

    pub fn with_observer(mut self, observer: SharedObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn progress(&self) -> &GlobalProgress {
        &self.progress
    }

    pub fn task(&self, id: TaskId) -> Option<&TaskProgress> {
        self.tasks.get(&id)
    }

    /// Whether a terminal batch event has been folded.
    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    fn entry(&mut self, id: TaskId) -> &mut TaskProgress {
        let tasks_total = &mut self.progress.tasks_total;
        self.tasks.entry(id).or_insert_with(|| {
            *tasks_total += 1;
            TaskProgress::queued(id, String::new(), None)
        })
    }

    fn count_page(&mut self) {
        self.progress.completed_pages += 1;
        self.progress.expected_pages = self
            .progress
            .expected_pages
            .max(self.progress.completed_pages);
    }

    /// Fold one event into the counters.
    pub fn apply(&mut self, event: ProgressEvent) {
        match event {
            ProgressEvent::TaskStarted { task_id, label } => {
                let t = self.entry(task_id);
                t.state = TaskState::Running;
                if t.label.is_empty() {
                    t.label = label.clone();
                }
                if let Some(obs) = &self.observer {
                    obs.on_task_started(task_id, &label);
                }
            }
            ProgressEvent::PageDone {
                task_id,
                page_index,
                pages_total,
            } => {
                let t = self.entry(task_id);
                t.pages_done += 1;
                t.pages_total = Some(pages_total);
                self.count_page();
                if let Some(obs) = &self.observer {
                    obs.on_page(task_id, page_index, pages_total, &self.progress);
                }
            }
            ProgressEvent::PageSkipped {
                task_id,
                pages_total,
                error,
                ..
            } => {
                let t = self.entry(task_id);
                t.pages_skipped += 1;
                t.pages_total = Some(pages_total);
                self.count_page();
                if let Some(obs) = &self.observer {
                    obs.on_page_skipped(task_id, &error, &self.progress);
                }
            }
            ProgressEvent::TaskDone { task_id, result } => {
                let t = self.entry(task_id);
                t.state = TaskState::Succeeded;
                if let TaskResult::Converted(summary) = &result {
                    t.pages_total = Some(summary.pages);
                }
                t.result = Some(result.clone());
                self.progress.tasks_done += 1;
                if let Some(obs) = &self.observer {
                    obs.on_task_done(task_id, &result);
                }
            }
            ProgressEvent::TaskFailed { task_id, error } => {
                let t = self.entry(task_id);
                t.state = TaskState::Failed;
                t.error = Some(error.clone());
                self.progress.tasks_failed += 1;
                if let Some(obs) = &self.observer {
                    obs.on_task_failed(task_id, &error);
                }
            }
            ProgressEvent::BatchDone => {
                self.outcome = Some(BatchOutcome::Completed);
                if let Some(obs) = &self.observer {
                    obs.on_batch_done(&self.progress);
                }
            }
            ProgressEvent::Cancelled { not_started } => {
                for t in self.tasks.values_mut() {
                    if matches!(t.state, TaskState::Queued | TaskState::Running) {
                        t.state = TaskState::Cancelled;
                    }
                }
                self.outcome = Some(BatchOutcome::Cancelled { not_started });
                if let Some(obs) = &self.observer {
                    obs.on_cancelled(not_started, &self.progress);
                }
            }
        }
        debug_assert!(self.progress.completed_pages <= self.progress.expected_pages);
    }

    /// Fold every event currently buffered, without waiting.
    ///
    /// Returns `true` once the channel is closed and empty.
    pub fn drain(&mut self, rx: &mut UnboundedReceiver<ProgressEvent>) -> bool {
        loop {
            match rx.try_recv() {
                Ok(event) => self.apply(event),
                Err(TryRecvError::Empty) => return false,
                Err(TryRecvError::Disconnected) => return true,
            }
        }
    }

    /// Drain `rx` every `cadence` until it closes, then report.
    pub async fn run(
        mut self,
        mut rx: UnboundedReceiver<ProgressEvent>,
        cadence: Duration,
    ) -> BatchReport {
        let mut ticker = tokio::time::interval(cadence);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if self.drain(&mut rx) {
                break;
            }
        }
        debug!("Event stream closed: {:?}", self.progress);
        self.into_report()
    }

    pub fn into_report(self) -> BatchReport {
        let outcome = self.outcome.unwrap_or_else(|| {
            warn!("Event stream ended without a terminal event");
            BatchOutcome::Interrupted
        });
        BatchReport {
            progress: self.progress,
            tasks: self.tasks.into_values().collect(),
            outcome,
        }
    }
}
