//! Bounded worker pool that runs a batch of tasks and fans their events in.
//!
//! ```text
//!                 ┌─ slot 1: spawn_blocking(task) ─┐
//! tasks ─▶ queue ─┼─ slot 2: spawn_blocking(task) ─┼─▶ unbounded mpsc ─▶ aggregator
//!                 └─ slot n: …                    ─┘
//! ```
//!
//! Slots are `buffer_unordered(n)` over the task futures, so tasks start in
//! submission order and at most `n` run at once. Each task body runs on the
//! blocking pool because pdfium and the codecs are synchronous.
//!
//! The last event of every batch is either `BatchDone` (all tasks resolved)
//! or `Cancelled { not_started }`. After cancellation no other event is sent.

use crate::cancel::CancellationToken;
use crate::pipeline::render::RenderService;
use crate::progress::{BatchReport, ProgressAggregator, ProgressEvent};
use crate::task::{Task, TaskEvents, TaskId, TaskOutcome};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};

/// Runs batches of tasks on a fixed number of worker slots.
#[derive(Clone)]
pub struct TaskScheduler {
    renderer: Arc<dyn RenderService>,
    concurrency: usize,
}

impl TaskScheduler {
    /// A scheduler with `max(concurrency, 1)` slots.
    pub fn new(renderer: Arc<dyn RenderService>, concurrency: usize) -> Self {
        Self {
            renderer,
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Start running `tasks` in the background.
    ///
    /// Task `i` of `tasks` reports as `TaskId(i)`. Must be called from within
    /// a Tokio runtime.
    pub fn submit(&self, tasks: Vec<Task>) -> BatchHandle {
        let (tx, rx) = unbounded_channel();
        let cancel = CancellationToken::new();
        info!(
            "Submitting {} tasks on {} worker slots",
            tasks.len(),
            self.concurrency
        );
        let driver = tokio::spawn(drive(
            tasks,
            self.renderer.clone(),
            self.concurrency,
            tx,
            cancel.clone(),
        ));
        BatchHandle {
            events: rx,
            cancel,
            driver,
        }
    }
}

/// A running batch: its event stream and its cancel switch.
pub struct BatchHandle {
    events: UnboundedReceiver<ProgressEvent>,
    cancel: CancellationToken,
    driver: JoinHandle<()>,
}

impl BatchHandle {
    /// Stop the batch cooperatively. Running tasks finish their current page.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A token that cancels this batch, e.g. from a signal handler.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn events_mut(&mut self) -> &mut UnboundedReceiver<ProgressEvent> {
        &mut self.events
    }

    /// The event stream on its own. The batch keeps running in the background.
    pub fn into_stream(self) -> UnboundedReceiverStream<ProgressEvent> {
        UnboundedReceiverStream::new(self.events)
    }

    /// Fold every event into `aggregator`, polling every `cadence`, and wait
    /// for the pool to wind down.
    pub async fn wait(self, aggregator: ProgressAggregator, cadence: Duration) -> BatchReport {
        let report = aggregator.run(self.events, cadence).await;
        if let Err(e) = self.driver.await {
            error!("Batch driver failed: {}", e);
        }
        report
    }
}

async fn drive(
    tasks: Vec<Task>,
    renderer: Arc<dyn RenderService>,
    concurrency: usize,
    tx: UnboundedSender<ProgressEvent>,
    cancel: CancellationToken,
) {
    let started: Vec<bool> = stream::iter(tasks.into_iter().enumerate())
        .map(|(idx, task)| {
            run_slot(
                TaskId(idx),
                task,
                renderer.clone(),
                tx.clone(),
                cancel.clone(),
            )
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;

    let final_event = if cancel.is_cancelled() {
        let not_started = started.iter().filter(|s| !**s).count();
        info!("Batch cancelled; {} tasks never started", not_started);
        ProgressEvent::Cancelled { not_started }
    } else {
        info!("Batch finished: {} tasks", started.len());
        ProgressEvent::BatchDone
    };
    let _ = tx.send(final_event);
}

/// Run one task in a worker slot. Returns whether the task started.
async fn run_slot(
    task_id: TaskId,
    task: Task,
    renderer: Arc<dyn RenderService>,
    tx: UnboundedSender<ProgressEvent>,
    cancel: CancellationToken,
) -> bool {
    if cancel.is_cancelled() {
        debug!("Task {} dropped before start", task_id);
        return false;
    }

    let label = task.label();
    let events = TaskEvents::new(task_id, tx, cancel);
    events.send(ProgressEvent::TaskStarted {
        task_id,
        label: label.clone(),
    });

    let worker_events = events.clone();
    let joined =
        tokio::task::spawn_blocking(move || task.run(renderer.as_ref(), &worker_events)).await;

    match joined {
        Ok(Ok(TaskOutcome::Finished(result))) => {
            info!("Task {} ({}) done", task_id, label);
            events.send(ProgressEvent::TaskDone { task_id, result });
        }
        Ok(Ok(TaskOutcome::Cancelled)) => {
            info!("Task {} ({}) stopped by cancellation", task_id, label);
        }
        Ok(Err(e)) => {
            warn!("Task {} ({}) failed: {}", task_id, label, e);
            events.send(ProgressEvent::TaskFailed {
                task_id,
                error: e.to_string(),
            });
        }
        Err(join_err) => {
            error!("Task {} ({}) panicked: {}", task_id, label, join_err);
            events.send(ProgressEvent::TaskFailed {
                task_id,
                error: format!("worker panicked: {}", join_err),
            });
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConversionConfig;
    use crate::error::Pdf2ImgError;
    use crate::task::{ConversionJob, Document};
    use image::DynamicImage;
    use std::path::Path;

    struct Panics;

    impl RenderService for Panics {
        fn page_count(&self, _: &Path) -> Result<usize, Pdf2ImgError> {
            Ok(1)
        }
        fn render_page(&self, p: &Path, _: usize, _: u32) -> Result<DynamicImage, Pdf2ImgError> {
            if p.ends_with("bad.pdf") {
                panic!("renderer exploded");
            }
            Ok(DynamicImage::new_luma8(2, 2))
        }
        fn render_all(&self, _: &Path, _: u32) -> Result<Vec<DynamicImage>, Pdf2ImgError> {
            Ok(vec![])
        }
    }

    #[test]
    fn concurrency_has_a_floor_of_one() {
        assert_eq!(TaskScheduler::new(Arc::new(Panics), 0).concurrency(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn panicking_worker_fails_only_its_task() {
        let out = tempfile::tempdir().unwrap();
        let cfg = ConversionConfig::default();
        let tasks = vec![
            Task::Convert(ConversionJob::new(Document::new("/in/bad.pdf"), out.path(), &cfg)),
            Task::Convert(ConversionJob::new(Document::new("/in/good.pdf"), out.path(), &cfg)),
        ];
        let agg = ProgressAggregator::for_batch(&tasks);
        let report = TaskScheduler::new(Arc::new(Panics), 2)
            .submit(tasks)
            .wait(agg, Duration::from_millis(10))
            .await;

        assert_eq!(report.progress.tasks_failed, 1);
        assert_eq!(report.progress.tasks_done, 1);
        let failed: Vec<_> = report.failed().collect();
        assert_eq!(failed[0].task_id, TaskId(0));
        assert!(failed[0].error.as_deref().unwrap().starts_with("worker panicked"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn event_stream_ends_with_the_terminal_event() {
        let out = tempfile::tempdir().unwrap();
        let cfg = ConversionConfig::default();
        let tasks = vec![Task::Convert(ConversionJob::new(
            Document::new("/in/good.pdf"),
            out.path(),
            &cfg,
        ))];
        let events: Vec<ProgressEvent> = TaskScheduler::new(Arc::new(Panics), 1)
            .submit(tasks)
            .into_stream()
            .collect()
            .await;

        let terminals: Vec<_> = events.iter().filter(|e| e.is_batch_terminal()).collect();
        assert_eq!(terminals, vec![&ProgressEvent::BatchDone]);
        assert_eq!(events.last(), Some(&ProgressEvent::BatchDone));
        assert!(events[..events.len() - 1]
            .iter()
            .all(|e| e.task_id() == Some(TaskId(0))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_batch_finishes_immediately() {
        let mut handle = TaskScheduler::new(Arc::new(Panics), 3).submit(vec![]);
        let first = handle.events_mut().recv().await;
        assert_eq!(first, Some(ProgressEvent::BatchDone));
        assert_eq!(handle.events_mut().recv().await, None);
    }
}
