//! CLI binary for edgequake-pdf2img.
//!
//! A thin shim over the library crate: resolves persisted settings and CLI
//! flags into configs, classifies inputs into conversion and assembly tasks,
//! runs them as one batch and renders progress.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_pdf2img::pipeline::input::{resolve_input, ResolvedInput};
use edgequake_pdf2img::{
    estimate_pages, list_images, AssemblyJob, BatchHandle, BatchOutcome, BatchReport, ColorMode,
    ConversionJob, Document, GlobalProgress, OutputFormat, PageError, PdfiumRenderer,
    ProgressAggregator, ProgressObserver, RenderService, Settings, SharedObserver, Task, TaskId,
    TaskResult, TaskScheduler, TaskState, DEFAULT_POLL_INTERVAL,
};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── Terminal observer using indicatif ────────────────────────────────────────

/// One bar for the whole batch. Its length follows `expected_pages`, which
/// can grow while documents with unknown page counts are rendered.
struct BarObserver {
    bar: ProgressBar,
    labels: Mutex<HashMap<TaskId, String>>,
}

impl BarObserver {
    fn new(expected_pages: usize) -> Arc<Self> {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>4}/{len} pages  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        let bar = ProgressBar::new(expected_pages as u64);
        bar.set_style(style);
        bar.set_prefix("Working");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            labels: Mutex::new(HashMap::new()),
        })
    }

    fn label(&self, id: TaskId) -> String {
        self.labels
            .lock()
            .ok()
            .and_then(|m| m.get(&id).cloned())
            .unwrap_or_else(|| id.to_string())
    }

    fn sync(&self, progress: &GlobalProgress) {
        self.bar.set_length(progress.expected_pages as u64);
        self.bar.set_position(progress.completed_pages as u64);
    }
}

impl ProgressObserver for BarObserver {
    fn on_task_started(&self, task_id: TaskId, label: &str) {
        if let Ok(mut m) = self.labels.lock() {
            m.insert(task_id, label.to_string());
        }
        self.bar.set_message(label.to_string());
    }

    fn on_page(&self, _task_id: TaskId, _page: usize, _total: usize, progress: &GlobalProgress) {
        self.sync(progress);
    }

    fn on_page_skipped(&self, task_id: TaskId, error: &PageError, progress: &GlobalProgress) {
        self.bar.println(format!(
            "  {} {}  {}",
            red("✗"),
            self.label(task_id),
            red(&error.to_string())
        ));
        self.sync(progress);
    }

    fn on_task_done(&self, task_id: TaskId, result: &TaskResult) {
        let detail = match result {
            TaskResult::Converted(s) => format!(
                "{}/{} pages → {}",
                s.pages_written,
                s.pages,
                s.destination.display()
            ),
            TaskResult::Assembled(s) => format!("{} images → {}", s.count, s.output.display()),
        };
        self.bar.println(format!(
            "  {} {}  {}",
            green("✓"),
            bold(&self.label(task_id)),
            dim(&detail)
        ));
    }

    fn on_task_failed(&self, task_id: TaskId, error: &str) {
        self.bar.println(format!(
            "  {} {}  {}",
            red("✗"),
            bold(&self.label(task_id)),
            red(error)
        ));
    }

    fn on_batch_done(&self, _progress: &GlobalProgress) {
        self.bar.finish_and_clear();
    }

    fn on_cancelled(&self, _not_started: usize, _progress: &GlobalProgress) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert a PDF to grayscale WebP pages next to it (./report/report_1.webp …)
  pdf2img report.pdf

  # Several PDFs, 4 at a time, 1-bit PNG at 200 DPI into ./pages
  pdf2img -j 4 --dpi 200 --format png --mode 1 -o pages a.pdf b.pdf c.pdf

  # Assemble a folder of scans into scans/book/book.pdf
  pdf2img scans/book

  # Page counts only
  pdf2img --inspect-only *.pdf

  # Machine-readable progress
  pdf2img --json --no-progress report.pdf > events.jsonl

COLOUR MODES:
  rgb   truecolor
  l     8-bit grayscale (default)
  1     black & white, hard threshold at 128 (no dithering)

SETTINGS:
  Values not given on the command line come from
  {config dir}/pdf2img/settings.json (or --settings PATH). When "remember"
  is true there, the effective values are written back before each run.

ENVIRONMENT VARIABLES:
  PDFIUM_LIB_PATH   Path to libpdfium (file or directory)
  RUST_LOG          Override log filter (e.g. edgequake_pdf2img=debug)

Ctrl-C stops the batch after the pages currently being rendered.
"#;

/// Convert PDFs to page images and image folders to PDFs.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2img",
    version,
    about = "Convert PDFs to page images and image folders to PDFs",
    long_about = "Convert each PDF argument into one image per page (JPEG, WebP or PNG; \
truecolor, grayscale or black & white), and assemble each directory argument's images \
into a single PDF. Inputs run concurrently on a bounded worker pool.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF files to convert and/or image folders to assemble.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Root directory for per-document output folders.
    /// Default: the directory of the first PDF.
    #[arg(short, long, env = "PDF2IMG_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Rendering DPI (36–1200).
    #[arg(long, env = "PDF2IMG_DPI",
          value_parser = clap::value_parser!(u32).range(36..=1200))]
    dpi: Option<u32>,

    /// Output format: jpeg, webp, png.
    #[arg(long, env = "PDF2IMG_FORMAT", value_parser = parse_format)]
    format: Option<OutputFormat>,

    /// Lossy quality 1–100 (JPEG, WebP).
    #[arg(long, env = "PDF2IMG_QUALITY",
          value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: Option<u8>,

    /// Colour mode: rgb, l (grayscale), 1 (black & white).
    #[arg(long, env = "PDF2IMG_MODE", value_parser = parse_mode)]
    mode: Option<ColorMode>,

    /// Documents converted in parallel.
    #[arg(short = 'j', long, env = "PDF2IMG_WORKERS")]
    workers: Option<usize>,

    /// Assembly: downscale images wider than this (0 = keep size).
    #[arg(long, env = "PDF2IMG_MAX_WIDTH")]
    max_width: Option<u32>,

    /// Assembly: JPEG quality of embedded pages (1–100).
    #[arg(long, env = "PDF2IMG_MERGE_QUALITY",
          value_parser = clap::value_parser!(u8).range(1..=100))]
    merge_quality: Option<u8>,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF2IMG_PASSWORD")]
    password: Option<String>,

    /// Settings file to read (and update when "remember" is on).
    #[arg(long, env = "PDF2IMG_SETTINGS")]
    settings: Option<PathBuf>,

    /// Do not write the effective settings back.
    #[arg(long)]
    no_save: bool,

    /// Emit events as JSON lines and a final JSON report on stdout.
    #[arg(long, env = "PDF2IMG_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF2IMG_NO_PROGRESS")]
    no_progress: bool,

    /// Print page counts (PDFs) and image counts (folders) only.
    #[arg(long)]
    inspect_only: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2IMG_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2IMG_QUIET")]
    quiet: bool,
}

fn parse_format(s: &str) -> std::result::Result<OutputFormat, String> {
    s.parse().map_err(|e: edgequake_pdf2img::Pdf2ImgError| e.to_string())
}

fn parse_mode(s: &str) -> std::result::Result<ColorMode, String> {
    s.parse().map_err(|e: edgequake_pdf2img::Pdf2ImgError| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The bar carries the feedback while it is visible; keep library logs
    // down to errors unless asked otherwise.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Settings ─────────────────────────────────────────────────────────
    let settings_path = cli.settings.clone().or_else(Settings::default_path);
    let mut settings = settings_path
        .as_deref()
        .map(Settings::load)
        .unwrap_or_default();
    apply_overrides(&mut settings, &cli);

    if settings.remember && !cli.no_save && !cli.inspect_only {
        if let Some(path) = &settings_path {
            if let Err(e) = settings.save(path) {
                warn!("Could not save settings: {}", e);
            }
        }
    }

    let conv_config = settings
        .to_conversion_config()
        .context("Invalid conversion settings")?;
    let asm_config = settings
        .to_assembly_config()
        .context("Invalid assembly settings")?;

    // ── Classify inputs ──────────────────────────────────────────────────
    let mut documents = Vec::new();
    let mut folders = Vec::new();
    for input in &cli.inputs {
        match resolve_input(input).with_context(|| format!("Invalid input {:?}", input))? {
            ResolvedInput::Document(p) => documents.push(Document::new(p)),
            ResolvedInput::Folder(p) => folders.push(p),
        }
    }

    let mut renderer = PdfiumRenderer::new();
    if let Some(pw) = &cli.password {
        renderer = renderer.with_password(pw.clone());
    }
    let renderer: Arc<dyn RenderService> = Arc::new(renderer);

    // ── Probe page counts up front ───────────────────────────────────────
    let probe = renderer.clone();
    let (documents, expected) = tokio::task::spawn_blocking(move || {
        let expected = estimate_pages(probe.as_ref(), &mut documents);
        (documents, expected)
    })
    .await
    .context("Page-count probe panicked")?;

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        return inspect(&cli, &documents, &folders);
    }

    // ── Build the batch ──────────────────────────────────────────────────
    let output_root = cli
        .output_dir
        .clone()
        .unwrap_or_else(|| default_output_root(&documents));

    let mut tasks: Vec<Task> = documents
        .into_iter()
        .map(|doc| Task::Convert(ConversionJob::new(doc, &output_root, &conv_config)))
        .collect();
    tasks.extend(
        folders
            .into_iter()
            .map(|f| Task::Assemble(AssemblyJob::new(f, &asm_config))),
    );

    if !cli.quiet && !cli.json {
        eprintln!(
            "{} {}",
            cyan("◆"),
            bold(&format!(
                "{} tasks · ~{} pages · {} workers · {} {} {} dpi",
                tasks.len(),
                expected,
                conv_config.concurrency,
                conv_config.format,
                conv_config.color_mode,
                conv_config.dpi
            ))
        );
    }

    let observer: Option<SharedObserver> = if show_progress {
        Some(BarObserver::new(expected))
    } else {
        None
    };

    let mut aggregator = ProgressAggregator::for_batch(&tasks);
    if let Some(observer) = observer {
        aggregator = aggregator.with_observer(observer);
    }

    // ── Run ──────────────────────────────────────────────────────────────
    let started = Instant::now();
    let handle = TaskScheduler::new(renderer, conv_config.concurrency).submit(tasks);

    let cancel = handle.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{} cancelling after current pages…", cyan("⚠"));
            cancel.cancel();
        }
    });

    let report = if cli.json {
        stream_json_events(handle, aggregator).await?
    } else {
        handle.wait(aggregator, DEFAULT_POLL_INTERVAL).await
    };

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
    } else if !cli.quiet {
        print_summary(&report, started.elapsed());
    }

    match report.outcome {
        BatchOutcome::Cancelled { not_started } => {
            anyhow::bail!("Cancelled ({} tasks not started)", not_started)
        }
        BatchOutcome::Interrupted => anyhow::bail!("Batch ended unexpectedly"),
        BatchOutcome::Completed if report.progress.tasks_failed > 0 => {
            anyhow::bail!(
                "{} of {} tasks failed",
                report.progress.tasks_failed,
                report.progress.tasks_total
            )
        }
        BatchOutcome::Completed => Ok(()),
    }
}

/// Print every batch event as one JSON line, annotated with the task label
/// and the batch counters after folding it.
async fn stream_json_events(
    handle: BatchHandle,
    mut aggregator: ProgressAggregator,
) -> Result<BatchReport> {
    let mut events = handle.into_stream();
    while let Some(event) = events.next().await {
        let mut line = serde_json::to_value(&event).context("Failed to serialise event")?;
        let terminal = event.is_batch_terminal();
        let task_id = event.task_id();
        aggregator.apply(event);

        if let Some(task) = task_id.and_then(|id| aggregator.task(id)) {
            line["label"] = json!(task.label);
        }
        line["progress"] = json!(aggregator.progress());
        println!("{line}");
        if terminal {
            break;
        }
    }
    Ok(aggregator.into_report())
}

/// Layer explicit CLI flags over persisted settings.
fn apply_overrides(settings: &mut Settings, cli: &Cli) {
    if let Some(v) = cli.dpi {
        settings.dpi = v;
    }
    if let Some(v) = cli.format {
        settings.format = v;
    }
    if let Some(v) = cli.quality {
        settings.quality = v;
    }
    if let Some(v) = cli.mode {
        settings.mode = v;
    }
    if let Some(v) = cli.workers {
        settings.workers = v;
    }
    if let Some(v) = cli.max_width {
        settings.merge_max_width = v;
    }
    if let Some(v) = cli.merge_quality {
        settings.merge_quality = v;
    }
}

/// Directory of the first PDF, or the working directory.
fn default_output_root(documents: &[Document]) -> PathBuf {
    documents
        .first()
        .and_then(|d| d.path.parent())
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn inspect(cli: &Cli, documents: &[Document], folders: &[PathBuf]) -> Result<()> {
    let mut rows = Vec::new();
    for doc in documents {
        rows.push(json!({ "path": doc.path, "kind": "pdf", "pages": doc.page_count }));
    }
    for folder in folders {
        let images = list_images(folder)
            .with_context(|| format!("Failed to list {:?}", folder))?;
        rows.push(json!({ "path": folder, "kind": "folder", "images": images.len() }));
    }

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&rows).context("Failed to serialise inspection")?
        );
        return Ok(());
    }

    for doc in documents {
        let pages = doc
            .page_count
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unknown".into());
        println!("{:<8} {:>8}  {}", "pdf", pages, doc.path.display());
    }
    for (folder, row) in folders.iter().zip(rows.iter().skip(documents.len())) {
        println!("{:<8} {:>8}  {}", "folder", row["images"], folder.display());
    }
    Ok(())
}

fn print_summary(report: &BatchReport, elapsed: Duration) {
    let p = &report.progress;
    for task in report.tasks.iter().filter(|t| t.state == TaskState::Failed) {
        eprintln!(
            "  {} {}  {}",
            red("✗"),
            bold(&task.label),
            red(task.error.as_deref().unwrap_or("unknown error"))
        );
    }
    let skipped: usize = report.tasks.iter().map(|t| t.pages_skipped).sum();

    let mark = match report.outcome {
        BatchOutcome::Completed if p.tasks_failed == 0 && skipped == 0 => green("✔"),
        BatchOutcome::Completed => cyan("⚠"),
        _ => red("✘"),
    };
    eprintln!(
        "{}  {}/{} tasks ({} failed)  {}/{} pages ({:.0}%)  {}  {}ms",
        mark,
        p.tasks_resolved(),
        p.tasks_total,
        p.tasks_failed,
        p.completed_pages,
        p.expected_pages,
        p.fraction() * 100.0,
        if skipped > 0 {
            red(&format!("{skipped} skipped"))
        } else {
            dim("0 skipped")
        },
        elapsed.as_millis()
    );
}
