//! End-to-end tests against a real pdfium library.
//!
//! They are gated behind the `E2E_ENABLED` environment variable so they do
//! not run in CI unless explicitly requested. The input PDF is produced by
//! the crate's own folder assembly, so no fixture files are needed.
//!
//! Run with:
//!   E2E_ENABLED=1 PDFIUM_LIB_PATH=/path/to/libpdfium.so cargo test --test e2e -- --nocapture

use edgequake_pdf2img::{
    assemble_folder, convert_files, inspect, AssemblyConfig, AssemblyJob, BatchOutcome,
    CancellationToken, ColorMode, ConversionConfig, OutputFormat, PdfiumRenderer, RenderService,
    TaskOutcome, TaskResult,
};
use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};

// ── Test helpers ─────────────────────────────────────────────────────────────

macro_rules! e2e_skip_unless_enabled {
    () => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP — set E2E_ENABLED=1 to run e2e tests");
            return;
        }
    }};
}

/// Build `{root}/sample/sample.pdf` with `pages` pages of 500×700 px.
fn sample_pdf(root: &Path, pages: usize) -> PathBuf {
    let folder = root.join("sample");
    std::fs::create_dir_all(&folder).unwrap();
    for p in 1..=pages {
        let img = RgbImage::from_fn(500, 700, |x, y| {
            if (x / 50 + y / 50) % 2 == 0 {
                Rgb([20, 20, 20])
            } else {
                Rgb([235, 235, 235])
            }
        });
        img.save(folder.join(format!("scan_{p}.png"))).unwrap();
    }
    let job = AssemblyJob::new(&folder, &AssemblyConfig::default());
    match assemble_folder(&job, &CancellationToken::new()).unwrap() {
        TaskOutcome::Finished(TaskResult::Assembled(s)) => s.output,
        other => panic!("unexpected outcome {other:?}"),
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_inspect_counts_pages() {
    e2e_skip_unless_enabled!();
    let dir = tempfile::tempdir().unwrap();
    let pdf = sample_pdf(dir.path(), 4);
    assert_eq!(inspect(&pdf).await.unwrap(), 4);
}

#[tokio::test]
async fn test_inspect_nonexistent() {
    e2e_skip_unless_enabled!();
    assert!(inspect("/no/such/file.pdf").await.is_err());
}

#[test]
fn test_render_scale_follows_dpi() {
    e2e_skip_unless_enabled!();
    let dir = tempfile::tempdir().unwrap();
    let pdf = sample_pdf(dir.path(), 1);
    // 500 px at 100 dpi is 360 pt; at 144 dpi that renders to ~720 px.
    let img = PdfiumRenderer::new().render_page(&pdf, 1, 144).unwrap();
    assert!((img.width() as i64 - 720).abs() <= 2, "width {}", img.width());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_convert_bw_png() {
    e2e_skip_unless_enabled!();
    let dir = tempfile::tempdir().unwrap();
    let pdf = sample_pdf(dir.path(), 3);
    let out = dir.path().join("out");

    let config = ConversionConfig::builder()
        .dpi(72)
        .format(OutputFormat::Png)
        .color_mode(ColorMode::ThresholdBw)
        .build()
        .unwrap();
    let report = convert_files(&[pdf], &out, &config).await.unwrap();

    assert_eq!(report.outcome, BatchOutcome::Completed);
    assert_eq!(report.progress.completed_pages, 3);
    for p in 1..=3 {
        let page = out.join("sample").join(format!("sample_{p}.png"));
        let img = image::open(&page).unwrap().to_luma8();
        assert!(img.pixels().all(|px| px.0[0] == 0 || px.0[0] == 255));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_convert_default_webp() {
    e2e_skip_unless_enabled!();
    let dir = tempfile::tempdir().unwrap();
    let pdf = sample_pdf(dir.path(), 2);
    let out = dir.path().join("out");

    let report = convert_files(&[pdf], &out, &ConversionConfig::default())
        .await
        .unwrap();
    assert!(report.is_success(), "{report:?}");
    let bytes = std::fs::read(out.join("sample/sample_2.webp")).unwrap();
    assert_eq!(&bytes[8..12], b"WEBP");
}
