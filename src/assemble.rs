//! Folder of images → one PDF.
//!
//! Images are ordered by the last run of digits in their file stem
//! (`scan_2.jpg` before `scan_10.jpg`), flattened to RGB, optionally
//! downscaled to a maximum width, JPEG-encoded and placed one per page. Page
//! size is the pixel size at 100 dpi.
//!
//! Stems with several numbers sort by the last one only (`v2_page_1` has key
//! 1), and names without digits all share key 0 and keep file-name order.

use crate::cancel::CancellationToken;
use crate::error::Pdf2ImgError;
use crate::task::{AssemblyJob, AssemblySummary, TaskOutcome, TaskResult};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Extensions picked up from the folder (compared case-insensitively).
pub const RASTER_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "webp", "bmp"];

/// Resolution used to size PDF pages from image pixels.
pub const PAGE_DPI: f32 = 100.0;

/// Output name used when the folder path has no final component.
const FALLBACK_PDF_STEM: &str = "assembled";

static DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9]+").expect("valid regex"));

/// Sort key of an image: the last ASCII digit run in its stem, or 0.
///
/// Runs too large for `u64` saturate.
pub fn page_sort_key(path: &Path) -> u64 {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default();
    DIGIT_RUN
        .find_iter(&stem)
        .last()
        .map(|m| m.as_str().parse::<u64>().unwrap_or(u64::MAX))
        .unwrap_or(0)
}

fn is_raster(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| RASTER_EXTENSIONS.iter().any(|r| r.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

/// Images in `folder`, in page order.
pub fn list_images(folder: &Path) -> Result<Vec<PathBuf>, Pdf2ImgError> {
    let unreadable = |source| Pdf2ImgError::FolderUnreadable {
        path: folder.to_path_buf(),
        source,
    };
    let mut files = Vec::new();
    for entry in std::fs::read_dir(folder).map_err(unreadable)? {
        let path = entry.map_err(unreadable)?.path();
        if path.is_file() && is_raster(&path) {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    files.sort_by_key(|p| page_sort_key(p));
    Ok(files)
}

/// Downscale `img` to `max_width` keeping aspect ratio. `0` disables.
pub fn fit_width(img: DynamicImage, max_width: u32) -> DynamicImage {
    let (w, h) = (img.width(), img.height());
    if max_width == 0 || w <= max_width {
        return img;
    }
    let new_h = ((h as f64 * max_width as f64 / w as f64).round() as u32).max(1);
    img.resize_exact(max_width, new_h, FilterType::Lanczos3)
}

/// `{folder}/{folder name}.pdf`
pub fn output_path(folder: &Path) -> PathBuf {
    let name = folder
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| FALLBACK_PDF_STEM.to_string());
    folder.join(format!("{name}.pdf"))
}

struct PreparedPage {
    jpeg: Vec<u8>,
    width: u32,
    height: u32,
}

fn prepare(path: &Path, job: &AssemblyJob) -> Result<PreparedPage, Pdf2ImgError> {
    let img = image::open(path).map_err(|e| Pdf2ImgError::ImageLoadFailed {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    let rgb = fit_width(DynamicImage::ImageRgb8(img.to_rgb8()), job.config.max_width).to_rgb8();
    let (width, height) = rgb.dimensions();

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, job.config.quality.clamp(1, 100))
        .encode_image(&rgb)
        .map_err(|e| Pdf2ImgError::PdfAssemblyFailed {
            path: path.to_path_buf(),
            detail: format!("JPEG encoding failed: {}", e),
        })?;
    debug!("Prepared {} → {}x{} px", path.display(), width, height);
    Ok(PreparedPage {
        jpeg,
        width,
        height,
    })
}

/// Assemble the folder of `job` into one PDF.
///
/// Blocking. Every image is decoded and encoded before anything is written;
/// the PDF goes to a temp file in the folder and is renamed into place, so a
/// failed or cancelled run leaves no partial output.
pub fn assemble_folder(
    job: &AssemblyJob,
    cancel: &CancellationToken,
) -> Result<TaskOutcome, Pdf2ImgError> {
    let folder = &job.folder;
    let files = list_images(folder)?;
    if files.is_empty() {
        return Err(Pdf2ImgError::EmptyFolder {
            path: folder.clone(),
        });
    }
    info!("Assembling {} images from {}", files.len(), folder.display());

    let mut pages = Vec::with_capacity(files.len());
    for file in &files {
        if cancel.is_cancelled() {
            info!("Assembly of {} cancelled", folder.display());
            return Ok(TaskOutcome::Cancelled);
        }
        pages.push(prepare(file, job)?);
    }

    let output = output_path(folder);
    let mut doc = build_document(pages);
    write_atomically(&mut doc, folder, &output)?;

    info!("Wrote {} ({} pages)", output.display(), files.len());
    Ok(TaskOutcome::Finished(TaskResult::Assembled(AssemblySummary {
        output,
        count: files.len(),
    })))
}

fn build_document(pages: Vec<PreparedPage>) -> Document {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());

    for page in pages {
        let w_pt = page.width as f32 * 72.0 / PAGE_DPI;
        let h_pt = page.height as f32 * 72.0 / PAGE_DPI;

        let mut image_dict = Dictionary::new();
        image_dict.set("Type", Object::Name(b"XObject".to_vec()));
        image_dict.set("Subtype", Object::Name(b"Image".to_vec()));
        image_dict.set("Width", Object::Integer(page.width as i64));
        image_dict.set("Height", Object::Integer(page.height as i64));
        image_dict.set("ColorSpace", Object::Name(b"DeviceRGB".to_vec()));
        image_dict.set("BitsPerComponent", Object::Integer(8));
        image_dict.set("Filter", Object::Name(b"DCTDecode".to_vec()));
        let image_id =
            doc.add_object(Stream::new(image_dict, page.jpeg).with_compression(false));

        let content = format!("q {:.2} 0 0 {:.2} 0 0 cm /Im0 Do Q", w_pt, h_pt);
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content.into_bytes()));

        let mut xobjects = Dictionary::new();
        xobjects.set("Im0", Object::Reference(image_id));
        let mut resources = Dictionary::new();
        resources.set("XObject", Object::Dictionary(xobjects));

        let mut page_dict = Dictionary::new();
        page_dict.set("Type", Object::Name(b"Page".to_vec()));
        page_dict.set("Parent", Object::Reference(pages_id));
        page_dict.set(
            "MediaBox",
            Object::Array(vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(w_pt),
                Object::Real(h_pt),
            ]),
        );
        page_dict.set("Resources", Object::Dictionary(resources));
        page_dict.set("Contents", Object::Reference(content_id));
        let page_id: ObjectId = doc.add_object(page_dict);
        kids.push(Object::Reference(page_id));
    }

    let mut pages_dict = Dictionary::new();
    pages_dict.set("Type", Object::Name(b"Pages".to_vec()));
    pages_dict.set("Count", Object::Integer(kids.len() as i64));
    pages_dict.set("Kids", Object::Array(kids));
    doc.objects.insert(pages_id, Object::Dictionary(pages_dict));

    let mut catalog = Dictionary::new();
    catalog.set("Type", Object::Name(b"Catalog".to_vec()));
    catalog.set("Pages", Object::Reference(pages_id));
    let catalog_id = doc.add_object(catalog);
    doc.trailer.set("Root", Object::Reference(catalog_id));

    doc.compress();
    doc
}

fn write_atomically(doc: &mut Document, folder: &Path, output: &Path) -> Result<(), Pdf2ImgError> {
    let write_failed = |source| Pdf2ImgError::OutputWriteFailed {
        path: output.to_path_buf(),
        source,
    };
    let mut tmp = tempfile::NamedTempFile::new_in(folder).map_err(write_failed)?;
    doc.save_to(&mut tmp)
        .map_err(|e| Pdf2ImgError::PdfAssemblyFailed {
            path: output.to_path_buf(),
            detail: e.to_string(),
        })?;
    tmp.flush().map_err(write_failed)?;
    tmp.persist(output).map_err(|e| write_failed(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AssemblyConfig;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    fn write_img(dir: &Path, name: &str, w: u32, h: u32) {
        RgbImage::from_pixel(w, h, Rgb([120, 60, 200]))
            .save(dir.join(name))
            .unwrap();
    }

    fn job(folder: &Path, max_width: u32) -> AssemblyJob {
        let cfg = AssemblyConfig::builder().max_width(max_width).build().unwrap();
        AssemblyJob::new(folder, &cfg)
    }

    #[test]
    fn sort_key_uses_last_digit_run() {
        assert_eq!(page_sort_key(Path::new("img2.png")), 2);
        assert_eq!(page_sort_key(Path::new("img10.png")), 10);
        assert_eq!(page_sort_key(Path::new("vol3_page_07.jpg")), 7);
        assert_eq!(page_sort_key(Path::new("cover.jpg")), 0);
        assert_eq!(
            page_sort_key(Path::new("p99999999999999999999999.png")),
            u64::MAX
        );
    }

    #[test]
    fn sort_key_ignores_non_ascii_digits() {
        // Arabic-Indic digits are not part of the numeric key.
        assert_eq!(page_sort_key(Path::new("scan_12_\u{0663}\u{0664}.png")), 12);
        assert_eq!(page_sort_key(Path::new("\u{0661}\u{0662}.png")), 0);
    }

    #[test]
    fn list_orders_numerically_and_filters_extensions() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["img2.png", "img10.png", "img1.png", "notes.txt", "IMG3.JPG"] {
            if name.ends_with(".txt") {
                std::fs::write(dir.path().join(name), b"hi").unwrap();
            } else {
                write_img(dir.path(), name, 4, 4);
            }
        }
        let names: Vec<String> = list_images(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["img1.png", "img2.png", "IMG3.JPG", "img10.png"]);
    }

    #[test]
    fn fit_width_scales_and_rounds() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(2000, 1001));
        let out = fit_width(img, 1000);
        assert_eq!((out.width(), out.height()), (1000, 501));

        let small = DynamicImage::ImageRgb8(RgbImage::new(800, 600));
        assert_eq!(fit_width(small, 1000).width(), 800);

        let wide = DynamicImage::ImageRgb8(RgbImage::new(3000, 10));
        assert_eq!(fit_width(wide, 0).width(), 3000);
    }

    #[test]
    fn empty_folder_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("readme.md"), b"#").unwrap();
        let err = assemble_folder(&job(dir.path(), 0), &CancellationToken::new()).unwrap_err();
        assert!(err.to_string().starts_with("empty folder"));
    }

    #[test]
    fn writes_one_page_per_image() {
        let root = tempfile::tempdir().unwrap();
        let folder = root.path().join("book");
        std::fs::create_dir(&folder).unwrap();
        write_img(&folder, "p2.png", 300, 200);
        write_img(&folder, "p1.bmp", 2000, 1000);
        RgbaImage::from_pixel(50, 50, Rgba([0, 0, 0, 128]))
            .save(folder.join("p3.png"))
            .unwrap();

        let outcome = assemble_folder(&job(&folder, 1000), &CancellationToken::new()).unwrap();
        let TaskOutcome::Finished(TaskResult::Assembled(summary)) = outcome else {
            panic!("unexpected outcome");
        };
        assert_eq!(summary.count, 3);
        assert_eq!(summary.output, folder.join("book.pdf"));

        let pdf = Document::load(&summary.output).unwrap();
        assert_eq!(pdf.get_pages().len(), 3);

        let first = pdf.get_pages()[&1];
        let page = pdf.get_dictionary(first).unwrap();
        let media_box = page.get(b"MediaBox").unwrap().as_array().unwrap();
        assert_eq!(media_box[2].as_float().unwrap(), 720.0);
        assert_eq!(media_box[3].as_float().unwrap(), 360.0);
    }

    #[test]
    fn cancelled_assembly_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        write_img(dir.path(), "a1.png", 10, 10);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = assemble_folder(&job(dir.path(), 0), &cancel).unwrap();
        assert_eq!(outcome, TaskOutcome::Cancelled);
        assert!(!output_path(dir.path()).exists());
    }

    #[test]
    fn undecodable_image_fails_the_task() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken1.png"), b"not a png").unwrap();
        let err = assemble_folder(&job(dir.path(), 0), &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, Pdf2ImgError::ImageLoadFailed { .. }));
        assert!(!output_path(dir.path()).exists());
    }
}
