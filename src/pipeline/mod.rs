//! Pipeline stages for PDF-to-image conversion.
//!
//! Each submodule implements exactly one step and is blocking; the scheduler
//! runs whole tasks on the blocking pool.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ probe ──▶ render ──▶ transform ──▶ encode
//! (path)   (count)   (pdfium)   (colour mode)  (jpg/webp/png)
//! ```
//!
//! 1. [`input`]     — classify a path as a PDF or an image folder
//! 2. [`probe`]     — cheap page count; failure means "unknown"
//! 3. [`render`]    — the [`render::RenderService`] seam and its pdfium backend
//! 4. [`transform`] — truecolor / grayscale / hard black-and-white threshold
//! 5. [`encode`]    — format-specific encoding and the per-page file write

pub mod encode;
pub mod input;
pub mod probe;
pub mod render;
pub mod transform;
