//! PDF document access through pdfium.
//!
//! pdfium is not reentrant, so every entry point here takes a
//! process-wide lock before touching the library. Documents are opened
//! and closed within a single call; no pdfium handle ever crosses a
//! thread boundary. All functions block and belong on a blocking thread
//! when called from async code.

use image::ImageFormat;
use parking_lot::Mutex;
use pdfium_render::prelude::*;
use std::io::Cursor;
use std::path::Path;

use crate::error::Error;

/// Raster resolution for page rendering.
const RENDER_DPI: f32 = 150.0;

/// PDF points per inch.
const POINTS_PER_INCH: f32 = 72.0;

/// Serializes every pdfium call across all threads.
static PDFIUM_LOCK: Mutex<()> = Mutex::new(());

/// Text of one non-empty page, 1-based.
pub struct ExtractedPage {
    pub page_num: u32,
    pub text: String,
}

/// Full extraction result for one document.
pub struct ExtractedDoc {
    pub num_pages: u32,
    /// Pages with any text at all; empty pages are omitted.
    pub pages: Vec<ExtractedPage>,
}

fn bind() -> Result<Pdfium, Error> {
    Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map(Pdfium::new)
        .map_err(|e| Error::Pdf(format!("could not bind pdfium: {e}")))
}

/// Number of pages in the document at `path`.
pub fn page_count(path: &Path) -> Result<u32, Error> {
    let _guard = PDFIUM_LOCK.lock();
    let pdfium = bind()?;
    let document = pdfium
        .load_pdf_from_file(path, None)
        .map_err(|e| Error::Pdf(format!("{}: {e}", path.display())))?;
    Ok(document.pages().len() as u32)
}

/// Opens the document at `path` and extracts the text of every page.
///
/// Pages that fail to load or decode are logged and skipped; the
/// reported `num_pages` always reflects the document itself so callers
/// can verify it against an earlier probe.
pub fn extract_pages(path: &Path) -> Result<ExtractedDoc, Error> {
    let _guard = PDFIUM_LOCK.lock();
    let pdfium = bind()?;
    let document = pdfium
        .load_pdf_from_file(path, None)
        .map_err(|e| Error::Pdf(format!("{}: {e}", path.display())))?;

    let pages = document.pages();
    let num_pages = pages.len() as u32;
    let mut extracted = Vec::with_capacity(num_pages as usize);

    for index in 0..pages.len() {
        let page = match pages.get(index) {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    page = index + 1,
                    error = %e,
                    "Failed to load page"
                );
                continue;
            }
        };

        let text = match page.text() {
            Ok(text) => text.all(),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    page = index + 1,
                    error = %e,
                    "Failed to extract page text"
                );
                continue;
            }
        };

        if text.is_empty() {
            continue;
        }

        extracted.push(ExtractedPage { page_num: index as u32 + 1, text });
    }

    Ok(ExtractedDoc { num_pages, pages: extracted })
}

/// Renders the given zero-based page to PNG bytes at [`RENDER_DPI`] on a
/// white background with text smoothing disabled.
pub fn render_page_png(path: &Path, page_index: u32) -> Result<Vec<u8>, Error> {
    let _guard = PDFIUM_LOCK.lock();
    let pdfium = bind()?;
    let document = pdfium
        .load_pdf_from_file(path, None)
        .map_err(|e| Error::Raster(format!("{}: {e}", path.display())))?;

    let pages = document.pages();
    if page_index >= pages.len() as u32 {
        return Err(Error::Raster(format!(
            "page {} out of range (document has {})",
            page_index + 1,
            pages.len()
        )));
    }

    let page = pages
        .get(page_index as u16)
        .map_err(|e| Error::Raster(format!("could not load page {}: {e}", page_index + 1)))?;

    let config = PdfRenderConfig::new()
        .scale_page_by_factor(RENDER_DPI / POINTS_PER_INCH)
        .clear_before_rendering(true)
        .set_clear_color(PdfColor::new(255, 255, 255, 255))
        .set_text_smoothing(false);

    let bitmap = page
        .render_with_config(&config)
        .map_err(|e| Error::Raster(format!("render failed: {e}")))?;

    let mut buffer = Cursor::new(Vec::new());
    bitmap
        .as_image()
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|e| Error::Raster(format!("png encode failed: {e}")))?;

    Ok(buffer.into_inner())
}
