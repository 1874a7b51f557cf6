//! Local access to the scanned directory PDF.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which is blocking and keeps
//! thread-local state. Every call into it runs on tokio's blocking pool so
//! the runtime's worker threads never stall on a large scan.
//!
//! The page loop only sees [`PageSource`], so tests can stage pages without
//! a pdfium library present.

use crate::error::DigitizeError;
use pdfium_render::prelude::*;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A document whose pages can be copied out for upload.
///
/// Methods are blocking; async callers go through `spawn_blocking`.
pub trait PageSource: Send + Sync {
    /// Short name used in remote display names (the file stem).
    fn identity(&self) -> &str;

    fn page_count(&self) -> usize;

    /// Write pages `first..=last` (1-indexed) as a new PDF at `dest`.
    fn write_pages(&self, first: usize, last: usize, dest: &Path) -> Result<(), DigitizeError>;

    /// Render one page (1-indexed) to a PNG at `dest`.
    fn write_page_image(&self, page: usize, dest: &Path) -> Result<(), DigitizeError>;
}

/// A PDF on disk, read through pdfium.
#[derive(Debug, Clone)]
pub struct PdfDocumentSource {
    path: PathBuf,
    stem: String,
    total: usize,
    max_pixels: u32,
}

impl PdfDocumentSource {
    /// Validate the file and read its page count.
    pub async fn open(path: impl AsRef<Path>, max_pixels: u32) -> Result<Self, DigitizeError> {
        let path = path.as_ref().to_path_buf();
        check_pdf_file(&path)?;

        let probe = path.clone();
        let total = tokio::task::spawn_blocking(move || {
            let pdfium = bind_pdfium()?;
            let doc = load(&pdfium, &probe)?;
            Ok::<_, DigitizeError>(doc.pages().len() as usize)
        })
        .await
        .map_err(|e| DigitizeError::Internal(format!("Page count task panicked: {e}")))??;

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        info!("Opened {}: {} pages", path.display(), total);

        Ok(Self {
            path,
            stem,
            total,
            max_pixels,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PageSource for PdfDocumentSource {
    fn identity(&self) -> &str {
        &self.stem
    }

    fn page_count(&self) -> usize {
        self.total
    }

    fn write_pages(&self, first: usize, last: usize, dest: &Path) -> Result<(), DigitizeError> {
        let pages: Vec<usize> = (first..=last).collect();
        write_page_set(&self.path, &pages, dest)?;
        debug!("Wrote pages {}-{} to {}", first, last, dest.display());
        Ok(())
    }

    fn write_page_image(&self, page: usize, dest: &Path) -> Result<(), DigitizeError> {
        let failed = |detail: String| DigitizeError::PageExtractionFailed {
            first: page,
            last: page,
            detail,
        };
        let pdfium = bind_pdfium()?;
        let doc = load(&pdfium, &self.path)?;
        let pdf_page = doc
            .pages()
            .get(page_index(page, self.total)?)
            .map_err(|e| failed(format!("{e:?}")))?;

        let render_config = PdfRenderConfig::new()
            .set_target_width(self.max_pixels as i32)
            .set_maximum_height(self.max_pixels as i32);
        let bitmap = pdf_page
            .render_with_config(&render_config)
            .map_err(|e| failed(format!("{e:?}")))?;
        let image = bitmap.as_image();
        image
            .save_with_format(dest, image::ImageFormat::Png)
            .map_err(|e| failed(format!("PNG encoding failed: {e}")))?;

        debug!(
            "Rendered page {} → {}x{} px at {}",
            page,
            image.width(),
            image.height(),
            dest.display()
        );
        Ok(())
    }
}

/// Copy the listed pages (1-indexed, in the given order) of `src` into a new
/// PDF at `dest`.
///
/// Pages outside the document are skipped with a warning. Returns the pages
/// actually copied; it is an error only when none of them exist.
pub async fn extract_pages(
    src: &Path,
    pages: &[usize],
    dest: &Path,
) -> Result<Vec<usize>, DigitizeError> {
    check_pdf_file(src)?;
    let (src, dest, pages) = (src.to_path_buf(), dest.to_path_buf(), pages.to_vec());
    tokio::task::spawn_blocking(move || write_page_set(&src, &pages, &dest))
        .await
        .map_err(|e| DigitizeError::Internal(format!("Page copy task panicked: {e}")))?
}

fn write_page_set(src: &Path, pages: &[usize], dest: &Path) -> Result<Vec<usize>, DigitizeError> {
    if pages.is_empty() {
        return Err(DigitizeError::InvalidConfig("No pages to extract".into()));
    }

    let pdfium = bind_pdfium()?;
    let source = load(&pdfium, src)?;
    let total = source.pages().len() as usize;

    let pages = pages_in_document(pages, total);
    let (first, last) = match (pages.iter().min(), pages.iter().max()) {
        (Some(&a), Some(&b)) => (a, b),
        _ => {
            return Err(DigitizeError::InvalidConfig(format!(
                "None of the requested pages lie within the document's {total} pages"
            )));
        }
    };
    let failed = |detail: String| DigitizeError::PageExtractionFailed { first, last, detail };

    let mut out = pdfium
        .create_new_pdf()
        .map_err(|e| failed(format!("{e:?}")))?;
    for (pos, &page) in pages.iter().enumerate() {
        let idx = page_index(page, total)?;
        out.pages_mut()
            .copy_page_range_from_document(&source, idx..=idx, pos as u16)
            .map_err(|e| failed(format!("{e:?}")))?;
    }
    out.save_to_file(dest).map_err(|e| failed(format!("{e:?}")))?;
    Ok(pages)
}

/// Drop pages outside `1..=total`, warning about each.
fn pages_in_document(pages: &[usize], total: usize) -> Vec<usize> {
    pages
        .iter()
        .copied()
        .filter(|&page| {
            let inside = (1..=total).contains(&page);
            if !inside {
                warn!("Page {} is outside the document (1-{}), skipping", page, total);
            }
            inside
        })
        .collect()
}

fn page_index(page: usize, total: usize) -> Result<u16, DigitizeError> {
    if page == 0 || page > total {
        return Err(DigitizeError::PageOutOfRange { page, total });
    }
    Ok((page - 1) as u16)
}

fn bind_pdfium() -> Result<Pdfium, DigitizeError> {
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| DigitizeError::PdfiumBindingFailed(format!("{e:?}")))?;
    Ok(Pdfium::new(bindings))
}

fn load<'a>(pdfium: &'a Pdfium, path: &Path) -> Result<PdfDocument<'a>, DigitizeError> {
    pdfium
        .load_pdf_from_file(path, None)
        .map_err(|e| DigitizeError::CorruptPdf {
            path: path.to_path_buf(),
            detail: format!("{e:?}"),
        })
}

/// Existence, permission and `%PDF` magic-byte checks.
fn check_pdf_file(path: &Path) -> Result<(), DigitizeError> {
    if !path.exists() {
        return Err(DigitizeError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    match std::fs::File::open(path) {
        Ok(mut f) => {
            let mut magic = [0u8; 4];
            if f.read_exact(&mut magic).is_err() || &magic != b"%PDF" {
                return Err(DigitizeError::NotAPdf {
                    path: path.to_path_buf(),
                    magic,
                });
            }
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(DigitizeError::PermissionDenied {
                path: path.to_path_buf(),
            })
        }
        Err(_) => Err(DigitizeError::FileNotFound {
            path: path.to_path_buf(),
        }),
    }
}

/// Shared handle used by the page loop.
pub type SharedPageSource = Arc<dyn PageSource>;
