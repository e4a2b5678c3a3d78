//! Page source: rasterise pages of a PDF on demand, one range at a time.
//!
//! ## Why per range?
//!
//! Rendering a 300-page document up front holds every bitmap in memory at
//! once. The scheduler asks only for the pages of the batch it is about to
//! run, so at most one batch of images is alive at any time.
//!
//! ## Why spawn_blocking?
//!
//! pdfium keeps thread-local state and is CPU-bound; rendering runs on the
//! blocking pool so Tokio worker threads keep serving timers and signals.

use crate::config::JobConfig;
use crate::error::JobError;
use futures::future::BoxFuture;
use image::{DynamicImage, Rgb, RgbImage};
use pdfium_render::prelude::*;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One rendered page, or why it could not be rendered.
#[derive(Debug)]
pub struct RenderedPage {
    /// 0-based absolute page index.
    pub index: usize,
    pub image: Result<DynamicImage, String>,
}

/// Produces page images for index ranges.
///
/// `render` returns exactly one entry per index in `range`, in ascending
/// order. A per-page problem is reported inside [`RenderedPage`]; an `Err`
/// means the whole range could not be attempted.
pub trait PageSource: Send + Sync {
    fn page_count(&self) -> BoxFuture<'_, Result<usize, JobError>>;

    fn render(&self, range: Range<usize>) -> BoxFuture<'_, Result<Vec<RenderedPage>, JobError>>;
}

/// [`PageSource`] over a local PDF file, rendered with pdfium.
#[derive(Debug, Clone)]
pub struct PdfPageSource {
    path: PathBuf,
    password: Option<String>,
    dpi: u32,
    max_pixels: u32,
}

impl PdfPageSource {
    /// Validate that `path` is a readable PDF and prepare to render it.
    pub fn open(path: impl AsRef<Path>, config: &JobConfig) -> Result<Self, JobError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(JobError::FileNotFound { path });
        }

        match std::fs::File::open(&path) {
            Ok(mut f) => {
                use std::io::Read;
                let mut magic = [0u8; 4];
                if f.read_exact(&mut magic).is_ok() && &magic != b"%PDF" {
                    return Err(JobError::NotAPdf { path, magic });
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(JobError::PermissionDenied { path });
            }
            Err(_) => return Err(JobError::FileNotFound { path }),
        }

        debug!("Opened PDF source: {}", path.display());
        Ok(Self {
            path,
            password: config.password.clone(),
            dpi: config.dpi,
            max_pixels: config.max_rendered_pixels,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File stem, used to name chunk artifacts.
    pub fn base_name(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "document".to_string())
    }
}

impl PageSource for PdfPageSource {
    fn page_count(&self) -> BoxFuture<'_, Result<usize, JobError>> {
        let src = self.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || src.page_count_blocking())
                .await
                .map_err(|e| JobError::Internal(format!("Page count task panicked: {e}")))?
        })
    }

    fn render(&self, range: Range<usize>) -> BoxFuture<'_, Result<Vec<RenderedPage>, JobError>> {
        let src = self.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || src.render_blocking(range))
                .await
                .map_err(|e| JobError::Internal(format!("Render task panicked: {e}")))?
        })
    }
}

impl PdfPageSource {
    fn page_count_blocking(&self) -> Result<usize, JobError> {
        let pdfium = bind_pdfium()?;
        let document = self.load(&pdfium)?;
        let count = document.pages().len() as usize;
        info!("PDF loaded: {} pages", count);
        Ok(count)
    }

    fn render_blocking(&self, range: Range<usize>) -> Result<Vec<RenderedPage>, JobError> {
        let pdfium = bind_pdfium()?;
        let document = self.load(&pdfium)?;
        let pages = document.pages();
        let total = pages.len() as usize;

        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(self.dpi as f32 / 72.0)
            .set_maximum_width(self.max_pixels as i32)
            .set_maximum_height(self.max_pixels as i32);

        let mut out = Vec::with_capacity(range.len());
        for index in range {
            if index >= total {
                warn!("Page {} is out of range (total={})", index + 1, total);
                out.push(RenderedPage {
                    index,
                    image: Err(format!("page {} out of range ({} pages)", index + 1, total)),
                });
                continue;
            }

            let image = pages
                .get(index as u16)
                .and_then(|page| {
                    page.render_with_config(&render_config)
                        .map(|bitmap| flatten_onto_white(&bitmap.as_image()))
                })
                .map_err(|e| format!("{e:?}"));

            match &image {
                Ok(img) => {
                    debug!("Rendered page {} → {}x{} px", index + 1, img.width(), img.height())
                }
                Err(e) => warn!("Rasterisation failed for page {}: {}", index + 1, e),
            }
            out.push(RenderedPage { index, image });
        }
        Ok(out)
    }

    fn load<'p>(&'p self, pdfium: &'p Pdfium) -> Result<PdfDocument<'p>, JobError> {
        pdfium
            .load_pdf_from_file(&self.path, self.password.as_deref())
            .map_err(|e| JobError::DocumentUnreadable {
                path: self.path.clone(),
                detail: format!("{e:?}"),
            })
    }
}

/// Composite transparent pixels onto white and drop the alpha channel.
pub fn flatten_onto_white(img: &DynamicImage) -> DynamicImage {
    if !img.color().has_alpha() {
        return DynamicImage::ImageRgb8(img.to_rgb8());
    }
    let rgba = img.to_rgba8();
    let mut out = RgbImage::new(rgba.width(), rgba.height());
    for (src, dst) in rgba.pixels().zip(out.pixels_mut()) {
        let [r, g, b, a] = src.0;
        let a = a as u16;
        let blend = |c: u8| ((c as u16 * a + 255 * (255 - a)) / 255) as u8;
        *dst = Rgb([blend(r), blend(g), blend(b)]);
    }
    DynamicImage::ImageRgb8(out)
}

/// Bind pdfium: `PDFIUM_LIB_PATH`, then the working directory, then the system.
fn bind_pdfium() -> Result<Pdfium, JobError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(path) if !path.is_empty() => Pdfium::bind_to_library(path),
        _ => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| JobError::PdfiumBindingFailed(format!("{e:?}")))?;
    Ok(Pdfium::new(bindings))
}
