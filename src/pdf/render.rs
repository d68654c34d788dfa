//! Preview rendering
//!
//! Page 1 of a PDF is rasterized and written as an RGB PNG. Rasterization sits
//! behind the [`Rasterizer`] trait with two backends: PDFium (linked at
//! runtime through pdfium-render) and poppler's `pdftoppm` binary.

use crate::error::{Error, Result};
use crate::pdf::output::save_png_atomically;
use image::DynamicImage;
use pdfium_render::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;
use tracing::{debug, warn};

pub const DEFAULT_PREVIEW_DPI: u32 = 150;

/// Renders the first page of a PDF to images
pub trait Rasterizer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the backend can run on this host
    fn is_available(&self) -> bool;

    /// Rasterize page 1 at `dpi`. An empty result means nothing was rendered.
    fn rasterize_first_page(&self, pdf_path: &Path, dpi: u32) -> Result<Vec<DynamicImage>>;
}

/// Bind PDFium: next to the binary, then /opt/pdfium/lib, then the system library
fn create_pdfium() -> std::result::Result<Pdfium, PdfiumError> {
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(
                "/opt/pdfium/lib",
            ))
        })
        .or_else(|_| Pdfium::bind_to_system_library())?;
    Ok(Pdfium::new(bindings))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PdfiumRasterizer;

impl Rasterizer for PdfiumRasterizer {
    fn name(&self) -> &'static str {
        "pdfium"
    }

    fn is_available(&self) -> bool {
        create_pdfium().is_ok()
    }

    fn rasterize_first_page(&self, pdf_path: &Path, dpi: u32) -> Result<Vec<DynamicImage>> {
        let pdfium = create_pdfium()
            .map_err(|e| Error::conversion(pdf_path, format!("PDFium unavailable: {}", e)))?;
        let document = pdfium
            .load_pdf_from_file(pdf_path, None)
            .map_err(|e| Error::conversion(pdf_path, e))?;

        let pages = document.pages();
        if pages.len() == 0 {
            return Ok(Vec::new());
        }
        let page = pages
            .get(0)
            .map_err(|e| Error::conversion(pdf_path, format!("Failed to get page 1: {}", e)))?;

        let scale = dpi as f32 / 72.0;
        let width = (page.width().value * scale).round() as i32;
        let height = (page.height().value * scale).round() as i32;

        let config = PdfRenderConfig::new()
            .set_target_width(width)
            .set_target_height(height)
            .render_form_data(true)
            .render_annotations(true);

        let bitmap = page
            .render_with_config(&config)
            .map_err(|e| Error::conversion(pdf_path, format!("Failed to render page 1: {}", e)))?;

        Ok(vec![bitmap.as_image()])
    }
}

/// Shells out to poppler's `pdftoppm`
#[derive(Debug, Clone)]
pub struct PdftoppmRasterizer {
    binary: PathBuf,
}

impl Default for PdftoppmRasterizer {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("pdftoppm"),
        }
    }
}

impl PdftoppmRasterizer {
    pub fn with_binary<P: Into<PathBuf>>(binary: P) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Rasterizer for PdftoppmRasterizer {
    fn name(&self) -> &'static str {
        "pdftoppm"
    }

    fn is_available(&self) -> bool {
        Command::new(&self.binary).arg("-v").output().is_ok()
    }

    fn rasterize_first_page(&self, pdf_path: &Path, dpi: u32) -> Result<Vec<DynamicImage>> {
        let workdir = tempfile::tempdir()?;
        let prefix = workdir.path().join("page");

        let output = Command::new(&self.binary)
            .args(["-png", "-r"])
            .arg(dpi.to_string())
            .args(["-f", "1", "-l", "1"])
            .arg(pdf_path)
            .arg(&prefix)
            .output()
            .map_err(|e| Error::conversion(pdf_path, format!("failed to run pdftoppm: {}", e)))?;

        if !output.status.success() {
            return Err(Error::conversion(
                pdf_path,
                format!(
                    "pdftoppm exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }

        let mut pngs: Vec<PathBuf> = std::fs::read_dir(workdir.path())?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "png"))
            .collect();
        pngs.sort();

        pngs.iter()
            .map(|path| image::open(path).map_err(Error::from))
            .collect()
    }
}

/// Tries each backend in order until one renders.
///
/// Rendering never calls [`Rasterizer::is_available`]; a backend that cannot
/// run fails its render and the next one is tried.
pub struct AutoRasterizer {
    backends: Vec<Box<dyn Rasterizer>>,
}

impl Default for AutoRasterizer {
    fn default() -> Self {
        Self {
            backends: vec![
                Box::new(PdfiumRasterizer),
                Box::new(PdftoppmRasterizer::default()),
            ],
        }
    }
}

impl AutoRasterizer {
    pub fn new(backends: Vec<Box<dyn Rasterizer>>) -> Self {
        Self { backends }
    }
}

impl Rasterizer for AutoRasterizer {
    fn name(&self) -> &'static str {
        "auto"
    }

    fn is_available(&self) -> bool {
        self.backends.iter().any(|backend| backend.is_available())
    }

    fn rasterize_first_page(&self, pdf_path: &Path, dpi: u32) -> Result<Vec<DynamicImage>> {
        let mut last_error = None;
        for backend in &self.backends {
            match backend.rasterize_first_page(pdf_path, dpi) {
                Ok(images) => {
                    debug!(backend = backend.name(), "Rasterized first page");
                    return Ok(images);
                }
                Err(e) => {
                    warn!(backend = backend.name(), error = %e, "Rasterizer failed, trying next");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            let tried: Vec<_> = self.backends.iter().map(|b| b.name()).collect();
            Error::conversion(
                pdf_path,
                format!("no rasterizer available (tried {})", tried.join(", ")),
            )
        }))
    }
}

/// Rasterizer selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RasterBackend {
    #[default]
    Auto,
    Pdfium,
    Pdftoppm,
}

impl RasterBackend {
    pub fn build(self) -> Box<dyn Rasterizer> {
        match self {
            RasterBackend::Auto => Box::new(AutoRasterizer::default()),
            RasterBackend::Pdfium => Box::new(PdfiumRasterizer),
            RasterBackend::Pdftoppm => Box::new(PdftoppmRasterizer::default()),
        }
    }
}

impl FromStr for RasterBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(RasterBackend::Auto),
            "pdfium" => Ok(RasterBackend::Pdfium),
            "pdftoppm" | "poppler" => Ok(RasterBackend::Pdftoppm),
            other => Err(format!(
                "unknown rasterizer {:?} (expected auto, pdfium or pdftoppm)",
                other
            )),
        }
    }
}

impl std::fmt::Display for RasterBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RasterBackend::Auto => "auto",
            RasterBackend::Pdfium => "pdfium",
            RasterBackend::Pdftoppm => "pdftoppm",
        };
        f.write_str(name)
    }
}

/// Dimensions of a written preview
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PreviewInfo {
    pub width: u32,
    pub height: u32,
}

/// Render page 1 of `pdf_path` at 150 DPI into `png_path`
pub fn render_preview<P, Q>(pdf_path: P, png_path: Q) -> Result<PreviewInfo>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    render_preview_with(
        &AutoRasterizer::default(),
        pdf_path.as_ref(),
        png_path.as_ref(),
        DEFAULT_PREVIEW_DPI,
    )
}

/// Render page 1 of `pdf_path` with `rasterizer` at `dpi` into `png_path`.
///
/// Every failure is reported as [`Error::Conversion`] and leaves `png_path`
/// untouched.
pub fn render_preview_with(
    rasterizer: &dyn Rasterizer,
    pdf_path: &Path,
    png_path: &Path,
    dpi: u32,
) -> Result<PreviewInfo> {
    if !pdf_path.exists() {
        return Err(Error::conversion(pdf_path, "source does not exist"));
    }

    let images = rasterizer
        .rasterize_first_page(pdf_path, dpi)
        .map_err(|e| match e {
            Error::Conversion { .. } => e,
            other => Error::conversion(pdf_path, other),
        })?;
    let Some(first) = images.into_iter().next() else {
        return Err(Error::conversion(pdf_path, "rasterizer produced no images"));
    };

    let rgb = first.to_rgb8();
    save_png_atomically(&rgb, png_path).map_err(|e| Error::conversion(png_path, e))?;

    debug!(
        backend = rasterizer.name(),
        width = rgb.width(),
        height = rgb.height(),
        "Wrote preview"
    );
    Ok(PreviewInfo {
        width: rgb.width(),
        height: rgb.height(),
    })
}
