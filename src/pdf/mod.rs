//! PDF processing layer
//!
//! Field discovery, the two fill strategies and preview rendering. Structure is
//! read and written with lopdf; previews are rasterized through PDFium or poppler.

mod document;
mod extract;
mod fill;
mod output;
mod overlay;
mod render;

#[cfg(test)]
pub(crate) mod fixtures;

pub use document::{
    decode_text_string, normalize_field_name, FieldRect, FormDocument, FormPage, Widget,
};
pub use extract::{extract_fields, field_names};
pub use fill::{
    fill_form, fill_form_with, native_fill, run_fill, verify_counts, FieldMap, FileFill,
    FillBackend, FillOutcome, FillStep, FillStrategy, Verdict,
};
pub use overlay::{
    build_overlay, collect_page_field_info, merge_overlay, overlay_fill, OverlayCanvas,
    OverlayConfig, PageFieldInfo, FONT_RESOURCE,
};
pub(crate) use output::write_atomically;
pub use render::{
    render_preview, render_preview_with, AutoRasterizer, PdfiumRasterizer, PdftoppmRasterizer,
    PreviewInfo, RasterBackend, Rasterizer, DEFAULT_PREVIEW_DPI,
};

#[cfg(test)]
pub(crate) use render::tests::FakeRasterizer;
