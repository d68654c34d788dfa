//! PDF Form Filler Library
//!
//! Fills PDF form templates and renders PNG previews of the result:
//! - `extract_fields`: list the fillable field names of a PDF
//! - `fill_form`: write values natively, falling back to a drawn overlay
//! - `render_preview`: rasterize page 1 to PNG
//!
//! [`FormPipeline`] wraps the three with template storage and submission
//! bookkeeping.

pub mod config;
pub mod error;
pub mod logging;
pub mod pdf;
pub mod pipeline;
pub mod storage;

pub use config::PipelineConfig;
pub use error::{Error, Result};
pub use logging::LogConfig;
pub use pdf::{
    extract_fields, fill_form, render_preview, FieldMap, FillOutcome, FillStrategy, PreviewInfo,
};
pub use pipeline::FormPipeline;
pub use storage::{FilledFormRecord, FormStore, TemplateRecord};
