//! Pipeline configuration

use crate::error::{Error, Result};
use crate::logging::LogConfig;
use crate::pdf::{OverlayConfig, RasterBackend, DEFAULT_PREVIEW_DPI};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default upload cap: 16 MiB
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 16 * 1024 * 1024;

/// Name of the metadata file inside the data directory
pub const STORE_FILE_NAME: &str = "forms.json";

/// Storage, rendering and logging settings for a [`FormPipeline`](crate::FormPipeline)
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root for uploaded templates, filled PDFs and previews
    pub data_dir: PathBuf,
    /// Metadata file; `None` keeps records in memory only
    pub store_path: Option<PathBuf>,
    /// Largest accepted upload in bytes (default: 16 MiB)
    pub max_upload_bytes: u64,
    /// Preview resolution (default: 150)
    pub preview_dpi: u32,
    /// Rasterizer selection (default: auto)
    pub raster_backend: RasterBackend,
    pub overlay: OverlayConfig,
    pub log: LogConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: std::env::temp_dir().join("pdf_uploads"),
            store_path: None,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            preview_dpi: DEFAULT_PREVIEW_DPI,
            raster_backend: RasterBackend::Auto,
            overlay: OverlayConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Keep files and a persistent metadata file under `dir`
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        let data_dir = dir.as_ref().to_path_buf();
        Self {
            store_path: Some(data_dir.join(STORE_FILE_NAME)),
            data_dir,
            ..Self::default()
        }
    }

    /// Build from `PDF_FORM_FILLER_*` environment variables.
    ///
    /// Unset variables keep their defaults; unparseable ones are an error.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var_os("PDF_FORM_FILLER_DATA_DIR") {
            Some(dir) => Self::in_dir(PathBuf::from(dir)),
            None => Self::in_dir(Self::default().data_dir),
        };

        if let Some(bytes) = env_value::<u64>("PDF_FORM_FILLER_MAX_UPLOAD_BYTES")? {
            config.max_upload_bytes = bytes;
        }
        if let Some(dpi) = env_value::<u32>("PDF_FORM_FILLER_PREVIEW_DPI")? {
            if dpi == 0 {
                return Err(Error::Config {
                    reason: "PDF_FORM_FILLER_PREVIEW_DPI must be positive".to_string(),
                });
            }
            config.preview_dpi = dpi;
        }
        if let Some(backend) = env_value::<RasterBackend>("PDF_FORM_FILLER_RASTERIZER")? {
            config.raster_backend = backend;
        }
        config.log = LogConfig::from_env();

        Ok(config)
    }

    /// Directory holding templates and filled outputs
    pub fn upload_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }
}

fn env_value<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config {
                reason: format!("{}={:?}: {}", key, raw, e),
            }),
        Err(_) => Ok(None),
    }
}
