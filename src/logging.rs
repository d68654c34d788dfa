//! Tracing setup
//!
//! The pipeline never installs a global subscriber. Each [`FormPipeline`](crate::FormPipeline)
//! builds its own [`Dispatch`] from a [`LogConfig`] and runs its operations under it; the
//! binary installs the same layer stack globally for its own messages.

use crate::error::{Error, Result};
use std::io::IsTerminal;
use tracing::Dispatch;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when neither `PDF_FORM_FILLER_LOG` nor `RUST_LOG` is set
pub const DEFAULT_FILTER: &str = "pdf_form_filler=info";

/// Log output settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// `EnvFilter` directives, e.g. `pdf_form_filler=debug,lopdf=warn`
    pub filter: String,
    /// Colorize output
    pub ansi: bool,
    /// Include the event target (module path)
    pub with_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            ansi: false,
            with_target: true,
        }
    }
}

impl LogConfig {
    /// Read the filter from `PDF_FORM_FILLER_LOG`, then `RUST_LOG`
    pub fn from_env() -> Self {
        let filter = std::env::var("PDF_FORM_FILLER_LOG")
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or_else(|_| DEFAULT_FILTER.to_string());
        Self {
            filter,
            ansi: std::io::stderr().is_terminal(),
            with_target: true,
        }
    }

    /// Discard everything
    pub fn silent() -> Self {
        Self {
            filter: "off".to_string(),
            ..Self::default()
        }
    }

    fn env_filter(&self) -> Result<EnvFilter> {
        EnvFilter::try_new(&self.filter).map_err(|e| Error::Config {
            reason: format!("invalid log filter {:?}: {}", self.filter, e),
        })
    }

    /// Build a dispatcher that writes to stderr
    pub fn dispatch(&self) -> Result<Dispatch> {
        let subscriber = tracing_subscriber::registry().with(self.env_filter()?).with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(self.ansi)
                .with_target(self.with_target),
        );
        Ok(Dispatch::new(subscriber))
    }

    /// Install the subscriber process-wide
    pub fn init_global(&self) -> Result<()> {
        tracing_subscriber::registry()
            .with(self.env_filter()?)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(self.ansi)
                    .with_target(self.with_target),
            )
            .try_init()
            .map_err(|e| Error::Config {
                reason: e.to_string(),
            })
    }
}
