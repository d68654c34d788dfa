//! Error types for the PDF form filler

use thiserror::Error;

/// Result type alias for the PDF form filler
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the PDF form filler
#[derive(Error, Debug)]
pub enum Error {
    /// Field discovery failed: missing file or unparseable document
    #[error("Failed to extract form fields from {path}: {reason}")]
    Extraction { path: String, reason: String },

    /// Both fill strategies were exhausted, or the template is missing
    #[error("Failed to fill PDF form {path}: {reason}")]
    Filling { path: String, reason: String },

    /// Rasterization of the preview failed
    #[error("Failed to convert {path} to PNG: {reason}")]
    Conversion { path: String, reason: String },

    /// The PDF parsed fine but declares no form fields
    #[error("No form fields found in {path}")]
    NoFormFields { path: String },

    /// Upload rejected before any PDF processing
    #[error("Invalid upload: {reason}")]
    InvalidUpload { reason: String },

    /// Template id unknown to the store
    #[error("Template not found: {id}")]
    TemplateNotFound { id: u64 },

    /// Filled form id unknown to the store
    #[error("Filled form not found: {id}")]
    FilledFormNotFound { id: u64 },

    /// A background worker panicked or was cancelled
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Caller-imposed deadline expired
    #[error("Operation did not finish within {seconds}s")]
    DeadlineExceeded { seconds: u64 },

    /// Structurally broken PDF object graph
    #[error("Malformed PDF structure: {reason}")]
    Malformed { reason: String },

    /// Invalid configuration value
    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    /// lopdf error
    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Image encode/decode error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl Error {
    /// Return a sanitized error message safe to show to end users.
    /// Internal details (paths, library errors) are omitted.
    /// Full details should be logged via tracing before calling this.
    pub fn client_message(&self) -> String {
        match self {
            Error::Extraction { .. } => "Could not read the PDF".to_string(),
            Error::Filling { .. } => "Could not fill the PDF form".to_string(),
            Error::Conversion { .. } => "Could not render a preview image".to_string(),
            Error::NoFormFields { .. } => "No form fields found in the PDF".to_string(),
            Error::InvalidUpload { reason } => format!("Invalid upload: {}", reason),
            Error::TemplateNotFound { id } => format!("Template {} not found", id),
            Error::FilledFormNotFound { id } => format!("Filled form {} not found", id),
            Error::Task(_) => "Internal processing error".to_string(),
            Error::DeadlineExceeded { seconds } => {
                format!("Processing took longer than {} seconds", seconds)
            }
            Error::Malformed { .. } | Error::Pdf(_) => "PDF processing error".to_string(),
            Error::Config { reason } => format!("Invalid configuration: {}", reason),
            Error::Io(_) => "I/O error".to_string(),
            Error::Serialization(_) => "Serialization error".to_string(),
            Error::Image(_) => "Image processing error".to_string(),
        }
    }

    pub(crate) fn extraction(path: &std::path::Path, reason: impl ToString) -> Self {
        Error::Extraction {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn filling(path: &std::path::Path, reason: impl ToString) -> Self {
        Error::Filling {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn conversion(path: &std::path::Path, reason: impl ToString) -> Self {
        Error::Conversion {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Error::Malformed {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_no_fields_is_distinct_from_unreadable() {
        let unreadable = Error::extraction(Path::new("/tmp/a.pdf"), "bad xref");
        let empty = Error::NoFormFields {
            path: "/tmp/a.pdf".to_string(),
        };
        assert_ne!(unreadable.client_message(), empty.client_message());
        assert_eq!(empty.client_message(), "No form fields found in the PDF");
    }

    #[test]
    fn test_client_message_hides_internals() {
        let err = Error::filling(Path::new("/srv/secret/template.pdf"), "xref stream broken");
        let msg = err.client_message();
        assert!(!msg.contains("/srv/secret"));
        assert!(!msg.contains("xref"));
    }

    #[test]
    fn test_display_preserves_cause() {
        let err = Error::conversion(Path::new("out.pdf"), "pdftoppm exited with status 99");
        assert!(err.to_string().contains("pdftoppm exited with status 99"));
        assert!(err.to_string().contains("out.pdf"));
    }

    #[tokio::test]
    async fn test_panicked_task_is_not_reported_as_fill_failure() {
        let join_error = tokio::task::spawn_blocking::<_, ()>(|| panic!("worker panicked"))
            .await
            .unwrap_err();

        let err = Error::from(join_error);
        assert!(matches!(err, Error::Task(_)));
        assert_eq!(err.client_message(), "Internal processing error");
    }
}
