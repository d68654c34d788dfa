//! Field discovery

use crate::error::{Error, Result};
use crate::pdf::document::FormDocument;
use std::path::Path;
use tracing::debug;

/// List the fillable field names of a PDF.
///
/// Names come from the AcroForm field tree when it declares any terminal
/// fields, otherwise from the named annotations of every page. Each name is
/// reported once, in document order. A well-formed PDF without fields yields
/// an empty list; a missing or unparseable file is [`Error::Extraction`].
pub fn extract_fields<P: AsRef<Path>>(pdf_path: P) -> Result<Vec<String>> {
    let path = pdf_path.as_ref();
    if !path.exists() {
        return Err(Error::extraction(path, "file does not exist"));
    }

    let form = FormDocument::open(path).map_err(|e| Error::extraction(path, e))?;
    let fields = field_names(&form);

    debug!(
        path = %path.display(),
        count = fields.len(),
        from_acroform = !form.acroform_fields.is_empty(),
        "Extracted form fields"
    );
    Ok(fields)
}

/// Field names of an already-parsed form
pub fn field_names(form: &FormDocument) -> Vec<String> {
    if !form.acroform_fields.is_empty() {
        return form.acroform_fields.clone();
    }
    form.widget_names()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::fixtures::FormFixture;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_missing_file_is_extraction_error() {
        let result = extract_fields("/nonexistent/path/form.pdf");
        assert!(matches!(result, Err(Error::Extraction { .. })));
    }

    #[test]
    fn test_garbage_file_is_extraction_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.pdf");
        std::fs::write(&path, b"this is not a pdf").unwrap();

        let result = extract_fields(&path);
        assert!(matches!(result, Err(Error::Extraction { .. })));
    }

    #[test]
    fn test_no_fields_is_empty_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.pdf");
        FormFixture::new(1).write(&path);

        assert_eq!(extract_fields(&path).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_acroform_fields_in_document_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("form.pdf");
        FormFixture::new(1)
            .field("name", 0, [72.0, 700.0, 272.0, 720.0])
            .field("date", 0, [72.0, 650.0, 172.0, 670.0])
            .write(&path);

        assert_eq!(extract_fields(&path).unwrap(), vec!["name", "date"]);
    }

    #[test]
    fn test_annotation_fallback_without_acroform() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("annots.pdf");
        FormFixture::new(2)
            .field("name", 0, [72.0, 700.0, 272.0, 720.0])
            .field("signature_date", 1, [72.0, 100.0, 172.0, 120.0])
            .field("name", 1, [72.0, 650.0, 272.0, 670.0])
            .without_acroform()
            .write(&path);

        assert_eq!(
            extract_fields(&path).unwrap(),
            vec!["name", "signature_date"]
        );
    }
}
