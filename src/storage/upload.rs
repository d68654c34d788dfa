//! Upload validation and stored file names

use crate::error::{Error, Result};
use std::io::Read;
use std::path::Path;

/// Name used when sanitizing leaves nothing behind
const FALLBACK_FILE_NAME: &str = "upload.pdf";

/// Check that `path` is an acceptable PDF upload. Returns its size in bytes.
pub fn validate_upload<P: AsRef<Path>>(path: P, max_bytes: u64) -> Result<u64> {
    let path = path.as_ref();

    if !path.is_file() {
        return Err(Error::InvalidUpload {
            reason: format!("{} is not a file", path.display()),
        });
    }

    let is_pdf = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
    if !is_pdf {
        return Err(Error::InvalidUpload {
            reason: "only .pdf files are accepted".to_string(),
        });
    }

    let size = std::fs::metadata(path)?.len();
    if size > max_bytes {
        return Err(Error::InvalidUpload {
            reason: format!("file is {} bytes, the limit is {}", size, max_bytes),
        });
    }

    // Validate PDF header
    let mut header = [0u8; 4];
    let mut file = std::fs::File::open(path)?;
    if file.read_exact(&mut header).is_err() || &header != b"%PDF" {
        return Err(Error::InvalidUpload {
            reason: "not a PDF file".to_string(),
        });
    }

    Ok(size)
}

/// Reduce a client-supplied file name to `[A-Za-z0-9._-]`
pub fn secure_filename(name: &str) -> String {
    // Keep only the last path component, whichever separator the client used
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);

    let cleaned: String = base
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    let cleaned = cleaned.trim_matches(['.', '_']).to_string();

    if cleaned.is_empty() {
        FALLBACK_FILE_NAME.to_string()
    } else {
        cleaned
    }
}

/// `{uuid}_{name}` for a stored template
pub fn template_file_name(original: &str) -> String {
    format!("{}_{}", uuid::Uuid::new_v4(), secure_filename(original))
}

/// `filled_{uuid}_{name}` and the matching `.png` name for one submission
pub fn filled_file_names(original: &str) -> (String, String) {
    let pdf = format!("filled_{}_{}", uuid::Uuid::new_v4(), secure_filename(original));
    let png = Path::new(&pdf)
        .with_extension("png")
        .to_string_lossy()
        .into_owned();
    (pdf, png)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("My Form.pdf", "My_Form.pdf")]
    #[case("../../etc/passwd", "passwd")]
    #[case("C:\\Users\\me\\tax form.PDF", "tax_form.PDF")]
    #[case("...hidden.pdf", "hidden.pdf")]
    #[case("résumé (final).pdf", "rsum_final.pdf")]
    #[case("////", "upload.pdf")]
    #[case("", "upload.pdf")]
    fn test_secure_filename(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(secure_filename(input), expected);
    }

    #[test]
    fn test_stored_names_are_unique() {
        let a = template_file_name("form.pdf");
        let b = template_file_name("form.pdf");
        assert_ne!(a, b);
        assert!(a.ends_with("_form.pdf"));
        assert_eq!(a.len(), 36 + 1 + "form.pdf".len());
    }

    #[test]
    fn test_filled_names_share_stem() {
        let (pdf, png) = filled_file_names("w 9.pdf");
        assert!(pdf.starts_with("filled_"));
        assert!(pdf.ends_with("_w_9.pdf"));
        assert_eq!(png, pdf.replace(".pdf", ".png"));
    }

    #[test]
    fn test_rejects_missing_file() {
        let result = validate_upload("/nonexistent/form.pdf", 1024);
        assert!(matches!(result, Err(Error::InvalidUpload { .. })));
    }

    #[test]
    fn test_rejects_wrong_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("form.txt");
        std::fs::write(&path, b"%PDF-1.5").unwrap();
        assert!(matches!(
            validate_upload(&path, 1024),
            Err(Error::InvalidUpload { .. })
        ));
    }

    #[test]
    fn test_rejects_oversized_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.PDF");
        std::fs::write(&path, [b'%', b'P', b'D', b'F', 0, 0, 0, 0]).unwrap();
        assert!(matches!(
            validate_upload(&path, 4),
            Err(Error::InvalidUpload { .. })
        ));
        assert_eq!(validate_upload(&path, 8).unwrap(), 8);
    }

    #[test]
    fn test_rejects_non_pdf_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.pdf");
        std::fs::write(&path, b"GIF89a").unwrap();
        assert!(matches!(
            validate_upload(&path, 1024),
            Err(Error::InvalidUpload { .. })
        ));
    }
}
