//! Atomic output files
//!
//! Everything the pipeline writes goes to a sibling temp file first and is
//! renamed over the destination only after the write completed.

use crate::error::{Error, Result};
use image::{ImageFormat, RgbImage};
use lopdf::Document;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Write `output` through `write`, replacing it only if `write` succeeds
pub(crate) fn write_atomically<F>(output: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<&mut File>) -> Result<()>,
{
    let dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(temp.as_file_mut());
        write(&mut writer)?;
        writer.flush()?;
    }
    temp.as_file().sync_all()?;
    temp.persist(output).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

pub(crate) fn save_pdf_atomically(doc: &mut Document, output: &Path) -> Result<()> {
    write_atomically(output, |writer| {
        doc.save_to(writer)?;
        Ok(())
    })
}

pub(crate) fn save_png_atomically(image: &RgbImage, output: &Path) -> Result<()> {
    write_atomically(output, |writer| {
        image.write_to(writer, ImageFormat::Png)?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_write_leaves_destination_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.pdf");
        std::fs::write(&output, b"previous").unwrap();

        let result = write_atomically(&output, |writer| {
            writer.write_all(b"partial")?;
            Err(Error::malformed("boom"))
        });

        assert!(result.is_err());
        assert_eq!(std::fs::read(&output).unwrap(), b"previous");
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_successful_write_replaces_destination() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.png");

        let image = RgbImage::from_pixel(4, 3, image::Rgb([255, 255, 255]));
        save_png_atomically(&image, &output).unwrap();

        let decoded = image::open(&output).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (4, 3));
    }
}
