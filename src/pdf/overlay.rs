//! Overlay filling
//!
//! When a form's field structure cannot be filled in place, each value is
//! drawn as ordinary page content at its widget's position. A blank overlay
//! document with one page per template page is built on a fixed generic page
//! size, written to a scratch file, reloaded and stamped onto the template.

use crate::error::{Error, Result};
use crate::pdf::document::{FieldRect, FormDocument, MAX_FIELD_DEPTH};
use crate::pdf::fill::FieldMap;
use crate::pdf::output::save_pdf_atomically;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Resource name the overlay font is registered under on every page
pub const FONT_RESOURCE: &str = "FormFillHelv";

/// Helvetica ascender in text space units per point of font size
const HELVETICA_ASCENT: f64 = 0.718;

/// Line advance for multi-line values, as a multiple of font size
const LINE_SPACING: f64 = 1.2;

/// Overlay page geometry and typography
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayConfig {
    /// Overlay page width in points (default: 612, US Letter)
    pub page_width: f64,
    /// Overlay page height in points (default: 792, US Letter)
    pub page_height: f64,
    /// Font size in points (default: 12)
    pub font_size: f64,
    /// Where the intermediate overlay PDF is written (default: system temp dir)
    pub scratch_dir: Option<PathBuf>,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            page_width: 612.0,
            page_height: 792.0,
            font_size: 12.0,
            scratch_dir: None,
        }
    }
}

/// A value to draw and where
#[derive(Debug, Clone, PartialEq)]
pub struct PageFieldInfo {
    pub page_index: usize,
    pub rect: FieldRect,
    pub value: String,
}

/// Widgets with a value in `fields` and a usable rectangle
pub fn collect_page_field_info(form: &FormDocument, fields: &FieldMap) -> Vec<PageFieldInfo> {
    form.widgets()
        .filter(|(_, widget)| widget.is_widget)
        .filter_map(|(page_index, widget)| {
            let value = fields.get(&widget.name)?;
            match widget.rect {
                Some(rect) => Some(PageFieldInfo {
                    page_index,
                    rect,
                    value: value.clone(),
                }),
                None => {
                    warn!(field = %widget.name, page = page_index, "No usable /Rect, not drawing");
                    None
                }
            }
        })
        .collect()
}

/// Drawing surface with the origin at the top-left corner
pub struct OverlayCanvas {
    height: f64,
    font_size: f64,
    operations: Vec<Operation>,
}

impl OverlayCanvas {
    pub fn new(height: f64, font_size: f64) -> Self {
        Self {
            height,
            font_size,
            operations: Vec::new(),
        }
    }

    /// Draw `text` with its top edge `y_top` points below the top of the page
    pub fn draw_text(&mut self, x: f64, y_top: f64, text: &str) {
        let first_baseline = self.height - y_top - HELVETICA_ASCENT * self.font_size;
        for (line_no, line) in text.lines().enumerate() {
            let encoded = win_ansi_bytes(line);
            if encoded.is_empty() {
                continue;
            }
            let baseline = first_baseline - line_no as f64 * LINE_SPACING * self.font_size;
            self.operations.extend([
                Operation::new("BT", vec![]),
                Operation::new(
                    "Tf",
                    vec![
                        Object::Name(FONT_RESOURCE.as_bytes().to_vec()),
                        Object::Real(self.font_size as f32),
                    ],
                ),
                Operation::new(
                    "Tm",
                    vec![
                        1.into(),
                        0.into(),
                        0.into(),
                        1.into(),
                        Object::Real(x as f32),
                        Object::Real(baseline as f32),
                    ],
                ),
                Operation::new("Tj", vec![Object::String(encoded, StringFormat::Literal)]),
                Operation::new("ET", vec![]),
            ]);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    fn into_content(self) -> Content {
        Content {
            operations: self.operations,
        }
    }
}

/// Encode text for a WinAnsi-encoded standard font; unmappable characters become `?`
fn win_ansi_bytes(text: &str) -> Vec<u8> {
    text.chars()
        .filter_map(|c| match c as u32 {
            0x09 => Some(b' '),
            code @ 0x20..=0x7E => Some(code as u8),
            code @ 0xA0..=0xFF => Some(code as u8),
            code if code < 0x20 || code == 0x7F => None,
            _ => Some(match c {
                '€' => 0x80,
                '‚' => 0x82,
                '„' => 0x84,
                '…' => 0x85,
                '‘' => 0x91,
                '’' => 0x92,
                '“' => 0x93,
                '”' => 0x94,
                '•' => 0x95,
                '\u{2013}' => 0x96,
                '\u{2014}' => 0x97,
                '™' => 0x99,
                _ => b'?',
            }),
        })
        .collect()
}

/// Build the overlay document: one blank page per template page with values drawn on it
pub fn build_overlay(
    page_count: usize,
    infos: &[PageFieldInfo],
    config: &OverlayConfig,
) -> Result<Document> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { FONT_RESOURCE => font_id },
    });

    let mut kids = Vec::with_capacity(page_count);
    for page_index in 0..page_count {
        let mut canvas = OverlayCanvas::new(config.page_height, config.font_size);
        for info in infos.iter().filter(|info| info.page_index == page_index) {
            canvas.draw_text(info.rect.x1, config.page_height - info.rect.y2, &info.value);
        }

        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            canvas.into_content().encode()?,
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![
                0.into(),
                0.into(),
                Object::Real(config.page_width as f32),
                Object::Real(config.page_height as f32),
            ],
        });
        kids.push(Object::Reference(page_id));
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    Ok(doc)
}

/// Draw `fields` over `template` and save to `output`. Returns widgets drawn.
pub fn overlay_fill(
    template: &Path,
    fields: &FieldMap,
    output: &Path,
    config: &OverlayConfig,
) -> Result<usize> {
    let mut doc = Document::load(template)?;
    let form = FormDocument::from_document(&doc);
    let infos = collect_page_field_info(&form, fields);
    debug!(
        pages = form.page_count(),
        drawn = infos.len(),
        "Building overlay"
    );

    let mut overlay = build_overlay(form.page_count(), &infos, config)?;

    // Removed when `scratch` drops, on every path out of this function
    let mut builder = tempfile::Builder::new();
    builder.prefix("overlay_").suffix(".pdf");
    let mut scratch = match &config.scratch_dir {
        Some(dir) => builder.tempfile_in(dir)?,
        None => builder.tempfile()?,
    };
    overlay.save_to(scratch.as_file_mut())?;
    scratch.as_file_mut().flush()?;

    let overlay = Document::load(scratch.path())?;
    merge_overlay(&mut doc, &overlay)?;
    save_pdf_atomically(&mut doc, output)?;

    Ok(infos.len())
}

/// Stamp each overlay page onto the template page with the same index.
///
/// Template content is wrapped in `q`/`Q` so its graphics state cannot leak
/// into the overlay; the overlay font is added to the page resources.
pub fn merge_overlay(doc: &mut Document, overlay: &Document) -> Result<()> {
    let template_pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
    let overlay_pages: Vec<ObjectId> = overlay.get_pages().into_values().collect();
    if template_pages.len() != overlay_pages.len() {
        return Err(Error::malformed(format!(
            "overlay has {} pages, template has {}",
            overlay_pages.len(),
            template_pages.len()
        )));
    }

    let mut font_id = None;
    for (page_id, overlay_page_id) in template_pages.into_iter().zip(overlay_pages) {
        let drawn = overlay.get_page_content(overlay_page_id)?;
        if drawn.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let font_id = match font_id {
            Some(id) => id,
            None => {
                let id = doc.add_object(overlay_font(overlay, overlay_page_id)?);
                font_id = Some(id);
                id
            }
        };

        let mut stamped = b"\nQ\n".to_vec();
        stamped.extend_from_slice(&drawn);
        stamped.push(b'\n');

        let contents = existing_contents(doc, page_id)?;
        let resources = resources_with_font(doc, page_id, font_id)?;

        let save_id = doc.add_object(Stream::new(dictionary! {}, b"q\n".to_vec()));
        let stamp_id = doc.add_object(Stream::new(dictionary! {}, stamped));

        let mut wrapped = Vec::with_capacity(contents.len() + 2);
        wrapped.push(Object::Reference(save_id));
        wrapped.extend(contents);
        wrapped.push(Object::Reference(stamp_id));

        let page = doc.get_object_mut(page_id)?.as_dict_mut()?;
        page.set("Contents", wrapped);
        page.set("Resources", resources);
    }
    Ok(())
}

fn overlay_font(overlay: &Document, overlay_page_id: ObjectId) -> Result<Dictionary> {
    let resources = effective_resources(overlay, overlay_page_id)?;
    let fonts = overlay.dereference(resources.get(b"Font")?)?.1.as_dict()?;
    let font = overlay.dereference(fonts.get(FONT_RESOURCE.as_bytes())?)?.1;
    Ok(font.as_dict()?.clone())
}

fn existing_contents(doc: &Document, page_id: ObjectId) -> Result<Vec<Object>> {
    let page = doc.get_dictionary(page_id)?;
    let contents = match page.get(b"Contents") {
        Ok(Object::Array(items)) => items.clone(),
        Ok(Object::Reference(id)) => match doc.get_object(*id)? {
            Object::Array(items) => items.clone(),
            _ => vec![Object::Reference(*id)],
        },
        Ok(_) => {
            warn!(?page_id, "Ignoring inline /Contents");
            Vec::new()
        }
        Err(_) => Vec::new(),
    };
    Ok(contents)
}

/// The page's resources, resolved through `/Parent` inheritance and copied
fn effective_resources(doc: &Document, page_id: ObjectId) -> Result<Dictionary> {
    let mut current = doc.get_dictionary(page_id)?;
    for _ in 0..MAX_FIELD_DEPTH {
        if let Ok(resources) = current.get(b"Resources") {
            return Ok(doc.dereference(resources)?.1.as_dict()?.clone());
        }
        match current.get(b"Parent").and_then(Object::as_reference) {
            Ok(parent) => current = doc.get_dictionary(parent)?,
            Err(_) => break,
        }
    }
    Ok(Dictionary::new())
}

fn resources_with_font(doc: &Document, page_id: ObjectId, font_id: ObjectId) -> Result<Dictionary> {
    let mut resources = effective_resources(doc, page_id)?;
    let mut fonts = match resources.get(b"Font") {
        Ok(fonts) => doc.dereference(fonts)?.1.as_dict()?.clone(),
        Err(_) => Dictionary::new(),
    };
    fonts.set(FONT_RESOURCE, font_id);
    resources.set("Font", fonts);
    Ok(resources)
}
