//! Parsed form structure
//!
//! [`FormDocument`] is a plain-value snapshot of a PDF's widget annotations and
//! AcroForm field tree. It is built once from a parsed file and keeps no handles
//! into the lopdf object graph, so the extractor and the overlay strategy can both
//! read it while native-fill mutates its own freshly loaded document.

use crate::error::{Error, Result};
use lopdf::{Dictionary, Document, Object, ObjectId, StringFormat};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, warn};

/// Maximum depth followed through `/Parent` and `/Kids` chains
pub(crate) const MAX_FIELD_DEPTH: usize = 32;

/// Widget bounds in PDF user space (origin bottom-left, y up)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldRect {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl FieldRect {
    /// Create a rectangle, normalizing so that `x1 <= x2` and `y1 <= y2`
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    /// Parse a `/Rect` array, following indirect references
    pub(crate) fn from_object(doc: &Document, obj: &Object) -> Result<Self> {
        let (_, obj) = doc.dereference(obj)?;
        let items = obj.as_array()?;
        if items.len() < 4 {
            return Err(Error::malformed(format!(
                "Rect has {} entries, expected 4",
                items.len()
            )));
        }

        let mut bounds = [0.0f64; 4];
        for (slot, item) in bounds.iter_mut().zip(items.iter()) {
            let (_, item) = doc.dereference(item)?;
            *slot = number(item).ok_or_else(|| Error::malformed("Rect entry is not a number"))?;
        }

        Ok(Self::new(bounds[0], bounds[1], bounds[2], bounds[3]))
    }
}

/// One named annotation on a page
#[derive(Debug, Clone, PartialEq)]
pub struct Widget {
    /// Fully-qualified field name (parent names joined with `.`)
    pub name: String,
    /// On-page position, if `/Rect` parsed
    pub rect: Option<FieldRect>,
    /// Current `/V`, inherited from the owning field when the widget has none
    pub value: Option<String>,
    /// `/Subtype /Widget`
    pub is_widget: bool,
}

/// Named annotations of one page, in `/Annots` order
#[derive(Debug, Clone, PartialEq)]
pub struct FormPage {
    /// 0-indexed page position
    pub index: usize,
    pub widgets: Vec<Widget>,
}

/// Immutable view of a PDF's form structure
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FormDocument {
    pub pages: Vec<FormPage>,
    /// Terminal field names declared under `/AcroForm /Fields`, deduplicated
    pub acroform_fields: Vec<String>,
}

impl FormDocument {
    /// Parse a PDF file and snapshot its form structure
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let doc = Document::load(path.as_ref())?;
        Ok(Self::from_document(&doc))
    }

    /// Snapshot the form structure of an already-parsed document.
    ///
    /// Malformed annotations and fields are logged and skipped.
    pub fn from_document(doc: &Document) -> Self {
        let pages = doc
            .get_pages()
            .into_iter()
            .enumerate()
            .map(|(index, (page_number, page_id))| FormPage {
                index,
                widgets: page_widgets(doc, page_number, page_id),
            })
            .collect();

        Self {
            pages,
            acroform_fields: acroform_field_names(doc),
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// All named annotations with their 0-indexed page
    pub fn widgets(&self) -> impl Iterator<Item = (usize, &Widget)> {
        self.pages
            .iter()
            .flat_map(|page| page.widgets.iter().map(move |w| (page.index, w)))
    }

    /// Annotation names in page order, each recorded once
    pub fn widget_names(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.widgets()
            .filter(|(_, w)| seen.insert(w.name.as_str()))
            .map(|(_, w)| w.name.clone())
            .collect()
    }
}

/// Strip the parentheses some parsers leave around a `/T` string
pub fn normalize_field_name(raw: &str) -> String {
    raw.trim_start_matches('(').trim_end_matches(')').to_string()
}

/// Decode a PDF text string (UTF-16BE with BOM, UTF-8 with BOM, else Latin-1)
pub fn decode_text_string(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8_lossy(rest).into_owned();
    }
    bytes.iter().map(|&b| b as char).collect()
}

/// Encode a value as a PDF text string: ASCII stays literal, anything else
/// becomes UTF-16BE with a byte-order mark
pub(crate) fn encode_text_string(value: &str) -> Object {
    if value.is_ascii() {
        return Object::String(value.as_bytes().to_vec(), StringFormat::Literal);
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in value.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

/// Numeric value of an Integer or Real object
pub(crate) fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(f64::from(*r)),
        _ => None,
    }
}

/// The field's own `/T`, decoded and normalized
pub(crate) fn partial_name(doc: &Document, dict: &Dictionary) -> Result<Option<String>> {
    let raw = match dict.get(b"T") {
        Ok(obj) => obj,
        Err(_) => return Ok(None),
    };
    let (_, raw) = doc.dereference(raw)?;
    let text = match raw {
        Object::String(bytes, _) => decode_text_string(bytes),
        Object::Name(name) => String::from_utf8_lossy(name).into_owned(),
        _ => return Err(Error::malformed("/T is not a string")),
    };
    let name = normalize_field_name(&text);
    Ok((!name.is_empty()).then_some(name))
}

pub(crate) fn is_widget(dict: &Dictionary) -> bool {
    dict.get(b"Subtype")
        .and_then(Object::as_name)
        .map(|name| name == b"Widget")
        .unwrap_or(false)
}

/// Resolve an annotation's field name.
///
/// Widgets inherit and qualify their name through `/Parent`; other annotations
/// only count when they carry `/T` themselves.
pub(crate) fn annotation_name(doc: &Document, dict: &Dictionary) -> Result<Option<String>> {
    if !is_widget(dict) {
        return partial_name(doc, dict);
    }

    let mut parts = Vec::new();
    let mut visited = HashSet::new();
    let mut current = dict;
    for _ in 0..MAX_FIELD_DEPTH {
        if let Some(part) = partial_name(doc, current)? {
            parts.push(part);
        }
        match current.get(b"Parent") {
            Ok(Object::Reference(id)) => {
                if !visited.insert(*id) {
                    return Err(Error::malformed("cycle in /Parent chain"));
                }
                current = doc.get_dictionary(*id)?;
            }
            _ => break,
        }
    }

    if parts.is_empty() {
        return Ok(None);
    }
    parts.reverse();
    Ok(Some(parts.join(".")))
}

/// Object id of the nearest `/Parent` ancestor that carries `/T`.
///
/// `None` means the annotation names itself (or nothing names it).
pub(crate) fn owning_field(doc: &Document, dict: &Dictionary) -> Result<Option<ObjectId>> {
    if dict.has(b"T") {
        return Ok(None);
    }
    let mut visited = HashSet::new();
    let mut current = dict;
    for _ in 0..MAX_FIELD_DEPTH {
        let parent_id = match current.get(b"Parent") {
            Ok(Object::Reference(id)) => *id,
            _ => return Ok(None),
        };
        if !visited.insert(parent_id) {
            return Err(Error::malformed("cycle in /Parent chain"));
        }
        current = doc.get_dictionary(parent_id)?;
        if current.has(b"T") {
            return Ok(Some(parent_id));
        }
    }
    Ok(None)
}

/// Current `/V` of a field, looked up through `/Parent`
fn field_value(doc: &Document, dict: &Dictionary) -> Option<String> {
    let mut current = dict;
    for _ in 0..MAX_FIELD_DEPTH {
        if let Ok(value) = current.get(b"V") {
            return match doc.dereference(value).ok()?.1 {
                Object::String(bytes, _) => Some(decode_text_string(bytes)),
                Object::Name(name) => Some(String::from_utf8_lossy(name).into_owned()),
                _ => None,
            };
        }
        let parent = current.get(b"Parent").and_then(Object::as_reference).ok()?;
        current = doc.get_dictionary(parent).ok()?;
    }
    None
}

/// Entries of a page's `/Annots` array (references or inline dictionaries)
pub(crate) fn page_annotations(doc: &Document, page_id: ObjectId) -> Result<&[Object]> {
    let page = doc.get_dictionary(page_id)?;
    let annots = match page.get(b"Annots") {
        Ok(annots) => annots,
        Err(_) => return Ok(&[]),
    };
    let (_, annots) = doc.dereference(annots)?;
    Ok(annots.as_array()?.as_slice())
}

fn page_widgets(doc: &Document, page_number: u32, page_id: ObjectId) -> Vec<Widget> {
    let annots = match page_annotations(doc, page_id) {
        Ok(annots) => annots,
        Err(e) => {
            warn!(page = page_number, error = %e, "Skipping unreadable /Annots");
            return Vec::new();
        }
    };

    let mut widgets = Vec::new();
    for (position, entry) in annots.iter().enumerate() {
        match read_widget(doc, entry) {
            Ok(Some(widget)) => widgets.push(widget),
            Ok(None) => {}
            Err(e) => warn!(
                page = page_number,
                annotation = position,
                error = %e,
                "Skipping malformed annotation"
            ),
        }
    }
    widgets
}

fn read_widget(doc: &Document, entry: &Object) -> Result<Option<Widget>> {
    let (_, obj) = doc.dereference(entry)?;
    let dict = obj.as_dict()?;

    let Some(name) = annotation_name(doc, dict)? else {
        return Ok(None);
    };

    let rect = match dict.get(b"Rect") {
        Ok(rect) => match FieldRect::from_object(doc, rect) {
            Ok(rect) => Some(rect),
            Err(e) => {
                debug!(field = %name, error = %e, "Unparseable /Rect");
                None
            }
        },
        Err(_) => None,
    };

    Ok(Some(Widget {
        rect,
        value: field_value(doc, dict),
        is_widget: is_widget(dict),
        name,
    }))
}

/// The catalog's `/AcroForm` dictionary, if present
pub(crate) fn acroform(doc: &Document) -> Result<Option<&Dictionary>> {
    let root = doc.trailer.get(b"Root")?;
    let (_, root) = doc.dereference(root)?;
    let acroform = match root.as_dict()?.get(b"AcroForm") {
        Ok(obj) => obj,
        Err(_) => return Ok(None),
    };
    let (_, acroform) = doc.dereference(acroform)?;
    Ok(Some(acroform.as_dict()?))
}

fn acroform_fields(doc: &Document) -> Result<Option<&[Object]>> {
    let Some(form) = acroform(doc)? else {
        return Ok(None);
    };
    match form.get(b"Fields") {
        Ok(fields) => Ok(Some(doc.dereference(fields)?.1.as_array()?.as_slice())),
        Err(_) => Ok(None),
    }
}

fn acroform_field_names(doc: &Document) -> Vec<String> {
    let fields = match acroform_fields(doc) {
        Ok(Some(fields)) => fields,
        Ok(None) => return Vec::new(),
        Err(e) => {
            warn!(error = %e, "Ignoring unreadable /AcroForm");
            return Vec::new();
        }
    };

    let mut names = Vec::new();
    let mut visited = HashSet::new();
    for field in fields {
        collect_terminal_names(doc, field, None, 0, &mut visited, &mut names);
    }

    let mut seen = HashSet::new();
    names.retain(|name| seen.insert(name.clone()));
    names
}

fn collect_terminal_names(
    doc: &Document,
    entry: &Object,
    prefix: Option<&str>,
    depth: usize,
    visited: &mut HashSet<ObjectId>,
    out: &mut Vec<String>,
) {
    if let Err(e) = visit_field(doc, entry, prefix, depth, visited, out) {
        warn!(error = %e, "Skipping malformed form field");
    }
}

fn visit_field(
    doc: &Document,
    entry: &Object,
    prefix: Option<&str>,
    depth: usize,
    visited: &mut HashSet<ObjectId>,
    out: &mut Vec<String>,
) -> Result<()> {
    if depth >= MAX_FIELD_DEPTH {
        return Err(Error::malformed("field tree too deep"));
    }
    if let Object::Reference(id) = entry {
        if !visited.insert(*id) {
            return Err(Error::malformed("cycle in field tree"));
        }
    }

    let (_, obj) = doc.dereference(entry)?;
    let dict = obj.as_dict()?;

    let full_name = match (prefix, partial_name(doc, dict)?) {
        (Some(prefix), Some(part)) => Some(format!("{}.{}", prefix, part)),
        (None, Some(part)) => Some(part),
        (prefix, None) => prefix.map(str::to_string),
    };

    // Kids without /T are this field's widgets, not sub-fields
    let named_kids: Vec<&Object> = match dict.get(b"Kids") {
        Ok(kids) => doc
            .dereference(kids)?
            .1
            .as_array()?
            .iter()
            .filter(|kid| has_partial_name(doc, kid))
            .collect(),
        Err(_) => Vec::new(),
    };

    if named_kids.is_empty() {
        if let Some(name) = full_name {
            out.push(name);
        }
        return Ok(());
    }

    for kid in named_kids {
        collect_terminal_names(doc, kid, full_name.as_deref(), depth + 1, visited, out);
    }
    Ok(())
}

fn has_partial_name(doc: &Document, obj: &Object) -> bool {
    doc.dereference(obj)
        .ok()
        .and_then(|(_, obj)| obj.as_dict().ok())
        .map(|dict| dict.has(b"T"))
        .unwrap_or(false)
}
