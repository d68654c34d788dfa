//! Form filling
//!
//! Filling is a small state machine:
//!
//! ```text
//! Attempt(Native) --ok--> Verify --consistent--> Done(Native)
//!       | err               | mismatch / err
//!       v                   v
//! Attempt(Overlay) --ok--> Done(Overlay)
//!       | err
//!       v
//!    Failed
//! ```
//!
//! Native filling writes `/V` into the existing field dictionaries. When that
//! fails, or the written file does not re-extract to the expected number of
//! fields, values are drawn on top of the template pages instead.

use crate::error::{Error, Result};
use crate::pdf::document::{
    acroform, annotation_name, encode_text_string, is_widget, owning_field, page_annotations,
};
use crate::pdf::extract::extract_fields;
use crate::pdf::output::save_pdf_atomically;
use crate::pdf::overlay::{overlay_fill, OverlayConfig};
use lopdf::{Document, Object, ObjectId};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Field name to value
pub type FieldMap = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillStrategy {
    /// Values written into the form's own fields
    Native,
    /// Values drawn as page content at the field positions
    Overlay,
}

impl std::fmt::Display for FillStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FillStrategy::Native => write!(f, "native"),
            FillStrategy::Overlay => write!(f, "overlay"),
        }
    }
}

/// Result of a successful fill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FillOutcome {
    pub strategy: FillStrategy,
    /// Entries in the field map
    pub fields_requested: usize,
    /// Widgets written (native) or drawn (overlay)
    pub fields_placed: usize,
}

/// Outcome of checking a native fill by re-extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Consistent,
    Mismatch { recovered: usize, expected: usize },
}

/// Compare the re-extracted field count with the map size.
///
/// Only a non-zero exact match counts as consistent. This does not check
/// that values landed, only that the field structure survived.
pub fn verify_counts(recovered: usize, expected: usize) -> Verdict {
    if recovered != 0 && recovered == expected {
        Verdict::Consistent
    } else {
        Verdict::Mismatch {
            recovered,
            expected,
        }
    }
}

#[derive(Debug)]
pub enum FillStep {
    Attempt(FillStrategy),
    Verify { placed: usize },
    Done(FillOutcome),
    Failed(Error),
}

/// The three actions the fill state machine sequences
pub trait FillBackend {
    /// Write values natively; returns widgets written
    fn native(&self) -> Result<usize>;
    /// Re-extract the natively filled output; returns the field count
    fn verify(&self) -> Result<usize>;
    /// Draw values as an overlay; returns widgets drawn
    fn overlay(&self) -> Result<usize>;
}

/// Run the state machine to completion over `backend`
pub fn run_fill<B: FillBackend + ?Sized>(backend: &B, requested: usize) -> Result<FillOutcome> {
    let mut step = FillStep::Attempt(FillStrategy::Native);
    loop {
        step = match step {
            FillStep::Attempt(FillStrategy::Native) => match backend.native() {
                Ok(placed) => FillStep::Verify { placed },
                Err(e) => {
                    warn!(error = %e, "Native fill failed, falling back to overlay");
                    FillStep::Attempt(FillStrategy::Overlay)
                }
            },
            FillStep::Verify { placed } => match backend.verify() {
                Ok(recovered) => match verify_counts(recovered, requested) {
                    Verdict::Consistent => FillStep::Done(FillOutcome {
                        strategy: FillStrategy::Native,
                        fields_requested: requested,
                        fields_placed: placed,
                    }),
                    Verdict::Mismatch {
                        recovered,
                        expected,
                    } => {
                        info!(
                            recovered,
                            expected, "Native fill did not verify, falling back to overlay"
                        );
                        FillStep::Attempt(FillStrategy::Overlay)
                    }
                },
                Err(e) => {
                    warn!(error = %e, "Could not re-read native fill, falling back to overlay");
                    FillStep::Attempt(FillStrategy::Overlay)
                }
            },
            FillStep::Attempt(FillStrategy::Overlay) => match backend.overlay() {
                Ok(placed) => FillStep::Done(FillOutcome {
                    strategy: FillStrategy::Overlay,
                    fields_requested: requested,
                    fields_placed: placed,
                }),
                Err(e) => FillStep::Failed(e),
            },
            FillStep::Done(outcome) => return Ok(outcome),
            FillStep::Failed(e) => return Err(e),
        };
    }
}

/// File-backed [`FillBackend`]
pub struct FileFill<'a> {
    template: &'a Path,
    fields: &'a FieldMap,
    output: &'a Path,
    overlay: &'a OverlayConfig,
    native_written: Cell<bool>,
}

impl<'a> FileFill<'a> {
    pub fn new(
        template: &'a Path,
        fields: &'a FieldMap,
        output: &'a Path,
        overlay: &'a OverlayConfig,
    ) -> Self {
        Self {
            template,
            fields,
            output,
            overlay,
            native_written: Cell::new(false),
        }
    }
}

impl FillBackend for FileFill<'_> {
    fn native(&self) -> Result<usize> {
        let placed = native_fill(self.template, self.fields, self.output)?;
        self.native_written.set(true);
        Ok(placed)
    }

    fn verify(&self) -> Result<usize> {
        Ok(extract_fields(self.output)?.len())
    }

    fn overlay(&self) -> Result<usize> {
        overlay_fill(self.template, self.fields, self.output, self.overlay)
    }
}

/// Fill `template` with `fields` into `output` using the default overlay layout
pub fn fill_form<P, Q>(template: P, fields: &FieldMap, output: Q) -> Result<FillOutcome>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    fill_form_with(template, fields, output, &OverlayConfig::default())
}

/// Fill `template` with `fields` into `output`.
///
/// Keys that match no widget are ignored and widgets without a value are left
/// alone. On failure the overlay error is returned as [`Error::Filling`] and no
/// output from this call is left behind.
pub fn fill_form_with<P, Q>(
    template: P,
    fields: &FieldMap,
    output: Q,
    overlay: &OverlayConfig,
) -> Result<FillOutcome>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let template = template.as_ref();
    let output = output.as_ref();

    if !template.exists() {
        return Err(Error::filling(template, "template does not exist"));
    }

    let backend = FileFill::new(template, fields, output, overlay);
    match run_fill(&backend, fields.len()) {
        Ok(outcome) => {
            info!(
                template = %template.display(),
                output = %output.display(),
                strategy = %outcome.strategy,
                requested = outcome.fields_requested,
                placed = outcome.fields_placed,
                "Filled form"
            );
            Ok(outcome)
        }
        Err(e) => {
            if backend.native_written.get() {
                if let Err(remove_err) = std::fs::remove_file(output) {
                    warn!(output = %output.display(), error = %remove_err, "Could not remove unverified output");
                }
            }
            Err(Error::filling(template, e))
        }
    }
}

/// Location of an annotation dictionary in the object graph
#[derive(Debug, Clone, Copy)]
enum AnnotSlot {
    Indirect(ObjectId),
    Inline { page_id: ObjectId, position: usize },
}

#[derive(Debug)]
struct ValueEdit {
    widget: AnnotSlot,
    /// Ancestor field that owns the name, when the widget has no `/T`
    owner: Option<ObjectId>,
    value: Object,
}

/// Write `fields` into the template's own widgets and save to `output`.
///
/// Returns the number of widgets written.
pub fn native_fill(template: &Path, fields: &FieldMap, output: &Path) -> Result<usize> {
    let mut doc = Document::load(template)?;

    let edits = plan_edits(&doc, fields)?;
    for edit in &edits {
        apply_edit(&mut doc, edit)?;
    }
    if mark_need_appearances(&mut doc)? {
        debug!("Set /NeedAppearances on the AcroForm");
    }

    save_pdf_atomically(&mut doc, output)?;
    Ok(edits.len())
}

fn plan_edits(doc: &Document, fields: &FieldMap) -> Result<Vec<ValueEdit>> {
    let mut edits = Vec::new();
    for (page_number, page_id) in doc.get_pages() {
        let annots = match page_annotations(doc, page_id) {
            Ok(annots) => annots,
            Err(e) => {
                warn!(page = page_number, error = %e, "Skipping unreadable /Annots");
                continue;
            }
        };
        for (position, entry) in annots.iter().enumerate() {
            match plan_edit(doc, page_id, position, entry, fields) {
                Ok(Some(edit)) => edits.push(edit),
                Ok(None) => {}
                Err(e) => warn!(
                    page = page_number,
                    annotation = position,
                    error = %e,
                    "Skipping malformed annotation"
                ),
            }
        }
    }
    Ok(edits)
}

fn plan_edit(
    doc: &Document,
    page_id: ObjectId,
    position: usize,
    entry: &Object,
    fields: &FieldMap,
) -> Result<Option<ValueEdit>> {
    let widget = match entry {
        Object::Reference(id) => AnnotSlot::Indirect(*id),
        _ => AnnotSlot::Inline { page_id, position },
    };

    let (_, obj) = doc.dereference(entry)?;
    let dict = obj.as_dict()?;
    if !is_widget(dict) {
        return Ok(None);
    }
    let Some(name) = annotation_name(doc, dict)? else {
        return Ok(None);
    };
    let Some(value) = fields.get(&name) else {
        return Ok(None);
    };

    Ok(Some(ValueEdit {
        widget,
        owner: owning_field(doc, dict)?,
        value: encode_text_string(value),
    }))
}

fn annots_array_mut(doc: &mut Document, page_id: ObjectId) -> Result<&mut Vec<Object>> {
    let indirect = doc
        .get_dictionary(page_id)?
        .get(b"Annots")?
        .as_reference()
        .ok();
    match indirect {
        Some(id) => Ok(doc.get_object_mut(id)?.as_array_mut()?),
        None => Ok(doc
            .get_object_mut(page_id)?
            .as_dict_mut()?
            .get_mut(b"Annots")?
            .as_array_mut()?),
    }
}

fn apply_edit(doc: &mut Document, edit: &ValueEdit) -> Result<()> {
    let widget = match edit.widget {
        AnnotSlot::Indirect(id) => doc.get_object_mut(id)?.as_dict_mut()?,
        AnnotSlot::Inline { page_id, position } => annots_array_mut(doc, page_id)?
            .get_mut(position)
            .ok_or_else(|| Error::malformed("annotation index out of range"))?
            .as_dict_mut()?,
    };

    // Stale appearance streams would keep showing the old value
    widget.remove(b"AP");
    if edit.owner.is_none() {
        widget.set("V", edit.value.clone());
    }

    if let Some(owner) = edit.owner {
        doc.get_object_mut(owner)?
            .as_dict_mut()?
            .set("V", edit.value.clone());
    }
    Ok(())
}

/// Ask viewers to regenerate field appearances. Returns whether an AcroForm exists.
pub(crate) fn mark_need_appearances(doc: &mut Document) -> Result<bool> {
    if acroform(doc)?.is_none() {
        return Ok(false);
    }

    let root_id = doc.trailer.get(b"Root")?.as_reference()?;
    let indirect = doc
        .get_dictionary(root_id)?
        .get(b"AcroForm")?
        .as_reference()
        .ok();
    let form = match indirect {
        Some(id) => doc.get_object_mut(id)?.as_dict_mut()?,
        None => doc
            .get_object_mut(root_id)?
            .as_dict_mut()?
            .get_mut(b"AcroForm")?
            .as_dict_mut()?,
    };
    form.set("NeedAppearances", true);
    Ok(true)
}
