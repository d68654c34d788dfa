//! Template and filled-form metadata
//!
//! Records live in memory behind a mutex and, when the store has a path, are
//! mirrored to a JSON file. A mutation is applied to a copy, written out, and
//! only then made visible, so a failed write leaves both the file and the
//! in-memory state as they were.

use crate::error::{Error, Result};
use crate::pdf::write_atomically;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

fn default_field_type() -> String {
    "text".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormFieldRecord {
    pub name: String,
    #[serde(default = "default_field_type")]
    pub field_type: String,
}

impl FormFieldRecord {
    pub fn text<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            field_type: default_field_type(),
        }
    }
}

/// A registered form template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateRecord {
    pub id: u64,
    /// Display name
    pub name: String,
    /// Stored copy of the uploaded PDF
    pub file_path: PathBuf,
    /// Sanitized name of the uploaded file
    pub original_filename: String,
    pub fields: Vec<FormFieldRecord>,
    pub created_at: DateTime<Utc>,
}

impl TemplateRecord {
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|field| field.name.as_str())
    }
}

/// One submission of a template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilledFormRecord {
    pub id: u64,
    pub template_id: u64,
    pub pdf_path: PathBuf,
    /// Absent when the preview could not be rendered
    pub png_path: Option<PathBuf>,
    /// The submitted field map as JSON
    pub data: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTemplate {
    pub name: String,
    pub file_path: PathBuf,
    pub original_filename: String,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct NewFilledForm {
    pub template_id: u64,
    pub pdf_path: PathBuf,
    pub png_path: Option<PathBuf>,
    pub data: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreData {
    last_template_id: u64,
    last_filled_form_id: u64,
    templates: Vec<TemplateRecord>,
    filled_forms: Vec<FilledFormRecord>,
}

/// Metadata store for templates and filled forms
pub struct FormStore {
    inner: Mutex<StoreData>,
    path: Option<PathBuf>,
}

impl FormStore {
    /// A store that keeps nothing on disk
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(StoreData::default()),
            path: None,
        }
    }

    /// Load the store at `path`, starting empty if the file does not exist yet
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let data = if path.exists() {
            let bytes = std::fs::read(&path)?;
            serde_json::from_slice(&bytes)?
        } else {
            StoreData::default()
        };
        debug!(
            path = %path.display(),
            templates = data.templates.len(),
            filled_forms = data.filled_forms.len(),
            "Opened form store"
        );

        Ok(Self {
            inner: Mutex::new(data),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn commit<T>(&self, mutate: impl FnOnce(&mut StoreData) -> Result<T>) -> Result<T> {
        let mut guard = self.inner.lock();
        let mut next = guard.clone();
        let value = mutate(&mut next)?;
        if let Some(path) = &self.path {
            write_atomically(path, |writer| {
                serde_json::to_writer_pretty(&mut *writer, &next)?;
                Ok(())
            })?;
        }
        *guard = next;
        Ok(value)
    }

    pub fn add_template(&self, new: NewTemplate) -> Result<TemplateRecord> {
        self.commit(|data| {
            data.last_template_id += 1;
            let record = TemplateRecord {
                id: data.last_template_id,
                name: new.name,
                file_path: new.file_path,
                original_filename: new.original_filename,
                fields: new.fields.into_iter().map(FormFieldRecord::text).collect(),
                created_at: Utc::now(),
            };
            data.templates.push(record.clone());
            Ok(record)
        })
    }

    pub fn template(&self, id: u64) -> Result<TemplateRecord> {
        self.inner
            .lock()
            .templates
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or(Error::TemplateNotFound { id })
    }

    /// All templates, oldest first
    pub fn templates(&self) -> Vec<TemplateRecord> {
        self.inner.lock().templates.clone()
    }

    pub fn add_filled_form(&self, new: NewFilledForm) -> Result<FilledFormRecord> {
        self.commit(|data| {
            if !data.templates.iter().any(|t| t.id == new.template_id) {
                return Err(Error::TemplateNotFound {
                    id: new.template_id,
                });
            }
            data.last_filled_form_id += 1;
            let record = FilledFormRecord {
                id: data.last_filled_form_id,
                template_id: new.template_id,
                pdf_path: new.pdf_path,
                png_path: new.png_path,
                data: new.data,
                created_at: Utc::now(),
            };
            data.filled_forms.push(record.clone());
            Ok(record)
        })
    }

    pub fn filled_form(&self, id: u64) -> Result<FilledFormRecord> {
        self.inner
            .lock()
            .filled_forms
            .iter()
            .find(|f| f.id == id)
            .cloned()
            .ok_or(Error::FilledFormNotFound { id })
    }

    /// All filled forms, newest first
    pub fn filled_forms(&self) -> Vec<FilledFormRecord> {
        newest_first(self.inner.lock().filled_forms.iter())
    }

    /// Filled forms of one template, newest first
    pub fn filled_forms_for(&self, template_id: u64) -> Vec<FilledFormRecord> {
        newest_first(
            self.inner
                .lock()
                .filled_forms
                .iter()
                .filter(|f| f.template_id == template_id),
        )
    }

    /// Remove a template and every filled form made from it
    pub fn remove_template(&self, id: u64) -> Result<(TemplateRecord, Vec<FilledFormRecord>)> {
        self.commit(|data| {
            let position = data
                .templates
                .iter()
                .position(|t| t.id == id)
                .ok_or(Error::TemplateNotFound { id })?;
            let template = data.templates.remove(position);
            let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut data.filled_forms)
                .into_iter()
                .partition(|f| f.template_id == id);
            data.filled_forms = kept;
            Ok((template, removed))
        })
    }

    pub fn remove_filled_form(&self, id: u64) -> Result<FilledFormRecord> {
        self.commit(|data| {
            let position = data
                .filled_forms
                .iter()
                .position(|f| f.id == id)
                .ok_or(Error::FilledFormNotFound { id })?;
            Ok(data.filled_forms.remove(position))
        })
    }
}

fn newest_first<'a>(forms: impl Iterator<Item = &'a FilledFormRecord>) -> Vec<FilledFormRecord> {
    let mut forms: Vec<_> = forms.cloned().collect();
    forms.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    forms
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn new_template(name: &str) -> NewTemplate {
        NewTemplate {
            name: name.to_string(),
            file_path: PathBuf::from(format!("/data/uploads/{}.pdf", name)),
            original_filename: format!("{}.pdf", name),
            fields: vec!["name".to_string(), "date".to_string()],
        }
    }

    fn new_form(template_id: u64) -> NewFilledForm {
        NewFilledForm {
            template_id,
            pdf_path: PathBuf::from("/data/uploads/filled.pdf"),
            png_path: None,
            data: "{}".to_string(),
        }
    }

    #[test]
    fn test_ids_are_monotonic() {
        let store = FormStore::in_memory();
        let a = store.add_template(new_template("a")).unwrap();
        let b = store.add_template(new_template("b")).unwrap();
        store.remove_template(b.id).unwrap();
        let c = store.add_template(new_template("c")).unwrap();

        assert_eq!((a.id, b.id, c.id), (1, 2, 3));
        assert_eq!(a.fields[0], FormFieldRecord::text("name"));
    }

    #[test]
    fn test_filled_form_requires_template() {
        let store = FormStore::in_memory();
        let result = store.add_filled_form(new_form(42));
        assert!(matches!(result, Err(Error::TemplateNotFound { id: 42 })));
        assert!(store.filled_forms().is_empty());
    }

    #[test]
    fn test_filled_forms_newest_first() {
        let store = FormStore::in_memory();
        let template = store.add_template(new_template("a")).unwrap();
        let first = store.add_filled_form(new_form(template.id)).unwrap();
        let second = store.add_filled_form(new_form(template.id)).unwrap();

        let ids: Vec<u64> = store.filled_forms().iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[test]
    fn test_remove_template_cascades() {
        let store = FormStore::in_memory();
        let a = store.add_template(new_template("a")).unwrap();
        let b = store.add_template(new_template("b")).unwrap();
        store.add_filled_form(new_form(a.id)).unwrap();
        let kept = store.add_filled_form(new_form(b.id)).unwrap();

        let (removed, forms) = store.remove_template(a.id).unwrap();
        assert_eq!(removed.id, a.id);
        assert_eq!(forms.len(), 1);
        assert_eq!(store.filled_forms(), vec![kept]);
        assert!(matches!(
            store.template(a.id),
            Err(Error::TemplateNotFound { .. })
        ));
    }

    #[test]
    fn test_remove_missing_filled_form() {
        let store = FormStore::in_memory();
        assert!(matches!(
            store.remove_filled_form(7),
            Err(Error::FilledFormNotFound { id: 7 })
        ));
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta").join("forms.json");

        let store = FormStore::open(&path).unwrap();
        let template = store.add_template(new_template("a")).unwrap();
        store.add_filled_form(new_form(template.id)).unwrap();
        drop(store);

        let reopened = FormStore::open(&path).unwrap();
        assert_eq!(reopened.templates(), vec![template]);
        assert_eq!(reopened.filled_forms_for(1).len(), 1);
        let next = reopened.add_template(new_template("b")).unwrap();
        assert_eq!(next.id, 2);
    }

    #[test]
    fn test_corrupt_store_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forms.json");
        std::fs::write(&path, b"{ not json").unwrap();
        assert!(matches!(
            FormStore::open(&path),
            Err(Error::Serialization(_))
        ));
    }
}
