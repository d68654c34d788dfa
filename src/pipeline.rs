//! Form pipeline orchestration
//!
//! [`FormPipeline`] ties the components to storage: uploads become templates,
//! submissions become filled PDFs with previews, and every step is recorded in
//! the [`FormStore`]. All operations run under the pipeline's own tracing
//! dispatcher.

use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::pdf::{
    extract_fields, fill_form_with, render_preview_with, FieldMap, FillOutcome, PreviewInfo,
    Rasterizer,
};
use crate::storage::{
    filled_file_names, secure_filename, template_file_name, validate_upload, FilledFormRecord,
    FormStore, NewFilledForm, NewTemplate, TemplateRecord,
};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn, Dispatch};

/// Upload, fill and preview pipeline
#[derive(Clone)]
pub struct FormPipeline {
    config: Arc<PipelineConfig>,
    store: Arc<FormStore>,
    rasterizer: Arc<dyn Rasterizer>,
    dispatch: Dispatch,
}

impl FormPipeline {
    /// Create a pipeline with the rasterizer selected in `config`
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let rasterizer = config.raster_backend.build();
        Self::with_rasterizer(config, rasterizer)
    }

    /// Create a pipeline with an explicit rasterizer
    pub fn with_rasterizer(config: PipelineConfig, rasterizer: Box<dyn Rasterizer>) -> Result<Self> {
        let dispatch = config.log.dispatch()?;
        std::fs::create_dir_all(config.upload_dir())?;
        let store = match &config.store_path {
            Some(path) => FormStore::open(path)?,
            None => FormStore::in_memory(),
        };

        tracing::dispatcher::with_default(&dispatch, || {
            debug!(
                data_dir = %config.data_dir.display(),
                rasterizer = rasterizer.name(),
                persistent = config.store_path.is_some(),
                "Pipeline ready"
            );
        });

        Ok(Self {
            config: Arc::new(config),
            store: Arc::new(store),
            rasterizer: Arc::from(rasterizer),
            dispatch,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &FormStore {
        &self.store
    }

    fn run<T>(&self, operation: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.dispatch, operation)
    }

    // ------------------------------------------------------------------------
    // Components
    // ------------------------------------------------------------------------

    pub fn extract_fields<P: AsRef<Path>>(&self, pdf_path: P) -> Result<Vec<String>> {
        self.run(|| extract_fields(pdf_path))
    }

    pub fn fill_form<P, Q>(&self, template: P, fields: &FieldMap, output: Q) -> Result<FillOutcome>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        self.run(|| fill_form_with(template, fields, output, &self.config.overlay))
    }

    pub fn render_preview<P, Q>(&self, pdf_path: P, png_path: Q) -> Result<PreviewInfo>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        self.run(|| {
            render_preview_with(
                self.rasterizer.as_ref(),
                pdf_path.as_ref(),
                png_path.as_ref(),
                self.config.preview_dpi,
            )
        })
    }

    // ------------------------------------------------------------------------
    // Templates
    // ------------------------------------------------------------------------

    /// Store an uploaded PDF as a template and record its fields.
    ///
    /// `name` defaults to the sanitized file name. A PDF without fields is
    /// rejected with [`Error::NoFormFields`] and nothing is kept.
    pub fn register_template<P: AsRef<Path>>(
        &self,
        upload: P,
        name: Option<&str>,
    ) -> Result<TemplateRecord> {
        let upload = upload.as_ref();
        self.run(|| {
            let size = validate_upload(upload, self.config.max_upload_bytes)?;

            let original = upload
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let original = secure_filename(&original);
            let stored = self.config.upload_dir().join(template_file_name(&original));
            std::fs::copy(upload, &stored)?;
            debug!(stored = %stored.display(), size, "Copied upload");

            let fields = match extract_fields(&stored) {
                Ok(fields) if !fields.is_empty() => fields,
                Ok(_) => {
                    remove_quietly(&stored);
                    return Err(Error::NoFormFields {
                        path: upload.display().to_string(),
                    });
                }
                Err(e) => {
                    remove_quietly(&stored);
                    return Err(e);
                }
            };

            let name = name
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| original.clone());

            let record = self
                .store
                .add_template(NewTemplate {
                    name,
                    file_path: stored.clone(),
                    original_filename: original,
                    fields,
                })
                .map_err(|e| {
                    remove_quietly(&stored);
                    e
                })?;

            info!(
                id = record.id,
                name = %record.name,
                fields = record.fields.len(),
                "Registered template"
            );
            Ok(record)
        })
    }

    pub fn template(&self, id: u64) -> Result<TemplateRecord> {
        self.store.template(id)
    }

    pub fn templates(&self) -> Vec<TemplateRecord> {
        self.store.templates()
    }

    /// Remove a template, its filled forms and all their files
    pub fn delete_template(&self, id: u64) -> Result<TemplateRecord> {
        self.run(|| {
            let (template, forms) = self.store.remove_template(id)?;
            remove_quietly(&template.file_path);
            for form in &forms {
                remove_filled_files(form);
            }
            info!(id, filled_forms = forms.len(), "Deleted template");
            Ok(template)
        })
    }

    // ------------------------------------------------------------------------
    // Submissions
    // ------------------------------------------------------------------------

    /// One value per stored field: the submitted value trimmed, or empty
    pub fn build_field_map(template: &TemplateRecord, raw: &FieldMap) -> FieldMap {
        template
            .field_names()
            .map(|name| {
                let value = raw.get(name).map(|v| v.trim()).unwrap_or_default();
                (name.to_string(), value.to_string())
            })
            .collect()
    }

    /// Fill a template with submitted values and record the result.
    ///
    /// A failed fill leaves no files and no record. A failed preview is logged
    /// and the record is kept without a PNG.
    pub fn submit(&self, template_id: u64, raw: &FieldMap) -> Result<FilledFormRecord> {
        self.run(|| self.submit_inner(template_id, raw, None))
    }

    /// [`submit`](Self::submit) on a blocking thread, bounded by `deadline`.
    ///
    /// The blocking work cannot be interrupted. On expiry the submission is
    /// flagged so it discards its output instead of recording it, and
    /// [`Error::DeadlineExceeded`] is returned.
    pub async fn submit_within(
        &self,
        template_id: u64,
        raw: FieldMap,
        deadline: Duration,
    ) -> Result<FilledFormRecord> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let pipeline = self.clone();
        let flag = Arc::clone(&cancelled);
        let task = tokio::task::spawn_blocking(move || {
            pipeline.run(|| pipeline.submit_inner(template_id, &raw, Some(&flag)))
        });

        match tokio::time::timeout(deadline, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => {
                self.run(|| error!(template_id, error = %join_error, "Submission task failed"));
                Err(Error::from(join_error))
            }
            Err(_) => {
                cancelled.store(true, Ordering::SeqCst);
                let seconds = deadline.as_secs_f64().ceil() as u64;
                self.run(|| warn!(template_id, seconds, "Submission deadline exceeded"));
                Err(Error::DeadlineExceeded { seconds })
            }
        }
    }

    fn submit_inner(
        &self,
        template_id: u64,
        raw: &FieldMap,
        cancelled: Option<&AtomicBool>,
    ) -> Result<FilledFormRecord> {
        let template = self.store.template(template_id)?;
        let fields = Self::build_field_map(&template, raw);

        let (pdf_name, png_name) = filled_file_names(&template.original_filename);
        let upload_dir = self.config.upload_dir();
        let pdf_path = upload_dir.join(pdf_name);
        let png_path = upload_dir.join(png_name);

        let outcome = match fill_form_with(&template.file_path, &fields, &pdf_path, &self.config.overlay)
        {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(template_id, error = %e, "Fill failed");
                remove_quietly(&pdf_path);
                return Err(e);
            }
        };

        let png_path = match render_preview_with(
            self.rasterizer.as_ref(),
            &pdf_path,
            &png_path,
            self.config.preview_dpi,
        ) {
            Ok(preview) => {
                debug!(width = preview.width, height = preview.height, "Rendered preview");
                Some(png_path)
            }
            Err(e) => {
                warn!(template_id, error = %e, "Preview failed, keeping filled PDF without it");
                remove_quietly(&png_path);
                None
            }
        };

        let discard = |pdf: &Path, png: Option<&Path>| {
            remove_quietly(pdf);
            if let Some(png) = png {
                remove_quietly(png);
            }
        };

        if cancelled.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
            discard(&pdf_path, png_path.as_deref());
            return Err(Error::DeadlineExceeded { seconds: 0 });
        }

        let record = NewFilledForm {
            template_id,
            pdf_path: pdf_path.clone(),
            png_path: png_path.clone(),
            data: serde_json::to_string(&fields)?,
        };
        let record = match self.store.add_filled_form(record) {
            Ok(record) => record,
            Err(e) => {
                discard(&pdf_path, png_path.as_deref());
                return Err(e);
            }
        };

        info!(
            id = record.id,
            template_id,
            strategy = %outcome.strategy,
            placed = outcome.fields_placed,
            preview = record.png_path.is_some(),
            "Recorded filled form"
        );
        Ok(record)
    }

    pub fn filled_form(&self, id: u64) -> Result<FilledFormRecord> {
        self.store.filled_form(id)
    }

    /// All filled forms, newest first
    pub fn filled_forms(&self) -> Vec<FilledFormRecord> {
        self.store.filled_forms()
    }

    /// Remove a filled form and its files
    pub fn delete_filled_form(&self, id: u64) -> Result<FilledFormRecord> {
        self.run(|| {
            let form = self.store.remove_filled_form(id)?;
            remove_filled_files(&form);
            info!(id, "Deleted filled form");
            Ok(form)
        })
    }
}

fn remove_filled_files(form: &FilledFormRecord) {
    remove_quietly(&form.pdf_path);
    if let Some(png) = &form.png_path {
        remove_quietly(png);
    }
}

/// Delete a file, logging anything other than it already being gone
fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Could not delete file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogConfig;
    use crate::pdf::fixtures::FormFixture;
    use crate::pdf::FakeRasterizer;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn pipeline_with(rasterizer: FakeRasterizer) -> (TempDir, FormPipeline) {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            log: LogConfig::silent(),
            ..PipelineConfig::in_dir(dir.path().join("data"))
        };
        let pipeline = FormPipeline::with_rasterizer(config, Box::new(rasterizer)).unwrap();
        (dir, pipeline)
    }

    fn form_upload(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("Job Application.pdf");
        FormFixture::new(1)
            .field("name", 0, [72.0, 700.0, 272.0, 720.0])
            .field("date", 0, [72.0, 650.0, 172.0, 670.0])
            .write(&path);
        path
    }

    fn files_in(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn test_build_field_map_defaults_and_trims() {
        let (dir, pipeline) = pipeline_with(FakeRasterizer::page(10, 10));
        let template = pipeline.register_template(form_upload(dir.path()), None).unwrap();

        let raw = FieldMap::from([
            ("name".to_string(), "  Alice \n".to_string()),
            ("unrelated".to_string(), "x".to_string()),
        ]);
        let map = FormPipeline::build_field_map(&template, &raw);
        assert_eq!(
            map,
            FieldMap::from([
                ("date".to_string(), String::new()),
                ("name".to_string(), "Alice".to_string()),
            ])
        );
    }

    #[test]
    fn test_register_template_defaults_name() {
        let (dir, pipeline) = pipeline_with(FakeRasterizer::page(10, 10));
        let template = pipeline.register_template(form_upload(dir.path()), Some("  ")).unwrap();

        assert_eq!(template.name, "Job_Application.pdf");
        assert_eq!(template.original_filename, "Job_Application.pdf");
        assert!(template.file_path.exists());
        let names: Vec<&str> = template.field_names().collect();
        assert_eq!(names, vec!["name", "date"]);
    }

    #[test]
    fn test_register_template_without_fields_keeps_nothing() {
        let (dir, pipeline) = pipeline_with(FakeRasterizer::page(10, 10));
        let upload = dir.path().join("plain.pdf");
        FormFixture::new(1).write(&upload);

        let result = pipeline.register_template(&upload, None);
        assert!(matches!(result, Err(Error::NoFormFields { .. })));
        assert_eq!(files_in(&pipeline.config().upload_dir()), 0);
        assert!(pipeline.templates().is_empty());
    }

    #[test]
    fn test_submit_records_filled_form() {
        let (dir, pipeline) = pipeline_with(FakeRasterizer::page(20, 30));
        let template = pipeline.register_template(form_upload(dir.path()), None).unwrap();

        let raw = FieldMap::from([("name".to_string(), "Alice".to_string())]);
        let record = pipeline.submit(template.id, &raw).unwrap();

        assert!(record.pdf_path.exists());
        assert!(record.png_path.as_ref().unwrap().exists());
        let data: FieldMap = serde_json::from_str(&record.data).unwrap();
        assert_eq!(data["name"], "Alice");
        assert_eq!(data["date"], "");
        assert_eq!(pipeline.filled_forms(), vec![record]);
    }

    #[test]
    fn test_failed_preview_keeps_pdf_without_png() {
        let rasterizer = FakeRasterizer {
            images: Vec::new(),
            fail: true,
        };
        let (dir, pipeline) = pipeline_with(rasterizer);
        let template = pipeline.register_template(form_upload(dir.path()), None).unwrap();

        let record = pipeline.submit(template.id, &FieldMap::new()).unwrap();
        assert!(record.pdf_path.exists());
        assert_eq!(record.png_path, None);
    }

    #[test]
    fn test_failed_fill_leaves_no_record_or_files() {
        let (dir, pipeline) = pipeline_with(FakeRasterizer::page(10, 10));
        let template = pipeline.register_template(form_upload(dir.path()), None).unwrap();
        std::fs::remove_file(&template.file_path).unwrap();

        let result = pipeline.submit(template.id, &FieldMap::new());
        assert!(matches!(result, Err(Error::Filling { .. })));
        assert!(pipeline.filled_forms().is_empty());
        assert_eq!(files_in(&pipeline.config().upload_dir()), 0);
    }

    #[test]
    fn test_submit_unknown_template() {
        let (_dir, pipeline) = pipeline_with(FakeRasterizer::page(10, 10));
        assert!(matches!(
            pipeline.submit(99, &FieldMap::new()),
            Err(Error::TemplateNotFound { id: 99 })
        ));
    }

    #[test]
    fn test_delete_template_removes_files() {
        let (dir, pipeline) = pipeline_with(FakeRasterizer::page(10, 10));
        let template = pipeline.register_template(form_upload(dir.path()), None).unwrap();
        pipeline.submit(template.id, &FieldMap::new()).unwrap();
        assert_eq!(files_in(&pipeline.config().upload_dir()), 3);

        pipeline.delete_template(template.id).unwrap();
        assert_eq!(files_in(&pipeline.config().upload_dir()), 0);
        assert!(pipeline.filled_forms().is_empty());
    }

    #[test]
    fn test_delete_filled_form_tolerates_missing_files() {
        let (dir, pipeline) = pipeline_with(FakeRasterizer::page(10, 10));
        let template = pipeline.register_template(form_upload(dir.path()), None).unwrap();
        let record = pipeline.submit(template.id, &FieldMap::new()).unwrap();
        std::fs::remove_file(&record.pdf_path).unwrap();

        let removed = pipeline.delete_filled_form(record.id).unwrap();
        assert_eq!(removed.id, record.id);
        assert!(matches!(
            pipeline.filled_form(record.id),
            Err(Error::FilledFormNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_submit_within_generous_deadline() {
        let (dir, pipeline) = pipeline_with(FakeRasterizer::page(10, 10));
        let template = pipeline.register_template(form_upload(dir.path()), None).unwrap();

        let record = pipeline
            .submit_within(template.id, FieldMap::new(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(record.template_id, template.id);
    }
}
