//! Upload handling and metadata storage

pub mod store;
pub mod upload;

pub use store::{
    FilledFormRecord, FormFieldRecord, FormStore, NewFilledForm, NewTemplate, TemplateRecord,
};
pub use upload::{filled_file_names, secure_filename, template_file_name, validate_upload};
