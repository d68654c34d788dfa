//! Shared helpers for integration tests

#![allow(dead_code)]

#[path = "../../src/pdf/fixtures.rs"]
mod fixtures;

pub(crate) use fixtures::{contains_bytes, FormFixture};

use lopdf::Document;
use std::path::Path;

/// A text widget: name, 0-indexed page, rect
pub type FieldDef<'a> = (&'a str, usize, [f32; 4]);

pub const NAME_RECT: [f32; 4] = [72.0, 700.0, 272.0, 720.0];
pub const DATE_RECT: [f32; 4] = [72.0, 650.0, 172.0, 670.0];

/// Write a Letter-sized PDF with `page_count` pages and the given text widgets.
///
/// Pages carry inline resources, which the overlay merge must copy. With
/// `acroform` false the widgets are only reachable through `/Annots`.
pub fn write_form_pdf(path: &Path, page_count: usize, fields: &[FieldDef], acroform: bool) {
    let mut fixture = FormFixture::new(page_count).inline_resources();
    for &(name, page, rect) in fields {
        fixture = fixture.field(name, page, rect);
    }
    if !acroform {
        fixture = fixture.without_acroform();
    }
    fixture.write(path);
}

/// The standard two-field template
pub fn write_name_date_form(path: &Path) {
    write_form_pdf(
        path,
        1,
        &[("name", 0, NAME_RECT), ("date", 0, DATE_RECT)],
        true,
    );
}

pub fn page_count(path: &Path) -> usize {
    Document::load(path).unwrap().get_pages().len()
}

/// Concatenated content streams of a 1-indexed page
pub fn page_content(path: &Path, page: u32) -> Vec<u8> {
    let doc = Document::load(path).unwrap();
    let page_id = doc.get_pages()[&page];
    doc.get_page_content(page_id).unwrap()
}
