//! Generated form PDFs for tests and benchmarks
//!
//! Also compiled into `tests/` and `benches/` through `#[path]`, so this file
//! depends on nothing but lopdf.

#![allow(dead_code)]

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use std::path::Path;

struct FixtureField {
    name: String,
    page: usize,
    rect: [f32; 4],
}

/// Builder for Letter-sized PDFs carrying text widgets
pub(crate) struct FormFixture {
    page_count: usize,
    fields: Vec<FixtureField>,
    acroform: bool,
    inline_resources: bool,
}

impl FormFixture {
    pub(crate) fn new(page_count: usize) -> Self {
        Self {
            page_count,
            fields: Vec::new(),
            acroform: true,
            inline_resources: false,
        }
    }

    /// Add a text widget on a 0-indexed page
    pub(crate) fn field(mut self, name: &str, page: usize, rect: [f32; 4]) -> Self {
        self.fields.push(FixtureField {
            name: name.to_string(),
            page,
            rect,
        });
        self
    }

    /// Keep the widgets but leave the catalog without `/AcroForm`
    pub(crate) fn without_acroform(mut self) -> Self {
        self.acroform = false;
        self
    }

    /// Give every page its own `/Resources` dictionary instead of a shared reference
    pub(crate) fn inline_resources(mut self) -> Self {
        self.inline_resources = true;
        self
    }

    /// Field names in insertion order
    pub(crate) fn names(&self) -> Vec<String> {
        self.fields.iter().map(|field| field.name.clone()).collect()
    }

    pub(crate) fn build(&self) -> Document {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let font_resources = dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        };
        let resources = if self.inline_resources {
            Object::Dictionary(font_resources)
        } else {
            Object::Reference(doc.add_object(font_resources))
        };

        let mut page_ids: Vec<ObjectId> = Vec::with_capacity(self.page_count);
        for index in 0..self.page_count {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![72.into(), 740.into()]),
                    Operation::new(
                        "Tj",
                        vec![Object::string_literal(format!("Page {}", index + 1))],
                    ),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id = doc.add_object(Stream::new(
                dictionary! {},
                content.encode().expect("encode fixture content"),
            ));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => resources.clone(),
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            });
            page_ids.push(page_id);
        }

        let mut annots: Vec<Vec<Object>> = vec![Vec::new(); self.page_count];
        let mut field_refs = Vec::new();
        for field in &self.fields {
            let rect = field.rect.iter().map(|&v| Object::Real(v)).collect::<Vec<_>>();
            let widget_id = doc.add_object(dictionary! {
                "Type" => "Annot",
                "Subtype" => "Widget",
                "FT" => "Tx",
                "T" => Object::string_literal(field.name.as_str()),
                "Rect" => rect,
                "P" => page_ids[field.page],
                "DA" => Object::string_literal("/Helv 0 Tf 0 g"),
            });
            annots[field.page].push(widget_id.into());
            field_refs.push(Object::from(widget_id));
        }

        for (page_id, page_annots) in page_ids.iter().zip(annots) {
            if page_annots.is_empty() {
                continue;
            }
            doc.get_object_mut(*page_id)
                .and_then(Object::as_dict_mut)
                .expect("fixture page")
                .set("Annots", page_annots);
        }

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => page_ids.iter().map(|id| Object::from(*id)).collect::<Vec<_>>(),
                "Count" => self.page_count as i64,
            }),
        );

        let mut catalog = dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        };
        if self.acroform && !field_refs.is_empty() {
            catalog.set(
                "AcroForm",
                dictionary! {
                    "Fields" => field_refs,
                    "DA" => Object::string_literal("/Helv 0 Tf 0 g"),
                },
            );
        }
        let catalog_id = doc.add_object(catalog);
        doc.trailer.set("Root", catalog_id);

        doc
    }

    pub(crate) fn write(&self, path: &Path) {
        self.build().save(path).expect("save fixture");
    }
}

/// Whether `needle` occurs anywhere in `haystack`
pub(crate) fn contains_bytes(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}
