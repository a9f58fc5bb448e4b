//! Reader for Stellent WCM XML exports
//!
//! An export is a flat list of rows, one per page, each holding named
//! `element` fields:
//!
//! ```xml
//! <wcm:root xmlns:wcm="http://www.stellent.com/wcm-data/ns/8.0.0">
//!   <wcm:row>
//!     <wcm:element name="Head">Introduction</wcm:element>
//!     <wcm:element name="Body"><![CDATA[<p>Welcome</p>]]></wcm:element>
//!   </wcm:row>
//! </wcm:root>
//! ```
//!
//! Matching is on local names only, so the reader accepts any namespace
//! prefix (or none). Field text is the concatenation of its text and CDATA
//! content with XML entities resolved; nested markup inside a field
//! contributes its text only.

use std::collections::BTreeMap;

use log::debug;
use quick_xml::Reader;
use quick_xml::events::Event;

use crate::charset::decode_export;
use crate::error::ConversionError;

/// Field holding the page title
pub const HEAD_FIELD: &str = "Head";

/// Field holding the page body HTML
pub const BODY_FIELD: &str = "Body";

/// Names of the fields a page is built from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFields {
    pub head: String,
    pub body: String,
}

impl Default for RowFields {
    fn default() -> Self {
        Self {
            head: HEAD_FIELD.to_string(),
            body: BODY_FIELD.to_string(),
        }
    }
}

/// One row of the export
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportRow {
    fields: BTreeMap<String, String>,
}

impl ExportRow {
    /// Text of a named field; `None` if the row has no such element
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn head(&self) -> Option<&str> {
        self.field(HEAD_FIELD)
    }

    pub fn body(&self) -> Option<&str> {
        self.field(BODY_FIELD)
    }

    pub fn insert(&mut self, name: impl Into<String>, text: impl Into<String>) {
        self.fields.insert(name.into(), text.into());
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Decode raw export bytes and read every row
pub fn read_export(bytes: &[u8]) -> Result<Vec<ExportRow>, ConversionError> {
    let xml = decode_export(bytes)?;
    read_rows(&xml)
}

/// Read every row of an export, in document order
///
/// # Errors
///
/// - `ConversionError::Xml`: the export is not well-formed XML, or ends
///   inside a row
pub fn read_rows(xml: &str) -> Result<Vec<ExportRow>, ConversionError> {
    let mut reader = Reader::from_str(xml);

    let mut rows = Vec::new();
    let mut current_row: Option<ExportRow> = None;
    let mut current_field: Option<String> = None;
    let mut buf_text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.name();
                match local_name(name.as_ref()) {
                    b"row" => current_row = Some(ExportRow::default()),
                    b"element" if current_row.is_some() && current_field.is_none() => {
                        current_field = Some(field_name(&e));
                        buf_text.clear();
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => {
                let name = e.name();
                match local_name(name.as_ref()) {
                    b"row" => rows.push(ExportRow::default()),
                    b"element" if current_field.is_none() => {
                        if let Some(row) = current_row.as_mut() {
                            row.insert(field_name(&e), String::new());
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(e)) => {
                if current_field.is_some() {
                    buf_text.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Ok(Event::CData(e)) => {
                if current_field.is_some() {
                    buf_text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if current_field.is_some() {
                    let entity = String::from_utf8_lossy(e.as_ref());
                    match resolve_entity(&entity) {
                        Some(resolved) => buf_text.push_str(&resolved),
                        None => {
                            buf_text.push('&');
                            buf_text.push_str(&entity);
                            buf_text.push(';');
                        }
                    }
                }
            }
            Ok(Event::End(e)) => {
                let name = e.name();
                match local_name(name.as_ref()) {
                    b"element" => {
                        if let (Some(row), Some(field)) = (current_row.as_mut(), current_field.take())
                        {
                            row.insert(field, std::mem::take(&mut buf_text));
                        }
                    }
                    b"row" => {
                        if let Some(row) = current_row.take() {
                            debug!("Read export row {} with {} fields", rows.len() + 1, row.len());
                            rows.push(row);
                        }
                        current_field = None;
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ConversionError::Xml(format!(
                    "at position {}: {}",
                    reader.error_position(),
                    e
                )));
            }
            _ => {}
        }
    }

    if current_row.is_some() {
        return Err(ConversionError::Xml(
            "export ends inside an unclosed row".to_string(),
        ));
    }

    Ok(rows)
}

/// Value of the `name` attribute of a field element (empty if absent)
fn field_name(e: &quick_xml::events::BytesStart<'_>) -> String {
    e.attributes()
        .flatten()
        .find(|attr| local_name(attr.key.as_ref()) == b"name")
        .map(|attr| String::from_utf8_lossy(&attr.value).into_owned())
        .unwrap_or_default()
}

/// Strip a namespace prefix from a qualified name
fn local_name(name: &[u8]) -> &[u8] {
    name.iter()
        .rposition(|&b| b == b':')
        .map(|i| &name[i + 1..])
        .unwrap_or(name)
}

/// Resolve predefined and numeric XML entity references
fn resolve_entity(entity: &str) -> Option<String> {
    match entity {
        "apos" => return Some("'".to_string()),
        "quot" => return Some("\"".to_string()),
        "lt" => return Some("<".to_string()),
        "gt" => return Some(">".to_string()),
        "amp" => return Some("&".to_string()),
        _ => {}
    }

    let code = if let Some(hex) = entity
        .strip_prefix("#x")
        .or_else(|| entity.strip_prefix("#X"))
    {
        u32::from_str_radix(hex, 16).ok()?
    } else {
        entity.strip_prefix('#')?.parse::<u32>().ok()?
    };

    char::from_u32(code).map(|c| c.to_string())
}
