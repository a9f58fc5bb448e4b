//! Pages of an export and the artifacts written for them
//!
//! Every export row becomes one page named `<CON code>_<index>`, where the
//! index is 1-based and follows row order. Paginated-section links
//! (`?showpage=N`) are rewritten to the same naming scheme, so the pages of
//! a module link to each other once written side by side.
//!
//! Two artifacts are written per page:
//!
//! - `<stem>.html`: the title as an `<h1>` followed by the raw body
//! - `<stem>.markdown`: YAML front matter, then the Markdown conversion of
//!   that same HTML

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use log::debug;
use regex::Regex;

use crate::converter::MarkdownConverter;
use crate::error::ConversionError;
use crate::export::{ExportRow, RowFields};

/// One page of a learning module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    con_code: String,
    index: usize,
    title: String,
    body: String,
}

/// Paths of the files written for a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageArtifacts {
    pub html_path: PathBuf,
    pub markdown_path: PathBuf,
}

impl Page {
    /// Create a page; `index` is 1-based
    pub fn new(
        con_code: impl Into<String>,
        index: usize,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            con_code: con_code.into(),
            index,
            title: title.into(),
            body: body.into(),
        }
    }

    /// Build a page from an export row
    ///
    /// # Errors
    ///
    /// - `ConversionError::InvalidInput`: the row lacks the title or body field
    pub fn from_row(
        row: &ExportRow,
        fields: &RowFields,
        con_code: &str,
        index: usize,
    ) -> Result<Self, ConversionError> {
        let missing = |field: &str| {
            ConversionError::InvalidInput(format!("Row {} has no '{}' element", index, field))
        };
        let title = row.field(&fields.head).ok_or_else(|| missing(&fields.head))?;
        let body = row.field(&fields.body).ok_or_else(|| missing(&fields.body))?;

        Ok(Self::new(con_code, index, title, body))
    }

    /// File name stem shared by both artifacts
    pub fn stem(&self) -> String {
        format!("{}_{}", self.con_code, self.index)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// HTML snapshot: the title as a level-one heading, then the body
    pub fn html(&self) -> String {
        format!("<h1>{}</h1>{}", self.title, self.body)
    }

    /// YAML front matter block holding the title
    ///
    /// # Format
    ///
    /// ```yaml
    /// ---
    /// title: "Page Title"
    /// ---
    ///
    /// ```
    pub fn front_matter(&self) -> String {
        let mut output = String::from("---\ntitle: ");
        write_yaml_string(&mut output, &self.title);
        output.push_str("\n---\n\n");
        output
    }

    /// Front matter followed by the Markdown conversion of [`html`](Self::html)
    pub fn markdown(&self, converter: &mut MarkdownConverter) -> Result<String, ConversionError> {
        let body = converter.convert(&self.html())?;
        Ok(self.front_matter() + &body)
    }

    /// Convert the page and write both artifacts into `dir`
    ///
    /// Conversion happens first, so a page that fails to convert leaves no
    /// files behind.
    pub fn write_to(
        &self,
        dir: &Path,
        converter: &mut MarkdownConverter,
    ) -> Result<PageArtifacts, ConversionError> {
        let markdown = self.markdown(converter)?;
        let stem = self.stem();

        let html_path = dir.join(format!("{}.html", stem));
        fs::write(&html_path, self.html())?;

        let markdown_path = dir.join(format!("{}.markdown", stem));
        fs::write(&markdown_path, markdown)?;

        debug!("Wrote {} and {}", html_path.display(), markdown_path.display());

        Ok(PageArtifacts {
            html_path,
            markdown_path,
        })
    }
}

/// Check that a module code has the form `CON<digits>`
pub fn validate_con_code(code: &str) -> Result<(), ConversionError> {
    static CON_CODE_REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    let regex = CON_CODE_REGEX.get_or_init(|| Regex::new(r"^CON\d+$").ok());

    match regex {
        Some(regex) if regex.is_match(code) => Ok(()),
        Some(_) => Err(ConversionError::InvalidInput(format!(
            "CON_CODE must be in the format CON123, got '{}'",
            code
        ))),
        None => Err(ConversionError::InternalError(
            "CON code pattern failed to compile".to_string(),
        )),
    }
}

/// Write a double-quoted YAML string, escaping quotes, backslashes and
/// control characters
fn write_yaml_string(output: &mut String, value: &str) {
    output.push('"');
    for ch in value.chars() {
        match ch {
            '"' => output.push_str("\\\""),
            '\\' => output.push_str("\\\\"),
            '\n' => output.push_str("\\n"),
            '\r' => output.push_str("\\r"),
            '\t' => output.push_str("\\t"),
            _ => output.push(ch),
        }
    }
    output.push('"');
}
