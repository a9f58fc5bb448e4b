//! Verbatim table passthrough
//!
//! Legacy tables are mostly layout markup that has no faithful Markdown
//! table equivalent, so the converter copies them into the output as HTML.
//! To keep that copy byte-identical to the source, the raw text of every
//! outermost `<table>…</table>` span is captured from the fragment before
//! conversion and matched, in document order, to the table elements of the
//! parsed tree.
//!
//! When the raw scan and the parsed tree disagree (for example when the
//! parser had to split or reparent malformed table markup) the capture is
//! abandoned and tables are re-serialised from the tree with html5ever.
//!
//! Verbatim blocks are inserted into the Markdown as placeholders and only
//! restored after output normalisation, so whitespace inside them is never
//! touched. The placeholder marker is a private-use character that occurs
//! nowhere in the page's text or attributes.

use std::collections::BTreeSet;
use std::rc::Rc;

use html5ever::serialize::{SerializeOpts, TraversalScope, serialize};
use log::warn;
use markup5ever_rcdom::{Handle, NodeData, RcDom, SerializableHandle};

use crate::error::ConversionError;

/// Private-use range the placeholder marker is picked from
const MARKER_RANGE: std::ops::RangeInclusive<u32> = 0xE000..=0xF8FF;

/// Raw table markup for one fragment, plus the blocks emitted so far
#[derive(Debug)]
pub struct VerbatimTables {
    captured: Vec<(Handle, String)>,
    emitted: Vec<String>,
    marker: char,
}

impl Default for VerbatimTables {
    fn default() -> Self {
        Self {
            captured: Vec::new(),
            emitted: Vec::new(),
            marker: '\u{E000}',
        }
    }
}

impl VerbatimTables {
    /// Match the raw table spans of `html` to the outermost tables of `dom`
    ///
    /// # Errors
    ///
    /// - `ConversionError::InvalidInput`: the page uses every private-use
    ///   character, leaving none free for placeholders
    pub fn capture(dom: &RcDom, html: &str) -> Result<Self, ConversionError> {
        let scan = scan_document(&dom.document);
        let marker = MARKER_RANGE
            .filter_map(char::from_u32)
            .find(|c| !scan.private_use.contains(c))
            .ok_or_else(|| {
                ConversionError::InvalidInput(
                    "No private-use character left for table placeholders".to_string(),
                )
            })?;

        let spans = table_spans(html);
        let captured = if scan.tables.len() == spans.len() {
            scan.tables
                .into_iter()
                .zip(spans)
                .map(|(node, span)| (node, span.to_string()))
                .collect()
        } else {
            if !scan.tables.is_empty() {
                warn!(
                    "Found {} table spans in source but {} tables in parsed tree, re-serialising tables",
                    spans.len(),
                    scan.tables.len()
                );
            }
            Vec::new()
        };

        Ok(Self {
            captured,
            emitted: Vec::new(),
            marker,
        })
    }

    /// Source markup of a table element, if it was captured
    pub fn source_of(&self, node: &Handle) -> Option<&str> {
        self.captured
            .iter()
            .find(|(candidate, _)| Rc::ptr_eq(candidate, node))
            .map(|(_, markup)| markup.as_str())
    }

    /// Store a verbatim block and return the placeholder to emit in its place
    pub fn stash(&mut self, markup: String) -> String {
        let placeholder = format!("{}{}{}", self.marker, self.emitted.len(), self.marker);
        self.emitted.push(markup);
        placeholder
    }

    /// Replace every placeholder in `markdown` with its verbatim block
    ///
    /// A single left-to-right pass, so restored markup is never rescanned.
    pub fn restore(&self, markdown: String) -> String {
        if self.emitted.is_empty() {
            return markdown;
        }

        let width = self.marker.len_utf8();
        let mut restored = String::with_capacity(markdown.len());
        let mut rest = markdown.as_str();

        while let Some(open) = rest.find(self.marker) {
            restored.push_str(&rest[..open]);
            let after = &rest[open + width..];
            let block = after.find(self.marker).and_then(|close| {
                after[..close]
                    .parse::<usize>()
                    .ok()
                    .and_then(|index| self.emitted.get(index))
                    .map(|markup| (markup, close))
            });

            match block {
                Some((markup, close)) => {
                    restored.push_str(markup);
                    rest = &after[close + width..];
                }
                None => {
                    restored.push(self.marker);
                    rest = after;
                }
            }
        }
        restored.push_str(rest);

        restored
    }
}

/// Serialise a node (including itself) back to HTML
pub fn serialize_node(node: &Handle) -> Result<String, ConversionError> {
    let mut bytes = Vec::new();
    let handle: SerializableHandle = node.clone().into();
    let opts = SerializeOpts {
        traversal_scope: TraversalScope::IncludeNode,
        ..Default::default()
    };

    serialize(&mut bytes, &handle, opts)
        .map_err(|e| ConversionError::InternalError(format!("Table serialisation failed: {}", e)))?;

    String::from_utf8(bytes).map_err(|e| {
        ConversionError::EncodingError(format!("Serialised table is not UTF-8: {}", e))
    })
}

/// Replace quoted attribute values in copied table markup
///
/// Each `(from, to)` pair rewrites every `"from"` or `'from'` value to the
/// escaped `to`. Returns `None` when a value cannot be found quoted in the
/// source (unquoted or entity-encoded), so the caller can re-serialise.
pub fn rewrite_attribute_values(source: &str, rewrites: &[(String, String)]) -> Option<String> {
    let mut markup = source.to_string();

    for (from, to) in rewrites {
        let mut found = false;
        for quote in ['"', '\''] {
            let quoted = format!("={quote}{from}{quote}");
            if markup.contains(&quoted) {
                let replacement = format!("={quote}{}{quote}", escape_attribute(to, quote));
                markup = markup.replace(&quoted, &replacement);
                found = true;
            }
        }
        if !found {
            return None;
        }
    }

    Some(markup)
}

fn escape_attribute(value: &str, quote: char) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '"' if quote == '"' => escaped.push_str("&quot;"),
            '\'' if quote == '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Outermost tables and private-use characters of a parsed document
#[derive(Debug, Default)]
struct DocumentScan {
    tables: Vec<Handle>,
    private_use: BTreeSet<char>,
}

/// Walk the whole tree with an explicit stack, in document order
fn scan_document(document: &Handle) -> DocumentScan {
    let mut scan = DocumentScan::default();
    let mut stack = vec![(document.clone(), false)];

    while let Some((node, in_table)) = stack.pop() {
        let mut in_table = in_table;
        match node.data {
            NodeData::Element {
                ref name,
                ref attrs,
                ..
            } => {
                for attr in attrs.borrow().iter() {
                    note_private_use(&attr.value, &mut scan.private_use);
                }
                if name.local.as_ref() == "table" && !in_table {
                    scan.tables.push(node.clone());
                    in_table = true;
                }
            }
            NodeData::Text { ref contents } => {
                note_private_use(&contents.borrow(), &mut scan.private_use);
            }
            _ => {}
        }

        for child in node.children.borrow().iter().rev() {
            stack.push((child.clone(), in_table));
        }
    }

    scan
}

fn note_private_use(text: &str, found: &mut BTreeSet<char>) {
    found.extend(text.chars().filter(|c| MARKER_RANGE.contains(&u32::from(*c))));
}

/// Raw text of every outermost `<table>…</table>` span in `html`
///
/// Comments and the contents of `script`/`style` elements are skipped. An
/// unclosed table extends to the end of the input.
pub fn table_spans(html: &str) -> Vec<&str> {
    let bytes = html.as_bytes();
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        if bytes[i] != b'<' {
            i += 1;
            continue;
        }

        let rest = &bytes[i..];
        if rest.starts_with(b"<!--") {
            i = find_from(bytes, i + 4, b"-->").map_or(bytes.len(), |end| end + 3);
        } else if let Some(tag) = raw_text_tag(rest) {
            let close = format!("</{}", tag);
            i = find_ci(bytes, i + 1, close.as_bytes()).unwrap_or(bytes.len());
            if i < bytes.len() {
                i += close.len();
            }
        } else if is_tag(rest, b"<table") {
            if depth == 0 {
                start = i;
            }
            depth += 1;
            i += "<table".len();
        } else if is_tag(rest, b"</table") {
            i = find_from(bytes, i, b">").map_or(bytes.len(), |end| end + 1);
            if depth > 0 {
                depth -= 1;
                if depth == 0 {
                    spans.push(&html[start..i]);
                }
            }
        } else {
            i += 1;
        }
    }

    if depth > 0 {
        spans.push(&html[start..]);
    }

    spans
}

/// Tag name if `rest` opens a raw-text element
fn raw_text_tag(rest: &[u8]) -> Option<&'static str> {
    ["script", "style"]
        .into_iter()
        .find(|tag| is_tag(rest, format!("<{}", tag).as_bytes()))
}

/// Case-insensitive prefix match followed by a tag-name boundary
fn is_tag(rest: &[u8], open: &[u8]) -> bool {
    rest.len() >= open.len()
        && rest[..open.len()].eq_ignore_ascii_case(open)
        && rest
            .get(open.len())
            .is_none_or(|&b| b.is_ascii_whitespace() || b == b'>' || b == b'/')
}

fn find_from(haystack: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| from + pos)
}

fn find_ci(haystack: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
        .map(|pos| from + pos)
}
