//! HTML5 parser using html5ever
//!
//! Page bodies in the WCM export are HTML fragments of varying quality:
//! unclosed paragraphs, stray table markup and inline directives inside
//! attribute values are all common. html5ever implements the WHATWG parsing
//! algorithm, so every fragment produces a tree that the converter can walk,
//! following the same recovery rules as a browser.
//!
//! # Examples
//!
//! ```rust
//! use learning_importer::parser::parse_fragment;
//!
//! // Well-formed fragment
//! let dom = parse_fragment("<h1>Hello</h1><p>World</p>").expect("Failed to parse HTML");
//!
//! // Malformed fragment (missing closing tags)
//! let dom = parse_fragment("<p>Hello<p>World").expect("Parser handles malformed HTML");
//! ```
//!
//! # Configuration
//!
//! The parser uses default html5ever configuration:
//! - **Scripting**: Disabled (scripts are not executed)
//! - **Error Handling**: Errors are collected but parsing continues
//! - **Tree Builder**: Uses RcDom for reference-counted DOM nodes
//!
//! The fragment is parsed as a full document; html5ever supplies the
//! implied `html`, `head` and `body` elements, which the converter treats as
//! transparent containers.

use html5ever::parse_document;
use html5ever::tendril::TendrilSink;
use markup5ever_rcdom::RcDom;

use crate::error::ConversionError;

/// Parse an HTML fragment into a DOM tree
///
/// html5ever recovers from any markup error, so malformed or empty input
/// never fails here; structural limits are enforced later by the converter.
pub fn parse_fragment(html: &str) -> Result<RcDom, ConversionError> {
    let dom = parse_document(RcDom::default(), Default::default()).one(html);

    Ok(dom)
}
