//! Learning Importer - Stellent WCM export to Markdown
//!
//! This library converts the pages of a legacy Stellent WCM export into
//! Markdown, rewriting the CMS directives embedded in links and images and
//! collecting the legacy assets that must be fetched by hand.
//!
//! # Architecture
//!
//! The library is structured into several modules:
//! - `converter`: Markdown generation from the DOM tree of a page body
//! - `directive`: Rewrite rules for legacy directive links and image sources
//! - `assets`: Batch-wide ledger of assets to download
//! - `parser`: HTML5 parsing using html5ever
//! - `verbatim`: Raw table capture for verbatim passthrough
//! - `security`: Skipped elements and nesting limit
//! - `charset`: Export encoding detection and decoding
//! - `export`: WCM XML row reader
//! - `page`: Page naming, front matter and artifact writing
//! - `config`: TOML configuration file
//!
//! # Examples
//!
//! ```rust
//! use learning_importer::MarkdownConverter;
//!
//! let mut converter = MarkdownConverter::new();
//! let markdown = converter
//!     .convert("<p>See <a class=\"glossary\" title=\"Foo\">bar</a>.</p>")
//!     .expect("Conversion failed");
//!
//! assert_eq!(markdown, "See bar[^1].\n\n[^1]: Foo\n");
//! ```

pub mod assets;
pub mod charset;
pub mod config;
pub mod converter;
pub mod directive;
pub mod error;
pub mod export;
pub mod page;
pub mod parser;
pub mod security;
pub mod verbatim;

// Re-export main types for convenience
pub use assets::AssetLedger;
pub use converter::{ConversionOptions, MarkdownConverter};
pub use directive::{DirectiveResolver, RedirectMap};
pub use error::ConversionError;
pub use page::Page;
pub use parser::parse_fragment;
