//! Markdown converter - transforms legacy page bodies to Markdown
//!
//! This module provides the conversion engine of the importer. It walks the
//! html5ever DOM of one page body, producing Markdown, and rewrites the
//! legacy CMS directives it meets in links and images on the way.
//!
//! # Conversion Strategy
//!
//! The converter uses a depth-first traversal of the DOM tree, processing each node
//! according to its type and applying the appropriate Markdown formatting rule.
//! Four constructs get special treatment:
//!
//! 1. **Glossary anchors** (`<a class="glossary" title="…">`) become footnotes:
//!    the anchor text is followed by `[^N]` and the title is listed in a
//!    definition block at the end of the document
//! 2. **Other anchors and images** have their `href`/`src` passed through the
//!    [`DirectiveResolver`], which may rewrite them and record assets
//! 3. **Tables** are copied into the output verbatim as HTML
//! 4. **Whitespace-only text nodes** are dropped, so indentation between
//!    block tags never turns into stray spaces
//!
//! # State
//!
//! State is split by lifetime:
//!
//! - [`ConversionRun`] lives for one [`MarkdownConverter::convert`] call and
//!   holds the footnotes and verbatim tables of that page
//! - [`AssetLedger`] lives as long as the converter and accumulates the
//!   assets of every page in the batch
//!
//! # Examples
//!
//! Input HTML:
//! ```html
//! <h1>Title</h1>
//! <p>Read the <a class="glossary" title="Medicines regulator">MHRA</a> guide.</p>
//! ```
//!
//! Output Markdown:
//! ```markdown
//! # Title
//!
//! Read the MHRA[^1] guide.
//!
//! [^1]: Medicines regulator
//! ```

use std::mem;

use html5ever::tendril::StrTendril;
use log::debug;
use markup5ever_rcdom::{Handle, NodeData, RcDom};

use crate::assets::AssetLedger;
use crate::directive::{DEFAULT_ASSET_DIR, DirectiveResolver, RedirectMap};
use crate::error::ConversionError;
use crate::parser::parse_fragment;
use crate::security::{MAX_NESTING_DEPTH, SanitizeAction, SecurityValidator};
use crate::verbatim::{VerbatimTables, rewrite_attribute_values, serialize_node};

/// Class token marking an anchor as a glossary term
const GLOSSARY_CLASS: &str = "glossary";

/// Conversion options
#[derive(Debug, Clone)]
pub struct ConversionOptions {
    /// Legacy codes that redirect to external URLs
    pub redirects: RedirectMap,
    /// Directory (relative to the page) that rewritten asset links point into
    pub asset_dir: String,
    /// Maximum element nesting depth before a page is rejected
    pub max_depth: usize,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            redirects: RedirectMap::builtin(),
            asset_dir: DEFAULT_ASSET_DIR.to_string(),
            max_depth: MAX_NESTING_DEPTH,
        }
    }
}

/// Footnote captured from a glossary anchor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FootnoteEntry {
    pub text: String,
}

/// Per-page conversion state
///
/// Created at the start of every `convert` call, so footnote numbering
/// always restarts at 1. Asset references are written through to the
/// batch ledger it borrows.
#[derive(Debug)]
pub struct ConversionRun<'a> {
    footnotes: Vec<FootnoteEntry>,
    tables: VerbatimTables,
    assets: &'a mut AssetLedger,
}

impl<'a> ConversionRun<'a> {
    pub fn new(tables: VerbatimTables, assets: &'a mut AssetLedger) -> Self {
        Self {
            footnotes: Vec::new(),
            tables,
            assets,
        }
    }

    /// Append a footnote and return its 1-based index
    pub fn add_footnote(&mut self, text: String) -> usize {
        self.footnotes.push(FootnoteEntry { text });
        self.footnotes.len()
    }

    /// Append the footnote definition block and clear the sequence
    fn drain_footnotes(&mut self, output: &mut String) {
        for (index, footnote) in self.footnotes.drain(..).enumerate() {
            output.push_str(&format!("\n[^{}]: {}\n", index + 1, footnote.text));
        }
    }
}

/// Main Markdown converter
///
/// One converter is used for a whole batch. Each call to
/// [`convert`](Self::convert) converts one page; the assets referenced by
/// all pages so far are available from [`assets`](Self::assets).
///
/// # Usage
///
/// ```rust
/// use learning_importer::converter::MarkdownConverter;
///
/// let mut converter = MarkdownConverter::new();
/// let markdown = converter
///     .convert("<p><a href=\"[!--$ssServerRelativeSiteRoot--]Opendocuments/OpenPDFdocuments/CON999\">Leaflet</a></p>")
///     .expect("Conversion failed");
///
/// assert_eq!(markdown, "[Leaflet](stellent/CON999.pdf)\n");
/// assert!(converter.assets().assets_to_download().contains("CON999"));
/// ```
pub struct MarkdownConverter {
    resolver: DirectiveResolver,
    security_validator: SecurityValidator,
    assets: AssetLedger,
}

impl MarkdownConverter {
    /// Create a new converter with default options
    pub fn new() -> Self {
        Self::with_options(ConversionOptions::default())
    }

    /// Create a new converter with custom options
    pub fn with_options(options: ConversionOptions) -> Self {
        Self {
            resolver: DirectiveResolver::with_redirects(options.redirects, options.asset_dir),
            security_validator: SecurityValidator::with_max_depth(options.max_depth),
            assets: AssetLedger::new(),
        }
    }

    /// Convert one HTML fragment to Markdown
    ///
    /// The result is the rendered body followed by the footnote definitions
    /// of this fragment; it carries no front matter. A fragment with nothing
    /// to render converts to an empty string.
    ///
    /// # Errors
    ///
    /// - `ConversionError::InvalidInput`: the fragment nests deeper than the
    ///   configured limit
    /// - `ConversionError::InternalError`: a table could not be re-serialised
    ///
    /// Assets recorded before a failure stay in the ledger.
    pub fn convert(&mut self, html: &str) -> Result<String, ConversionError> {
        if html.trim().is_empty() {
            return Ok(String::new());
        }

        let dom = parse_fragment(html)?;
        let tables = VerbatimTables::capture(&dom, html)?;

        let mut assets = mem::take(&mut self.assets);
        let result = {
            let mut run = ConversionRun::new(tables, &mut assets);
            self.render(&dom, &mut run)
        };
        self.assets = assets;

        result
    }

    /// Assets referenced by every page converted so far
    pub fn assets(&self) -> &AssetLedger {
        &self.assets
    }

    /// Take the accumulated ledger, leaving an empty one behind
    pub fn take_assets(&mut self) -> AssetLedger {
        mem::take(&mut self.assets)
    }

    pub fn resolver(&self) -> &DirectiveResolver {
        &self.resolver
    }

    fn render(&self, dom: &RcDom, run: &mut ConversionRun<'_>) -> Result<String, ConversionError> {
        // Pre-allocate output buffer with reasonable capacity
        let mut output = String::with_capacity(1024);

        self.traverse_node(&dom.document, &mut output, 0, run)?;

        let normalized = self.normalize_output(output);
        let mut markdown = run.tables.restore(normalized);
        run.drain_footnotes(&mut markdown);

        Ok(markdown)
    }

    /// Traverse a DOM node and convert it to Markdown
    ///
    /// `depth` counts element nesting and is checked against the configured
    /// limit for every element.
    fn traverse_node(
        &self,
        node: &Handle,
        output: &mut String,
        depth: usize,
        run: &mut ConversionRun<'_>,
    ) -> Result<(), ConversionError> {
        match node.data {
            NodeData::Document => {
                for child in node.children.borrow().iter() {
                    self.traverse_node(child, output, depth, run)?;
                }
            }
            NodeData::Element { ref name, .. } => {
                let tag_name = name.local.as_ref();
                self.handle_element(node, tag_name, output, depth, run)?;
            }
            NodeData::Text { ref contents } => {
                self.handle_text(&contents.borrow(), output);
            }
            NodeData::Comment { .. } => {
                // Comments are ignored in Markdown output
            }
            NodeData::Doctype { .. } => {
                // DOCTYPE declarations are ignored
            }
            NodeData::ProcessingInstruction { .. } => {
                // Processing instructions are ignored
            }
        }

        Ok(())
    }

    fn traverse_children(
        &self,
        node: &Handle,
        output: &mut String,
        depth: usize,
        run: &mut ConversionRun<'_>,
    ) -> Result<(), ConversionError> {
        for child in node.children.borrow().iter() {
            self.traverse_node(child, output, depth + 1, run)?;
        }
        Ok(())
    }

    /// Handle an HTML element and convert it to Markdown
    fn handle_element(
        &self,
        node: &Handle,
        tag_name: &str,
        output: &mut String,
        depth: usize,
        run: &mut ConversionRun<'_>,
    ) -> Result<(), ConversionError> {
        if self.security_validator.check_element(tag_name) == SanitizeAction::Remove {
            return Ok(());
        }

        self.security_validator
            .validate_depth(depth)
            .map_err(ConversionError::InvalidInput)?;

        match tag_name {
            // Heading elements (h1-h6)
            "h1" => self.handle_heading(node, 1, output, depth, run)?,
            "h2" => self.handle_heading(node, 2, output, depth, run)?,
            "h3" => self.handle_heading(node, 3, output, depth, run)?,
            "h4" => self.handle_heading(node, 4, output, depth, run)?,
            "h5" => self.handle_heading(node, 5, output, depth, run)?,
            "h6" => self.handle_heading(node, 6, output, depth, run)?,

            "p" => self.handle_paragraph(node, output, depth, run)?,

            "a" => self.handle_link(node, output, depth, run)?,
            "img" => self.handle_image(node, output, run),

            "ul" | "ol" => self.handle_list(node, output, depth, 0, run)?,
            "li" => self.handle_list_item(node, output, depth, 0, "- ", run)?,

            "pre" => self.handle_code_block(node, output),
            "code" => self.handle_inline_code(node, output),

            "strong" | "b" => self.handle_wrapped(node, "**", output, depth, run)?,
            "em" | "i" => self.handle_wrapped(node, "*", output, depth, run)?,

            "br" => output.push_str("\\\n"),
            "hr" => {
                ensure_blank_line(output);
                output.push_str("---\n\n");
            }
            "blockquote" => self.handle_blockquote(node, output, depth, run)?,

            "table" => self.handle_table(node, output, depth, run)?,

            // Default: process as container (traverse children)
            _ => self.traverse_children(node, output, depth, run)?,
        }

        Ok(())
    }

    /// Handle text nodes
    ///
    /// Whitespace-only text is structural indentation in the legacy markup
    /// and produces nothing. Other text is collapsed to single spaces,
    /// keeping one separating space where the source had leading or trailing
    /// whitespace.
    fn handle_text(&self, text: &str, output: &mut String) {
        let normalized = self.normalize_text(text);
        if normalized.is_empty() {
            return;
        }

        if text.starts_with(char::is_whitespace)
            && !output.is_empty()
            && !output.ends_with(' ')
            && !output.ends_with('\n')
        {
            output.push(' ');
        }
        output.push_str(&normalized);
        if text.ends_with(char::is_whitespace) {
            output.push(' ');
        }
    }

    /// Handle heading elements (h1-h6) as ATX headings
    fn handle_heading(
        &self,
        node: &Handle,
        level: usize,
        output: &mut String,
        depth: usize,
        run: &mut ConversionRun<'_>,
    ) -> Result<(), ConversionError> {
        ensure_blank_line(output);

        for _ in 0..level {
            output.push('#');
        }
        output.push(' ');

        // Process heading content (including inline elements like links)
        let start_len = output.len();
        self.traverse_children(node, output, depth, run)?;

        // Normalize the heading text (collapse whitespace, trim)
        let heading_content = output[start_len..].to_string();
        let normalized = self.normalize_text(&heading_content);
        output.truncate(start_len);
        output.push_str(&normalized);

        output.push_str("\n\n");

        Ok(())
    }

    /// Handle paragraph elements, separated by blank lines
    fn handle_paragraph(
        &self,
        node: &Handle,
        output: &mut String,
        depth: usize,
        run: &mut ConversionRun<'_>,
    ) -> Result<(), ConversionError> {
        ensure_blank_line(output);

        let start_len = output.len();
        self.traverse_children(node, output, depth, run)?;

        if output.len() > start_len {
            output.push_str("\n\n");
        }

        Ok(())
    }

    /// Handle anchor elements
    ///
    /// Glossary anchors become footnotes. Every other anchor has its `href`
    /// resolved and is rendered as `[text](href "title")`. Missing attributes
    /// are treated as empty:
    ///
    /// - no `class`: never a glossary anchor
    /// - no `title`: empty footnote text, no link title
    /// - no `href`: rendered as plain text
    fn handle_link(
        &self,
        node: &Handle,
        output: &mut String,
        depth: usize,
        run: &mut ConversionRun<'_>,
    ) -> Result<(), ConversionError> {
        let class = get_attr(node, "class");
        let title = get_attr(node, "title");
        let href = get_attr(node, "href");

        let mut inner = String::new();
        self.traverse_children(node, &mut inner, depth, run)?;
        let text = self.normalize_text(&inner);

        if inner.starts_with(char::is_whitespace)
            && !text.is_empty()
            && !output.is_empty()
            && !output.ends_with(char::is_whitespace)
        {
            output.push(' ');
        }

        if has_class(class.as_deref(), GLOSSARY_CLASS) {
            let footnote = self.normalize_text(title.as_deref().unwrap_or_default());
            let index = run.add_footnote(footnote);
            output.push_str(&text);
            output.push_str(&format!("[^{}]", index));
        } else {
            let href = self
                .resolver
                .resolve_href(href.as_deref().unwrap_or_default(), run.assets);

            if !text.is_empty() {
                if href.is_empty() {
                    output.push_str(&text);
                } else {
                    output.push('[');
                    output.push_str(&text);
                    output.push_str("](");
                    output.push_str(&href);
                    write_title(output, title.as_deref());
                    output.push(')');
                }
            }
        }

        if inner.ends_with(char::is_whitespace) && !text.is_empty() {
            output.push(' ');
        }

        Ok(())
    }

    /// Handle image elements as `![alt](src "title")`
    ///
    /// The `src` passes through the weblayout directive rewrite. Images
    /// without a `src` are dropped.
    fn handle_image(&self, node: &Handle, output: &mut String, run: &mut ConversionRun<'_>) {
        let Some(src) = get_attr(node, "src") else {
            return;
        };
        let src = self.resolver.resolve_src(&src, run.assets);
        if src.is_empty() {
            return;
        }

        let alt = get_attr(node, "alt").unwrap_or_default();
        let title = get_attr(node, "title");

        output.push_str("![");
        output.push_str(&self.normalize_text(&alt));
        output.push_str("](");
        output.push_str(&src);
        write_title(output, title.as_deref());
        output.push(')');
    }

    /// Handle list elements (ul/ol)
    ///
    /// - Unordered lists use `- ` prefix
    /// - Ordered lists are numbered sequentially from their `start`
    ///   attribute, or from 1
    /// - Nested lists are indented with 2 spaces per level
    fn handle_list(
        &self,
        node: &Handle,
        output: &mut String,
        depth: usize,
        level: usize,
        run: &mut ConversionRun<'_>,
    ) -> Result<(), ConversionError> {
        if level == 0 {
            ensure_blank_line(output);
        }

        let ordered = matches!(node.data, NodeData::Element { ref name, .. } if name.local.as_ref() == "ol");
        let mut number = get_attr(node, "start")
            .and_then(|start| start.trim().parse::<usize>().ok())
            .unwrap_or(1);

        for child in node.children.borrow().iter() {
            if let NodeData::Element { ref name, .. } = child.data
                && name.local.as_ref() == "li"
            {
                let marker = if ordered {
                    let marker = format!("{}. ", number);
                    number = number.saturating_add(1);
                    marker
                } else {
                    "- ".to_string()
                };
                self.handle_list_item(child, output, depth + 1, level, &marker, run)?;
            }
        }

        // Ensure blank line after a top-level list
        if level == 0 && !output.ends_with("\n\n") {
            output.push('\n');
        }

        Ok(())
    }

    /// Handle a list item with the marker of its parent list
    fn handle_list_item(
        &self,
        node: &Handle,
        output: &mut String,
        depth: usize,
        level: usize,
        marker: &str,
        run: &mut ConversionRun<'_>,
    ) -> Result<(), ConversionError> {
        if !output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }

        for _ in 0..level {
            output.push_str("  ");
        }
        output.push_str(marker);

        let start_len = output.len();
        for child in node.children.borrow().iter() {
            match child.data {
                NodeData::Element { ref name, .. }
                    if matches!(name.local.as_ref(), "ul" | "ol") =>
                {
                    // Finish current line before nested list
                    if output.len() > start_len && !output.ends_with('\n') {
                        output.push('\n');
                    }
                    self.handle_list(child, output, depth + 1, level + 1, run)?;
                }
                _ => self.traverse_node(child, output, depth + 1, run)?,
            }
        }

        if !output.ends_with('\n') {
            output.push('\n');
        }

        Ok(())
    }

    /// Handle `pre` blocks as fenced code blocks
    ///
    /// The language is taken from a `language-*` or `lang-*` class on an
    /// inner `code` element. Code content is copied without normalization.
    fn handle_code_block(&self, node: &Handle, output: &mut String) {
        ensure_blank_line(output);

        let language = node
            .children
            .borrow()
            .iter()
            .filter(|child| {
                matches!(child.data, NodeData::Element { ref name, .. } if name.local.as_ref() == "code")
            })
            .filter_map(|child| get_attr(child, "class"))
            .find_map(|classes| {
                classes.split_whitespace().find_map(|class| {
                    class
                        .strip_prefix("language-")
                        .or_else(|| class.strip_prefix("lang-"))
                        .map(str::to_string)
                })
            })
            .unwrap_or_default();

        output.push_str("```");
        output.push_str(&language);
        output.push('\n');

        extract_code_content(node, output);

        if !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str("```\n\n");
    }

    /// Handle inline `code` as a backtick span
    fn handle_inline_code(&self, node: &Handle, output: &mut String) {
        let mut code_content = String::new();
        extract_code_content(node, &mut code_content);

        output.push('`');
        output.push_str(&code_content);
        output.push('`');
    }

    /// Handle inline formatting that wraps its content in a marker
    /// (`**` for bold, `*` for italic)
    fn handle_wrapped(
        &self,
        node: &Handle,
        marker: &str,
        output: &mut String,
        depth: usize,
        run: &mut ConversionRun<'_>,
    ) -> Result<(), ConversionError> {
        let mut inner = String::new();
        self.traverse_children(node, &mut inner, depth, run)?;

        let trimmed = inner.trim();
        if trimmed.is_empty() {
            output.push_str(&inner);
            return Ok(());
        }

        if inner.starts_with(char::is_whitespace)
            && !output.is_empty()
            && !output.ends_with(char::is_whitespace)
        {
            output.push(' ');
        }
        output.push_str(marker);
        output.push_str(trimmed);
        output.push_str(marker);
        if inner.ends_with(char::is_whitespace) {
            output.push(' ');
        }

        Ok(())
    }

    /// Handle blockquotes by prefixing every rendered line with `> `
    fn handle_blockquote(
        &self,
        node: &Handle,
        output: &mut String,
        depth: usize,
        run: &mut ConversionRun<'_>,
    ) -> Result<(), ConversionError> {
        let mut inner = String::new();
        self.traverse_children(node, &mut inner, depth, run)?;

        let content = inner.trim();
        if content.is_empty() {
            return Ok(());
        }

        ensure_blank_line(output);
        for line in content.lines() {
            let line = line.trim_end();
            if line.is_empty() {
                output.push_str(">\n");
            } else {
                output.push_str("> ");
                output.push_str(line);
                output.push('\n');
            }
        }
        output.push('\n');

        Ok(())
    }

    /// Handle tables by copying their markup verbatim
    ///
    /// The table is emitted as a standalone block. Directive references in
    /// its links and images are resolved in place, so only the rewritten
    /// attribute values differ from the source. When a value cannot be
    /// replaced in the source text the table is re-serialised instead.
    /// Glossary anchors inside tables are left as written.
    fn handle_table(
        &self,
        node: &Handle,
        output: &mut String,
        depth: usize,
        run: &mut ConversionRun<'_>,
    ) -> Result<(), ConversionError> {
        let mut rewrites = Vec::new();
        self.rewrite_table_links(node, depth, run, &mut rewrites)?;

        let copied = run
            .tables
            .source_of(node)
            .and_then(|source| rewrite_attribute_values(source, &rewrites));
        let markup = match copied {
            Some(markup) => markup,
            None => {
                debug!("Re-serialising table from the parsed tree");
                serialize_node(node)?
            }
        };

        ensure_blank_line(output);
        let placeholder = run.tables.stash(markup);
        output.push_str(&placeholder);
        output.push_str("\n\n");

        Ok(())
    }

    /// Resolve link and image directives inside a table, updating the tree
    /// and collecting `(original, rewritten)` attribute values
    fn rewrite_table_links(
        &self,
        node: &Handle,
        depth: usize,
        run: &mut ConversionRun<'_>,
        rewrites: &mut Vec<(String, String)>,
    ) -> Result<(), ConversionError> {
        self.security_validator
            .validate_depth(depth)
            .map_err(ConversionError::InvalidInput)?;

        if let NodeData::Element { ref name, .. } = node.data {
            let rewritten = match name.local.as_ref() {
                "a" if !has_class(get_attr(node, "class").as_deref(), GLOSSARY_CLASS) => {
                    get_attr(node, "href").map(|href| {
                        let resolved = self.resolver.resolve_href(&href, run.assets);
                        ("href", href, resolved)
                    })
                }
                "img" => get_attr(node, "src").map(|src| {
                    let resolved = self.resolver.resolve_src(&src, run.assets);
                    ("src", src, resolved)
                }),
                _ => None,
            };

            if let Some((attr, original, resolved)) = rewritten
                && original != resolved
            {
                set_attr(node, attr, &resolved);
                if !rewrites.iter().any(|(from, _)| *from == original) {
                    rewrites.push((original, resolved));
                }
            }
        }

        for child in node.children.borrow().iter() {
            self.rewrite_table_links(child, depth + 1, run, rewrites)?;
        }

        Ok(())
    }

    /// Collapse runs of whitespace to single spaces and trim
    ///
    /// ```text
    /// "  multiple   spaces  " -> "multiple spaces"
    /// "line\nbreak" -> "line break"
    /// "  \t  " -> ""
    /// ```
    fn normalize_text(&self, text: &str) -> String {
        let words: Vec<&str> = text.split_whitespace().collect();
        words.join(" ")
    }

    /// Normalize final output for deterministic Markdown generation
    ///
    /// **Normalization Rules:**
    /// 1. **Line Endings**: Enforce LF (`\n`) only, never CRLF (`\r\n`)
    /// 2. **Blank Lines**: Collapse consecutive blank lines, drop leading ones
    /// 3. **Trailing Whitespace**: Remove trailing whitespace from all lines
    /// 4. **Whitespace Normalization**: Collapse consecutive spaces outside code
    /// 5. **Final Newline**: Ensure exactly one newline at end of file
    ///
    /// Verbatim tables are still placeholders at this point and are not affected.
    fn normalize_output(&self, output: String) -> String {
        let output = output.replace("\r\n", "\n");

        let mut result = String::with_capacity(output.len());
        let mut prev_blank = true;
        let mut in_code_block = false;

        for line in output.lines() {
            let is_fence = line.trim_start().starts_with("```");
            let trimmed = line.trim_end();

            if trimmed.is_empty() && !in_code_block {
                if !prev_blank {
                    result.push('\n');
                    prev_blank = true;
                }
            } else {
                if in_code_block {
                    result.push_str(trimmed);
                } else {
                    result.push_str(&self.normalize_line_whitespace(trimmed));
                }
                result.push('\n');
                prev_blank = false;
            }

            if is_fence {
                in_code_block = !in_code_block;
            }
        }

        // Ensure single trailing newline; nothing rendered stays empty
        while result.ends_with("\n\n") {
            result.pop();
        }
        if !result.is_empty() && !result.ends_with('\n') {
            result.push('\n');
        }

        result
    }

    /// Collapse consecutive spaces within a line, preserving leading
    /// indentation and spaces inside inline code
    fn normalize_line_whitespace(&self, line: &str) -> String {
        let mut result = String::with_capacity(line.len());
        let mut prev_space = false;
        let mut at_start = true;
        let mut in_inline_code = false;

        for ch in line.chars() {
            if ch == '`' {
                in_inline_code = !in_inline_code;
                result.push(ch);
                prev_space = false;
                at_start = false;
            } else if ch == ' ' {
                if in_inline_code || at_start {
                    result.push(ch);
                } else if !prev_space {
                    result.push(ch);
                    prev_space = true;
                }
            } else {
                result.push(ch);
                prev_space = false;
                at_start = false;
            }
        }

        result
    }
}

impl Default for MarkdownConverter {
    fn default() -> Self {
        Self::new()
    }
}

/// Ensure a blank line separates the next block from previous output
fn ensure_blank_line(output: &mut String) {
    if !output.is_empty() && !output.ends_with("\n\n") {
        if output.ends_with('\n') {
            output.push('\n');
        } else {
            output.push_str("\n\n");
        }
    }
}

fn set_attr(node: &Handle, name: &str, value: &str) {
    if let NodeData::Element { ref attrs, .. } = node.data {
        for attr in attrs.borrow_mut().iter_mut() {
            if attr.name.local.as_ref() == name {
                attr.value = StrTendril::from_slice(value);
            }
        }
    }
}

/// Look up an attribute value; absent attributes are `None`
fn get_attr(node: &Handle, name: &str) -> Option<String> {
    match node.data {
        NodeData::Element { ref attrs, .. } => attrs
            .borrow()
            .iter()
            .find(|attr| attr.name.local.as_ref() == name)
            .map(|attr| attr.value.to_string()),
        _ => None,
    }
}

fn has_class(class: Option<&str>, wanted: &str) -> bool {
    class.is_some_and(|classes| classes.split_whitespace().any(|class| class == wanted))
}

fn write_title(output: &mut String, title: Option<&str>) {
    if let Some(title) = title
        && !title.trim().is_empty()
    {
        output.push_str(" \"");
        output.push_str(&title.split_whitespace().collect::<Vec<_>>().join(" ").replace('"', "\\\""));
        output.push('"');
    }
}

/// Copy text content without any normalization (code blocks and spans)
///
/// Walks with an explicit stack: `pre` content is not depth-checked.
fn extract_code_content(node: &Handle, output: &mut String) {
    let mut stack = vec![node.clone()];
    while let Some(current) = stack.pop() {
        match current.data {
            NodeData::Text { ref contents } => output.push_str(&contents.borrow()),
            NodeData::Element { .. } => {
                stack.extend(current.children.borrow().iter().rev().cloned());
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn convert_html_for_test(html: &str) -> String {
        MarkdownConverter::new()
            .convert(html)
            .expect("Conversion failed")
    }

    #[test]
    fn test_heading_conversion() {
        let result = convert_html_for_test("<h1>Title</h1><h2>Subtitle</h2>");
        assert_eq!(result, "# Title\n\n## Subtitle\n");
    }

    #[test]
    fn test_paragraph_conversion() {
        let result = convert_html_for_test("<p>First paragraph.</p><p>Second paragraph.</p>");
        assert_eq!(result, "First paragraph.\n\nSecond paragraph.\n");
    }

    #[test]
    fn test_text_normalization() {
        let result = convert_html_for_test("<p>Text   with    multiple\n   spaces</p>");
        assert_eq!(result, "Text with multiple spaces\n");
    }

    #[test]
    fn test_whitespace_only_text_suppressed() {
        let result = convert_html_for_test("<div>   \n  <p>One</p>   \n  <p>Two</p>\n</div>");
        assert_eq!(result, "One\n\nTwo\n");
    }

    #[test]
    fn test_whitespace_between_inline_elements_suppressed() {
        let result = convert_html_for_test("<p><b>A</b>   \n  <i>B</i></p>");
        assert_eq!(result, "**A***B*\n");
    }

    #[test]
    fn test_script_removal() {
        let result = convert_html_for_test("<p>Before</p><script>alert('x')</script><p>After</p>");
        assert!(!result.contains("alert"));
        assert!(result.contains("Before"));
        assert!(result.contains("After"));
    }

    #[test]
    fn test_glossary_anchor_becomes_footnote() {
        let result =
            convert_html_for_test("<p>See <a class=\"glossary\" title=\"Foo\">bar</a>.</p>");
        assert_eq!(result, "See bar[^1].\n\n[^1]: Foo\n");
    }

    #[test]
    fn test_glossary_class_among_others() {
        let result = convert_html_for_test(
            "<p><a class=\"term glossary\" title=\"Definition\" href=\"/x\">word</a></p>",
        );
        assert!(result.contains("word[^1]"));
        assert!(!result.contains("](/x)"));
        assert!(result.ends_with("[^1]: Definition\n"));
    }

    #[test]
    fn test_glossary_without_title() {
        let result = convert_html_for_test("<p><a class=\"glossary\">term</a></p>");
        assert_eq!(result, "term[^1]\n\n[^1]: \n");
    }

    #[test]
    fn test_footnotes_in_encounter_order() {
        let html = "<p><a class=\"glossary\" title=\"First\">one</a> and \
                    <a class=\"glossary\" title=\"Second\">two</a></p>\
                    <ul><li><a class=\"glossary\" title=\"Third\">three</a></li></ul>";
        let result = convert_html_for_test(html);

        let one = result.find("one[^1]").expect("first marker");
        let two = result.find("two[^2]").expect("second marker");
        let three = result.find("three[^3]").expect("third marker");
        assert!(one < two && two < three);
        assert!(result.ends_with("\n[^1]: First\n\n[^2]: Second\n\n[^3]: Third\n"));
    }

    #[test]
    fn test_footnotes_reset_between_pages() {
        let mut converter = MarkdownConverter::new();
        let html = "<p><a class=\"glossary\" title=\"T\">x</a></p>";

        let first = converter.convert(html).expect("Conversion failed");
        let second = converter.convert(html).expect("Conversion failed");

        assert_eq!(first, second);
        assert!(!second.contains("[^2]"));
    }

    #[test]
    fn test_link_conversion() {
        let result =
            convert_html_for_test("<p>Visit <a href=\"https://example.com\">Example</a> for more.</p>");
        assert_eq!(result, "Visit [Example](https://example.com) for more.\n");
    }

    #[test]
    fn test_link_with_title() {
        let result = convert_html_for_test("<a href=\"/x\" title='Say \"hi\"'>Go</a>");
        assert!(result.contains("[Go](/x \"Say \\\"hi\\\"\")"));
    }

    #[test]
    fn test_link_without_href() {
        let result = convert_html_for_test("<p>This is <a>not a link</a> text.</p>");
        assert_eq!(result, "This is not a link text.\n");
    }

    #[test]
    fn test_link_with_empty_text() {
        let result = convert_html_for_test("<p>Link: <a href=\"https://example.com\"></a></p>");
        assert!(!result.contains("[](https://example.com)"));
    }

    #[test]
    fn test_link_with_formatted_text() {
        let result = convert_html_for_test("<p><a href=\"/x\"><strong>Bold</strong> link</a></p>");
        assert_eq!(result, "[**Bold** link](/x)\n");
    }

    #[test]
    fn test_link_directive_rewritten() {
        let mut converter = MarkdownConverter::new();
        let result = converter
            .convert("<p><a href=\"[!--$ssServerRelativeSiteRoot--]Opendocuments/OpenPDFdocuments/CON999\">PDF</a></p>")
            .expect("Conversion failed");

        assert_eq!(result, "[PDF](stellent/CON999.pdf)\n");
        assert!(converter.assets().assets_to_download().contains("CON999"));
        assert!(!converter.assets().assets_unknown_type().contains("CON999"));
    }

    #[test]
    fn test_assets_accumulate_across_pages() {
        let mut converter = MarkdownConverter::new();
        converter
            .convert("<a href=\"[!--$ssServerRelativeSiteRoot--]x/CON1\">a</a>")
            .expect("Conversion failed");
        converter
            .convert("<a href=\"[!--$HttpRelativeWebRoot--]docs/CON2.doc\">b</a>")
            .expect("Conversion failed");

        let assets = converter.assets();
        assert_eq!(assets.assets_to_download().len(), 2);
        assert_eq!(assets.assets_unknown_type().len(), 1);
        assert!(assets.assets_unknown_type().contains("CON1"));
    }

    #[test]
    fn test_take_assets_resets_ledger() {
        let mut converter = MarkdownConverter::new();
        converter
            .convert("<a href=\"[!--$ssServerRelativeSiteRoot--]x/CON1\">a</a>")
            .expect("Conversion failed");

        let taken = converter.take_assets();
        assert_eq!(taken.assets_to_download().len(), 1);
        assert!(converter.assets().is_empty());
    }

    #[test]
    fn test_image_conversion() {
        let result = convert_html_for_test("<img src=\"image.png\" alt=\"Description\">");
        assert_eq!(result, "![Description](image.png)\n");
    }

    #[test]
    fn test_image_weblayout_directive() {
        let mut converter = MarkdownConverter::new();
        let result = converter
            .convert("<img src=\"[!--$ssWeblayoutUrl('groups/images/chart.png')--]\" alt=\"Chart\">")
            .expect("Conversion failed");

        assert_eq!(result, "![Chart](stellent/chart.png)\n");
        assert!(converter.assets().assets_to_download().contains("chart"));
    }

    #[test]
    fn test_image_without_src() {
        let result = convert_html_for_test("<p>Text <img alt=\"Missing\"></p>");
        assert!(!result.contains("!["));
    }

    #[test]
    fn test_image_site_root_src_not_rewritten() {
        let mut converter = MarkdownConverter::new();
        let src = "[!--$ssServerRelativeSiteRoot--]x/CON5";
        let result = converter
            .convert(&format!("<img src=\"{}\" alt=\"a\">", src))
            .expect("Conversion failed");

        assert!(result.contains(src));
        assert!(converter.assets().is_empty());
    }

    #[test]
    fn test_unordered_list_conversion() {
        let result = convert_html_for_test("<ul><li>Item 1</li><li>Item 2</li></ul>");
        assert_eq!(result, "- Item 1\n- Item 2\n");
    }

    #[test]
    fn test_ordered_list_conversion() {
        let result = convert_html_for_test("<ol><li>First</li><li>Second</li></ol>");
        assert_eq!(result, "1. First\n2. Second\n");
    }

    #[test]
    fn test_ordered_list_start_attribute() {
        let result = convert_html_for_test("<ol start=\"4\"><li>Four</li><li>Five</li></ol>");
        assert_eq!(result, "4. Four\n5. Five\n");
    }

    #[test]
    fn test_nested_ordered_list_numbering() {
        let result = convert_html_for_test(
            "<ol><li>A<ol><li>A1</li><li>A2</li></ol></li><li>B</li><li>C</li></ol>",
        );
        assert_eq!(result, "1. A\n  1. A1\n  2. A2\n2. B\n3. C\n");
    }

    #[test]
    fn test_nested_list() {
        let result =
            convert_html_for_test("<ul><li>Outer<ul><li>Inner</li></ul></li><li>Next</li></ul>");
        assert_eq!(result, "- Outer\n  - Inner\n- Next\n");
    }

    #[test]
    fn test_list_after_paragraph() {
        let result = convert_html_for_test("<p>Intro</p><ul><li>A</li></ul><p>Outro</p>");
        assert_eq!(result, "Intro\n\n- A\n\nOutro\n");
    }

    #[test]
    fn test_code_block_with_language() {
        let result = convert_html_for_test(
            "<pre><code class=\"language-rust\">fn  main() {\n    x();\n}</code></pre>",
        );
        assert_eq!(result, "```rust\nfn  main() {\n    x();\n}\n```\n");
    }

    #[test]
    fn test_inline_code() {
        let result = convert_html_for_test("<p>Use <code>a  b</code> here</p>");
        assert_eq!(result, "Use `a  b` here\n");
    }

    #[test]
    fn test_bold_and_italic() {
        let result = convert_html_for_test("<p><strong>bold</strong> and <em>italic</em></p>");
        assert_eq!(result, "**bold** and *italic*\n");
    }

    #[test]
    fn test_empty_bold() {
        let result = convert_html_for_test("<p>a<b></b>b</p>");
        assert_eq!(result, "ab\n");
    }

    #[test]
    fn test_line_break() {
        let result = convert_html_for_test("<p>Line one<br>Line two</p>");
        assert_eq!(result, "Line one\\\nLine two\n");
    }

    #[test]
    fn test_horizontal_rule() {
        let result = convert_html_for_test("<p>A</p><hr><p>B</p>");
        assert_eq!(result, "A\n\n---\n\nB\n");
    }

    #[test]
    fn test_blockquote() {
        let result = convert_html_for_test("<blockquote><p>Quoted</p><p>Twice</p></blockquote>");
        assert_eq!(result, "> Quoted\n>\n> Twice\n");
    }

    #[test]
    fn test_table_verbatim() {
        let table = "<table border=\"1\"><tr><td>A  <br/>\n\n\n   B</td></tr></table>";
        let result = convert_html_for_test(&format!("<p>Before</p>{}<p>After</p>", table));
        assert_eq!(result, format!("Before\n\n{}\n\nAfter\n", table));
    }

    #[test]
    fn test_table_directives_rewritten_in_place() {
        let mut converter = MarkdownConverter::new();
        let table = "<table border=1><tr><td><a href=\"[!--$HttpRelativeWebRoot--]docs/form.pdf\">Form</a></td></tr></table>";
        let result = converter.convert(table).expect("Conversion failed");

        assert_eq!(
            result,
            "<table border=1><tr><td><a href=\"stellent/form.pdf\">Form</a></td></tr></table>\n"
        );
        assert!(converter.assets().assets_to_download().contains("form"));
    }

    #[test]
    fn test_table_entity_encoded_directive_reserialised() {
        let table = "<table><tr><td><a href=\"[!--$ssServerRelativeSiteRoot--]x/CON42?a=1&amp;showpage=2\">Next</a></td></tr></table>";
        let result = convert_html_for_test(table);

        assert_eq!(
            result,
            "<table><tbody><tr><td><a href=\"CON42_2.html\">Next</a></td></tr></tbody></table>\n"
        );
    }

    #[test]
    fn test_table_glossary_not_footnoted() {
        let result = convert_html_for_test(
            "<table><tr><td><a class=\"glossary\" title=\"T\">x</a></td></tr></table>",
        );
        assert!(!result.contains("[^1]"));
    }

    #[test]
    fn test_nesting_limit_is_hard_failure() {
        let options = ConversionOptions {
            max_depth: 5,
            ..Default::default()
        };
        let mut converter = MarkdownConverter::with_options(options);
        let html = format!("{}x{}", "<div>".repeat(10), "</div>".repeat(10));

        let result = converter.convert(&html);
        assert!(matches!(result, Err(ConversionError::InvalidInput(_))));
    }

    #[test]
    fn test_blank_input_converts_to_empty() {
        let mut converter = MarkdownConverter::new();
        for html in ["", "   \n\t", "<!-- x -->", "<p>  </p><div></div>"] {
            assert_eq!(converter.convert(html).expect("Conversion failed"), "");
        }
    }

    #[test]
    fn test_deep_nesting_fails_without_overflow() {
        let depth = 200_000;
        let html = format!("{}x{}", "<span>".repeat(depth), "</span>".repeat(depth));

        let options = ConversionOptions {
            max_depth: 100,
            ..Default::default()
        };
        let result = MarkdownConverter::with_options(options).convert(&html);
        assert!(matches!(result, Err(ConversionError::InvalidInput(_))));
    }

    #[test]
    fn test_deep_nesting_inside_pre_is_copied() {
        let depth = 200_000;
        let html = format!(
            "<pre>{}x{}</pre>",
            "<span>".repeat(depth),
            "</span>".repeat(depth)
        );

        let result = convert_html_for_test(&html);
        assert_eq!(result, "```\nx\n```\n");
    }

    #[test]
    fn test_private_use_text_does_not_disturb_tables() {
        let table = "<table><tr><td>cell</td></tr></table>";
        let html = format!("<p>\u{E000}0\u{E001} and \u{E000}1\u{E000}</p>{}", table);

        let result = convert_html_for_test(&html);
        assert_eq!(
            result,
            format!("\u{E000}0\u{E001} and \u{E000}1\u{E000}\n\n{}\n", table)
        );
    }

    #[test]
    fn test_normalize_output_rules() {
        let converter = MarkdownConverter::new();
        let result = converter.normalize_output("\n\nLine  1  \r\n\r\n\r\nLine 2\n\n\n".to_string());
        assert_eq!(result, "Line 1\n\nLine 2\n");
    }

    #[test]
    fn test_normalize_preserves_code_blocks() {
        let converter = MarkdownConverter::new();
        let input = "```rust\nfn  test()  {\n\n\n    let  x  =  5;\n}\n```\n".to_string();
        let result = converter.normalize_output(input);
        assert!(result.contains("fn  test()  {"));
        assert!(result.contains("    let  x  =  5;"));
    }

    proptest! {
        #[test]
        fn prop_glossary_footnotes_match_order(
            terms in prop::collection::vec(("[a-z]{1,10}", "[A-Za-z]{1,20}"), 1..8),
        ) {
            let html: String = terms
                .iter()
                .map(|(text, title)| {
                    format!("<p><a class=\"glossary\" title=\"{}\">{}</a></p>", title, text)
                })
                .collect();
            let markdown = convert_html_for_test(&html);

            let mut last = 0;
            for (index, (text, title)) in terms.iter().enumerate() {
                let marker = format!("{}[^{}]", text, index + 1);
                let position = markdown[last..].find(&marker);
                prop_assert!(position.is_some(), "missing {} in:\n{}", marker, markdown);
                last += position.unwrap_or(0) + marker.len();

                let definition = format!("\n[^{}]: {}\n", index + 1, title);
                prop_assert!(markdown.contains(&definition), "missing {} in:\n{}", definition, markdown);
            }
        }

        #[test]
        fn prop_whitespace_only_text_contributes_nothing(
            ws in "[ \t\n]{1,20}",
        ) {
            let with_ws = convert_html_for_test(&format!("<p>A</p>{}<p>B</p>", ws));
            let without = convert_html_for_test("<p>A</p><p>B</p>");
            prop_assert_eq!(with_ws, without);
        }

        #[test]
        fn prop_fresh_runs_are_identical(
            text in "[a-zA-Z0-9 ]{1,40}",
            code in "CON[0-9]{1,6}",
        ) {
            let html = format!(
                "<h1>{}</h1><p><a href=\"[!--$ssServerRelativeSiteRoot--]x/{}\">{}</a> \
                 <a class=\"glossary\" title=\"{}\">g</a></p>",
                text, code, text, text
            );
            let first = MarkdownConverter::new().convert(&html).expect("Conversion failed");
            let second = MarkdownConverter::new().convert(&html).expect("Conversion failed");
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_tables_copied_byte_identical(
            cells in prop::collection::vec("[a-zA-Z0-9 ]{0,12}", 1..6),
        ) {
            let row: String = cells.iter().map(|cell| format!("<td>{}</td>", cell)).collect();
            let table = format!("<table><tr>{}</tr></table>", row);
            let markdown = convert_html_for_test(&format!("<p>x</p>{}", table));
            prop_assert!(markdown.contains(&table), "table altered:\n{}", markdown);
        }
    }
}
