//! Legacy CMS directive resolution for `href` and `src` values
//!
//! Pages exported from Stellent reference other documents through template
//! directives such as `[!--$ssServerRelativeSiteRoot--]` that are only
//! meaningful inside the CMS. This module rewrites those values into paths
//! that work in the exported corpus and records every asset the rewritten
//! links point at in an [`AssetLedger`].
//!
//! # Rules for `href`
//!
//! Rules are applied in order to the progressively rewritten value:
//!
//! 1. `[!--$ssLink("…")--]` is unwrapped to its inner literal
//! 2. `[!--$ssServerRelativeSiteRoot--]Opendocuments/OpenPDFdocuments/CON1`
//!    becomes `stellent/CON1.pdf` (known asset)
//! 3. Any value with a `showpage` query parameter becomes
//!    `<stem>_<showpage>.html`, keeping the `#fragment`
//! 4. Any remaining site-root value is looked up in the [`RedirectMap`]; a
//!    miss becomes `stellent/<stem>.unknown` (unknown asset)
//! 5. `[!--$HttpRelativeWebRoot--]path/file.ext` becomes
//!    `stellent/file.ext` (known asset)
//!
//! # Rule for `src`
//!
//! `[!--$ssWeblayoutUrl('path/file.ext')--]` becomes `stellent/file.ext`.
//!
//! Anything else passes through unchanged. No rule touches the network or
//! the filesystem.

use std::collections::BTreeMap;

use log::debug;
use percent_encoding::percent_decode_str;

use crate::assets::{AssetKind, AssetLedger};

/// Directive marking a path relative to the CMS site root
pub const SITE_ROOT_DIRECTIVE: &str = "[!--$ssServerRelativeSiteRoot--]";

/// Directive marking a path relative to the CMS web root
pub const HTTP_ROOT_DIRECTIVE: &str = "[!--$HttpRelativeWebRoot--]";

/// Default directory (relative to the output) that downloaded assets go in
pub const DEFAULT_ASSET_DIR: &str = "stellent";

const OPEN_DOCUMENTS_PATH: &str = "Opendocuments/OpenPDFdocuments";

const LINK_DIRECTIVE_PREFIX: &str = "[!--$ssLink";
const LINK_DIRECTIVE_OPEN: &str = "[!--$ssLink(\"";
const LINK_DIRECTIVE_CLOSE: &str = "\")--]";

const WEBLAYOUT_DIRECTIVE_PREFIX: &str = "[!--$ssWeblayoutUrl(";
const WEBLAYOUT_DIRECTIVE_OPEN: &str = "[!--$ssWeblayoutUrl('";
const WEBLAYOUT_DIRECTIVE_CLOSE: &str = "')--]";

/// Query parameter selecting a page of a paginated section
const SHOWPAGE_PARAM: &str = "showpage";

/// Legacy document codes that redirect to known external URLs
///
/// Supplied to the resolver at construction so deployments can extend it
/// from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectMap {
    entries: BTreeMap<String, String>,
}

impl RedirectMap {
    /// A map with no entries
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// The redirects known to the importer out of the box
    pub fn builtin() -> Self {
        let mut map = Self::empty();
        map.insert(
            "CON123123",
            "https://www.gov.uk/drug-safety-update/addiction-to-benzodiazepines-and-codeine",
        );
        map
    }

    pub fn insert(&mut self, code: impl Into<String>, url: impl Into<String>) {
        self.entries.insert(code.into(), url.into());
    }

    pub fn get(&self, code: &str) -> Option<&str> {
        self.entries.get(code).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for RedirectMap {
    fn default() -> Self {
        Self::builtin()
    }
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for RedirectMap {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (code, url) in iter {
            self.insert(code, url);
        }
    }
}

/// Classification of a single legacy reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectiveReference {
    /// Known legacy code redirected to an external URL
    ExternalRedirect { url: String },
    /// Page of a paginated section converted in the same batch
    PaginatedSection {
        stem: String,
        page: String,
        fragment: Option<String>,
    },
    /// Downloadable asset whose file name (and so type) is known
    Asset { stem: String, file_name: String },
    /// Downloadable asset whose type could not be determined
    UnknownAsset { stem: String },
}

impl DirectiveReference {
    /// The value that replaces the original attribute
    pub fn rewrite(&self, asset_dir: &str) -> String {
        match self {
            DirectiveReference::ExternalRedirect { url } => url.clone(),
            DirectiveReference::PaginatedSection {
                stem,
                page,
                fragment,
            } => match fragment {
                Some(fragment) => format!("{}_{}.html#{}", stem, page, fragment),
                None => format!("{}_{}.html", stem, page),
            },
            DirectiveReference::Asset { file_name, .. } => format!("{}/{}", asset_dir, file_name),
            DirectiveReference::UnknownAsset { stem } => {
                format!("{}/{}.unknown", asset_dir, stem)
            }
        }
    }

    /// The asset this reference requires, if any
    pub fn asset(&self) -> Option<(&str, AssetKind)> {
        match self {
            DirectiveReference::Asset { stem, .. } => Some((stem, AssetKind::Known)),
            DirectiveReference::UnknownAsset { stem } => Some((stem, AssetKind::Unknown)),
            DirectiveReference::ExternalRedirect { .. }
            | DirectiveReference::PaginatedSection { .. } => None,
        }
    }
}

/// Applies the directive rules to attribute values
#[derive(Debug, Clone)]
pub struct DirectiveResolver {
    redirects: RedirectMap,
    asset_dir: String,
}

impl DirectiveResolver {
    /// Create a resolver with the built-in redirects and the default asset directory
    pub fn new() -> Self {
        Self::with_redirects(RedirectMap::builtin(), DEFAULT_ASSET_DIR)
    }

    pub fn with_redirects(redirects: RedirectMap, asset_dir: impl Into<String>) -> Self {
        Self {
            redirects,
            asset_dir: asset_dir.into(),
        }
    }

    pub fn asset_dir(&self) -> &str {
        &self.asset_dir
    }

    pub fn redirects(&self) -> &RedirectMap {
        &self.redirects
    }

    /// Rewrite an anchor `href`, recording required assets in `assets`
    ///
    /// # Examples
    ///
    /// ```rust
    /// use learning_importer::assets::AssetLedger;
    /// use learning_importer::directive::DirectiveResolver;
    ///
    /// let resolver = DirectiveResolver::new();
    /// let mut assets = AssetLedger::new();
    ///
    /// let href = resolver.resolve_href("/foo/CON42?showpage=3#section", &mut assets);
    /// assert_eq!(href, "CON42_3.html#section");
    /// assert!(assets.is_empty());
    /// ```
    pub fn resolve_href(&self, href: &str, assets: &mut AssetLedger) -> String {
        let mut value = unwrap_link_directive(href).to_string();

        if let Some(reference) = self.classify_open_document(&value) {
            value = self.apply(&value, reference, assets);
        }

        if let Some(reference) = classify_paginated_section(&value) {
            value = self.apply(&value, reference, assets);
        }

        if let Some(reference) = self.classify_site_root(&value) {
            value = self.apply(&value, reference, assets);
        }

        if let Some(reference) = classify_http_root(&value) {
            value = self.apply(&value, reference, assets);
        }

        value
    }

    /// Rewrite an image `src`, recording required assets in `assets`
    pub fn resolve_src(&self, src: &str, assets: &mut AssetLedger) -> String {
        match classify_weblayout(src) {
            Some(reference) => self.apply(src, reference, assets),
            None => src.to_string(),
        }
    }

    fn apply(
        &self,
        original: &str,
        reference: DirectiveReference,
        assets: &mut AssetLedger,
    ) -> String {
        if let Some((stem, kind)) = reference.asset() {
            assets.record(stem, kind);
        }
        let rewritten = reference.rewrite(&self.asset_dir);
        debug!("Rewrote legacy reference {} -> {}", original, rewritten);
        rewritten
    }

    /// Rule 2: site-root links into the open PDF documents area
    fn classify_open_document(&self, value: &str) -> Option<DirectiveReference> {
        let rest = value.strip_prefix(SITE_ROOT_DIRECTIVE)?;
        if !rest.starts_with(OPEN_DOCUMENTS_PATH) {
            return None;
        }

        let stem = path_stem(split_url(rest).path);
        if stem.is_empty() {
            return None;
        }

        Some(DirectiveReference::Asset {
            file_name: format!("{}.pdf", stem),
            stem: stem.to_string(),
        })
    }

    /// Rule 4: any other site-root link
    fn classify_site_root(&self, value: &str) -> Option<DirectiveReference> {
        let rest = value.strip_prefix(SITE_ROOT_DIRECTIVE)?;
        let stem = path_stem(split_url(rest).path);
        if stem.is_empty() {
            return None;
        }

        match self.redirects.get(stem) {
            Some(url) => Some(DirectiveReference::ExternalRedirect {
                url: url.to_string(),
            }),
            None => Some(DirectiveReference::UnknownAsset {
                stem: stem.to_string(),
            }),
        }
    }
}

impl Default for DirectiveResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Rule 1: strip `[!--$ssLink("…")--]` down to its literal
fn unwrap_link_directive(value: &str) -> std::borrow::Cow<'_, str> {
    if value.starts_with(LINK_DIRECTIVE_PREFIX) {
        std::borrow::Cow::Owned(
            value
                .replace(LINK_DIRECTIVE_OPEN, "")
                .replace(LINK_DIRECTIVE_CLOSE, ""),
        )
    } else {
        std::borrow::Cow::Borrowed(value)
    }
}

/// Rule 3: links to a page of a paginated section
fn classify_paginated_section(value: &str) -> Option<DirectiveReference> {
    let parts = split_url(value);
    let page = query_param(parts.query?, SHOWPAGE_PARAM)?;

    Some(DirectiveReference::PaginatedSection {
        stem: path_stem(parts.path).to_string(),
        page,
        fragment: parts.fragment.filter(|f| !f.is_empty()).map(str::to_string),
    })
}

/// Rule 5: web-root relative links to files with a retained extension
fn classify_http_root(value: &str) -> Option<DirectiveReference> {
    let rest = value.strip_prefix(HTTP_ROOT_DIRECTIVE)?;
    let file_name = path_name(split_url(rest).path);
    if file_name.is_empty() {
        return None;
    }

    Some(DirectiveReference::Asset {
        stem: path_stem(file_name).to_string(),
        file_name: file_name.to_string(),
    })
}

/// Image rule: `[!--$ssWeblayoutUrl('…')--]`
fn classify_weblayout(value: &str) -> Option<DirectiveReference> {
    if !value.starts_with(WEBLAYOUT_DIRECTIVE_PREFIX) {
        return None;
    }

    let inner = value
        .replace(WEBLAYOUT_DIRECTIVE_OPEN, "")
        .replace(WEBLAYOUT_DIRECTIVE_CLOSE, "");
    let file_name = path_name(&inner);
    if file_name.is_empty() {
        return None;
    }

    Some(DirectiveReference::Asset {
        stem: path_stem(file_name).to_string(),
        file_name: file_name.to_string(),
    })
}

/// A URL split into path, query and fragment
#[derive(Debug, PartialEq, Eq)]
struct UrlParts<'a> {
    path: &'a str,
    query: Option<&'a str>,
    fragment: Option<&'a str>,
}

/// Split a URL the way a generic URL parser would, without validating it
///
/// The scheme and authority of absolute URLs are dropped from the path.
fn split_url(value: &str) -> UrlParts<'_> {
    let (rest, fragment) = match value.split_once('#') {
        Some((rest, fragment)) => (rest, Some(fragment)),
        None => (value, None),
    };
    let (path, query) = match rest.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (rest, None),
    };

    let path = match path.find("://") {
        Some(scheme_end) => {
            let after_scheme = &path[scheme_end + 3..];
            after_scheme
                .find('/')
                .map(|slash| &after_scheme[slash..])
                .unwrap_or("")
        }
        None => path,
    };

    UrlParts {
        path,
        query,
        fragment,
    }
}

/// First non-empty value of `name` in a query string
fn query_param(query: &str, name: &str) -> Option<String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .filter(|(key, _)| decode_query_component(key) == name)
        .map(|(_, value)| decode_query_component(value))
        .find(|value| !value.is_empty())
}

fn decode_query_component(component: &str) -> String {
    let spaced = component.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

/// Final non-empty path component
fn path_name(path: &str) -> &str {
    path.rsplit('/')
        .find(|segment| !segment.is_empty() && *segment != ".")
        .unwrap_or("")
}

/// Final path component without its extension
///
/// A leading dot (hidden file) or trailing dot does not start an extension.
fn path_stem(path: &str) -> &str {
    let name = path_name(path);
    match name.rfind('.') {
        Some(dot) if dot > 0 && dot < name.len() - 1 => &name[..dot],
        _ => name,
    }
}
