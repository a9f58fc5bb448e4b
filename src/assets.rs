//! Batch-wide ledger of legacy assets that must be fetched by hand
//!
//! Directive rewriting turns references to documents and images held in the
//! legacy CMS into local paths under the asset directory. The files behind
//! those paths are not downloaded by the importer; instead every stem is
//! recorded here and reported once the whole export has been processed.
//!
//! The ledger is owned by the converter for the lifetime of a batch and is
//! never reset between pages.

use std::collections::BTreeSet;
use std::fmt::Write;

/// Whether the file type of a recorded asset could be determined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    /// Extension known (retained from the source or implied by the directive)
    Known,
    /// Extension could not be determined; the link uses `.unknown`
    Unknown,
}

/// Asset stems collected across every page of a batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetLedger {
    to_download: BTreeSet<String>,
    unknown_type: BTreeSet<String>,
}

impl AssetLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an asset stem
    ///
    /// Every stem lands in the download set; stems of unknown kind are also
    /// flagged in the unknown-type set.
    pub fn record(&mut self, stem: &str, kind: AssetKind) {
        self.to_download.insert(stem.to_string());
        if kind == AssetKind::Unknown {
            self.unknown_type.insert(stem.to_string());
        }
    }

    /// All stems that must be fetched manually
    pub fn assets_to_download(&self) -> &BTreeSet<String> {
        &self.to_download
    }

    /// Stems whose file type is unknown (subset of `assets_to_download`)
    pub fn assets_unknown_type(&self) -> &BTreeSet<String> {
        &self.unknown_type
    }

    pub fn is_empty(&self) -> bool {
        self.to_download.is_empty()
    }

    /// Fold another ledger into this one
    ///
    /// Used when pages are converted by independent converters and the
    /// results are combined afterwards.
    pub fn merge(&mut self, other: AssetLedger) {
        self.to_download.extend(other.to_download);
        self.unknown_type.extend(other.unknown_type);
    }

    /// Render the manual download worklist
    ///
    /// # Format
    ///
    /// ```text
    /// 2 assets to manually download from Stellent to out/stellent.
    ///  * CON1
    ///  * CON2
    /// 1 assets with unknown types.
    /// Extensions for these assets have been set to `.unknown`.
    ///  * CON2
    /// ```
    ///
    /// The unknown-type section is omitted when no such assets exist.
    pub fn report(&self, asset_path: &str) -> String {
        let mut out = String::new();

        // Writing to a String cannot fail
        let _ = writeln!(
            out,
            "{} assets to manually download from Stellent to {}.",
            self.to_download.len(),
            asset_path
        );
        for stem in &self.to_download {
            let _ = writeln!(out, " * {}", stem);
        }

        if !self.unknown_type.is_empty() {
            let _ = writeln!(out, "{} assets with unknown types.", self.unknown_type.len());
            out.push_str("Extensions for these assets have been set to `.unknown`.\n");
            for stem in &self.unknown_type {
                let _ = writeln!(out, " * {}", stem);
            }
        }

        out
    }
}
