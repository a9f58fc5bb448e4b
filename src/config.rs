//! Importer configuration file loading
//!
//! Every setting has a built-in default, so the configuration file is
//! optional. When given, it is a TOML file such as:
//!
//! ```toml
//! asset_dir = "stellent"
//! max_depth = 1000
//! head_field = "Head"
//! body_field = "Body"
//!
//! [redirects]
//! CON123456 = "https://www.gov.uk/guidance/example"
//! ```
//!
//! Entries under `[redirects]` are merged over the built-in redirect map.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::converter::ConversionOptions;
use crate::directive::{DEFAULT_ASSET_DIR, RedirectMap};
use crate::error::ConversionError;
use crate::export::{BODY_FIELD, HEAD_FIELD, RowFields};
use crate::security::MAX_NESTING_DEPTH;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImporterConfig {
    /// Directory, relative to each page, that asset links point into (default: "stellent").
    pub asset_dir: Option<String>,
    /// Maximum element nesting depth of a page body (default: 1000).
    pub max_depth: Option<usize>,
    /// Export field holding the page title (default: "Head").
    pub head_field: Option<String>,
    /// Export field holding the page body (default: "Body").
    pub body_field: Option<String>,
    /// Extra legacy codes that redirect to external URLs.
    #[serde(default)]
    pub redirects: BTreeMap<String, String>,
}

impl ImporterConfig {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// - `ConversionError::Io`: the file could not be read
    /// - `ConversionError::Config`: the file is not valid configuration
    pub fn load(path: &Path) -> Result<Self, ConversionError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content).map_err(|e| match e {
            ConversionError::Config(msg) => {
                ConversionError::Config(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConversionError> {
        let config: ImporterConfig =
            toml::from_str(content).map_err(|e| ConversionError::Config(e.to_string()))?;

        if config.max_depth == Some(0) {
            return Err(ConversionError::Config(
                "max_depth must be at least 1".to_string(),
            ));
        }

        Ok(config)
    }

    /// Asset directory with default fallback
    pub fn asset_dir(&self) -> String {
        self.asset_dir
            .clone()
            .unwrap_or_else(|| DEFAULT_ASSET_DIR.to_string())
    }

    /// Nesting limit with default fallback
    pub fn max_depth(&self) -> usize {
        self.max_depth.unwrap_or(MAX_NESTING_DEPTH)
    }

    /// Built-in redirects with configured entries merged over them
    pub fn redirects(&self) -> RedirectMap {
        let mut redirects = RedirectMap::builtin();
        redirects.extend(self.redirects.clone());
        redirects
    }

    /// Export field names with default fallback
    pub fn row_fields(&self) -> RowFields {
        RowFields {
            head: self
                .head_field
                .clone()
                .unwrap_or_else(|| HEAD_FIELD.to_string()),
            body: self
                .body_field
                .clone()
                .unwrap_or_else(|| BODY_FIELD.to_string()),
        }
    }

    /// Converter options described by this configuration
    pub fn conversion_options(&self) -> ConversionOptions {
        ConversionOptions {
            redirects: self.redirects(),
            asset_dir: self.asset_dir(),
            max_depth: self.max_depth(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ImporterConfig::from_toml("").expect("parse failed");
        let options = config.conversion_options();

        assert_eq!(options.asset_dir, "stellent");
        assert_eq!(options.max_depth, MAX_NESTING_DEPTH);
        assert_eq!(options.redirects, RedirectMap::builtin());
        assert_eq!(config.row_fields(), RowFields::default());
    }

    #[test]
    fn test_full_config() {
        let config = ImporterConfig::from_toml(
            r#"
asset_dir = "legacy-assets"
max_depth = 64
head_field = "Title"
body_field = "Content"

[redirects]
CON1 = "https://example.com/one"
"#,
        )
        .expect("parse failed");

        let options = config.conversion_options();
        assert_eq!(options.asset_dir, "legacy-assets");
        assert_eq!(options.max_depth, 64);
        assert_eq!(options.redirects.get("CON1"), Some("https://example.com/one"));
        assert!(options.redirects.get("CON123123").is_some());
        assert_eq!(config.row_fields().head, "Title");
        assert_eq!(config.row_fields().body, "Content");
    }

    #[test]
    fn test_configured_redirect_overrides_builtin() {
        let config = ImporterConfig::from_toml("[redirects]\nCON123123 = \"https://example.com\"")
            .expect("parse failed");
        assert_eq!(config.redirects().get("CON123123"), Some("https://example.com"));
        assert_eq!(config.redirects().len(), 1);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let result = ImporterConfig::from_toml("asset_directory = \"x\"");
        assert!(matches!(result, Err(ConversionError::Config(_))));
    }

    #[test]
    fn test_zero_depth_rejected() {
        let result = ImporterConfig::from_toml("max_depth = 0");
        assert!(matches!(result, Err(ConversionError::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().expect("tempfile");
        writeln!(file, "asset_dir = \"files\"").expect("write");

        let config = ImporterConfig::load(file.path()).expect("load failed");
        assert_eq!(config.asset_dir(), "files");
    }

    #[test]
    fn test_load_missing_file() {
        let result = ImporterConfig::load(Path::new("/nonexistent/importer.toml"));
        assert!(matches!(result, Err(ConversionError::Io(_))));
    }

    #[test]
    fn test_load_error_names_file() {
        let mut file = NamedTempFile::new().expect("tempfile");
        writeln!(file, "max_depth = \"deep\"").expect("write");

        let err = ImporterConfig::load(file.path()).expect_err("should fail");
        assert!(err.to_string().contains(&file.path().display().to_string()));
    }
}
