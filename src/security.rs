//! Structural limits and element filtering for legacy page bodies
//!
//! Export bodies are trusted content, but they were authored in a WYSIWYG
//! editor over many years and routinely carry editor scripts, embedded
//! objects and deeply nested layout markup. The validator decides which
//! elements never reach the Markdown output and bounds the nesting depth
//! the recursive converter will follow.

/// Maximum allowed nesting depth for HTML elements
/// Prevents stack overflow from deeply nested structures
pub const MAX_NESTING_DEPTH: usize = 1000;

/// Elements dropped together with their children
const SKIPPED_ELEMENTS: &[&str] = &[
    "script",   // Editor and tracking scripts
    "style",    // Inline stylesheets
    "noscript", // Alternative content, not needed for Markdown
    "iframe",   // Embedded external content
    "object",   // Plugins
    "embed",    // Plugins
    "applet",   // Legacy Java applets
    "link",     // External stylesheets
    "base",     // Changes base URL for all relative URLs
    "head",     // Implied document head, no body content
];

/// Action to take when visiting an element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SanitizeAction {
    /// Convert the element
    Allow,
    /// Remove the element and all its children
    Remove,
}

/// Element filter and depth guard used by the converter
#[derive(Debug, Clone)]
pub struct SecurityValidator {
    /// Maximum allowed nesting depth
    max_depth: usize,
}

impl SecurityValidator {
    /// Create a new security validator with default settings
    pub fn new() -> Self {
        Self {
            max_depth: MAX_NESTING_DEPTH,
        }
    }

    /// Create a security validator with custom maximum depth
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Decide whether an element is converted or dropped
    pub fn check_element(&self, tag_name: &str) -> SanitizeAction {
        let tag_lower = tag_name.to_ascii_lowercase();
        if SKIPPED_ELEMENTS.contains(&tag_lower.as_str()) {
            SanitizeAction::Remove
        } else {
            SanitizeAction::Allow
        }
    }

    /// Validate nesting depth
    ///
    /// Returns an error message when `depth` exceeds the configured limit.
    pub fn validate_depth(&self, depth: usize) -> Result<(), String> {
        if depth > self.max_depth {
            Err(format!(
                "Nesting depth {} exceeds maximum allowed depth {}",
                depth, self.max_depth
            ))
        } else {
            Ok(())
        }
    }
}

impl Default for SecurityValidator {
    fn default() -> Self {
        Self::new()
    }
}
