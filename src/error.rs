//! Error types for conversion and import operations

use std::fmt;
use std::io;

/// Errors that can occur while converting a page or importing an export
#[derive(Debug)]
pub enum ConversionError {
    /// HTML parsing failed
    ParseError(String),
    /// Character encoding error
    EncodingError(String),
    /// Invalid input data (empty fragment, excessive nesting, bad CON code)
    InvalidInput(String),
    /// The WCM export could not be read as XML
    Xml(String),
    /// Reading or writing an artifact failed
    Io(io::Error),
    /// Configuration file could not be loaded
    Config(String),
    /// Internal error
    InternalError(String),
}

impl ConversionError {
    /// Get numeric error code, used as the process exit status by the CLI
    pub fn code(&self) -> u32 {
        match self {
            ConversionError::ParseError(_) => 1,
            ConversionError::EncodingError(_) => 2,
            ConversionError::InvalidInput(_) => 5,
            ConversionError::Xml(_) => 6,
            ConversionError::Io(_) => 7,
            ConversionError::Config(_) => 8,
            ConversionError::InternalError(_) => 99,
        }
    }
}

impl fmt::Display for ConversionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversionError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            ConversionError::EncodingError(msg) => write!(f, "Encoding error: {}", msg),
            ConversionError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            ConversionError::Xml(msg) => write!(f, "XML error: {}", msg),
            ConversionError::Io(err) => write!(f, "I/O error: {}", err),
            ConversionError::Config(msg) => write!(f, "Configuration error: {}", msg),
            ConversionError::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ConversionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConversionError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ConversionError {
    fn from(err: io::Error) -> Self {
        ConversionError::Io(err)
    }
}

impl From<quick_xml::Error> for ConversionError {
    fn from(err: quick_xml::Error) -> Self {
        ConversionError::Xml(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_distinct() {
        let errors = [
            ConversionError::ParseError(String::new()),
            ConversionError::EncodingError(String::new()),
            ConversionError::InvalidInput(String::new()),
            ConversionError::Xml(String::new()),
            ConversionError::Io(io::Error::other("x")),
            ConversionError::Config(String::new()),
            ConversionError::InternalError(String::new()),
        ];
        let mut codes: Vec<u32> = errors.iter().map(ConversionError::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_io_error_conversion_keeps_source() {
        let err: ConversionError = io::Error::new(io::ErrorKind::NotFound, "missing").into();
        assert!(matches!(err, ConversionError::Io(_)));
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("missing"));
    }
}
