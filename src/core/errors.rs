use thiserror::Error;

/// Everything a conversion can fail with. Each variant maps to one
/// machine-readable kind so callers can react without parsing messages.
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("Unrecognized or unsupported input format: {detail}")]
    InvalidFormat { detail: String },

    #[error("Corrupted file: {detail}")]
    CorruptedFile { detail: String },

    #[error("Unsupported collection schema version {found} (supported: {min} through {max})")]
    UnsupportedVersion { found: i64, min: i64, max: i64 },

    #[error("Parse error: {detail}")]
    ParseError { detail: String },

    #[error("Extraction error: {detail}")]
    ExtractionError { detail: String },

    #[error("Out of memory while {context}")]
    OutOfMemory { context: String },

    #[error("Input is {actual} bytes, above the configured limit of {limit} bytes")]
    FileTooLarge { actual: u64, limit: u64 },

    #[error("Conversion was cancelled")]
    Cancelled,

    #[error("Unexpected error: {0}")]
    Unknown(String),
}

impl ConvertError {
    pub fn kind(&self) -> &'static str {
        match self {
            ConvertError::InvalidFormat { .. } => "INVALID_FORMAT",
            ConvertError::CorruptedFile { .. } => "CORRUPTED_FILE",
            ConvertError::UnsupportedVersion { .. } => "UNSUPPORTED_VERSION",
            ConvertError::ParseError { .. } => "PARSE_ERROR",
            ConvertError::ExtractionError { .. } => "EXTRACTION_ERROR",
            ConvertError::OutOfMemory { .. } => "OUT_OF_MEMORY",
            ConvertError::FileTooLarge { .. } => "FILE_TOO_LARGE",
            ConvertError::Cancelled => "CANCELLED",
            ConvertError::Unknown(_) => "UNKNOWN_ERROR",
        }
    }

    /// Whether retrying with different input or options can succeed.
    pub fn recoverable(&self) -> bool {
        match self {
            ConvertError::InvalidFormat { .. }
            | ConvertError::UnsupportedVersion { .. }
            | ConvertError::FileTooLarge { .. }
            | ConvertError::Cancelled => true,
            ConvertError::CorruptedFile { .. }
            | ConvertError::ParseError { .. }
            | ConvertError::ExtractionError { .. }
            | ConvertError::OutOfMemory { .. }
            | ConvertError::Unknown(_) => false,
        }
    }

    /// Guidance text shown to users alongside the error message.
    pub fn recovery_hint(&self) -> &'static str {
        match self {
            ConvertError::InvalidFormat { .. } => {
                "Check that the file is an Anki export (.apkg, .colpkg, .anki2) or a tab-separated text export."
            }
            ConvertError::CorruptedFile { .. } => {
                "Re-export the deck from Anki; the file appears damaged or incomplete."
            }
            ConvertError::UnsupportedVersion { .. } => {
                "Re-export the collection with a supported Anki version, or export as .apkg instead."
            }
            ConvertError::ParseError { .. } => {
                "Re-export the deck from Anki; the file content could not be parsed."
            }
            ConvertError::ExtractionError { .. } => {
                "Re-export the deck from Anki; an archive entry could not be read."
            }
            ConvertError::OutOfMemory { .. } => {
                "Close other applications or convert a smaller export."
            }
            ConvertError::FileTooLarge { .. } => {
                "Use the batch tool for large files, or split the export into smaller decks."
            }
            ConvertError::Cancelled => "The conversion was cancelled before it finished.",
            ConvertError::Unknown(_) => "Try the conversion again; if it keeps failing, re-export the deck.",
        }
    }
}

impl From<std::io::Error> for ConvertError {
    fn from(error: std::io::Error) -> Self {
        ConvertError::Unknown(format!("I/O error: {}", error))
    }
}

impl From<serde_json::Error> for ConvertError {
    fn from(error: serde_json::Error) -> Self {
        ConvertError::ParseError { detail: format!("JSON error: {}", error) }
    }
}

impl From<rusqlite::Error> for ConvertError {
    fn from(error: rusqlite::Error) -> Self {
        ConvertError::CorruptedFile { detail: format!("database error: {}", error) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_strings() {
        let err = ConvertError::FileTooLarge { actual: 600, limit: 500 };
        assert_eq!(err.kind(), "FILE_TOO_LARGE");
        assert!(err.recoverable());
        assert!(err.to_string().contains("600"));
        assert!(err.to_string().contains("500"));

        let err = ConvertError::CorruptedFile { detail: "bad header".to_string() };
        assert_eq!(err.kind(), "CORRUPTED_FILE");
        assert!(!err.recoverable());
        assert!(!err.recovery_hint().is_empty());
    }

    #[test]
    fn test_foreign_errors_map_into_taxonomy() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: ConvertError = json_err.into();
        assert_eq!(err.kind(), "PARSE_ERROR");

        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err: ConvertError = io_err.into();
        assert_eq!(err.kind(), "UNKNOWN_ERROR");
    }
}
