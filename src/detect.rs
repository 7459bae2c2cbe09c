//! Input classification from magic bytes, filename extension, and (for
//! delimited text, which has no signature) a content heuristic. Magic wins
//! for the format family; the extension only picks the subtype within the
//! ZIP family.

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const ZIP_EMPTY_MAGIC: &[u8] = b"PK\x05\x06";
const SQLITE_MAGIC: &[u8] = b"SQLite format 3\0";

const TEXT_SNIFF_WINDOW: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AnkiFormat {
    /// `.apkg` deck package (ZIP wrapping a collection database).
    Package,
    /// `.colpkg` full collection package.
    CollectionPackage,
    /// A raw collection database, no archive wrapper.
    Database,
    /// Tab-separated text export.
    Text,
    Unknown,
}

impl AnkiFormat {
    pub fn label(&self) -> &'static str {
        match self {
            AnkiFormat::Package => "Anki deck package",
            AnkiFormat::CollectionPackage => "Anki collection package",
            AnkiFormat::Database => "Anki collection database",
            AnkiFormat::Text => "tab-separated text",
            AnkiFormat::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Confidence {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub format: AnkiFormat,
    pub confidence: Confidence,
}

impl Detection {
    fn new(format: AnkiFormat, confidence: Confidence) -> Self {
        Detection { format, confidence }
    }

    /// Whether the pipeline may proceed on this result.
    pub fn is_usable(&self) -> bool {
        self.format != AnkiFormat::Unknown && self.confidence > Confidence::Low
    }
}

fn extension_format(filename: &str) -> Option<AnkiFormat> {
    let extension = filename.rsplit('.').next()?.to_ascii_lowercase();
    match extension.as_str() {
        "apkg" => Some(AnkiFormat::Package),
        "colpkg" => Some(AnkiFormat::CollectionPackage),
        "anki2" | "anki21" | "db" | "sqlite" | "sqlite3" => Some(AnkiFormat::Database),
        "tsv" | "txt" => Some(AnkiFormat::Text),
        _ => None,
    }
}

/// The first kilobyte must hold a tab and a line separator, be UTF-8 (a
/// truncated trailing sequence is fine), and not carry a binary signature.
fn looks_like_text(bytes: &[u8]) -> bool {
    if bytes.starts_with(ZIP_MAGIC)
        || bytes.starts_with(ZIP_EMPTY_MAGIC)
        || bytes.starts_with(SQLITE_MAGIC)
    {
        return false;
    }

    let window = &bytes[..bytes.len().min(TEXT_SNIFF_WINDOW)];
    let valid_utf8 = match std::str::from_utf8(window) {
        Ok(_) => true,
        // Only a multi-byte sequence cut off by the window edge is tolerated.
        Err(error) => error.error_len().is_none() && error.valid_up_to() > 0,
    };

    valid_utf8
        && window.contains(&b'\t')
        && (window.contains(&b'\n') || window.contains(&b'\r'))
}

/// Classifies raw bytes plus an optional filename. Empty input and
/// unrecognized content yield `Unknown` with low confidence rather than a
/// guess strong enough to proceed on.
pub fn detect_format(bytes: &[u8], filename: Option<&str>) -> Detection {
    if bytes.is_empty() {
        return Detection::new(AnkiFormat::Unknown, Confidence::Low);
    }

    let from_extension = filename.and_then(extension_format);

    if bytes.starts_with(ZIP_MAGIC) || bytes.starts_with(ZIP_EMPTY_MAGIC) {
        // Same magic for both package flavors: the extension decides the
        // subtype, and a missing or foreign extension defaults to .apkg.
        return match from_extension {
            Some(AnkiFormat::CollectionPackage) => {
                Detection::new(AnkiFormat::CollectionPackage, Confidence::High)
            }
            Some(AnkiFormat::Package) => Detection::new(AnkiFormat::Package, Confidence::High),
            _ => Detection::new(AnkiFormat::Package, Confidence::Medium),
        };
    }

    if bytes.starts_with(SQLITE_MAGIC) {
        let confidence = match from_extension {
            Some(AnkiFormat::Database) => Confidence::High,
            _ => Confidence::Medium,
        };
        return Detection::new(AnkiFormat::Database, confidence);
    }

    if looks_like_text(bytes) {
        let confidence = match from_extension {
            Some(AnkiFormat::Text) => Confidence::High,
            _ => Confidence::Medium,
        };
        return Detection::new(AnkiFormat::Text, confidence);
    }

    Detection::new(AnkiFormat::Unknown, Confidence::Low)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zip_magic_maps_to_zip_family() {
        let bytes = b"PK\x03\x04rest of archive";
        assert_eq!(detect_format(bytes, None).format, AnkiFormat::Package);
        assert_eq!(
            detect_format(bytes, Some("deck.apkg")),
            Detection { format: AnkiFormat::Package, confidence: Confidence::High }
        );
        assert_eq!(
            detect_format(bytes, Some("backup.colpkg")),
            Detection { format: AnkiFormat::CollectionPackage, confidence: Confidence::High }
        );
    }

    #[test]
    fn test_magic_wins_family_over_extension() {
        // ZIP content with a database extension stays in the ZIP family.
        let detection = detect_format(b"PK\x03\x04...", Some("collection.anki2"));
        assert_eq!(detection.format, AnkiFormat::Package);
        assert_eq!(detection.confidence, Confidence::Medium);
    }

    #[test]
    fn test_sqlite_magic() {
        let bytes = b"SQLite format 3\0rest";
        assert_eq!(
            detect_format(bytes, Some("collection.anki21")),
            Detection { format: AnkiFormat::Database, confidence: Confidence::High }
        );
        assert_eq!(detect_format(bytes, None).format, AnkiFormat::Database);
    }

    #[test]
    fn test_text_heuristic() {
        let bytes = b"Front\tBack\nhello\tworld\n";
        assert_eq!(
            detect_format(bytes, Some("export.tsv")),
            Detection { format: AnkiFormat::Text, confidence: Confidence::High }
        );
        assert_eq!(detect_format(bytes, None).confidence, Confidence::Medium);

        // No tab structure: not text, even with the right extension.
        let detection = detect_format(b"just a plain sentence", Some("export.txt"));
        assert_eq!(detection.format, AnkiFormat::Unknown);
        assert_eq!(detection.confidence, Confidence::Low);
    }

    #[test]
    fn test_random_bytes_are_unknown() {
        let bytes = [0x89u8, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0xff, 0x00];
        let detection = detect_format(&bytes, None);
        assert_eq!(detection.format, AnkiFormat::Unknown);
        assert!(!detection.is_usable());
    }

    #[test]
    fn test_empty_input() {
        let detection = detect_format(&[], Some("deck.apkg"));
        assert_eq!(detection.format, AnkiFormat::Unknown);
        assert_eq!(detection.confidence, Confidence::Low);
    }

    #[test]
    fn test_empty_zip_magic_is_zip_family() {
        assert_eq!(detect_format(b"PK\x05\x06tail", None).format, AnkiFormat::Package);
    }
}
