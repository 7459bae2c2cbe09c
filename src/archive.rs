//! ZIP package extraction for `.apkg` and `.colpkg` inputs. The two
//! flavors share all logic and differ only in which media-manifest names
//! they recognize.

use std::{
    collections::HashMap,
    io::{
        Cursor,
        Read,
    },
};

use log::debug;
use zip::{
    result::ZipError,
    ZipArchive,
};

use crate::core::errors::ConvertError;

/// Database entry names, newest schema first.
const DATABASE_CANDIDATES: [&str; 2] = ["collection.anki21", "collection.anki2"];

const PACKAGE_MANIFESTS: [&str; 1] = ["media"];
const COLLECTION_MANIFESTS: [&str; 2] = ["media21", "media"];

/// Uncompressed/compressed ratio above which an archive is treated as a
/// decompression bomb.
const MAX_COMPRESSION_RATIO: f64 = 10.0;

/// How many entry names a "missing database" message lists before truncating.
const LISTED_ENTRIES_CAP: usize = 8;

#[derive(Debug)]
pub struct ExtractedArchive {
    pub database: Vec<u8>,
    pub database_name: &'static str,
    /// Archive entry name → original media filename, when a readable
    /// manifest was present.
    pub media_manifest: Option<HashMap<String, String>>,
    pub manifest_name: Option<&'static str>,
}

/// Extracts a `.apkg` deck package.
pub fn extract_package(bytes: &[u8]) -> Result<ExtractedArchive, ConvertError> {
    extract(bytes, &PACKAGE_MANIFESTS)
}

/// Extracts a `.colpkg` collection package. Recognizes the newer `media21`
/// manifest name and prefers it over `media`.
pub fn extract_collection_package(bytes: &[u8]) -> Result<ExtractedArchive, ConvertError> {
    extract(bytes, &COLLECTION_MANIFESTS)
}

fn extract(
    bytes: &[u8],
    manifest_candidates: &[&'static str],
) -> Result<ExtractedArchive, ConvertError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(|error| {
        ConvertError::CorruptedFile { detail: format!("could not open archive: {}", error) }
    })?;

    if archive.is_empty() {
        return Err(ConvertError::CorruptedFile {
            detail: "archive contains no entries".to_string(),
        });
    }

    guard_against_bomb(&mut archive, bytes.len() as u64)?;

    let (database_name, database) = extract_database(&mut archive)?;
    if database.is_empty() {
        return Err(ConvertError::ExtractionError {
            detail: format!("database entry '{}' is empty", database_name),
        });
    }

    let (media_manifest, manifest_name) = extract_manifest(&mut archive, manifest_candidates);

    Ok(ExtractedArchive { database, database_name, media_manifest, manifest_name })
}

/// Rejects archives whose declared uncompressed size exceeds the compressed
/// input by more than [`MAX_COMPRESSION_RATIO`], before any entry is
/// materialized. Entry sizes come from the central directory.
fn guard_against_bomb(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    compressed_size: u64,
) -> Result<(), ConvertError> {
    let mut total_uncompressed: u64 = 0;
    for index in 0..archive.len() {
        let entry = archive.by_index_raw(index).map_err(|error| {
            ConvertError::CorruptedFile {
                detail: format!("unreadable archive entry {}: {}", index, error),
            }
        })?;
        total_uncompressed = total_uncompressed.saturating_add(entry.size());
    }

    if compressed_size == 0 {
        return Ok(());
    }

    let ratio = total_uncompressed as f64 / compressed_size as f64;
    if ratio > MAX_COMPRESSION_RATIO {
        return Err(ConvertError::CorruptedFile {
            detail: format!(
                "archive expands to {} bytes from {} ({:.1}x, limit {:.0}x); refusing likely decompression bomb",
                total_uncompressed, compressed_size, ratio, MAX_COMPRESSION_RATIO
            ),
        });
    }
    Ok(())
}

fn extract_database(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
) -> Result<(&'static str, Vec<u8>), ConvertError> {
    for candidate in DATABASE_CANDIDATES {
        match archive.by_name(candidate) {
            Ok(mut entry) => {
                let mut buffer = Vec::new();
                buffer.try_reserve_exact(entry.size() as usize).map_err(|_| {
                    ConvertError::OutOfMemory {
                        context: format!("extracting '{}' ({} bytes)", candidate, entry.size()),
                    }
                })?;
                entry.read_to_end(&mut buffer).map_err(|error| {
                    ConvertError::ExtractionError {
                        detail: format!("could not read '{}': {}", candidate, error),
                    }
                })?;
                return Ok((candidate, buffer));
            }
            Err(ZipError::FileNotFound) => continue,
            Err(error) => {
                return Err(ConvertError::ExtractionError {
                    detail: format!("could not access '{}': {}", candidate, error),
                });
            }
        }
    }

    let mut present: Vec<&str> = archive.file_names().take(LISTED_ENTRIES_CAP + 1).collect();
    present.sort_unstable();
    let truncated = present.len() > LISTED_ENTRIES_CAP;
    present.truncate(LISTED_ENTRIES_CAP);
    Err(ConvertError::CorruptedFile {
        detail: format!(
            "no collection database found (tried {}); archive contains: {}{}",
            DATABASE_CANDIDATES.join(", "),
            present.join(", "),
            if truncated { ", ..." } else { "" }
        ),
    })
}

/// Manifest extraction is entirely best-effort: absence, unreadable data,
/// and malformed JSON all yield no manifest.
fn extract_manifest(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    candidates: &[&'static str],
) -> (Option<HashMap<String, String>>, Option<&'static str>) {
    for candidate in candidates {
        let mut entry = match archive.by_name(candidate) {
            Ok(entry) => entry,
            Err(_) => continue,
        };

        let mut buffer = Vec::new();
        if entry.read_to_end(&mut buffer).is_err() {
            debug!("media manifest '{}' is unreadable, skipping", candidate);
            continue;
        }

        match serde_json::from_slice::<HashMap<String, String>>(&buffer) {
            Ok(manifest) => return (Some(manifest), Some(candidate)),
            Err(error) => {
                debug!("media manifest '{}' is not valid JSON ({}), skipping", candidate, error);
            }
        }
    }
    (None, None)
}
