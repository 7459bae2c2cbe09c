//! Reads an Anki collection SQLite database into [`ParsedAnkiData`]. The
//! interesting parts of the schema are the single `col` metadata row (which
//! carries deck and note-type definitions as JSON blobs) and the `notes` /
//! `cards` tables.

use std::{
    collections::HashMap,
    io::Write,
};

use log::debug;
use rusqlite::{
    Connection,
    OpenFlags,
};
use serde::Deserialize;

use crate::core::{
    errors::ConvertError,
    models::{
        AnkiMetadata,
        Card,
        DeckInfo,
        Note,
        NoteType,
        NoteTypeField,
        NoteTypeTemplate,
        ParsedAnkiData,
    },
};

/// Fields within one note are joined with a single unit separator.
pub const FIELD_SEPARATOR: char = '\u{1f}';

/// Collections below this schema version are Anki 2.0 era.
pub const LEGACY_SCHEMA_VERSION: i64 = 11;

pub const MIN_SCHEMA_VERSION: i64 = 2;
/// Last schema before the protobuf-era collection layout.
pub const MAX_SCHEMA_VERSION: i64 = 18;

#[derive(Debug, Deserialize)]
struct DeckJson {
    id: Option<i64>,
    name: String,
    #[serde(default)]
    desc: String,
    conf: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct FieldJson {
    name: String,
    #[serde(default)]
    ord: u32,
    font: Option<String>,
    size: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct TemplateJson {
    name: String,
    #[serde(default)]
    ord: u32,
    #[serde(default)]
    qfmt: String,
    #[serde(default)]
    afmt: String,
}

#[derive(Debug, Deserialize)]
struct NoteTypeJson {
    id: Option<i64>,
    name: String,
    #[serde(rename = "type", default)]
    kind: i64,
    #[serde(default)]
    flds: Vec<FieldJson>,
    #[serde(default)]
    tmpls: Vec<TemplateJson>,
}

/// Opens raw collection bytes and extracts notes, cards, decks, and
/// note-type definitions. Zero rows anywhere is a valid empty collection.
pub fn read_collection(bytes: &[u8]) -> Result<ParsedAnkiData, ConvertError> {
    // rusqlite opens paths, not buffers, so the bytes are spooled to a
    // temp file that lives for the duration of the read.
    let mut spool = tempfile::NamedTempFile::new()?;
    spool.write_all(bytes)?;
    spool.flush()?;

    let connection = Connection::open_with_flags(
        spool.path(),
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|error| ConvertError::CorruptedFile {
        detail: format!("could not open collection database: {}", error),
    })?;

    read_connection(&connection)
}

fn read_connection(connection: &Connection) -> Result<ParsedAnkiData, ConvertError> {
    let has_col: bool = connection
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'col'",
            [],
            |row| row.get::<_, i64>(0).map(|count| count > 0),
        )
        .map_err(|error| ConvertError::CorruptedFile {
            detail: format!("not a collection database: {}", error),
        })?;
    if !has_col {
        return Err(ConvertError::CorruptedFile {
            detail: "collection metadata table 'col' is missing".to_string(),
        });
    }

    let (metadata, models_blob, decks_blob) = read_col_row(connection)?;

    let decks = parse_decks(&decks_blob)?;
    let note_types = parse_note_types(&models_blob)?;
    let notes = read_notes(connection)?;
    let cards = read_cards(connection)?;

    debug!(
        "collection v{}: {} notes, {} cards, {} decks, {} note types",
        metadata.version,
        notes.len(),
        cards.len(),
        decks.len(),
        note_types.len()
    );

    Ok(ParsedAnkiData { notes, cards, decks, note_types, metadata })
}

fn read_col_row(connection: &Connection) -> Result<(AnkiMetadata, String, String), ConvertError> {
    let row = connection
        .query_row("SELECT crt, mod, scm, ver, models, decks FROM col LIMIT 1", [], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })
        .map_err(|error| match error {
            rusqlite::Error::QueryReturnedNoRows => ConvertError::CorruptedFile {
                detail: "collection metadata table 'col' has no rows".to_string(),
            },
            other => ConvertError::CorruptedFile {
                detail: format!("could not read collection metadata: {}", other),
            },
        })?;

    let (created, modified, schema_modified, version, models_blob, decks_blob) = row;

    if !(MIN_SCHEMA_VERSION..=MAX_SCHEMA_VERSION).contains(&version) {
        return Err(ConvertError::UnsupportedVersion {
            found: version,
            min: MIN_SCHEMA_VERSION,
            max: MAX_SCHEMA_VERSION,
        });
    }

    let metadata = AnkiMetadata {
        created,
        modified,
        schema_modified,
        version,
        legacy: version < LEGACY_SCHEMA_VERSION,
    };
    Ok((metadata, models_blob, decks_blob))
}

fn parse_decks(blob: &str) -> Result<Vec<DeckInfo>, ConvertError> {
    let raw: HashMap<String, DeckJson> = serde_json::from_str(blob).map_err(|error| {
        ConvertError::ParseError { detail: format!("deck definitions: {}", error) }
    })?;

    let mut decks: Vec<DeckInfo> = raw
        .into_iter()
        .map(|(key, deck)| DeckInfo {
            id: deck.id.or_else(|| key.parse().ok()).unwrap_or_default(),
            name: deck.name,
            description: deck.desc,
            config_id: deck.conf,
        })
        .collect();
    decks.sort_by_key(|deck| deck.id);
    Ok(decks)
}

fn parse_note_types(blob: &str) -> Result<Vec<NoteType>, ConvertError> {
    let raw: HashMap<String, NoteTypeJson> = serde_json::from_str(blob).map_err(|error| {
        ConvertError::ParseError { detail: format!("note type definitions: {}", error) }
    })?;

    let mut note_types: Vec<NoteType> = raw
        .into_iter()
        .map(|(key, model)| NoteType {
            id: model.id.or_else(|| key.parse().ok()).unwrap_or_default(),
            name: model.name,
            kind: model.kind,
            fields: model
                .flds
                .into_iter()
                .map(|field| NoteTypeField {
                    name: field.name,
                    ord: field.ord,
                    font: field.font,
                    size: field.size,
                })
                .collect(),
            templates: model
                .tmpls
                .into_iter()
                .map(|template| NoteTypeTemplate {
                    name: template.name,
                    ord: template.ord,
                    question_format: template.qfmt,
                    answer_format: template.afmt,
                })
                .collect(),
        })
        .collect();
    note_types.sort_by_key(|note_type| note_type.id);
    Ok(note_types)
}

fn read_notes(connection: &Connection) -> Result<Vec<Note>, ConvertError> {
    let mut statement = connection
        .prepare("SELECT id, guid, mid, mod, tags, flds FROM notes ORDER BY id")
        .map_err(|error| ConvertError::CorruptedFile {
            detail: format!("notes table: {}", error),
        })?;

    let rows = statement
        .query_map([], |row| {
            let tags: String = row.get(4)?;
            let fields: String = row.get(5)?;
            Ok(Note {
                id: row.get(0)?,
                guid: row.get(1)?,
                note_type_id: row.get(2)?,
                modified: row.get(3)?,
                tags: tags.split_whitespace().map(String::from).collect(),
                fields: fields.split(FIELD_SEPARATOR).map(String::from).collect(),
            })
        })
        .map_err(|error| ConvertError::CorruptedFile {
            detail: format!("notes table: {}", error),
        })?;

    rows.collect::<Result<Vec<Note>, _>>().map_err(|error| ConvertError::CorruptedFile {
        detail: format!("notes row: {}", error),
    })
}

fn read_cards(connection: &Connection) -> Result<Vec<Card>, ConvertError> {
    let mut statement = connection
        .prepare(
            "SELECT id, nid, did, ord, type, queue, due, ivl, factor, reps, lapses \
             FROM cards ORDER BY id",
        )
        .map_err(|error| ConvertError::CorruptedFile {
            detail: format!("cards table: {}", error),
        })?;

    let rows = statement
        .query_map([], |row| {
            Ok(Card {
                id: row.get(0)?,
                note_id: row.get(1)?,
                deck_id: row.get(2)?,
                ord: row.get(3)?,
                card_type: row.get(4)?,
                queue: row.get(5)?,
                due: row.get(6)?,
                interval: row.get(7)?,
                factor: row.get(8)?,
                reps: row.get(9)?,
                lapses: row.get(10)?,
            })
        })
        .map_err(|error| ConvertError::CorruptedFile {
            detail: format!("cards table: {}", error),
        })?;

    rows.collect::<Result<Vec<Card>, _>>().map_err(|error| ConvertError::CorruptedFile {
        detail: format!("cards row: {}", error),
    })
}
