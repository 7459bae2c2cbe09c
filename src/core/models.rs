//! Intermediate data model every input format is parsed into before the
//! output tree is built.

/// Field values shared by one or more cards. `fields` keeps the raw,
/// unsanitized text in note-type field order.
#[derive(Debug, Clone)]
pub struct Note {
    pub id: i64,
    pub guid: String,
    pub note_type_id: i64,
    pub fields: Vec<String>,
    pub tags: Vec<String>,
    pub modified: i64,
}

/// One schedulable card. `note_id` and `deck_id` are foreign keys, not
/// ownership; a queue below zero means the card is suspended. Scheduling
/// columns are carried verbatim from the source.
#[derive(Debug, Clone)]
pub struct Card {
    pub id: i64,
    pub note_id: i64,
    pub deck_id: i64,
    pub ord: u32,
    pub card_type: i64,
    pub queue: i64,
    pub due: i64,
    pub interval: i64,
    pub factor: i64,
    pub reps: i64,
    pub lapses: i64,
}

impl Card {
    pub fn is_suspended(&self) -> bool {
        self.queue < 0
    }
}

/// A deck as the source stores it: flat, with nesting encoded only in the
/// `::`-separated name.
#[derive(Debug, Clone)]
pub struct DeckInfo {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub config_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NoteTypeField {
    pub name: String,
    pub ord: u32,
    pub font: Option<String>,
    pub size: Option<u32>,
}

/// Question/answer formats are preserved as metadata only, never rendered.
#[derive(Debug, Clone)]
pub struct NoteTypeTemplate {
    pub name: String,
    pub ord: u32,
    pub question_format: String,
    pub answer_format: String,
}

/// The schema shared by a family of notes. `kind` is 0 for standard note
/// types and 1 for cloze.
#[derive(Debug, Clone)]
pub struct NoteType {
    pub id: i64,
    pub name: String,
    pub kind: i64,
    pub fields: Vec<NoteTypeField>,
    pub templates: Vec<NoteTypeTemplate>,
}

pub const NOTE_TYPE_KIND_CLOZE: i64 = 1;

impl NoteType {
    pub fn is_cloze(&self) -> bool {
        self.kind == NOTE_TYPE_KIND_CLOZE
    }
}

/// Collection-level counters carried through unchanged. A `version` of 0
/// marks data synthesized from a delimited-text export.
#[derive(Debug, Clone)]
pub struct AnkiMetadata {
    pub created: i64,
    pub modified: i64,
    pub schema_modified: i64,
    pub version: i64,
    pub legacy: bool,
}

/// The single normal form all input formats converge to.
#[derive(Debug, Clone, Default)]
pub struct ParsedAnkiData {
    pub notes: Vec<Note>,
    pub cards: Vec<Card>,
    pub decks: Vec<DeckInfo>,
    pub note_types: Vec<NoteType>,
    pub metadata: AnkiMetadata,
}

impl Default for AnkiMetadata {
    fn default() -> Self {
        AnkiMetadata { created: 0, modified: 0, schema_modified: 0, version: 0, legacy: false }
    }
}
