//! Tab-separated text export reader. Produces the same intermediate shape
//! as the database reader, synthesizing a single flat deck and a note type
//! whose field count matches the detected columns.

use log::debug;

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

const HEADER_WORDS: [&str; 15] = [
    "front", "back", "question", "answer", "text", "word", "term", "definition", "meaning",
    "reading", "example", "extra", "hint", "notes", "tags",
];

/// Fields longer than this are never header cells.
const MAX_HEADER_FIELD_LEN: usize = 100;

/// A single token longer than this with no internal whitespace disqualifies
/// the tags-column heuristic.
const MAX_BARE_TAG_LEN: usize = 50;

const TAGS_SAMPLE_ROWS: usize = 20;

#[derive(Debug, Clone, Default)]
pub struct TextOptions {
    /// Skip heuristics and treat the first row as a header (or not).
    pub has_header: Option<bool>,
    /// Explicit field names, overriding header and defaults.
    pub field_names: Option<Vec<String>>,
    /// Explicit tags column index, overriding detection.
    pub tags_column: Option<usize>,
    /// Name for the synthesized deck; defaults to "Default".
    pub deck_name: Option<String>,
}

/// Parses tab-separated content. Empty input yields a valid empty-deck
/// result, not an error.
pub fn read_delimited(
    content: &str,
    options: &TextOptions,
) -> Result<ParsedAnkiData, ConvertError> {
    let mut rows: Vec<Vec<String>> = Vec::new();
    for line in split_lines(content) {
        if line.is_empty() {
            continue;
        }
        // Newer Anki text exports lead with #separator/#html directive
        // lines; they carry no card data.
        if rows.is_empty() && line.starts_with('#') {
            continue;
        }
        rows.push(line.split('\t').map(unescape_field).collect());
    }

    let deck_name = options.deck_name.clone().unwrap_or_else(|| "Default".to_string());

    if rows.is_empty() {
        return Ok(empty_result(deck_name, options.field_names.clone()));
    }

    let header_detected = match options.has_header {
        Some(explicit) => explicit,
        None => is_header_row(&rows[0]),
    };
    let header = if header_detected { Some(rows.remove(0)) } else { None };

    if rows.is_empty() {
        let names = options.field_names.clone().or(header);
        return Ok(empty_result(deck_name, names));
    }

    let columns = rows[0].len();
    let tags_column = match options.tags_column {
        Some(explicit) => Some(explicit.min(columns.saturating_sub(1))),
        None => detect_tags_column(&rows, columns),
    };
    if let Some(index) = tags_column {
        debug!("treating column {} as tags", index);
    }

    let field_count = if tags_column.is_some() { columns - 1 } else { columns };
    let field_names = resolve_field_names(options, header.as_deref(), field_count);

    let mut notes = Vec::with_capacity(rows.len());
    let mut cards = Vec::with_capacity(rows.len());
    for (index, mut row) in rows.into_iter().enumerate() {
        normalize_row_width(&mut row, columns);

        let tags = match tags_column {
            Some(tag_index) => {
                row.remove(tag_index).split_whitespace().map(String::from).collect()
            }
            None => Vec::new(),
        };

        let id = index as i64 + 1;
        notes.push(Note {
            id,
            guid: format!("import-{}", id),
            note_type_id: 1,
            fields: row,
            tags,
            modified: 0,
        });
        cards.push(Card {
            id,
            note_id: id,
            deck_id: 1,
            ord: 0,
            card_type: 0,
            queue: 0,
            due: 0,
            interval: 0,
            factor: 0,
            reps: 0,
            lapses: 0,
        });
    }

    Ok(ParsedAnkiData {
        notes,
        cards,
        decks: vec![synthetic_deck(deck_name)],
        note_types: vec![synthetic_note_type(field_names)],
        metadata: AnkiMetadata::default(),
    })
}

fn split_lines(content: &str) -> Vec<String> {
    content
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .split('\n')
        .map(String::from)
        .collect()
}

/// Unescapes `\t`, `\n`, and `\\`; any other backslash sequence (and a
/// trailing backslash) passes through verbatim.
fn unescape_field(field: &str) -> String {
    let mut result = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(current) = chars.next() {
        if current != '\\' {
            result.push(current);
            continue;
        }
        match chars.next() {
            Some('t') => result.push('\t'),
            Some('n') => result.push('\n'),
            Some('\\') => result.push('\\'),
            Some(other) => {
                result.push('\\');
                result.push(other);
            }
            None => result.push('\\'),
        }
    }
    result
}

fn is_header_row(first_row: &[String]) -> bool {
    for field in first_row {
        if field.len() > MAX_HEADER_FIELD_LEN {
            return false;
        }
        if field.contains('<') && field.contains('>') {
            return false;
        }
    }

    let matches = first_row
        .iter()
        .filter(|field| {
            let lowered = field.trim().to_ascii_lowercase();
            HEADER_WORDS.contains(&lowered.as_str())
        })
        .count();

    matches >= required_header_matches(first_row.len())
}

/// At least one whitelist hit for narrow rows; wider rows need a larger
/// fraction so a single stray "text" cell cannot flip a data row.
fn required_header_matches(columns: usize) -> usize {
    if columns <= 4 {
        1
    } else {
        columns.div_ceil(4)
    }
}

/// The last column is a tags column only when it never looks like card
/// content: no markup, no long unbroken token, and a sample of rows showing
/// space-separated tokens (or nothing at all).
fn detect_tags_column(rows: &[Vec<String>], columns: usize) -> Option<usize> {
    if columns < 3 {
        return None;
    }
    let index = columns - 1;

    let mut saw_tokens = false;
    let mut all_empty = true;
    for row in rows.iter().take(TAGS_SAMPLE_ROWS) {
        let value = match row.get(index) {
            Some(value) => value.trim(),
            None => continue,
        };
        if value.is_empty() {
            continue;
        }
        all_empty = false;
        if value.contains('<') && value.contains('>') {
            return None;
        }
        if value.len() > MAX_BARE_TAG_LEN && !value.contains(char::is_whitespace) {
            return None;
        }
        if value.split_whitespace().count() > 1 {
            saw_tokens = true;
        }
    }

    (saw_tokens || all_empty).then_some(index)
}

fn resolve_field_names(
    options: &TextOptions,
    header: Option<&[String]>,
    field_count: usize,
) -> Vec<String> {
    if let Some(names) = &options.field_names {
        return pad_names(names.clone(), field_count);
    }
    if let Some(header) = header {
        return pad_names(header.to_vec(), field_count);
    }
    default_field_names(field_count)
}

fn pad_names(mut names: Vec<String>, field_count: usize) -> Vec<String> {
    names.truncate(field_count);
    for index in names.len()..field_count {
        names.push(format!("Field {}", index + 1));
    }
    names
}

fn default_field_names(field_count: usize) -> Vec<String> {
    if field_count == 2 {
        vec!["Front".to_string(), "Back".to_string()]
    } else {
        (1..=field_count).map(|index| format!("Field {}", index)).collect()
    }
}

/// Rows wider than the column count fold the extras back into the last
/// field; narrower rows are padded with empty fields.
fn normalize_row_width(row: &mut Vec<String>, columns: usize) {
    if row.len() > columns {
        let extras = row.split_off(columns);
        let last = row.last_mut().expect("columns is at least 1");
        for extra in extras {
            last.push('\t');
            last.push_str(&extra);
        }
    } else {
        while row.len() < columns {
            row.push(String::new());
        }
    }
}

fn synthetic_deck(name: String) -> DeckInfo {
    DeckInfo { id: 1, name, description: String::new(), config_id: None }
}

fn synthetic_note_type(field_names: Vec<String>) -> NoteType {
    NoteType {
        id: 1,
        name: "Imported".to_string(),
        kind: 0,
        fields: field_names
            .into_iter()
            .enumerate()
            .map(|(ord, name)| NoteTypeField { name, ord: ord as u32, font: None, size: None })
            .collect(),
        templates: vec![NoteTypeTemplate {
            name: "Card 1".to_string(),
            ord: 0,
            question_format: String::new(),
            answer_format: String::new(),
        }],
    }
}

fn empty_result(deck_name: String, field_names: Option<Vec<String>>) -> ParsedAnkiData {
    let names = field_names.unwrap_or_else(|| default_field_names(2));
    ParsedAnkiData {
        notes: Vec::new(),
        cards: Vec::new(),
        decks: vec![synthetic_deck(deck_name)],
        note_types: vec![synthetic_note_type(names)],
        metadata: AnkiMetadata::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_two_columns() {
        let data = read_delimited("hola\thello\nadios\tgoodbye\n", &TextOptions::default()).unwrap();
        assert_eq!(data.notes.len(), 2);
        assert_eq!(data.cards.len(), 2);
        assert_eq!(data.notes[0].fields, vec!["hola", "hello"]);
        assert_eq!(data.decks.len(), 1);
        assert_eq!(data.decks[0].name, "Default");
        let note_type = &data.note_types[0];
        assert_eq!(note_type.fields.len(), 2);
        assert_eq!(note_type.fields[0].name, "Front");
        assert_eq!(note_type.fields[1].name, "Back");
    }

    #[test]
    fn test_header_detection() {
        let data = read_delimited("Front\tBack\nhola\thello\n", &TextOptions::default()).unwrap();
        assert_eq!(data.notes.len(), 1);
        assert_eq!(data.note_types[0].fields[0].name, "Front");

        // Markup in the first row means data, not header.
        let data =
            read_delimited("<b>hola</b>\thello\nadios\tgoodbye\n", &TextOptions::default())
                .unwrap();
        assert_eq!(data.notes.len(), 2);

        // No whitelist word: data.
        let data = read_delimited("hola\thello\nadios\tgoodbye\n", &TextOptions::default()).unwrap();
        assert_eq!(data.notes.len(), 2);
    }

    #[test]
    fn test_explicit_header_option_wins() {
        let options = TextOptions { has_header: Some(true), ..Default::default() };
        let data = read_delimited("hola\thello\nadios\tgoodbye\n", &options).unwrap();
        assert_eq!(data.notes.len(), 1);
        assert_eq!(data.note_types[0].fields[0].name, "hola");
    }

    #[test]
    fn test_tags_column_detection() {
        let content = "a\tb\tnoun common\nc\td\tverb\ne\tf\t\n";
        let data = read_delimited(content, &TextOptions::default()).unwrap();
        assert_eq!(data.notes[0].tags, vec!["noun", "common"]);
        assert_eq!(data.notes[1].tags, vec!["verb"]);
        assert!(data.notes[2].tags.is_empty());
        assert_eq!(data.notes[0].fields.len(), 2);
        assert_eq!(data.note_types[0].fields.len(), 2);
    }

    #[test]
    fn test_tags_column_rejected_for_content() {
        // Third column holds markup: it is a field, not tags.
        let content = "a\tb\t<i>note</i>\nc\td\t<i>other</i>\n";
        let data = read_delimited(content, &TextOptions::default()).unwrap();
        assert!(data.notes[0].tags.is_empty());
        assert_eq!(data.notes[0].fields.len(), 3);

        // Two columns never have a tags column.
        let data = read_delimited("a\tb\nc\td\n", &TextOptions::default()).unwrap();
        assert!(data.notes[0].tags.is_empty());
    }

    #[test]
    fn test_tags_column_single_tokens_not_enough() {
        // Single bare tokens throughout could just be a third field.
        let content = "a\tb\tnoun\nc\td\tverb\n";
        let data = read_delimited(content, &TextOptions::default()).unwrap();
        assert!(data.notes[0].tags.is_empty());
        assert_eq!(data.notes[0].fields.len(), 3);
    }

    #[test]
    fn test_escape_sequences() {
        // Escaped newlines and tabs live inside a field; the delimiter is a
        // real tab.
        let data = read_delimited("a\\nb\tc\\td\n", &TextOptions::default()).unwrap();
        assert_eq!(data.notes[0].fields, vec!["a\nb", "c\td"]);
        assert_eq!(
            read_delimited("x\\\\y\tz\n", &TextOptions::default()).unwrap().notes[0].fields[0],
            "x\\y"
        );
        // Unrecognized escapes pass through verbatim.
        let data = read_delimited("a\\x\tb\n", &TextOptions::default()).unwrap();
        assert_eq!(data.notes[0].fields[0], "a\\x");
    }

    #[test]
    fn test_mixed_line_endings() {
        let data = read_delimited("a\tb\r\nc\td\re\tf\n", &TextOptions::default()).unwrap();
        assert_eq!(data.notes.len(), 3);
    }

    #[test]
    fn test_ragged_rows_normalized() {
        let data = read_delimited("a\tb\nc\nd\te\tf\n", &TextOptions::default()).unwrap();
        assert_eq!(data.notes[1].fields, vec!["c", ""]);
        assert_eq!(data.notes[2].fields, vec!["d", "e\tf"]);
    }

    #[test]
    fn test_directive_lines_skipped() {
        let content = "#separator:tab\n#html:true\nhola\thello\n";
        let data = read_delimited(content, &TextOptions::default()).unwrap();
        assert_eq!(data.notes.len(), 1);
    }

    #[test]
    fn test_empty_input_is_valid() {
        let data = read_delimited("", &TextOptions::default()).unwrap();
        assert!(data.notes.is_empty());
        assert!(data.cards.is_empty());
        assert_eq!(data.decks.len(), 1);
        assert_eq!(data.note_types.len(), 1);
    }

    #[test]
    fn test_deck_name_option() {
        let options = TextOptions { deck_name: Some("Spanish".to_string()), ..Default::default() };
        let data = read_delimited("a\tb\n", &options).unwrap();
        assert_eq!(data.decks[0].name, "Spanish");
    }

    #[test]
    fn test_field_names_option() {
        let options = TextOptions {
            field_names: Some(vec!["Term".to_string(), "Meaning".to_string()]),
            ..Default::default()
        };
        let data = read_delimited("a\tb\n", &options).unwrap();
        assert_eq!(data.note_types[0].fields[0].name, "Term");
        assert_eq!(data.note_types[0].fields[1].name, "Meaning");
    }
}
