//! Builds the output deck tree from parsed data: filters and classifies
//! cards, reconstructs the `::` hierarchy, and computes conversion
//! metadata.

use std::{
    collections::{
        BTreeMap,
        HashMap,
    },
    time::Duration,
};

use log::warn;

use crate::{
    cloze::{
        extract_cloze_variations,
        has_cloze,
        strip_cloze,
    },
    core::{
        models::{
            AnkiMetadata,
            Card,
            DeckInfo,
            Note,
            NoteType,
            ParsedAnkiData,
        },
        pipeline::ConvertOptions,
    },
    sanitize::clean_html,
    output::{
        CardStats,
        ConversionMetadata,
        ConversionResult,
        Deck,
        OutputCard,
    },
};

/// Token joining nested deck name segments in a flat name string.
pub const DECK_SEPARATOR: &str = "::";

/// Note types with this many fields or fewer can classify as basic.
const BASIC_MAX_FIELDS: usize = 3;

/// Classifies and builds output cards for one conversion run.
pub struct CardFactory<'a> {
    notes: HashMap<i64, &'a Note>,
    note_types: HashMap<i64, &'a NoteType>,
    include_stats: bool,
    include_suspended: bool,
}

impl<'a> CardFactory<'a> {
    pub fn new(data: &'a ParsedAnkiData, options: &ConvertOptions) -> Self {
        CardFactory {
            notes: data.notes.iter().map(|note| (note.id, note)).collect(),
            note_types: data.note_types.iter().map(|nt| (nt.id, nt)).collect(),
            include_stats: options.include_stats,
            include_suspended: options.include_suspended,
        }
    }

    /// Suspended cards are dropped unless the caller opted in.
    pub fn includes(&self, card: &Card) -> bool {
        self.include_suspended || !card.is_suspended()
    }

    pub fn build_card(&self, card: &Card) -> OutputCard {
        let stats = self.include_stats.then(|| CardStats {
            due: card.due,
            interval: card.interval,
            factor: card.factor,
            reps: card.reps,
            lapses: card.lapses,
        });
        let suspended = card.is_suspended().then_some(true);

        let note = match self.notes.get(&card.note_id) {
            Some(note) => *note,
            None => {
                // A dangling note reference degrades to an empty custom
                // card instead of aborting the conversion.
                warn!("card {} references missing note {}", card.id, card.note_id);
                return OutputCard::Custom {
                    id: card.id,
                    note_type: "unknown".to_string(),
                    fields: BTreeMap::new(),
                    tags: Vec::new(),
                    stats,
                    suspended,
                };
            }
        };

        let note_type = self.note_types.get(&note.note_type_id).copied();
        let fields = field_map(note, note_type);
        let tags = note.tags.clone();

        match note_type {
            Some(note_type) if note_type.is_cloze() => {
                let source = note
                    .fields
                    .iter()
                    .find(|field| has_cloze(field))
                    .or_else(|| note.fields.first())
                    .map(String::as_str)
                    .unwrap_or("");
                OutputCard::Cloze {
                    id: card.id,
                    text: clean_html(&strip_cloze(source)),
                    variations: extract_cloze_variations(source),
                    fields,
                    tags,
                    stats,
                    suspended,
                }
            }
            Some(note_type) => match basic_field_positions(note_type) {
                Some((front_index, back_index)) => OutputCard::Basic {
                    id: card.id,
                    front: clean_field(note, front_index),
                    back: clean_field(note, back_index),
                    fields,
                    tags,
                    stats,
                    suspended,
                },
                None => OutputCard::Custom {
                    id: card.id,
                    note_type: note_type.name.clone(),
                    fields,
                    tags,
                    stats,
                    suspended,
                },
            },
            None => {
                warn!("note {} references missing note type {}", note.id, note.note_type_id);
                OutputCard::Custom {
                    id: card.id,
                    note_type: "unknown".to_string(),
                    fields,
                    tags,
                    stats,
                    suspended,
                }
            }
        }
    }
}

/// Basic means: a front-named and a back-named field, and at most
/// [`BASIC_MAX_FIELDS`] fields total. A third field does not disqualify.
fn basic_field_positions(note_type: &NoteType) -> Option<(usize, usize)> {
    if note_type.fields.len() > BASIC_MAX_FIELDS {
        return None;
    }
    let position = |wanted: &str| {
        note_type.fields.iter().position(|field| field.name.eq_ignore_ascii_case(wanted))
    };
    Some((position("front")?, position("back")?))
}

fn clean_field(note: &Note, index: usize) -> String {
    note.fields.get(index).map(|raw| clean_html(raw)).unwrap_or_default()
}

/// Field name → cleaned text, naming positions past the note type's field
/// list `Field N`.
fn field_map(note: &Note, note_type: Option<&NoteType>) -> BTreeMap<String, String> {
    note.fields
        .iter()
        .enumerate()
        .map(|(index, raw)| {
            let name = note_type
                .and_then(|nt| nt.fields.get(index))
                .map(|field| field.name.clone())
                .unwrap_or_else(|| format!("Field {}", index + 1));
            (name, clean_html(raw))
        })
        .collect()
}

/// Reconstructs the deck tree from flat `::`-joined names. Every source
/// deck appears at exactly one position; path segments without their own
/// deck record become empty intermediate decks.
pub fn build_deck_tree(
    deck_infos: &[DeckInfo],
    mut cards_by_deck: HashMap<i64, Vec<OutputCard>>,
) -> Vec<Deck> {
    let mut nodes: BTreeMap<String, Deck> = BTreeMap::new();

    for info in deck_infos {
        let mut path = String::new();
        for segment in info.name.split(DECK_SEPARATOR) {
            if path.is_empty() {
                path = segment.to_string();
            } else {
                path = format!("{}{}{}", path, DECK_SEPARATOR, segment);
            }
            nodes.entry(path.clone()).or_insert_with(|| Deck {
                name: segment.to_string(),
                description: String::new(),
                cards: Vec::new(),
                subdecks: Vec::new(),
            });
        }
        // `path` now names the full deck; attach its own data.
        if let Some(node) = nodes.get_mut(&info.name) {
            if !info.description.is_empty() {
                node.description = info.description.clone();
            }
            node.cards.extend(cards_by_deck.remove(&info.id).unwrap_or_default());
        }
    }

    // Cards pointing at a deck id with no deck record still surface.
    let mut orphaned: Vec<(i64, Vec<OutputCard>)> = cards_by_deck.into_iter().collect();
    orphaned.sort_by_key(|(id, _)| *id);
    for (id, cards) in orphaned {
        warn!("{} cards reference missing deck {}", cards.len(), id);
        nodes.insert(
            format!("Deck {}", id),
            Deck {
                name: format!("Deck {}", id),
                description: String::new(),
                cards,
                subdecks: Vec::new(),
            },
        );
    }

    // Attach children to parents bottom-up: reverse lexicographic order
    // visits every child before the parent that absorbs it.
    let paths: Vec<String> = nodes.keys().cloned().collect();
    for path in paths.iter().rev() {
        if let Some(split_at) = path.rfind(DECK_SEPARATOR) {
            let parent_path = &path[..split_at];
            let node = nodes.remove(path).expect("node was inserted above");
            nodes
                .get_mut(parent_path)
                .expect("all ancestor paths were inserted")
                .subdecks
                .push(node);
        }
    }

    let mut roots: Vec<Deck> = nodes.into_values().collect();
    sort_subdecks(&mut roots);
    roots
}

fn sort_subdecks(decks: &mut [Deck]) {
    for deck in decks.iter_mut() {
        deck.subdecks.sort_by(|a, b| a.name.cmp(&b.name));
        sort_subdecks(&mut deck.subdecks);
    }
}

pub fn source_format_label(metadata: &AnkiMetadata) -> &'static str {
    if metadata.version == 0 {
        "Tab-separated text"
    } else if metadata.legacy {
        "Anki 2.0 (legacy)"
    } else {
        "Anki 2.1"
    }
}

fn count_decks(decks: &[Deck]) -> usize {
    decks.iter().map(|deck| 1 + count_decks(&deck.subdecks)).sum()
}

fn count_cards(decks: &[Deck]) -> usize {
    decks.iter().map(|deck| deck.cards.len() + count_cards(&deck.subdecks)).sum()
}

pub fn build_metadata(
    data: &ParsedAnkiData,
    decks: &[Deck],
    elapsed: Duration,
) -> ConversionMetadata {
    let mut note_types: Vec<String> =
        data.note_types.iter().map(|nt| nt.name.clone()).collect();
    note_types.sort_unstable();
    note_types.dedup();

    ConversionMetadata {
        total_decks: count_decks(decks),
        total_cards: count_cards(decks),
        note_types,
        source_format: source_format_label(&data.metadata).to_string(),
        processing_time_ms: elapsed.as_millis() as u64,
        created: data.metadata.created,
        modified: data.metadata.modified,
        converted_at: chrono::Utc::now(),
    }
}

/// Convenience entry point: filter, classify, build the tree, compute
/// metadata. The pipeline composes the same pieces with progress wiring.
pub fn build_output(data: &ParsedAnkiData, options: &ConvertOptions) -> ConversionResult {
    let started = std::time::Instant::now();
    let factory = CardFactory::new(data, options);

    let mut cards_by_deck: HashMap<i64, Vec<OutputCard>> = HashMap::new();
    for card in &data.cards {
        if factory.includes(card) {
            cards_by_deck.entry(card.deck_id).or_default().push(factory.build_card(card));
        }
    }

    let decks = build_deck_tree(&data.decks, cards_by_deck);
    let metadata = build_metadata(data, &decks, started.elapsed());
    ConversionResult { decks, metadata }
}
