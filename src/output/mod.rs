//! Output document shape: a tree of decks holding typed cards, plus
//! collection-level conversion metadata. Everything here round-trips
//! through serde with no loss.

pub mod builder;

use std::collections::BTreeMap;

use serde::{
    Deserialize,
    Serialize,
};

pub use crate::cloze::ClozeVariation;
pub use builder::{
    build_deck_tree,
    build_metadata,
    build_output,
    source_format_label,
    CardFactory,
};

/// One node of the deck tree. `name` is a single path segment; nesting is
/// expressed structurally through `subdecks`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deck {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub cards: Vec<OutputCard>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subdecks: Vec<Deck>,
}

/// Review counters attached when `include_stats` is set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardStats {
    pub due: i64,
    pub interval: i64,
    pub factor: i64,
    pub reps: i64,
    pub lapses: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutputCard {
    #[serde(rename_all = "camelCase")]
    Basic {
        id: i64,
        front: String,
        back: String,
        fields: BTreeMap<String, String>,
        tags: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stats: Option<CardStats>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        suspended: Option<bool>,
    },
    #[serde(rename_all = "camelCase")]
    Cloze {
        id: i64,
        text: String,
        variations: Vec<ClozeVariation>,
        fields: BTreeMap<String, String>,
        tags: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stats: Option<CardStats>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        suspended: Option<bool>,
    },
    #[serde(rename_all = "camelCase")]
    Custom {
        id: i64,
        note_type: String,
        fields: BTreeMap<String, String>,
        tags: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stats: Option<CardStats>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        suspended: Option<bool>,
    },
}

impl OutputCard {
    pub fn id(&self) -> i64 {
        match self {
            OutputCard::Basic { id, .. }
            | OutputCard::Cloze { id, .. }
            | OutputCard::Custom { id, .. } => *id,
        }
    }

    pub fn tags(&self) -> &[String] {
        match self {
            OutputCard::Basic { tags, .. }
            | OutputCard::Cloze { tags, .. }
            | OutputCard::Custom { tags, .. } => tags,
        }
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        match self {
            OutputCard::Basic { fields, .. }
            | OutputCard::Cloze { fields, .. }
            | OutputCard::Custom { fields, .. } => fields,
        }
    }

    pub fn is_suspended(&self) -> bool {
        match self {
            OutputCard::Basic { suspended, .. }
            | OutputCard::Cloze { suspended, .. }
            | OutputCard::Custom { suspended, .. } => suspended.unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionMetadata {
    pub total_decks: usize,
    pub total_cards: usize,
    pub note_types: Vec<String>,
    pub source_format: String,
    pub processing_time_ms: u64,
    /// Source collection creation/modification times, carried verbatim.
    pub created: i64,
    pub modified: i64,
    pub converted_at: chrono::DateTime<chrono::Utc>,
}

/// The top-level conversion output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionResult {
    pub decks: Vec<Deck>,
    pub metadata: ConversionMetadata,
}
