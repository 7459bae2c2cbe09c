//! Cloze-deletion decomposition. A field like `"{{c1::Paris}} is the
//! capital of {{c2::France}}"` yields one variation per distinct index,
//! each hiding only its own deletions while other indices show their
//! answer text.

use std::sync::OnceLock;

use regex::Regex;
use serde::{
    Deserialize,
    Serialize,
};

use crate::sanitize::clean_html;

fn cloze_regex() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r"(?s)\{\{c(\d+)::(.*?)(?:::(.*?))?\}\}").unwrap())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClozeVariation {
    pub index: u32,
    /// The full field text with this index hidden behind `[hint]` or
    /// `[...]` and every other index replaced by its answer, sanitized.
    pub text: String,
    pub answer: String,
}

/// Distinct cloze indices present in `text`, ascending.
pub fn cloze_indexes(text: &str) -> Vec<u32> {
    let mut indexes: Vec<u32> = cloze_regex()
        .captures_iter(text)
        .filter_map(|captures| captures[1].parse().ok())
        .collect();
    indexes.sort_unstable();
    indexes.dedup();
    indexes
}

pub fn has_cloze(text: &str) -> bool {
    cloze_regex().is_match(text)
}

/// Replaces every cloze marker with its answer content, leaving the rest of
/// the field untouched.
pub fn strip_cloze(text: &str) -> String {
    cloze_regex()
        .replace_all(text, |captures: &regex::Captures| captures[2].to_string())
        .into_owned()
}

/// Decomposes `text` into one variation per distinct index, ordered by
/// ascending index. Repeated markers sharing an index contribute a single
/// variation.
pub fn extract_cloze_variations(text: &str) -> Vec<ClozeVariation> {
    let regex = cloze_regex();
    let indexes = cloze_indexes(text);

    indexes
        .into_iter()
        .map(|target| {
            let masked = regex.replace_all(text, |captures: &regex::Captures| {
                let index: u32 = captures[1].parse().unwrap_or(0);
                if index == target {
                    match captures.get(3) {
                        Some(hint) => format!("[{}]", hint.as_str()),
                        None => "[...]".to_string(),
                    }
                } else {
                    captures[2].to_string()
                }
            });

            let answer = regex
                .captures_iter(text)
                .find(|captures| captures[1].parse::<u32>().ok() == Some(target))
                .map(|captures| clean_html(&captures[2]))
                .unwrap_or_default();

            ClozeVariation { index: target, text: clean_html(&masked), answer }
        })
        .collect()
}
