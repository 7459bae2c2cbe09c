//! Sequences detection, extraction, reading, and building into one
//! conversion run with weighted, strictly monotonic progress and a
//! cooperative cancellation point between units of work.

use std::{
    collections::HashMap,
    sync::{
        atomic::{
            AtomicBool,
            Ordering,
        },
        Arc,
    },
    time::Instant,
};

use log::info;
use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    archive,
    core::errors::ConvertError,
    core::models::ParsedAnkiData,
    database,
    delimited::{
        self,
        TextOptions,
    },
    detect::{
        self,
        AnkiFormat,
    },
    output::{
        build_deck_tree,
        build_metadata,
        CardFactory,
        ConversionResult,
        OutputCard,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Detecting,
    Parsing,
    Extracting,
    Transforming,
    Building,
}

impl Stage {
    /// Fixed percentage weight of each stage; the five weights sum to 100.
    pub fn weight(&self) -> u32 {
        match self {
            Stage::Detecting => 5,
            Stage::Parsing => 40,
            Stage::Extracting => 20,
            Stage::Transforming => 20,
            Stage::Building => 15,
        }
    }

    fn offset(&self) -> u32 {
        match self {
            Stage::Detecting => 0,
            Stage::Parsing => 5,
            Stage::Extracting => 45,
            Stage::Transforming => 65,
            Stage::Building => 85,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Stage::Detecting => "detecting",
            Stage::Parsing => "parsing",
            Stage::Extracting => "extracting",
            Stage::Transforming => "transforming",
            Stage::Building => "building",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub stage: Stage,
    /// 0 through 100, strictly increasing across one conversion.
    pub progress: u8,
    pub message: String,
}

/// Maximum input size by calling context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SizeContext {
    #[default]
    Interactive,
    Batch,
}

impl SizeContext {
    pub fn limit(&self) -> u64 {
        match self {
            SizeContext::Interactive => 500 * 1024 * 1024,
            SizeContext::Batch => 2 * 1024 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Attach review counters to each card.
    pub include_stats: bool,
    /// Keep suspended cards, marking each.
    pub include_suspended: bool,
    /// Reserved; tags are always emitted.
    pub include_tags: bool,
    /// Bypass detection with a known format.
    pub format: Option<AnkiFormat>,
    pub size_context: SizeContext,
    /// Delimited-text parsing knobs; ignored for other formats.
    pub text: TextOptions,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        ConvertOptions {
            include_stats: false,
            include_suspended: false,
            include_tags: true,
            format: None,
            size_context: SizeContext::default(),
            text: TextOptions::default(),
        }
    }
}

/// Maps within-stage fractions into the stage's weight band and suppresses
/// anything that is not strictly greater than the last emitted value.
struct ProgressReporter<'a> {
    last: Option<u8>,
    listener: &'a mut dyn FnMut(ProgressEvent),
}

impl<'a> ProgressReporter<'a> {
    fn new(listener: &'a mut dyn FnMut(ProgressEvent)) -> Self {
        ProgressReporter { last: None, listener }
    }

    fn emit(&mut self, stage: Stage, fraction: f32, message: &str) {
        let within = (stage.weight() as f32 * fraction.clamp(0.0, 1.0)).floor() as u32;
        let value = (stage.offset() + within).min(100) as u8;
        if self.last.map_or(true, |last| value > last) {
            self.last = Some(value);
            (self.listener)(ProgressEvent {
                stage,
                progress: value,
                message: message.to_string(),
            });
        }
    }
}

fn check_cancelled(cancel: &AtomicBool) -> Result<(), ConvertError> {
    if cancel.load(Ordering::Relaxed) {
        Err(ConvertError::Cancelled)
    } else {
        Ok(())
    }
}

fn enforce_size_limit(actual: u64, context: SizeContext) -> Result<(), ConvertError> {
    let limit = context.limit();
    if actual > limit {
        Err(ConvertError::FileTooLarge { actual, limit })
    } else {
        Ok(())
    }
}

/// Runs one conversion on the caller's thread.
pub fn convert(
    bytes: &[u8],
    filename: Option<&str>,
    options: &ConvertOptions,
    mut on_progress: impl FnMut(ProgressEvent),
) -> Result<ConversionResult, ConvertError> {
    let cancel = Arc::new(AtomicBool::new(false));
    convert_cancellable(bytes, filename, options, &cancel, &mut on_progress)
}

/// The cancellation-aware conversion the background worker drives. Results
/// and error taxonomy are identical to [`convert`].
pub fn convert_cancellable(
    bytes: &[u8],
    filename: Option<&str>,
    options: &ConvertOptions,
    cancel: &Arc<AtomicBool>,
    on_progress: &mut dyn FnMut(ProgressEvent),
) -> Result<ConversionResult, ConvertError> {
    let started = Instant::now();
    let mut reporter = ProgressReporter::new(on_progress);

    enforce_size_limit(bytes.len() as u64, options.size_context)?;
    check_cancelled(cancel)?;

    reporter.emit(Stage::Detecting, 0.0, "detecting input format");
    let format = match options.format {
        Some(forced) => forced,
        None => {
            let detection = detect::detect_format(bytes, filename);
            if !detection.is_usable() {
                return Err(ConvertError::InvalidFormat {
                    detail: format!(
                        "could not identify the input ({} bytes{}); no magic signature or text structure matched",
                        bytes.len(),
                        filename.map(|name| format!(", filename '{}'", name)).unwrap_or_default()
                    ),
                });
            }
            detection.format
        }
    };
    reporter.emit(Stage::Detecting, 1.0, format.label());
    check_cancelled(cancel)?;

    let data = read_input(bytes, format, options, cancel, &mut reporter)?;
    check_cancelled(cancel)?;

    // Transforming: classify and build every surviving card.
    let factory = CardFactory::new(&data, options);
    let included: Vec<_> = data.cards.iter().filter(|card| factory.includes(card)).collect();
    let total = included.len();
    reporter.emit(Stage::Transforming, 0.0, "building cards");

    let mut cards_by_deck: HashMap<i64, Vec<OutputCard>> = HashMap::new();
    let step = (total / 20).max(1);
    for (index, card) in included.into_iter().enumerate() {
        if index % step == 0 {
            check_cancelled(cancel)?;
            reporter.emit(
                Stage::Transforming,
                index as f32 / total.max(1) as f32,
                &format!("building cards ({}/{})", index, total),
            );
        }
        cards_by_deck.entry(card.deck_id).or_default().push(factory.build_card(card));
    }
    reporter.emit(Stage::Transforming, 1.0, &format!("built {} cards", total));
    check_cancelled(cancel)?;

    reporter.emit(Stage::Building, 0.0, "assembling deck tree");
    let decks = build_deck_tree(&data.decks, cards_by_deck);
    let metadata = build_metadata(&data, &decks, started.elapsed());
    let result = ConversionResult { decks, metadata };
    check_cancelled(cancel)?;

    info!(
        "converted {} cards in {} decks ({} ms)",
        result.metadata.total_cards,
        result.metadata.total_decks,
        result.metadata.processing_time_ms
    );
    reporter.emit(Stage::Building, 1.0, "conversion complete");
    Ok(result)
}

/// Parsing + extracting stages, per detected format.
fn read_input(
    bytes: &[u8],
    format: AnkiFormat,
    options: &ConvertOptions,
    cancel: &Arc<AtomicBool>,
    reporter: &mut ProgressReporter<'_>,
) -> Result<ParsedAnkiData, ConvertError> {
    match format {
        AnkiFormat::Package | AnkiFormat::CollectionPackage => {
            reporter.emit(Stage::Parsing, 0.0, "opening archive");
            let extracted = if format == AnkiFormat::Package {
                archive::extract_package(bytes)?
            } else {
                archive::extract_collection_package(bytes)?
            };
            reporter.emit(
                Stage::Parsing,
                1.0,
                &format!("extracted {}", extracted.database_name),
            );
            check_cancelled(cancel)?;

            reporter.emit(Stage::Extracting, 0.0, "reading collection database");
            let data = database::read_collection(&extracted.database)?;
            reporter.emit(Stage::Extracting, 1.0, "collection read");
            Ok(data)
        }
        AnkiFormat::Database => {
            reporter.emit(Stage::Parsing, 1.0, "raw collection database");
            check_cancelled(cancel)?;

            reporter.emit(Stage::Extracting, 0.0, "reading collection database");
            let data = database::read_collection(bytes)?;
            reporter.emit(Stage::Extracting, 1.0, "collection read");
            Ok(data)
        }
        AnkiFormat::Text => {
            reporter.emit(Stage::Parsing, 0.0, "decoding text");
            let content = std::str::from_utf8(bytes).map_err(|error| {
                ConvertError::ParseError {
                    detail: format!("input is not valid UTF-8: {}", error),
                }
            })?;
            reporter.emit(Stage::Parsing, 1.0, "text decoded");
            check_cancelled(cancel)?;

            reporter.emit(Stage::Extracting, 0.0, "parsing delimited rows");
            let data = delimited::read_delimited(content, &options.text)?;
            reporter.emit(Stage::Extracting, 1.0, "rows parsed");
            Ok(data)
        }
        AnkiFormat::Unknown => Err(ConvertError::InvalidFormat {
            detail: "format detection did not produce a usable result".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::{
        write::SimpleFileOptions,
        ZipWriter,
    };

    use super::*;
    use crate::database::tests::collection_bytes;

    fn package_bytes() -> Vec<u8> {
        let mut writer = ZipWriter::new(std::io::Cursor::new(Vec::new()));
        writer.start_file("collection.anki21", SimpleFileOptions::default()).unwrap();
        writer.write_all(&collection_bytes(11)).unwrap();
        writer.start_file("media", SimpleFileOptions::default()).unwrap();
        writer.write_all(br#"{"0":"a.jpg"}"#).unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_package_conversion_end_to_end() {
        let bytes = package_bytes();
        let mut events = Vec::new();
        let result = convert(
            &bytes,
            Some("deck.apkg"),
            &ConvertOptions::default(),
            |event| events.push(event),
        )
        .unwrap();

        assert_eq!(result.metadata.total_cards, 1);
        assert_eq!(result.metadata.source_format, "Anki 2.1");
        assert!(!events.is_empty());
    }

    #[test]
    fn test_progress_monotonic_and_complete() {
        let bytes = package_bytes();
        let mut events = Vec::new();
        convert(&bytes, Some("deck.apkg"), &ConvertOptions::default(), |event| {
            events.push(event)
        })
        .unwrap();

        assert!(events.first().unwrap().progress <= 20);
        assert_eq!(events.last().unwrap().progress, 100);
        for pair in events.windows(2) {
            assert!(
                pair[1].progress > pair[0].progress,
                "progress went {} -> {}",
                pair[0].progress,
                pair[1].progress
            );
        }
    }

    #[test]
    fn test_no_progress_after_failure() {
        let garbage = b"PK\x03\x04 corrupt archive bytes";
        let mut events = Vec::new();
        let error = convert(garbage, Some("deck.apkg"), &ConvertOptions::default(), |event| {
            events.push(event)
        })
        .unwrap_err();

        assert_eq!(error.kind(), "CORRUPTED_FILE");
        // Failure happened in parsing; nothing from later stages leaked out.
        assert!(events.iter().all(|event| event.progress < 45));
    }

    #[test]
    fn test_unknown_input_rejected() {
        let error = convert(
            &[0x00, 0x01, 0x02, 0x03],
            None,
            &ConvertOptions::default(),
            |_| {},
        )
        .unwrap_err();
        assert_eq!(error.kind(), "INVALID_FORMAT");
    }

    #[test]
    fn test_forced_format_bypasses_detection() {
        // No filename and no .tsv hint: content alone would be Medium
        // confidence, forcing Text must also work for plain bytes.
        let options = ConvertOptions {
            format: Some(AnkiFormat::Text),
            ..Default::default()
        };
        let result = convert(b"hola\thello\n", None, &options, |_| {}).unwrap();
        assert_eq!(result.metadata.total_cards, 1);
        assert_eq!(result.metadata.source_format, "Tab-separated text");
    }

    #[test]
    fn test_raw_database_input() {
        let bytes = collection_bytes(11);
        let result = convert(
            &bytes,
            Some("collection.anki2"),
            &ConvertOptions { include_suspended: true, ..Default::default() },
            |_| {},
        )
        .unwrap();
        assert_eq!(result.metadata.total_cards, 2);
    }

    #[test]
    fn test_empty_text_input_is_valid() {
        let options = ConvertOptions { format: Some(AnkiFormat::Text), ..Default::default() };
        let result = convert(b"", None, &options, |_| {}).unwrap();
        assert_eq!(result.metadata.total_cards, 0);
        assert_eq!(result.metadata.total_decks, 1);
    }

    #[test]
    fn test_size_limit() {
        let limit = SizeContext::Interactive.limit();
        let error = enforce_size_limit(limit + 1, SizeContext::Interactive).unwrap_err();
        assert_eq!(error.kind(), "FILE_TOO_LARGE");
        assert!(error.to_string().contains(&limit.to_string()));

        assert!(enforce_size_limit(limit + 1, SizeContext::Batch).is_ok());
        assert!(enforce_size_limit(limit, SizeContext::Interactive).is_ok());
    }

    #[test]
    fn test_cancellation_stops_run() {
        let bytes = package_bytes();
        let cancel = Arc::new(AtomicBool::new(true));
        let mut emitted = 0usize;
        let mut listener = |_: ProgressEvent| emitted += 1;
        let error =
            convert_cancellable(&bytes, None, &ConvertOptions::default(), &cancel, &mut listener)
                .unwrap_err();
        assert_eq!(error.kind(), "CANCELLED");
        assert_eq!(emitted, 0);
    }
}
