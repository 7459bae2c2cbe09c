pub mod errors;
pub mod models;
pub mod pipeline;
pub mod tasks;

pub use errors::ConvertError;
pub use models::{
    AnkiMetadata,
    Card,
    DeckInfo,
    Note,
    NoteType,
    ParsedAnkiData,
};
