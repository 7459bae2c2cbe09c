pub mod archive;
pub mod cloze;
pub mod core;
pub mod database;
pub mod delimited;
pub mod detect;
pub mod output;
pub mod sanitize;

pub use crate::{
    core::{
        errors::ConvertError,
        models::ParsedAnkiData,
        pipeline::{
            convert,
            ConvertOptions,
            ProgressEvent,
            SizeContext,
            Stage,
        },
        tasks::{
            ConversionManager,
            ConvertUpdate,
        },
    },
    detect::AnkiFormat,
    output::{
        ConversionResult,
        Deck,
        OutputCard,
    },
};
