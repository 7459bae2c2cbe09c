use uuid::Uuid;

use crate::{
    core::{
        errors::ConvertError,
        pipeline::ProgressEvent,
    },
    output::ConversionResult,
};

/// One message from a background conversion, tagged with the correlation id
/// handed out when the conversion was requested. Every conversion produces
/// zero or more `Progress` messages followed by exactly one terminal
/// `Complete`, `Failed`, or `Cancelled`.
#[derive(Debug)]
pub enum ConvertUpdate {
    Progress { id: Uuid, event: ProgressEvent },
    Complete { id: Uuid, result: Box<ConversionResult> },
    Failed { id: Uuid, error: ConvertError },
    Cancelled { id: Uuid },
}

impl ConvertUpdate {
    pub fn id(&self) -> Uuid {
        match self {
            ConvertUpdate::Progress { id, .. }
            | ConvertUpdate::Complete { id, .. }
            | ConvertUpdate::Failed { id, .. }
            | ConvertUpdate::Cancelled { id } => *id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ConvertUpdate::Progress { .. })
    }

    pub fn update_type(&self) -> &'static str {
        match self {
            ConvertUpdate::Progress { .. } => "progress",
            ConvertUpdate::Complete { .. } => "complete",
            ConvertUpdate::Failed { .. } => "failed",
            ConvertUpdate::Cancelled { .. } => "cancelled",
        }
    }
}
