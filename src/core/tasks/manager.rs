//! Background execution of conversions with message passing. Each request
//! gets a correlation id and its own worker thread; the caller polls one
//! results channel. The inline [`ConversionManager::convert_blocking`]
//! fallback runs the identical pipeline on the calling thread.

use std::{
    collections::HashMap,
    sync::{
        atomic::{
            AtomicBool,
            Ordering,
        },
        mpsc,
        Arc,
    },
    thread,
};

use log::debug;
use uuid::Uuid;

use super::{
    ConvertUpdate,
    TaskHandle,
};
use crate::{
    core::{
        errors::ConvertError,
        pipeline::{
            self,
            ConvertOptions,
            ProgressEvent,
        },
    },
    output::ConversionResult,
};

pub struct ConversionManager {
    sender: mpsc::Sender<ConvertUpdate>,
    receiver: mpsc::Receiver<ConvertUpdate>,
    handles: HashMap<Uuid, TaskHandle>,
}

impl ConversionManager {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self { sender, receiver, handles: HashMap::new() }
    }

    /// Starts a background conversion and returns its correlation id. The
    /// input buffer moves into the worker and is released when it finishes
    /// or is cleaned up.
    pub fn convert(
        &mut self,
        bytes: Vec<u8>,
        filename: Option<String>,
        options: ConvertOptions,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let sender = self.sender.clone();
        let cancel_token = Arc::new(AtomicBool::new(false));
        let worker_token = cancel_token.clone();

        let join_handle = thread::spawn(move || {
            let progress_sender = sender.clone();
            let progress_token = worker_token.clone();
            let mut on_progress = move |event: ProgressEvent| {
                // Once cancelled, nothing further is emitted for this id.
                if !progress_token.load(Ordering::Relaxed) {
                    let _ = progress_sender.send(ConvertUpdate::Progress { id, event });
                }
            };

            let outcome = pipeline::convert_cancellable(
                &bytes,
                filename.as_deref(),
                &options,
                &worker_token,
                &mut on_progress,
            );

            // A cancellation that lands after the last pipeline checkpoint
            // still discards the outcome.
            let update = if worker_token.load(Ordering::Relaxed) {
                ConvertUpdate::Cancelled { id }
            } else {
                match outcome {
                    Ok(result) => ConvertUpdate::Complete { id, result: Box::new(result) },
                    Err(ConvertError::Cancelled) => ConvertUpdate::Cancelled { id },
                    Err(error) => ConvertUpdate::Failed { id, error },
                }
            };
            let _ = sender.send(update);
        });

        self.handles.insert(id, TaskHandle::new(cancel_token, join_handle));
        id
    }

    /// Drains every update the workers have produced so far, dropping
    /// handles whose conversion reached a terminal state.
    pub fn poll_updates(&mut self) -> Vec<ConvertUpdate> {
        let mut updates = Vec::new();
        while let Ok(update) = self.receiver.try_recv() {
            if update.is_terminal() {
                self.handles.remove(&update.id());
            }
            updates.push(update);
        }
        updates
    }

    /// Requests cooperative cancellation of one conversion. Returns false
    /// when the id is unknown or already finished.
    pub fn cancel(&mut self, id: Uuid) -> bool {
        match self.handles.get(&id) {
            Some(handle) => {
                debug!("cancelling conversion {}", id);
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels all in-flight conversions and waits for their workers so
    /// retained input buffers are released.
    pub fn cleanup(&mut self) {
        for handle in self.handles.values() {
            handle.cancel();
        }
        for (_, mut handle) in self.handles.drain() {
            handle.join();
        }
        // Drop any updates that were already queued for cancelled ids.
        while self.receiver.try_recv().is_ok() {}
    }

    /// Inline fallback: runs the pipeline on the caller's thread with
    /// identical results and error taxonomy as the background path.
    pub fn convert_blocking(
        bytes: &[u8],
        filename: Option<&str>,
        options: &ConvertOptions,
        on_progress: impl FnMut(ProgressEvent),
    ) -> Result<ConversionResult, ConvertError> {
        pipeline::convert(bytes, filename, options, on_progress)
    }
}

impl Default for ConversionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{
        Duration,
        Instant,
    };

    use super::*;

    fn wait_for_terminal(manager: &mut ConversionManager) -> Vec<ConvertUpdate> {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut updates = Vec::new();
        loop {
            updates.extend(manager.poll_updates());
            if updates.iter().any(ConvertUpdate::is_terminal) {
                return updates;
            }
            assert!(Instant::now() < deadline, "worker never reached a terminal state");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_background_conversion_completes() {
        let mut manager = ConversionManager::new();
        let id = manager.convert(
            b"hola\thello\nadios\tgoodbye\n".to_vec(),
            Some("export.tsv".to_string()),
            ConvertOptions::default(),
        );

        let updates = wait_for_terminal(&mut manager);
        assert!(updates.iter().all(|update| update.id() == id));

        let terminal = updates.last().unwrap();
        match terminal {
            ConvertUpdate::Complete { result, .. } => {
                assert_eq!(result.metadata.total_cards, 2);
            }
            other => panic!("expected completion, got {}", other.update_type()),
        }

        // Progress precedes the terminal update and never follows it.
        let terminal_index =
            updates.iter().position(|update| update.is_terminal()).unwrap();
        assert_eq!(terminal_index, updates.len() - 1);
    }

    #[test]
    fn test_background_failure_reports_error() {
        let mut manager = ConversionManager::new();
        let id = manager.convert(
            b"PK\x03\x04 broken".to_vec(),
            Some("deck.apkg".to_string()),
            ConvertOptions::default(),
        );

        let updates = wait_for_terminal(&mut manager);
        match updates.last().unwrap() {
            ConvertUpdate::Failed { id: failed_id, error } => {
                assert_eq!(*failed_id, id);
                assert_eq!(error.kind(), "CORRUPTED_FILE");
            }
            other => panic!("expected failure, got {}", other.update_type()),
        }
    }

    #[test]
    fn test_cancellation_is_terminal_and_silencing() {
        let mut manager = ConversionManager::new();
        // A larger input keeps the worker busy long enough for the cancel
        // to usually land mid-flight; either outcome is a valid race.
        let rows: String = (0..50_000).map(|i| format!("q{}\ta{}\n", i, i)).collect();
        let id = manager.convert(rows.into_bytes(), None, ConvertOptions::default());
        assert!(manager.cancel(id));

        let updates = wait_for_terminal(&mut manager);
        let terminal = updates.last().unwrap();
        assert!(terminal.is_terminal());
        assert!(
            matches!(terminal, ConvertUpdate::Cancelled { .. })
                || matches!(terminal, ConvertUpdate::Complete { .. })
        );

        // Nothing more arrives for this id after the terminal update.
        thread::sleep(Duration::from_millis(20));
        assert!(manager.poll_updates().is_empty());
        // The handle is gone, so a second cancel is a no-op.
        assert!(!manager.cancel(id));
    }

    #[test]
    fn test_cleanup_cancels_everything() {
        let mut manager = ConversionManager::new();
        let rows: String = (0..50_000).map(|i| format!("q{}\ta{}\n", i, i)).collect();
        manager.convert(rows.clone().into_bytes(), None, ConvertOptions::default());
        manager.convert(rows.into_bytes(), None, ConvertOptions::default());

        manager.cleanup();
        assert!(manager.handles.is_empty());
        assert!(manager.poll_updates().is_empty());
    }

    #[test]
    fn test_blocking_matches_background() {
        let bytes = b"hola\thello\n".to_vec();

        let blocking = ConversionManager::convert_blocking(
            &bytes,
            Some("export.tsv"),
            &ConvertOptions::default(),
            |_| {},
        )
        .unwrap();

        let mut manager = ConversionManager::new();
        manager.convert(bytes, Some("export.tsv".to_string()), ConvertOptions::default());
        let updates = wait_for_terminal(&mut manager);
        let background = match updates.last().unwrap() {
            ConvertUpdate::Complete { result, .. } => (**result).clone(),
            other => panic!("expected completion, got {}", other.update_type()),
        };

        assert_eq!(blocking.decks, background.decks);
        assert_eq!(blocking.metadata.note_types, background.metadata.note_types);
        assert_eq!(blocking.metadata.total_cards, background.metadata.total_cards);
    }
}
