//! Messages exchanged with the background worker.

use tokio::sync::{mpsc, oneshot};

use crate::locale::LocaleOrCustom;

/// Request sent to the worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerCommand {
    /// Import a locale or the custom set
    Load(LocaleOrCustom),
    /// Stop after the current command
    Shutdown,
}

/// Report sent back by the worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// The import finished and the data is in the database
    Loaded(LocaleOrCustom),
    /// The import failed
    Failed {
        /// What was being imported
        key: LocaleOrCustom,
        /// Error message
        error: String,
    },
}

impl WorkerEvent {
    /// The partition the event is about
    pub fn key(&self) -> LocaleOrCustom {
        match self {
            WorkerEvent::Loaded(key) | WorkerEvent::Failed { key, .. } => *key,
        }
    }
}

/// Channels of a freshly spawned worker
#[derive(Debug)]
pub struct SpawnedWorker {
    /// Command channel into the worker
    pub commands: mpsc::UnboundedSender<WorkerCommand>,
    /// Fires once the worker is ready for commands
    pub ready: oneshot::Receiver<()>,
}
