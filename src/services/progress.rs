//! Coarse progress reporting for long-running stages.
//!
//! Stages emit [`ProgressEvent`]s on a broadcast channel. Nobody has to be
//! listening; events sent without subscribers are dropped.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// A pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Searching the mailbox and loading headers.
    Discovery,
    /// Creating the label and filters, then modifying old mail.
    Provisioning,
    /// Deleting filters and restoring labelled mail.
    Removal,
}

/// Event emitted while a stage runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum ProgressEvent {
    /// A stage started.
    Started { stage: Stage },
    /// One search round finished.
    SearchRound {
        active_lanes: usize,
        collected: usize,
    },
    /// A group of message headers was loaded.
    MetadataLoaded { loaded: usize, total: usize },
    /// A group of filters was created.
    FiltersCreated { created: usize, total: usize },
    /// A group of filters was deleted.
    FiltersDeleted { deleted: usize, total: usize },
    /// A chunk of messages was modified.
    MessagesModified { modified: usize, total: usize },
    /// A stage finished.
    Finished { stage: Stage },
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started { stage } => write!(f, "{:?} started", stage),
            Self::SearchRound {
                active_lanes,
                collected,
            } => write!(
                f,
                "Searching ({} messages found, {} searches active)",
                collected, active_lanes
            ),
            Self::MetadataLoaded { loaded, total } => {
                write!(f, "Loading emails ({}/{})", loaded, total)
            }
            Self::FiltersCreated { created, total } => {
                write!(f, "Setting filters ({}/{})", created, total)
            }
            Self::FiltersDeleted { deleted, total } => {
                write!(f, "Removing filters ({}/{})", deleted, total)
            }
            Self::MessagesModified { modified, total } => {
                write!(f, "Updating old emails ({}/{})", modified, total)
            }
            Self::Finished { stage } => write!(f, "{:?} finished", stage),
        }
    }
}

/// Broadcasts progress events to any number of subscribers.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    sender: broadcast::Sender<ProgressEvent>,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter {
    /// Creates a reporter with a bounded event buffer.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(100);
        Self { sender }
    }

    /// Subscribes to progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    /// Emits an event.
    pub fn emit(&self, event: ProgressEvent) {
        tracing::debug!(%event, "Progress");
        let _ = self.sender.send(event);
    }
}
