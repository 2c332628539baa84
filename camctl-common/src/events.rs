//! Event types for the camctl event system
//!
//! Everything the capture core wants the user interface to see travels as a
//! [`CameraEvent`] over the [`EventBus`]: status bar text, preview requests,
//! transfer notifications, command triggers and preset batch progress.
//!
//! The bus is a `tokio::sync::broadcast` channel, so any number of front ends
//! (the `camctl` binary log sink, a GUI, tests) can subscribe independently.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Named command triggers for the UI collaborator
///
/// The capture core never launches processes or plays sounds itself; it asks
/// the front end to do so.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum UiCommand {
    /// Show the newest image full screen for a short time
    ShowFullScreenTimed,

    /// Launch the configured external viewer
    LaunchExternalViewer {
        /// Viewer executable
        program: PathBuf,
        /// Argument string with the image path already substituted
        args: String,
    },

    /// Play the capture sound
    PlayCaptureSound,
}

/// camctl event types
///
/// Events are broadcast via EventBus and can be serialized for any
/// out-of-process front end.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CameraEvent {
    /// Transient status bar text
    StatusMessage {
        text: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A capture was accepted and its transfer began
    TransferStarted {
        device: String,
        file_name: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A capture reached its final location
    TransferCompleted {
        device: String,
        path: PathBuf,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A capture's transfer was aborted
    TransferFailed {
        device: String,
        file_name: String,
        /// Pipeline state in which the failure surfaced
        stage: String,
        error: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A new item was appended to the session catalog
    ItemCataloged {
        item_id: Uuid,
        path: PathBuf,
        /// Catalog size after the insert
        count: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Item ready to preview (select it in the viewer)
    PreviewReady {
        item_id: Uuid,
        path: PathBuf,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Ambient "photo transferred" notification (tray balloon and similar)
    PhotoTransferred {
        path: PathBuf,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Command trigger for the front end
    UiCommand {
        command: UiCommand,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Preset batch progress (1-based `current`)
    PresetProgress {
        preset: String,
        current: usize,
        total: usize,
        label: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Preset batch finished; the progress display can be closed
    PresetBatchFinished {
        preset: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl CameraEvent {
    /// Convenience constructor for status bar text
    pub fn status(text: impl Into<String>) -> Self {
        CameraEvent::StatusMessage {
            text: text.into(),
            timestamp: chrono::Utc::now(),
        }
    }

    /// Convenience constructor for a UI command trigger
    pub fn command(command: UiCommand) -> Self {
        CameraEvent::UiCommand {
            command,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Short event name for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            CameraEvent::StatusMessage { .. } => "StatusMessage",
            CameraEvent::TransferStarted { .. } => "TransferStarted",
            CameraEvent::TransferCompleted { .. } => "TransferCompleted",
            CameraEvent::TransferFailed { .. } => "TransferFailed",
            CameraEvent::ItemCataloged { .. } => "ItemCataloged",
            CameraEvent::PreviewReady { .. } => "PreviewReady",
            CameraEvent::PhotoTransferred { .. } => "PhotoTransferred",
            CameraEvent::UiCommand { .. } => "UiCommand",
            CameraEvent::PresetProgress { .. } => "PresetProgress",
            CameraEvent::PresetBatchFinished { .. } => "PresetBatchFinished",
        }
    }
}

/// Central event distribution bus
///
/// Cheap to clone; all clones feed the same broadcast channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CameraEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before slow subscribers
    ///   start missing old events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<CameraEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists,
    /// `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: CameraEvent,
    ) -> Result<usize, broadcast::error::SendError<CameraEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: CameraEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
