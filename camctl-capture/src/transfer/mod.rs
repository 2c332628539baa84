//! Capture transfer
//!
//! - [`pipeline`]: the per-capture state machine, from eligibility check to
//!   viewer notification
//! - [`dispatcher`]: turns capture events into pipeline runs, serialized or
//!   concurrent

pub mod dispatcher;
pub mod pipeline;

pub use dispatcher::CaptureEventDispatcher;
pub use pipeline::TransferPipeline;

use crate::catalog::CatalogedItem;
use camctl_common::config::{PreviewSettings, TomlConfig, ViewerSettings};
use std::fmt;
use std::time::Duration;

/// Pipeline states
///
/// `Idle → Eligibility → Resolve → Stage → Commit → Backup → Metadata →
/// Catalog → PluginChain → Notify → Done`. A failure in any state ends the
/// run as [`TransferOutcome::Failed`] tagged with that state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferState {
    Idle,
    Eligibility,
    Resolve,
    Stage,
    Commit,
    Backup,
    Metadata,
    Catalog,
    PluginChain,
    Notify,
    Done,
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferState::Idle => "idle",
            TransferState::Eligibility => "eligibility",
            TransferState::Resolve => "resolve",
            TransferState::Stage => "stage",
            TransferState::Commit => "commit",
            TransferState::Backup => "backup",
            TransferState::Metadata => "metadata",
            TransferState::Catalog => "catalog",
            TransferState::PluginChain => "plugin_chain",
            TransferState::Notify => "notify",
            TransferState::Done => "done",
        };
        f.write_str(name)
    }
}

/// Why an eligible-looking capture was left on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Session or device is set to leave captures on the card
    NoDownload,
    /// Session only downloads JPEG files
    NotJpeg,
}

/// Terminal result of one pipeline run
#[derive(Debug, Clone, PartialEq)]
pub enum TransferOutcome {
    /// Normal early exit at the eligibility check
    Skipped(SkipReason),
    /// Reached `Done`
    Completed(Box<CatalogedItem>),
    /// Aborted in `stage`
    Failed { stage: TransferState, error: String },
}

impl TransferOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, TransferOutcome::Completed(_))
    }

    pub fn item(&self) -> Option<&CatalogedItem> {
        match self {
            TransferOutcome::Completed(item) => Some(item),
            _ => None,
        }
    }
}

/// Application-wide switches the pipeline consults at the notify stage
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineSettings {
    pub preview: PreviewSettings,
    pub viewer: ViewerSettings,
}

impl PipelineSettings {
    pub fn quiet_interval(&self) -> Duration {
        Duration::from_millis(self.preview.quiet_interval_ms)
    }
}

impl From<&TomlConfig> for PipelineSettings {
    fn from(config: &TomlConfig) -> Self {
        Self {
            preview: config.preview.clone(),
            viewer: config.viewer.clone(),
        }
    }
}
