//! Per-capture transfer state machine
//!
//! Each stage returns an explicit `Result`; [`TransferPipeline::run`] tracks
//! the current [`TransferState`] and turns the first failure into
//! [`TransferOutcome::Failed`] tagged with that state. Nothing is retried.
//!
//! Blocking work (device download, file copies, metadata writes) runs on the
//! blocking pool. Session counter updates, catalog inserts, preview decisions
//! and the status line go through the coordinator.
//!
//! # Fault policy
//! - `Stage`, `Commit`, `Metadata` and `Resolve` failures abort the capture.
//! - A `Backup` failure is logged and reported on the status line; the primary
//!   file stays valid and the pipeline continues.
//! - Plugin failures are recorded on the plugin's config only.
//!
//! The device busy flag is held by a [`BusyGuard`] for the whole run, and the
//! staging file is a [`TempPath`] removed on drop, so both are released on
//! every exit path.

use super::{PipelineSettings, SkipReason, TransferOutcome, TransferState};
use crate::catalog::CatalogedItem;
use crate::coordinator::CoordinatorHandle;
use crate::device::{BusyGuard, CameraDevice, CaptureEvent, DeviceProperties};
use crate::error::{Error, Result};
use crate::metadata::MetadataStamper;
use crate::naming::{unique_path, Destination, FileNameResolver};
use crate::plugins::PluginExecutionChain;
use crate::session::Session;
use camctl_common::{CameraEvent, EventBus, UiCommand};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempPath;
use tracing::{debug, error, info, warn};

/// Run a blocking closure on the blocking pool
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Internal(format!("Blocking task failed: {}", e)))?
}

/// Orchestrates one capture from device to catalog
#[derive(Clone)]
pub struct TransferPipeline {
    coordinator: CoordinatorHandle,
    chain: PluginExecutionChain,
    stamper: MetadataStamper,
    settings: Arc<PipelineSettings>,
    bus: EventBus,
}

impl TransferPipeline {
    pub fn new(
        coordinator: CoordinatorHandle,
        chain: PluginExecutionChain,
        stamper: MetadataStamper,
        settings: PipelineSettings,
        bus: EventBus,
    ) -> Self {
        Self {
            coordinator,
            chain,
            stamper,
            settings: Arc::new(settings),
            bus,
        }
    }

    pub fn coordinator(&self) -> &CoordinatorHandle {
        &self.coordinator
    }

    /// Run one capture to its terminal state
    pub async fn run(&self, event: CaptureEvent) -> TransferOutcome {
        let _busy = BusyGuard::acquire(Arc::clone(&event.device));
        let device_name = event.device.display_name();

        let mut state = TransferState::Idle;
        match self.execute(&event, &device_name, &mut state).await {
            Ok(outcome) => {
                if let TransferOutcome::Skipped(reason) = &outcome {
                    debug!(device = %device_name, file = %event.file_name, ?reason, "Capture not downloaded");
                }
                outcome
            }
            Err(e) => {
                error!(
                    device = %device_name,
                    file = %event.file_name,
                    stage = %state,
                    error = %e,
                    "Transfer error"
                );
                self.bus.emit_lossy(CameraEvent::TransferFailed {
                    device: device_name,
                    file_name: event.file_name.clone(),
                    stage: state.to_string(),
                    error: e.to_string(),
                    timestamp: chrono::Utc::now(),
                });
                self.set_status(format!("Transfer error: {}", e)).await;
                TransferOutcome::Failed {
                    stage: state,
                    error: e.to_string(),
                }
            }
        }
    }

    async fn execute(
        &self,
        event: &CaptureEvent,
        device_name: &str,
        state: &mut TransferState,
    ) -> Result<TransferOutcome> {
        let device = Arc::clone(&event.device);

        enter(state, TransferState::Eligibility, device_name);
        let mut session = self.coordinator.session().await?;
        let properties = load_properties(&device).await;
        if let Some(reason) = check_eligibility(&session, &properties, event) {
            return Ok(TransferOutcome::Skipped(reason));
        }

        info!(device = %device_name, file = %event.file_name, "Photo transfer begin");
        self.bus.emit_lossy(CameraEvent::TransferStarted {
            device: device_name.to_string(),
            file_name: event.file_name.clone(),
            timestamp: chrono::Utc::now(),
        });
        self.set_status(format!("Photo transfer begin: {}", event.file_name))
            .await;

        enter(state, TransferState::Resolve, device_name);
        let templated = if FileNameResolver::uses_template(&session, event.in_ram) {
            let (path, counter) = self
                .coordinator
                .next_file_name(&event.file_name, device_name)
                .await?;
            session.counter = counter;
            Some(path)
        } else {
            None
        };
        let destination = {
            let session = session.clone();
            let file_name = event.file_name.clone();
            blocking(move || FileNameResolver::resolve_destination(&session, &file_name, templated))
                .await?
        };

        enter(state, TransferState::Stage, device_name);
        let staged = {
            let device = Arc::clone(&device);
            let handle = event.handle.clone();
            blocking(move || stage(device.as_ref(), &handle)).await?
        };

        enter(state, TransferState::Commit, device_name);
        let (staged, destination) = {
            let allow_overwrite = session.allow_overwrite;
            blocking(move || {
                let committed = commit(&staged, &destination, allow_overwrite)?;
                Ok((staged, committed))
            })
            .await?
        };

        enter(state, TransferState::Backup, device_name);
        let backup_path = if session.backup {
            let backup_session = session.clone();
            let dest = destination.clone();
            match blocking(move || {
                let result = backup_session.copy_backup(&staged, &dest);
                release_staging(staged);
                result
            })
            .await
            {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!(device = %device_name, error = %e, "Backup failed; primary file kept");
                    self.set_status(format!("Backup error: {}", e)).await;
                    None
                }
            }
        } else {
            release_staging(staged);
            None
        };

        enter(state, TransferState::Metadata, device_name);
        {
            let stamper = self.stamper.clone();
            let session = session.clone();
            let dest = destination.clone();
            blocking(move || stamper.stamp(&session, &dest)).await?;
        }

        enter(state, TransferState::Catalog, device_name);
        let mut item = CatalogedItem::new(destination.clone(), device.id());
        item.backup_path = backup_path;
        item.series = session.series;
        item.add_templates(device.as_ref(), &properties.serial, &session);
        self.coordinator.catalog(item.clone()).await?;

        enter(state, TransferState::PluginChain, device_name);
        if !session.plugins.is_empty() {
            let mut configs = session.plugins.clone();
            let report = self.chain.run(&item, &mut configs).await;
            if report.failed > 0 {
                warn!(failed = report.failed, executed = report.executed, "Some plugins failed");
            }
            self.coordinator.record_plugin_outcomes(configs).await?;
        }

        enter(state, TransferState::Notify, device_name);
        self.notify(&item).await?;

        enter(state, TransferState::Done, device_name);
        info!(device = %device_name, path = %destination.display(), "Photo transfer done");
        self.bus.emit_lossy(CameraEvent::TransferCompleted {
            device: device_name.to_string(),
            path: destination.clone(),
            timestamp: chrono::Utc::now(),
        });
        self.set_status(format!("Photo transfer done: {}", destination.display()))
            .await;

        Ok(TransferOutcome::Completed(Box::new(item)))
    }

    /// Preview offer plus the ambient UI triggers
    async fn notify(&self, item: &CatalogedItem) -> Result<()> {
        let preview = &self.settings.preview;
        let viewer = &self.settings.viewer;

        let wants_preview = preview.auto_preview
            && !viewer.use_external_viewer
            && (!preview.auto_preview_jpg_only || item.is_jpeg());
        if wants_preview {
            self.coordinator.preview(item.clone()).await?;
        } else {
            self.coordinator.transfer_finished().await?;
        }

        if viewer.use_external_viewer {
            match &viewer.external_viewer_path {
                Some(program) if program.exists() => {
                    self.bus.emit_lossy(CameraEvent::command(UiCommand::LaunchExternalViewer {
                        program: program.clone(),
                        args: viewer_arguments(&viewer.external_viewer_args, &item.path),
                    }));
                }
                _ => warn!("External viewer enabled but no valid viewer program is set"),
            }
        } else if viewer.full_screen_preview {
            self.bus
                .emit_lossy(CameraEvent::command(UiCommand::ShowFullScreenTimed));
        }

        if viewer.play_sound {
            self.bus
                .emit_lossy(CameraEvent::command(UiCommand::PlayCaptureSound));
        }

        if viewer.show_transfer_notification {
            self.bus.emit_lossy(CameraEvent::PhotoTransferred {
                path: item.path.clone(),
                timestamp: chrono::Utc::now(),
            });
        }
        Ok(())
    }

    async fn set_status(&self, text: String) {
        if let Err(e) = self.coordinator.status(text).await {
            warn!(error = %e, "Status line unavailable");
        }
    }
}

fn enter(state: &mut TransferState, next: TransferState, device: &str) {
    debug!(device = %device, from = %state, to = %next, "Transfer state");
    *state = next;
}

async fn load_properties(device: &Arc<dyn CameraDevice>) -> DeviceProperties {
    let device = Arc::clone(device);
    let id = device.id().to_string();
    match blocking(move || device.load_properties()).await {
        Ok(properties) => properties,
        Err(e) => {
            warn!(device = %id, error = %e, "Unable to load device properties");
            DeviceProperties::default()
        }
    }
}

/// `None` when the capture should be downloaded
pub fn check_eligibility(
    session: &Session,
    properties: &DeviceProperties,
    event: &CaptureEvent,
) -> Option<SkipReason> {
    // A capture held only in device RAM is lost unless it is downloaded
    if event.in_ram {
        return None;
    }
    if session.no_download || properties.no_download {
        return Some(SkipReason::NoDownload);
    }
    if session.download_only_jpg {
        let is_jpg = Path::new(&event.file_name)
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("jpg"));
        if !is_jpg {
            return Some(SkipReason::NotJpeg);
        }
    }
    None
}

/// Download the capture into a fresh private staging file
fn stage(device: &dyn CameraDevice, handle: &crate::device::RemoteHandle) -> Result<TempPath> {
    let staged = tempfile::Builder::new()
        .prefix("camctl-")
        .suffix(".part")
        .tempfile()
        .map_err(|e| Error::Transfer(format!("Cannot create staging file: {}", e)))?
        .into_temp_path();

    // The device creates the file itself
    if staged.exists() {
        std::fs::remove_file(&staged)
            .map_err(|e| Error::Transfer(format!("Cannot clear staging file: {}", e)))?;
    }

    device.transfer_file(handle, &staged)?;
    Ok(staged)
}

/// Copy the staged file to its destination
///
/// Without overwrite the target is created exclusively, and a name taken
/// since resolution is numbered again from the unsuffixed base. Returns the
/// path written.
fn commit(staged: &Path, destination: &Destination, allow_overwrite: bool) -> Result<PathBuf> {
    if allow_overwrite {
        let destination = destination.path.as_path();
        if destination.exists() {
            std::fs::remove_file(destination).map_err(|e| {
                Error::Transfer(format!("Cannot replace {}: {}", destination.display(), e))
            })?;
        }
        std::fs::copy(staged, destination).map_err(|e| {
            Error::Transfer(format!("Copy to {} failed: {}", destination.display(), e))
        })?;
        return Ok(destination.to_path_buf());
    }

    let mut target = destination.path.clone();
    loop {
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
        {
            Ok(mut file) => {
                let copied = std::fs::File::open(staged)
                    .and_then(|mut source| std::io::copy(&mut source, &mut file));
                if let Err(e) = copied {
                    drop(file);
                    let _ = std::fs::remove_file(&target);
                    return Err(Error::Transfer(format!(
                        "Copy to {} failed: {}",
                        target.display(),
                        e
                    )));
                }
                return Ok(target);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let next = unique_path(&destination.base);
                if next == target {
                    return Err(Error::Transfer(format!(
                        "Cannot create {}: name is taken",
                        target.display()
                    )));
                }
                target = next;
                debug!(path = %target.display(), "Destination taken, trying next name");
            }
            Err(e) => {
                return Err(Error::Transfer(format!(
                    "Cannot create {}: {}",
                    target.display(),
                    e
                )))
            }
        }
    }
}

fn release_staging(staged: TempPath) {
    let path = staged.to_path_buf();
    if let Err(e) = staged.close() {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove staging file");
        }
    }
}

/// External viewer argument string for `path`
///
/// `%1` is replaced by the path; without a `%1` the quoted path is appended.
pub fn viewer_arguments(template: &str, path: &Path) -> String {
    let path = path.display().to_string();
    if template.contains("%1") {
        template.replace("%1", &path)
    } else if template.trim().is_empty() {
        format!("\"{}\"", path)
    } else {
        format!("{} \"{}\"", template.trim_end(), path)
    }
}
