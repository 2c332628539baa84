//! Preset batch apply / verify across all connected devices
//!
//! Devices are processed one at a time with a pause in between, so device
//! command channels are never flooded. A device that fails (error, panic,
//! refresh failure) is logged and skipped; the batch always runs to the end
//! and always closes its progress observer.

use super::Preset;
use crate::device::{CameraDevice, DeviceRegistry};
use crate::error::{Error, Result};
use camctl_common::{CameraEvent, EventBus};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Default pause between two devices
pub const DEFAULT_DEVICE_PAUSE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// Write the preset to each device
    Set,
    /// Compare each device against the preset
    Verify,
}

/// Receives batch progress
pub trait ProgressObserver: Send + Sync {
    /// `current` is 1-based
    fn progress(&self, current: usize, total: usize, label: &str);

    /// Batch finished (successfully or not)
    fn finish(&self);
}

/// Publishes progress on the event bus
pub struct EventProgress {
    bus: EventBus,
    preset: String,
}

impl EventProgress {
    pub fn new(bus: EventBus, preset: impl Into<String>) -> Self {
        Self {
            bus,
            preset: preset.into(),
        }
    }
}

impl ProgressObserver for EventProgress {
    fn progress(&self, current: usize, total: usize, label: &str) {
        self.bus.emit_lossy(CameraEvent::PresetProgress {
            preset: self.preset.clone(),
            current,
            total,
            label: label.to_string(),
            timestamp: chrono::Utc::now(),
        });
    }

    fn finish(&self) {
        self.bus.emit_lossy(CameraEvent::PresetBatchFinished {
            preset: self.preset.clone(),
            timestamp: chrono::Utc::now(),
        });
    }
}

/// Per-batch counts, for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Connected devices at batch start
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Verify mode: devices with at least one differing value
    pub mismatched: usize,
}

enum DeviceResult {
    Done,
    Mismatched(usize),
}

/// Applies or verifies a preset on every connected device
pub struct PresetBatchApplier {
    registry: Arc<DeviceRegistry>,
    pause: Duration,
}

impl PresetBatchApplier {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self {
            registry,
            pause: DEFAULT_DEVICE_PAUSE,
        }
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    /// Run the batch on its own task
    pub fn spawn(
        self: Arc<Self>,
        preset: Preset,
        mode: BatchMode,
        observer: Arc<dyn ProgressObserver>,
    ) -> JoinHandle<BatchSummary> {
        tokio::spawn(async move { self.apply(&preset, mode, observer.as_ref()).await })
    }

    /// Walk the connected devices once, in registry order
    pub async fn apply(
        &self,
        preset: &Preset,
        mode: BatchMode,
        observer: &dyn ProgressObserver,
    ) -> BatchSummary {
        let devices = self.registry.connected();
        let mut summary = BatchSummary {
            total: devices.len(),
            ..Default::default()
        };
        info!(preset = %preset.name, ?mode, devices = summary.total, "Preset batch started");

        for (index, device) in devices.into_iter().enumerate() {
            let label = refresh(&device).await;
            observer.progress(index + 1, summary.total, &label);

            match process(preset, mode, &device).await {
                Ok(DeviceResult::Done) => summary.succeeded += 1,
                Ok(DeviceResult::Mismatched(count)) => {
                    warn!(device = %label, mismatches = count, preset = %preset.name, "Device differs from preset");
                    summary.mismatched += 1;
                }
                Err(e) => {
                    error!(device = %label, preset = %preset.name, error = %e, "Unable to process preset on device");
                    summary.failed += 1;
                }
            }

            tokio::time::sleep(self.pause).await;
        }

        observer.finish();
        info!(
            preset = %preset.name,
            succeeded = summary.succeeded,
            failed = summary.failed,
            mismatched = summary.mismatched,
            "Preset batch finished"
        );
        summary
    }
}

/// Refresh cached properties, returning the progress label
async fn refresh(device: &Arc<dyn CameraDevice>) -> String {
    let target = Arc::clone(device);
    match tokio::task::spawn_blocking(move || target.load_properties()).await {
        Ok(Ok(properties)) => properties.display_name,
        Ok(Err(e)) => {
            warn!(device = %device.id(), error = %e, "Unable to refresh device properties");
            device.display_name()
        }
        Err(e) => {
            warn!(device = %device.id(), error = %e, "Property refresh task failed");
            device.id().to_string()
        }
    }
}

async fn process(
    preset: &Preset,
    mode: BatchMode,
    device: &Arc<dyn CameraDevice>,
) -> Result<DeviceResult> {
    let preset = preset.clone();
    let device = Arc::clone(device);

    tokio::task::spawn_blocking(move || match mode {
        BatchMode::Set => {
            preset.set(device.as_ref())?;
            debug!(device = %device.id(), "Preset set");
            Ok(DeviceResult::Done)
        }
        BatchMode::Verify => {
            let mismatches = preset.verify(device.as_ref())?;
            for m in &mismatches {
                debug!(
                    device = %device.id(),
                    property = %m.property,
                    expected = %m.expected,
                    actual = ?m.actual,
                    "Property mismatch"
                );
            }
            if mismatches.is_empty() {
                Ok(DeviceResult::Done)
            } else {
                Ok(DeviceResult::Mismatched(mismatches.len()))
            }
        }
    })
    .await
    .map_err(|e| match mode {
        BatchMode::Set => Error::PresetApply(format!("Device task failed: {}", e)),
        BatchMode::Verify => Error::PresetVerify(format!("Device task failed: {}", e)),
    })?
}
