//! Device layer boundary
//!
//! The capture core never speaks a camera protocol. It consumes the
//! [`CameraDevice`] trait (connection state, busy flag, properties and a
//! blocking "transfer remote file to local path") and receives
//! [`CaptureEvent`]s from whatever drives the devices.
//!
//! Device calls are blocking; async callers run them through
//! `tokio::task::spawn_blocking`.

pub mod folder;
pub mod registry;

pub use folder::FolderCamera;
pub use registry::DeviceRegistry;

use crate::error::Result;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Opaque device-side identifier of a captured object
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteHandle(pub String);

impl fmt::Display for RemoteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Optional device features
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    CaptureInRam,
}

/// Display and sort metadata read from the device
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceProperties {
    pub display_name: String,
    pub serial: String,
    pub sort_order: i32,
    /// Captures stay on the card; nothing is downloaded
    pub no_download: bool,
}

/// A connected camera as seen by the capture core
pub trait CameraDevice: Send + Sync {
    /// Stable identifier (port, serial or similar)
    fn id(&self) -> &str;

    fn display_name(&self) -> String;

    fn is_connected(&self) -> bool;

    /// Per-device mutual exclusion marker for transfers
    fn is_busy(&self) -> bool;

    fn set_busy(&self, busy: bool);

    fn capabilities(&self) -> HashSet<Capability> {
        HashSet::new()
    }

    fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// Captures land in device RAM instead of on a card
    fn capture_in_ram(&self) -> bool {
        self.has_capability(Capability::CaptureInRam)
    }

    /// Refresh and return the cached device properties
    fn load_properties(&self) -> Result<DeviceProperties>;

    /// Transfer a captured object to a local file (blocking)
    ///
    /// The destination does not exist when this is called; the device creates it.
    fn transfer_file(&self, handle: &RemoteHandle, destination: &Path) -> Result<()>;

    /// Names of all settable camera properties
    fn property_names(&self) -> Result<Vec<String>>;

    /// Current value of a camera property, `None` if the device lacks it
    fn property_value(&self, name: &str) -> Result<Option<String>>;

    fn set_property_value(&self, name: &str, value: &str) -> Result<()>;
}

/// "Photo captured" notification from the device layer
///
/// Created once per capture and consumed exactly once by the dispatcher.
#[derive(Clone)]
pub struct CaptureEvent {
    pub device: Arc<dyn CameraDevice>,
    pub handle: RemoteHandle,
    /// File name as reported by the device
    pub file_name: String,
    /// Capture resides in device RAM only
    pub in_ram: bool,
}

impl CaptureEvent {
    pub fn new(device: Arc<dyn CameraDevice>, handle: RemoteHandle, file_name: impl Into<String>) -> Self {
        let in_ram = device.capture_in_ram();
        Self {
            device,
            handle,
            file_name: file_name.into(),
            in_ram,
        }
    }
}

impl fmt::Debug for CaptureEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureEvent")
            .field("device", &self.device.id())
            .field("handle", &self.handle)
            .field("file_name", &self.file_name)
            .field("in_ram", &self.in_ram)
            .finish()
    }
}

/// Holds a device's busy flag for the lifetime of the guard
///
/// The flag is cleared on drop, so early returns, `?` and panics inside a
/// transfer all leave the device idle again.
pub struct BusyGuard {
    device: Arc<dyn CameraDevice>,
}

impl BusyGuard {
    pub fn acquire(device: Arc<dyn CameraDevice>) -> Self {
        device.set_busy(true);
        Self { device }
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.device.set_busy(false);
    }
}
