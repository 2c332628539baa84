//! Camera property presets
//!
//! A [`Preset`] is a named bag of property values. It can be written to a
//! device, compared against one, or captured from one. [`batch`] walks every
//! connected device with a preset.

pub mod batch;

pub use batch::{BatchMode, BatchSummary, EventProgress, PresetBatchApplier, ProgressObserver};

use crate::device::CameraDevice;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, error, info};

/// Named set of camera property values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

/// One property whose device value differs from the preset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyMismatch {
    pub property: String,
    pub expected: String,
    /// `None` when the device does not have the property
    pub actual: Option<String>,
}

impl Preset {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn with_value(mut self, property: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(property.into(), value.into());
        self
    }

    /// Read every property of a device into a new preset
    pub fn capture(name: impl Into<String>, device: &dyn CameraDevice) -> Result<Self> {
        let mut preset = Self::new(name);
        let names = device
            .property_names()
            .map_err(|e| Error::PresetVerify(format!("{}: {}", device.id(), e)))?;
        for property in names {
            let value = device
                .property_value(&property)
                .map_err(|e| Error::PresetVerify(format!("{}: {}", device.id(), e)))?;
            if let Some(value) = value {
                preset.values.insert(property, value);
            }
        }
        debug!(preset = %preset.name, device = %device.id(), count = preset.values.len(), "Preset captured");
        Ok(preset)
    }

    /// Write all values to the device (blocking)
    pub fn set(&self, device: &dyn CameraDevice) -> Result<()> {
        for (property, value) in &self.values {
            device.set_property_value(property, value).map_err(|e| {
                Error::PresetApply(format!("{} {}={}: {}", device.id(), property, value, e))
            })?;
        }
        Ok(())
    }

    /// Compare the device's values with the preset (blocking, read-only)
    pub fn verify(&self, device: &dyn CameraDevice) -> Result<Vec<PropertyMismatch>> {
        let mut mismatches = Vec::new();
        for (property, expected) in &self.values {
            let actual = device
                .property_value(property)
                .map_err(|e| Error::PresetVerify(format!("{} {}: {}", device.id(), property, e)))?;
            if actual.as_deref() != Some(expected.as_str()) {
                mismatches.push(PropertyMismatch {
                    property: property.clone(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        Ok(mismatches)
    }
}

/// Write a preset to one device, logging instead of failing
///
/// Returns whether every value was written.
pub fn apply_to(preset: &Preset, device: &dyn CameraDevice) -> bool {
    match preset.set(device) {
        Ok(()) => {
            info!(preset = %preset.name, device = %device.id(), "Preset applied");
            true
        }
        Err(e) => {
            error!(preset = %preset.name, device = %device.id(), error = %e, "Unable to set property");
            false
        }
    }
}

/// The user's saved presets
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresetStore {
    presets: Vec<Preset>,
}

impl PresetStore {
    pub fn new(presets: Vec<Preset>) -> Self {
        let mut store = Self::default();
        for preset in presets {
            store.add(preset);
        }
        store
    }

    /// Add a preset, replacing one with the same name
    pub fn add(&mut self, preset: Preset) {
        match self.presets.iter_mut().find(|p| p.name == preset.name) {
            Some(existing) => *existing = preset,
            None => self.presets.push(preset),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Preset> {
        self.presets.iter().find(|p| p.name == name)
    }

    /// Returns whether a preset was removed
    pub fn delete(&mut self, name: &str) -> bool {
        let before = self.presets.len();
        self.presets.retain(|p| p.name != name);
        self.presets.len() != before
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }

    pub fn into_vec(self) -> Vec<Preset> {
        self.presets
    }
}
