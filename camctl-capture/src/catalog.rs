//! Session catalog
//!
//! The in-memory list of images transferred into the active session. The
//! store itself is a plain struct; single-writer discipline comes from its
//! only owner being the coordinator task.

use crate::device::CameraDevice;
use crate::session::{template_fields, Session};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

/// One successfully transferred image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogedItem {
    pub id: Uuid,
    /// Absolute path of the primary file
    pub path: PathBuf,
    pub backup_path: Option<PathBuf>,
    pub series: u32,
    /// Device id of the capturing camera
    pub device_id: String,
    /// Per-item template fields (camera, serial, session, series, counter)
    pub templates: BTreeMap<String, String>,
    pub captured_at: DateTime<Utc>,
}

impl CatalogedItem {
    pub fn new(path: PathBuf, device_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            path,
            backup_path: None,
            series: 0,
            device_id: device_id.into(),
            templates: BTreeMap::new(),
            captured_at: Utc::now(),
        }
    }

    /// Attach device- and session-derived template fields
    pub fn add_templates(&mut self, device: &dyn CameraDevice, serial: &str, session: &Session) {
        self.templates.extend(template_fields(device, serial, session));
    }

    /// Lower-cased extension of the primary file, without the dot
    pub fn extension(&self) -> Option<String> {
        self.path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
    }

    pub fn is_jpeg(&self) -> bool {
        matches!(self.extension().as_deref(), Some("jpg") | Some("jpeg"))
    }
}

/// Ordered collection of the session's items
#[derive(Debug, Default)]
pub struct CatalogStore {
    items: Vec<CatalogedItem>,
}

impl CatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an item; an item whose id is already present is not added twice
    pub fn insert(&mut self, item: CatalogedItem) -> &CatalogedItem {
        if let Some(index) = self.items.iter().position(|i| i.id == item.id) {
            return &self.items[index];
        }
        self.items.push(item);
        &self.items[self.items.len() - 1]
    }

    pub fn items(&self) -> &[CatalogedItem] {
        &self.items
    }

    pub fn last(&self) -> Option<&CatalogedItem> {
        self.items.last()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
