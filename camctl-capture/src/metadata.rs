//! Comment and keyword stamping
//!
//! Tag writing goes through [`MetadataTagger`]. The shipped [`SidecarTagger`]
//! never touches image bytes: it keeps the tags in a JSON file next to the
//! image (`IMG_1.jpg` → `IMG_1.jpg.json`).

use crate::error::{Error, Result};
use crate::session::Session;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// External tagging collaborator
pub trait MetadataTagger: Send + Sync {
    fn save_comment(&self, path: &Path, comment: &str) -> Result<()>;

    fn add_keyword(&self, path: &Path, keyword: &str) -> Result<()>;
}

/// Sidecar file contents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sidecar {
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// JSON sidecar tagger
#[derive(Debug, Clone, Copy, Default)]
pub struct SidecarTagger;

impl SidecarTagger {
    /// Sidecar location for an image
    pub fn sidecar_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(".json");
        PathBuf::from(name)
    }

    /// Read an image's sidecar; a missing sidecar is empty
    pub fn read(path: &Path) -> Result<Sidecar> {
        let sidecar = Self::sidecar_path(path);
        if !sidecar.exists() {
            return Ok(Sidecar::default());
        }
        let content = std::fs::read_to_string(&sidecar)
            .map_err(|e| Error::Metadata(format!("Cannot read {}: {}", sidecar.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Metadata(format!("Invalid sidecar {}: {}", sidecar.display(), e)))
    }

    fn update(path: &Path, apply: impl FnOnce(&mut Sidecar)) -> Result<()> {
        if !path.is_file() {
            return Err(Error::Metadata(format!("{} does not exist", path.display())));
        }
        let mut sidecar = Self::read(path)?;
        apply(&mut sidecar);

        let target = Self::sidecar_path(path);
        let content = serde_json::to_string_pretty(&sidecar)
            .map_err(|e| Error::Metadata(format!("Failed to serialize sidecar: {}", e)))?;
        std::fs::write(&target, content)
            .map_err(|e| Error::Metadata(format!("Cannot write {}: {}", target.display(), e)))
    }
}

impl MetadataTagger for SidecarTagger {
    fn save_comment(&self, path: &Path, comment: &str) -> Result<()> {
        Self::update(path, |s| s.comment = Some(comment.to_string()))
    }

    fn add_keyword(&self, path: &Path, keyword: &str) -> Result<()> {
        Self::update(path, |s| {
            if !s.keywords.iter().any(|k| k == keyword) {
                s.keywords.push(keyword.to_string());
            }
        })
    }
}

/// Applies a session's comment and keyword tags to a written file
#[derive(Clone)]
pub struct MetadataStamper {
    tagger: Arc<dyn MetadataTagger>,
}

impl MetadataStamper {
    pub fn new(tagger: Arc<dyn MetadataTagger>) -> Self {
        Self { tagger }
    }

    /// Stamp `path` when the session has `write_comment` set
    ///
    /// Returns whether anything was written.
    pub fn stamp(&self, session: &Session, path: &Path) -> Result<bool> {
        if !session.write_comment {
            return Ok(false);
        }

        let mut written = false;
        if !session.comment.is_empty() {
            self.tagger.save_comment(path, &session.comment)?;
            written = true;
        }
        for keyword in session.active_keywords() {
            self.tagger.add_keyword(path, keyword)?;
            written = true;
        }

        if written {
            debug!(path = %path.display(), "Metadata written");
        }
        Ok(written)
    }
}

impl Default for MetadataStamper {
    fn default() -> Self {
        Self::new(Arc::new(SidecarTagger))
    }
}
