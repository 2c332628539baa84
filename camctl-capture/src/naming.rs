//! Destination path resolution
//!
//! Turns a session and a capture's file name into the absolute path the
//! capture will be written to:
//!
//! - Templated names come from [`Session::next_file_name`], which owns their
//!   uniqueness through the running counter.
//! - Original names are kept, and a name that is already taken gets a numeric
//!   suffix (`IMG_0001.jpg` becomes `IMG_0001_1.jpg`, then `IMG_0001_2.jpg`)
//!   unless the session allows overwriting.
//!
//! An existing file is only ever replaced when `allow_overwrite` is set.

use crate::error::{Error, Result};
use crate::session::Session;
use std::path::{Path, PathBuf};
use tracing::debug;

/// First free path of the form `<stem>_<n><ext>`, n counting from 1
///
/// Returns `candidate` unchanged when nothing exists there.
pub fn unique_path(candidate: &Path) -> PathBuf {
    if !candidate.exists() {
        return candidate.to_path_buf();
    }

    let parent = candidate.parent().unwrap_or_else(|| Path::new(""));
    let stem = candidate
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let extension = candidate
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut n: u32 = 1;
    loop {
        let next = parent.join(format!("{}_{}{}", stem, n, extension));
        if !next.exists() {
            return next;
        }
        n += 1;
    }
}

/// Lower-case the extension of a path, leaving the stem untouched
pub fn lower_case_extension(path: &Path) -> PathBuf {
    match path.extension() {
        Some(ext) if !ext.is_empty() => {
            path.with_extension(ext.to_string_lossy().to_lowercase())
        }
        _ => path.to_path_buf(),
    }
}

/// Where a capture goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// Path to write
    pub path: PathBuf,
    /// Name before any collision suffix; later collisions are numbered from it
    pub base: PathBuf,
}

/// Destination path resolver
pub struct FileNameResolver;

impl FileNameResolver {
    /// Whether the session's naming template decides the name
    ///
    /// Captures held only in device RAM have no meaningful camera file name,
    /// so they always use the template.
    pub fn uses_template(session: &Session, in_ram: bool) -> bool {
        !session.use_original_filename || in_ram
    }

    /// Resolve the final destination path
    ///
    /// `templated` is the output of [`Session::next_file_name`] when
    /// [`FileNameResolver::uses_template`] is true, `None` otherwise.
    ///
    /// Creates the destination directory if needed, and deletes an existing
    /// target when the session allows overwriting.
    ///
    /// # Errors
    /// `NamingResolution` when no legal, writable path can be formed.
    pub fn resolve(
        session: &Session,
        original_file_name: &str,
        templated: Option<PathBuf>,
    ) -> Result<PathBuf> {
        Self::resolve_destination(session, original_file_name, templated).map(|d| d.path)
    }

    /// [`FileNameResolver::resolve`], keeping the unsuffixed name as well
    pub fn resolve_destination(
        session: &Session,
        original_file_name: &str,
        templated: Option<PathBuf>,
    ) -> Result<Destination> {
        if session.folder.as_os_str().is_empty() {
            return Err(Error::NamingResolution(
                "Session has no destination folder".to_string(),
            ));
        }

        let candidate = match templated {
            Some(path) => path,
            None => {
                // Strip any device-side directories from the reported name
                let file_name = Path::new(original_file_name).file_name().ok_or_else(|| {
                    Error::NamingResolution(format!(
                        "Capture name '{}' is not a file name",
                        original_file_name
                    ))
                })?;
                session.folder.join(file_name)
            }
        };

        let candidate = if session.lower_case_extension {
            lower_case_extension(&candidate)
        } else {
            candidate
        };

        let parent = candidate.parent().ok_or_else(|| {
            Error::NamingResolution(format!("{} has no parent folder", candidate.display()))
        })?;
        ensure_writable_dir(parent)?;

        let resolved = if candidate.exists() {
            if session.allow_overwrite {
                std::fs::remove_file(&candidate).map_err(|e| {
                    Error::NamingResolution(format!(
                        "Cannot replace {}: {}",
                        candidate.display(),
                        e
                    ))
                })?;
                candidate.clone()
            } else {
                unique_path(&candidate)
            }
        } else {
            candidate.clone()
        };

        debug!(path = %resolved.display(), "Destination resolved");
        Ok(Destination {
            path: resolved,
            base: candidate,
        })
    }
}

fn ensure_writable_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir).map_err(|e| {
            Error::NamingResolution(format!("Cannot create folder {}: {}", dir.display(), e))
        })?;
    }

    let metadata = std::fs::metadata(dir).map_err(|e| {
        Error::NamingResolution(format!("Cannot access folder {}: {}", dir.display(), e))
    })?;
    if !metadata.is_dir() {
        return Err(Error::NamingResolution(format!(
            "{} is not a folder",
            dir.display()
        )));
    }
    if metadata.permissions().readonly() {
        return Err(Error::NamingResolution(format!(
            "Folder {} is not writable",
            dir.display()
        )));
    }
    Ok(())
}
