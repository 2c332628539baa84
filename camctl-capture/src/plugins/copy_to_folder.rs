//! Copy each new capture into a second folder

use super::{AutoExportPlugin, PluginConfig};
use crate::catalog::CatalogedItem;
use crate::error::{Error, Result};
use crate::naming::unique_path;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

/// Registry key
pub const PLUGIN_TYPE: &str = "copy_to_folder";

/// Copies the item to `params.destination`, resolving name collisions with a
/// numeric suffix
pub struct CopyToFolderPlugin;

#[async_trait]
impl AutoExportPlugin for CopyToFolderPlugin {
    async fn execute(&self, item: &CatalogedItem, config: &PluginConfig) -> Result<()> {
        let folder = PathBuf::from(config.param("destination")?);
        let source = item.path.clone();

        let target = tokio::task::spawn_blocking(move || -> Result<PathBuf> {
            let file_name = source
                .file_name()
                .ok_or_else(|| Error::Plugin(format!("No file name in {}", source.display())))?;
            std::fs::create_dir_all(&folder).map_err(|e| {
                Error::Plugin(format!("Cannot create {}: {}", folder.display(), e))
            })?;
            let target = unique_path(&folder.join(file_name));
            std::fs::copy(&source, &target).map_err(|e| {
                Error::Plugin(format!("Copy to {} failed: {}", target.display(), e))
            })?;
            Ok(target)
        })
        .await
        .map_err(|e| Error::Plugin(format!("Copy task failed: {}", e)))??;

        debug!(plugin = %config.name, target = %target.display(), "Copied capture");
        Ok(())
    }
}
