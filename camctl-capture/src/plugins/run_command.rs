//! Run an external program for each new capture

use super::{AutoExportPlugin, PluginConfig};
use crate::catalog::CatalogedItem;
use crate::error::{Error, Result};
use async_trait::async_trait;
use tracing::debug;

/// Registry key
pub const PLUGIN_TYPE: &str = "run_command";

/// Runs `params.program` with `params.args`
///
/// `%1` in the argument string is replaced by the item path. Arguments are
/// split on whitespace after substitution. A non-zero exit status is a fault.
pub struct RunCommandPlugin;

/// Substitute `%1` and split into arguments
pub fn build_args(args: &str, path: &str) -> Vec<String> {
    args.split_whitespace()
        .map(|arg| arg.replace("%1", path))
        .collect()
}

#[async_trait]
impl AutoExportPlugin for RunCommandPlugin {
    async fn execute(&self, item: &CatalogedItem, config: &PluginConfig) -> Result<()> {
        let program = config.param("program")?;
        let path = item.path.to_string_lossy();
        let args = build_args(config.params.get("args").map(String::as_str).unwrap_or("%1"), &path);

        debug!(plugin = %config.name, program, ?args, "Running command");

        let status = tokio::process::Command::new(program)
            .args(&args)
            .status()
            .await
            .map_err(|e| Error::Plugin(format!("Cannot start {}: {}", program, e)))?;

        if !status.success() {
            return Err(Error::Plugin(format!("{} exited with {}", program, status)));
        }
        Ok(())
    }
}
