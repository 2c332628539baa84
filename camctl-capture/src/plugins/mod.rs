//! Post-capture plugins
//!
//! Each session carries an ordered list of [`PluginConfig`]s. After an item is
//! cataloged, [`PluginExecutionChain`] runs every enabled entry through the
//! implementation registered for its type key.
//!
//! # Error isolation
//! A failing plugin (error or panic) is recorded on its own config and the
//! chain moves on to the next one. An unknown type key fails closed with a
//! configuration error recorded the same way. Nothing a plugin does can fail
//! the transfer that triggered it.

pub mod copy_to_folder;
pub mod run_command;

pub use copy_to_folder::CopyToFolderPlugin;
pub use run_command::RunCommandPlugin;

use crate::catalog::CatalogedItem;
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Configuration and last-run status of one plugin entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    /// User-facing name
    #[serde(default)]
    pub name: String,

    /// Registry key of the implementation
    pub plugin_type: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Last run failed
    #[serde(default)]
    pub is_error: bool,

    /// Description of the last failure
    #[serde(default)]
    pub error: Option<String>,

    /// Ran at least once since start-up (successfully or not)
    #[serde(default)]
    pub is_ready: bool,

    /// Plugin-specific parameters
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

fn default_enabled() -> bool {
    true
}

impl PluginConfig {
    pub fn new(name: impl Into<String>, plugin_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            plugin_type: plugin_type.into(),
            enabled: true,
            is_error: false,
            error: None,
            is_ready: false,
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Required parameter, or a configuration error naming it
    pub fn param(&self, key: &str) -> Result<&str> {
        self.params
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                Error::Config(format!("Plugin '{}' is missing parameter '{}'", self.name, key))
            })
    }

    fn mark_success(&mut self) {
        self.is_error = false;
        self.error = None;
        self.is_ready = true;
    }

    fn mark_failure(&mut self, message: String) {
        self.is_error = true;
        self.error = Some(message);
        self.is_ready = true;
    }

    /// Same plugin entry (used when merging run status back into a session)
    pub fn same_entry(&self, other: &PluginConfig) -> bool {
        self.plugin_type == other.plugin_type && self.name == other.name
    }
}

/// Contract every post-capture plugin satisfies
#[async_trait]
pub trait AutoExportPlugin: Send + Sync {
    /// Run against a freshly cataloged item with this entry's configuration
    async fn execute(&self, item: &CatalogedItem, config: &PluginConfig) -> Result<()>;
}

/// Type key → implementation
#[derive(Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, Arc<dyn AutoExportPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the plugins shipped in this crate
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(copy_to_folder::PLUGIN_TYPE, Arc::new(CopyToFolderPlugin));
        registry.register(run_command::PLUGIN_TYPE, Arc::new(RunCommandPlugin));
        registry
    }

    pub fn register(&mut self, plugin_type: impl Into<String>, plugin: Arc<dyn AutoExportPlugin>) {
        self.plugins.insert(plugin_type.into(), plugin);
    }

    /// Resolve a type key; unknown keys are a configuration error
    pub fn resolve(&self, plugin_type: &str) -> Result<Arc<dyn AutoExportPlugin>> {
        self.plugins
            .get(plugin_type)
            .cloned()
            .ok_or_else(|| Error::Config(format!("Unknown plugin type '{}'", plugin_type)))
    }
}

/// Outcome counts of one chain run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChainReport {
    pub executed: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Runs a session's enabled plugins in order
#[derive(Clone)]
pub struct PluginExecutionChain {
    registry: Arc<PluginRegistry>,
}

impl PluginExecutionChain {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self { registry }
    }

    /// Run every enabled plugin against `item`, updating each config's status
    /// in place. Never fails.
    pub async fn run(&self, item: &CatalogedItem, configs: &mut [PluginConfig]) -> ChainReport {
        let mut report = ChainReport::default();

        for config in configs.iter_mut() {
            if !config.enabled {
                report.skipped += 1;
                continue;
            }

            report.executed += 1;
            match self.run_one(item, config).await {
                Ok(()) => {
                    debug!(plugin = %config.name, path = %item.path.display(), "Plugin executed");
                    config.mark_success();
                }
                Err(e) => {
                    error!(
                        plugin = %config.name,
                        plugin_type = %config.plugin_type,
                        error = %e,
                        "Error to apply plugin"
                    );
                    config.mark_failure(e.to_string());
                    report.failed += 1;
                }
            }
        }

        report
    }

    async fn run_one(&self, item: &CatalogedItem, config: &PluginConfig) -> Result<()> {
        let plugin = self.registry.resolve(&config.plugin_type)?;

        match AssertUnwindSafe(plugin.execute(item, config)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "plugin panicked".to_string());
                warn!(plugin = %config.name, "Plugin panicked: {}", message);
                Err(Error::Plugin(message))
            }
        }
    }
}
