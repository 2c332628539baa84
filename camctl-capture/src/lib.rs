//! # camctl capture library (camctl-capture)
//!
//! The capture-transfer core of camctl: everything between "a camera reported
//! a new image" and "the image is on disk, cataloged, post-processed and
//! offered to the viewer", plus preset batch apply/verify across cameras.
//!
//! **Architecture:** capture events flow through the
//! [`CaptureEventDispatcher`] into per-capture [`TransferPipeline`] runs.
//! Single-owner state (session counter, catalog, preview timer, status line)
//! lives on the coordinator task. UI-facing output is published on the
//! [`camctl_common::EventBus`].

pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod device;
pub mod error;
pub mod metadata;
pub mod naming;
pub mod plugins;
pub mod preset;
pub mod preview;
pub mod session;
pub mod transfer;

pub use error::{Error, Result};
pub use transfer::{CaptureEventDispatcher, TransferPipeline};

use crate::config::CaptureConfig;
use crate::coordinator::{Coordinator, CoordinatorHandle};
use crate::device::DeviceRegistry;
use crate::metadata::{MetadataStamper, MetadataTagger, SidecarTagger};
use crate::plugins::{PluginExecutionChain, PluginRegistry};
use crate::preset::PresetBatchApplier;
use crate::preview::PreviewDispatcher;
use crate::session::Session;
use crate::transfer::PipelineSettings;
use camctl_common::EventBus;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Default event bus capacity
const EVENT_CAPACITY: usize = 256;

/// Assembles a [`CaptureService`]
pub struct CaptureServiceBuilder {
    session: Session,
    settings: PipelineSettings,
    parallel_transfer: bool,
    plugins: PluginRegistry,
    tagger: Arc<dyn MetadataTagger>,
    bus: Option<EventBus>,
    registry: Option<Arc<DeviceRegistry>>,
}

impl CaptureServiceBuilder {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            settings: PipelineSettings::default(),
            parallel_transfer: false,
            plugins: PluginRegistry::with_builtins(),
            tagger: Arc::new(SidecarTagger),
            bus: None,
            registry: None,
        }
    }

    /// Session and switches from a loaded config file
    pub fn from_config(config: &CaptureConfig) -> Self {
        Self::new(config.session.clone())
            .settings(PipelineSettings::from(&config.base))
            .parallel_transfer(config.base.transfer.parallel_transfer)
    }

    pub fn settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn parallel_transfer(mut self, enabled: bool) -> Self {
        self.parallel_transfer = enabled;
        self
    }

    pub fn plugins(mut self, plugins: PluginRegistry) -> Self {
        self.plugins = plugins;
        self
    }

    pub fn tagger(mut self, tagger: Arc<dyn MetadataTagger>) -> Self {
        self.tagger = tagger;
        self
    }

    pub fn event_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn registry(mut self, registry: Arc<DeviceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Start the coordinator task and wire the pipeline
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> CaptureService {
        let bus = self.bus.unwrap_or_else(|| EventBus::new(EVENT_CAPACITY));
        let registry = self.registry.unwrap_or_default();

        let preview = PreviewDispatcher::new(
            bus.clone(),
            self.settings.preview.delayed_loading,
            self.settings.quiet_interval(),
        );
        let (coordinator, coordinator_task) =
            Coordinator::new(self.session, preview, bus.clone()).spawn();

        let pipeline = TransferPipeline::new(
            coordinator.clone(),
            PluginExecutionChain::new(Arc::new(self.plugins)),
            MetadataStamper::new(self.tagger),
            self.settings,
            bus.clone(),
        );
        let dispatcher = CaptureEventDispatcher::new(pipeline, self.parallel_transfer);

        info!(parallel = self.parallel_transfer, "Capture service ready");
        CaptureService {
            bus,
            coordinator,
            dispatcher,
            registry,
            coordinator_task,
        }
    }
}

/// Running capture core
pub struct CaptureService {
    bus: EventBus,
    coordinator: CoordinatorHandle,
    dispatcher: CaptureEventDispatcher,
    registry: Arc<DeviceRegistry>,
    coordinator_task: JoinHandle<()>,
}

impl CaptureService {
    pub fn builder(session: Session) -> CaptureServiceBuilder {
        CaptureServiceBuilder::new(session)
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn coordinator(&self) -> &CoordinatorHandle {
        &self.coordinator
    }

    pub fn dispatcher(&self) -> &CaptureEventDispatcher {
        &self.dispatcher
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Batch applier over this service's devices
    pub fn preset_applier(&self) -> PresetBatchApplier {
        PresetBatchApplier::new(Arc::clone(&self.registry))
    }

    /// Drop this service's handles and wait for the coordinator to stop
    ///
    /// The coordinator only stops once every clone of its handle (including
    /// those held by running transfers) is gone.
    pub async fn shutdown(self) {
        drop(self.dispatcher);
        drop(self.coordinator);
        if let Err(e) = self.coordinator_task.await {
            tracing::error!(error = %e, "Coordinator task failed");
        }
    }
}
