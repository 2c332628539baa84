//! Capture event dispatch
//!
//! With `parallel_transfer` off, every pipeline run holds one global
//! exclusive section: the section is taken before the run is spawned, so a
//! second capture waits in the event queue until the first one has finished.
//! With it on, runs from different devices proceed concurrently and only the
//! coordinator serializes catalog and counter updates.
//!
//! Either way, two captures from the same device never overlap: a per-device
//! section keeps the busy flag meaningful.

use super::{TransferOutcome, TransferPipeline};
use crate::device::CaptureEvent;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info};

type Section = Arc<tokio::sync::Mutex<()>>;

/// Routes capture events into [`TransferPipeline`] runs
#[derive(Clone)]
pub struct CaptureEventDispatcher {
    pipeline: TransferPipeline,
    parallel_transfer: Arc<AtomicBool>,
    exclusive: Section,
    device_sections: Arc<Mutex<HashMap<String, Section>>>,
}

impl CaptureEventDispatcher {
    pub fn new(pipeline: TransferPipeline, parallel_transfer: bool) -> Self {
        Self {
            pipeline,
            parallel_transfer: Arc::new(AtomicBool::new(parallel_transfer)),
            exclusive: Arc::new(tokio::sync::Mutex::new(())),
            device_sections: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn parallel_transfer(&self) -> bool {
        self.parallel_transfer.load(Ordering::SeqCst)
    }

    /// Takes effect for events dispatched afterwards
    pub fn set_parallel_transfer(&self, enabled: bool) {
        self.parallel_transfer.store(enabled, Ordering::SeqCst);
    }

    fn device_section(&self, device_id: &str) -> Section {
        let mut sections = self
            .device_sections
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        Arc::clone(sections.entry(device_id.to_string()).or_default())
    }

    /// Take whatever sections the current mode needs and return the run
    async fn prepare(&self, event: CaptureEvent) -> BoxFuture<'static, TransferOutcome> {
        let pipeline = self.pipeline.clone();
        let device_section = self.device_section(event.device.id());

        let global = if self.parallel_transfer() {
            debug!(device = %event.device.id(), file = %event.file_name, "Dispatching concurrent transfer");
            None
        } else {
            let guard = Arc::clone(&self.exclusive).lock_owned().await;
            debug!(device = %event.device.id(), file = %event.file_name, "Dispatching serialized transfer");
            Some(guard)
        };

        async move {
            let _global = global;
            let _device = device_section.lock_owned().await;
            pipeline.run(event).await
        }
        .boxed()
    }

    /// Handle one capture event on its own task
    ///
    /// In serialized mode this waits until the previous run has released the
    /// exclusive section. The returned handle resolves to the pipeline's
    /// terminal outcome.
    pub async fn dispatch(&self, event: CaptureEvent) -> JoinHandle<TransferOutcome> {
        tokio::spawn(self.prepare(event).await)
    }

    /// Dispatch every event from `events` until the channel closes, then wait
    /// for the transfers still running
    pub async fn run(&self, mut events: mpsc::Receiver<CaptureEvent>) {
        info!(parallel = self.parallel_transfer(), "Capture dispatcher started");
        let mut running = JoinSet::new();

        while let Some(event) = events.recv().await {
            running.spawn(self.prepare(event).await);
            // Reap finished transfers so the set does not grow unbounded
            while let Some(done) = running.try_join_next() {
                log_finished(done);
            }
        }

        while let Some(done) = running.join_next().await {
            log_finished(done);
        }
        info!("Capture dispatcher stopped");
    }
}

fn log_finished(result: Result<TransferOutcome, tokio::task::JoinError>) {
    match result {
        Ok(outcome) => debug!(completed = outcome.is_completed(), "Transfer finished"),
        Err(e) => error!(error = %e, "Transfer task failed"),
    }
}
