//! Preview push and burst coalescing
//!
//! [`PreviewDispatcher`] decides whether a freshly cataloged item is pushed to
//! the viewer right away or deferred. With delayed loading on, an offer that
//! arrives within the quiet interval of the previous finished transfer (re)arms
//! a single deferred push; each re-arm cancels the pending one, so a rapid
//! burst ends with only its last item shown. Transfers that are never offered
//! (preview switched off, or a raw file under jpg-only preview) still count.
//!
//! The dispatcher is owned by the coordinator task. Deferred pushes run on
//! their own spawned task and publish straight to the [`EventBus`].

use crate::catalog::CatalogedItem;
use camctl_common::{CameraEvent, EventBus};
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Default quiet interval between previews
pub const DEFAULT_QUIET_INTERVAL: Duration = Duration::from_secs(4);

/// Single-slot schedule-and-cancel primitive
///
/// Scheduling always replaces (aborts) whatever was pending. Dropping the
/// task cancels it.
#[derive(Debug, Default)]
pub struct DeferredTask {
    handle: Option<JoinHandle<()>>,
}

impl DeferredTask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action` after `delay`, replacing any pending action
    pub fn schedule<F>(&mut self, delay: Duration, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action.await;
        }));
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for DeferredTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// What happened to an offered item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewDecision {
    /// Pushed to the viewer now
    Immediate,
    /// Armed as the pending deferred push
    Deferred,
}

/// Viewer push policy
pub struct PreviewDispatcher {
    bus: EventBus,
    delayed_loading: bool,
    quiet_interval: Duration,
    /// Time the previous transfer finished
    last_transfer: Option<Instant>,
    pending: DeferredTask,
}

impl PreviewDispatcher {
    pub fn new(bus: EventBus, delayed_loading: bool, quiet_interval: Duration) -> Self {
        Self {
            bus,
            delayed_loading,
            quiet_interval,
            last_transfer: None,
            pending: DeferredTask::new(),
        }
    }

    /// Push `item` now or defer it
    ///
    /// Counts as a finished transfer, so a burst keeps deferring until it
    /// goes quiet for a full interval.
    pub fn offer(&mut self, item: &CatalogedItem) -> PreviewDecision {
        let now = Instant::now();
        let within_quiet = self
            .last_transfer
            .is_some_and(|last| now.duration_since(last) < self.quiet_interval);
        self.last_transfer = Some(now);

        if self.delayed_loading && within_quiet {
            debug!(path = %item.path.display(), "Preview deferred");
            let bus = self.bus.clone();
            let item = item.clone();
            self.pending.schedule(self.quiet_interval, async move {
                push(&bus, &item);
            });
            PreviewDecision::Deferred
        } else {
            self.pending.cancel();
            push(&self.bus, item);
            PreviewDecision::Immediate
        }
    }

    /// Record a finished transfer that is not offered for preview
    pub fn mark_transfer(&mut self) {
        self.last_transfer = Some(Instant::now());
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_pending()
    }
}

fn push(bus: &EventBus, item: &CatalogedItem) {
    debug!(path = %item.path.display(), "Preview pushed");
    bus.emit_lossy(CameraEvent::PreviewReady {
        item_id: item.id,
        path: item.path.clone(),
        timestamp: chrono::Utc::now(),
    });
}
