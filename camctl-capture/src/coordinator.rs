//! Coordinating task
//!
//! One tokio task owns everything that must have a single writer: the active
//! [`Session`] (with its running counter), the [`CatalogStore`], the
//! [`PreviewDispatcher`] and the status line. Transfer workers talk to it
//! through a cloneable [`CoordinatorHandle`]; every request is a message on an
//! mpsc channel, answered over a oneshot where a reply is needed.
//!
//! Because the task processes one command at a time, catalog inserts and
//! counter increments are serialized no matter how many transfers run
//! concurrently.

use crate::catalog::{CatalogStore, CatalogedItem};
use crate::error::{Error, Result};
use crate::plugins::PluginConfig;
use crate::preview::{PreviewDecision, PreviewDispatcher};
use crate::session::Session;
use camctl_common::{CameraEvent, EventBus};
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const COMMAND_CAPACITY: usize = 64;

/// User edit applied to the live session
pub type SessionEdit = Box<dyn FnOnce(&mut Session) + Send>;

enum Command {
    NextFileName {
        original_file_name: String,
        camera_name: String,
        reply: oneshot::Sender<(PathBuf, u32)>,
    },
    SessionSnapshot {
        reply: oneshot::Sender<Session>,
    },
    UpdateSession {
        edit: SessionEdit,
        reply: oneshot::Sender<()>,
    },
    Catalog {
        item: Box<CatalogedItem>,
        reply: oneshot::Sender<usize>,
    },
    RecordPluginOutcomes {
        outcomes: Vec<PluginConfig>,
    },
    Preview {
        item: Box<CatalogedItem>,
        reply: oneshot::Sender<PreviewDecision>,
    },
    TransferFinished,
    Status {
        text: String,
    },
    Items {
        reply: oneshot::Sender<Vec<CatalogedItem>>,
    },
}

/// The coordinating task's state
pub struct Coordinator {
    session: Session,
    catalog: CatalogStore,
    preview: PreviewDispatcher,
    status: String,
    bus: EventBus,
}

impl Coordinator {
    pub fn new(session: Session, preview: PreviewDispatcher, bus: EventBus) -> Self {
        Self {
            session,
            catalog: CatalogStore::new(),
            preview,
            status: String::new(),
            bus,
        }
    }

    /// Start the task
    ///
    /// The task ends once every [`CoordinatorHandle`] has been dropped.
    pub fn spawn(self) -> (CoordinatorHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let task = tokio::spawn(self.run(rx));
        (CoordinatorHandle { tx }, task)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        debug!(session = %self.session.name, "Coordinator started");
        while let Some(command) = rx.recv().await {
            self.handle(command);
        }
        debug!(items = self.catalog.len(), "Coordinator stopped");
    }

    fn handle(&mut self, command: Command) {
        // A dropped reply receiver means the caller gave up; nothing to do
        match command {
            Command::NextFileName {
                original_file_name,
                camera_name,
                reply,
            } => {
                let path = self.session.next_file_name(
                    &original_file_name,
                    &camera_name,
                    chrono::Local::now(),
                );
                let _ = reply.send((path, self.session.counter));
            }
            Command::SessionSnapshot { reply } => {
                let _ = reply.send(self.session.clone());
            }
            Command::UpdateSession { edit, reply } => {
                edit(&mut self.session);
                info!(session = %self.session.name, "Session updated");
                let _ = reply.send(());
            }
            Command::Catalog { item, reply } => {
                let item = *item;
                let (id, path) = (item.id, item.path.clone());
                self.catalog.insert(item);
                let count = self.catalog.len();
                debug!(path = %path.display(), count, "Item cataloged");
                self.bus.emit_lossy(CameraEvent::ItemCataloged {
                    item_id: id,
                    path,
                    count,
                    timestamp: chrono::Utc::now(),
                });
                let _ = reply.send(count);
            }
            Command::RecordPluginOutcomes { outcomes } => {
                self.record_plugin_outcomes(outcomes);
            }
            Command::Preview { item, reply } => {
                let decision = self.preview.offer(&item);
                let _ = reply.send(decision);
            }
            Command::TransferFinished => self.preview.mark_transfer(),
            Command::Status { text } => {
                self.status = text.clone();
                self.bus.emit_lossy(CameraEvent::status(text));
            }
            Command::Items { reply } => {
                let _ = reply.send(self.catalog.items().to_vec());
            }
        }
    }

    /// Copy run status back by position, only where the entry still matches
    fn record_plugin_outcomes(&mut self, outcomes: Vec<PluginConfig>) {
        for (index, outcome) in outcomes.into_iter().enumerate() {
            match self.session.plugins.get_mut(index) {
                Some(config) if config.same_entry(&outcome) => {
                    config.is_error = outcome.is_error;
                    config.error = outcome.error;
                    config.is_ready = outcome.is_ready;
                }
                _ => warn!(
                    plugin = %outcome.name,
                    index,
                    "Plugin list changed during transfer; outcome dropped"
                ),
            }
        }
    }
}

/// Cloneable front end of the coordinating task
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Command>,
}

impl CoordinatorHandle {
    async fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| Error::Internal("Coordinator is not running".to_string()))
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.send(build(reply)).await?;
        rx.await
            .map_err(|_| Error::Internal("Coordinator dropped the request".to_string()))
    }

    /// Advance the session counter and return the templated path with the
    /// counter value it used
    pub async fn next_file_name(
        &self,
        original_file_name: &str,
        camera_name: &str,
    ) -> Result<(PathBuf, u32)> {
        let original_file_name = original_file_name.to_string();
        let camera_name = camera_name.to_string();
        self.request(|reply| Command::NextFileName {
            original_file_name,
            camera_name,
            reply,
        })
        .await
    }

    pub async fn session(&self) -> Result<Session> {
        self.request(|reply| Command::SessionSnapshot { reply }).await
    }

    /// Apply a user edit to the live session
    pub async fn update_session<F>(&self, edit: F) -> Result<()>
    where
        F: FnOnce(&mut Session) + Send + 'static,
    {
        self.request(|reply| Command::UpdateSession {
            edit: Box::new(edit),
            reply,
        })
        .await
    }

    /// Insert into the catalog; returns the catalog size afterwards
    pub async fn catalog(&self, item: CatalogedItem) -> Result<usize> {
        self.request(|reply| Command::Catalog {
            item: Box::new(item),
            reply,
        })
        .await
    }

    pub async fn record_plugin_outcomes(&self, outcomes: Vec<PluginConfig>) -> Result<()> {
        self.send(Command::RecordPluginOutcomes { outcomes }).await
    }

    pub async fn preview(&self, item: CatalogedItem) -> Result<PreviewDecision> {
        self.request(|reply| Command::Preview {
            item: Box::new(item),
            reply,
        })
        .await
    }

    /// Note a finished transfer that was not offered for preview
    pub async fn transfer_finished(&self) -> Result<()> {
        self.send(Command::TransferFinished).await
    }

    /// Replace the status line text
    pub async fn status(&self, text: impl Into<String>) -> Result<()> {
        self.send(Command::Status { text: text.into() }).await
    }

    pub async fn items(&self) -> Result<Vec<CatalogedItem>> {
        self.request(|reply| Command::Items { reply }).await
    }
}
