//! Ordered, fire-and-forget session persistence.
//!
//! The orchestrator never waits on the session store. Operations are queued
//! to a background task that runs them one at a time, so appends always
//! land after the create that produced their session id and the complete
//! or delete always comes last. Store failures are logged and never reach
//! the conversation.

use crate::services::SessionStore;
use crate::session::{SessionId, Turn};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type OnCreated = Box<dyn FnOnce(SessionId) + Send>;

enum RecorderOp {
    Create { mode: String, on_created: OnCreated },
    Append(Vec<Turn>),
    Complete,
    Delete,
}

/// Handle to one conversation's persistence queue.
pub struct SessionRecorder {
    tx: mpsc::UnboundedSender<RecorderOp>,
    task: JoinHandle<()>,
}

impl SessionRecorder {
    /// Spawn the persistence task for a new conversation.
    pub fn spawn(store: Arc<dyn SessionStore>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_recorder(store, rx));
        Self { tx, task }
    }

    /// Queue session creation; `on_created` receives the new id.
    pub fn create(&self, mode: &str, on_created: impl FnOnce(SessionId) + Send + 'static) {
        self.enqueue(RecorderOp::Create {
            mode: mode.to_owned(),
            on_created: Box::new(on_created),
        });
    }

    /// Queue turns for appending.
    pub fn append(&self, turns: Vec<Turn>) {
        if !turns.is_empty() {
            self.enqueue(RecorderOp::Append(turns));
        }
    }

    /// Queue session completion.
    pub fn complete(&self) {
        self.enqueue(RecorderOp::Complete);
    }

    /// Queue session deletion.
    pub fn delete(&self) {
        self.enqueue(RecorderOp::Delete);
    }

    /// Close the queue and wait until every queued operation has run.
    pub async fn flush(self) {
        drop(self.tx);
        if let Err(e) = self.task.await {
            warn!("session recorder task failed: {e}");
        }
    }

    fn enqueue(&self, op: RecorderOp) {
        if self.tx.send(op).is_err() {
            warn!("session recorder is gone; dropping operation");
        }
    }
}

async fn run_recorder(store: Arc<dyn SessionStore>, mut rx: mpsc::UnboundedReceiver<RecorderOp>) {
    let mut id: Option<SessionId> = None;

    while let Some(op) = rx.recv().await {
        match op {
            RecorderOp::Create { mode, on_created } => {
                if id.is_some() {
                    continue;
                }
                match store.create_session(&mode).await {
                    Ok(created) => {
                        info!("session {created} created");
                        on_created(created.clone());
                        id = Some(created);
                    }
                    Err(e) => warn!("session create failed, history will not be saved: {e}"),
                }
            }
            RecorderOp::Append(turns) => {
                let Some(id) = &id else {
                    debug!("no session, dropping {} turn(s)", turns.len());
                    continue;
                };
                if let Err(e) = store.append_messages(id, &turns).await {
                    warn!("append to session {id} failed: {e}");
                }
            }
            RecorderOp::Complete => {
                if let Some(id) = &id
                    && let Err(e) = store.complete_session(id).await
                {
                    warn!("complete session {id} failed: {e}");
                }
            }
            RecorderOp::Delete => {
                if let Some(id) = id.take() {
                    match store.delete_session(&id).await {
                        Ok(()) => info!("session {id} deleted"),
                        Err(e) => warn!("delete session {id} failed: {e}"),
                    }
                }
            }
        }
    }
}
