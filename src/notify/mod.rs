use crate::store::{FileKind, Progress, Task, TaskStatus, TaskStore};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

/// Task as observers see it: ownership is annotated per connection instead
/// of exposing the raw owner credential.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TaskView {
    pub id: String,
    pub filename: String,
    pub file_kind: FileKind,
    pub status: TaskStatus,
    pub progress: Progress,
    pub source_lang: String,
    pub target_lang: String,
    pub overwrite: bool,
    pub note: String,
    pub is_owner: bool,
}

impl TaskView {
    pub fn from_task(task: &Task, owner_token: &str) -> Self {
        Self {
            id: task.id.clone(),
            filename: task.filename.clone(),
            file_kind: task.file_kind,
            status: task.status,
            progress: task.progress,
            source_lang: task.source_lang.clone(),
            target_lang: task.target_lang.clone(),
            overwrite: task.overwrite,
            note: task.note.clone(),
            is_owner: task.owner_token == owner_token,
        }
    }
}

#[derive(Clone)]
struct Subscriber {
    id: u64,
    owner_token: String,
    tx: mpsc::UnboundedSender<Vec<TaskView>>,
}

/// A live observer channel. Receives a full task-list snapshot on subscribe
/// and again after every task mutation.
pub struct TaskFeed {
    rx: mpsc::UnboundedReceiver<Vec<TaskView>>,
}

impl TaskFeed {
    pub async fn recv(&mut self) -> Option<Vec<TaskView>> {
        self.rx.recv().await
    }
}

/// Pushes task-list snapshots to connected observers. Broadcasting iterates
/// a snapshot copy of the subscriber list so connects and disconnects during
/// iteration are tolerated; a failed send drops that observer only.
#[derive(Clone)]
pub struct Notifier {
    store: TaskStore,
    subscribers: Arc<RwLock<Vec<Subscriber>>>,
    next_id: Arc<AtomicU64>,
}

impl Notifier {
    pub fn new(store: TaskStore) -> Self {
        Self {
            store,
            subscribers: Arc::new(RwLock::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn subscribe(&self, owner_token: impl Into<String>) -> TaskFeed {
        let owner_token = owner_token.into();
        let (tx, rx) = mpsc::unbounded_channel();

        let snapshot = self.snapshot_for(&owner_token);
        let _ = tx.send(snapshot);

        let subscriber = Subscriber {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            owner_token,
            tx,
        };
        self.subscribers.write().await.push(subscriber);

        TaskFeed { rx }
    }

    pub async fn broadcast(&self) {
        let subscribers: Vec<Subscriber> = self.subscribers.read().await.clone();
        if subscribers.is_empty() {
            return;
        }

        let tasks = self.store.read();
        let mut dead = Vec::new();

        for subscriber in &subscribers {
            let snapshot: Vec<TaskView> = tasks
                .iter()
                .map(|t| TaskView::from_task(t, &subscriber.owner_token))
                .collect();
            if subscriber.tx.send(snapshot).is_err() {
                dead.push(subscriber.id);
            }
        }

        if !dead.is_empty() {
            debug!(count = dead.len(), "Dropping disconnected observers");
            self.subscribers
                .write()
                .await
                .retain(|s| !dead.contains(&s.id));
        }
    }

    fn snapshot_for(&self, owner_token: &str) -> Vec<TaskView> {
        self.store
            .read()
            .iter()
            .map(|t| TaskView::from_task(t, owner_token))
            .collect()
    }

    #[cfg(test)]
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}
