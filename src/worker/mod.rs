use crate::gateway::{OllamaGateway, TextTranslator};
use crate::glossary::Glossary;
use crate::idml;
use crate::notify::Notifier;
use crate::pipeline::{self, PipelineOptions, ProgressCallback};
use crate::store::{FileKind, Progress, Task, TaskStatus, TaskStore};
use crate::utils::{processed_path, AppConfig, Result};
use futures::FutureExt;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

struct RunningJob {
    cancel: CancellationToken,
    handle: JoinHandle<Result<()>>,
    task: Task,
}

/// Builds the gateway one job will call. Jobs run against the host and model
/// recorded on the task at enqueue time, so a configuration change never
/// retargets already-queued work.
pub type GatewayFactory = Arc<dyn Fn(&Task) -> Arc<dyn TextTranslator> + Send + Sync>;

pub fn ollama_gateway_factory(timeout_seconds: u64) -> GatewayFactory {
    Arc::new(move |task: &Task| -> Arc<dyn TextTranslator> {
        Arc::new(OllamaGateway::new(
            task.translation_host.clone(),
            task.model.clone(),
            timeout_seconds,
        ))
    })
}

/// Single-concurrency worker loop. Owns the in-flight job registry
/// exclusively; every other component communicates with it through the task
/// store (deleting a record is how collaborators request cancellation).
pub struct Scheduler {
    store: TaskStore,
    notifier: Notifier,
    gateway: GatewayFactory,
    poll_interval: Duration,
    running: HashMap<String, RunningJob>,
}

impl Scheduler {
    pub fn new(
        store: TaskStore,
        notifier: Notifier,
        gateway: GatewayFactory,
        config: &AppConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            gateway,
            poll_interval: Duration::from_millis(config.worker.poll_interval_ms),
            running: HashMap::new(),
        }
    }

    /// Polls until `shutdown` fires, then cancels and awaits any in-flight
    /// job before returning.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Background worker started");
        let mut ticker = interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.cycle().await,
                _ = shutdown.cancelled() => break,
            }
        }

        for (id, job) in self.running.drain() {
            job.cancel.cancel();
            let _ = job.handle.await;
            info!(task_id = %id, "In-flight job stopped for shutdown");
        }
        info!("Background worker stopped");
    }

    async fn cycle(&mut self) {
        let tasks = self.store.read();

        // Deleted-while-running: ids we believe are in flight but which no
        // longer exist in the store get a cancellation request. Cleanup
        // happens when the job unwinds and is settled below.
        let stored_ids: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        for (id, job) in &self.running {
            if !stored_ids.contains(id.as_str()) {
                info!(task_id = %id, "Task removed from store, requesting cancellation");
                job.cancel.cancel();
            }
        }

        let finished: Vec<String> = self
            .running
            .iter()
            .filter(|(_, job)| job.handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        for id in finished {
            self.settle(&id).await;
        }

        // Re-read after settling so terminal statuses written above are
        // visible to the checks below.
        let tasks = self.store.read();

        // Crash recovery: a record marked running with no in-flight job can
        // only come from a previous process; requeue it.
        for task in &tasks {
            if task.status == TaskStatus::Running && !self.running.contains_key(&task.id) {
                warn!(task_id = %task.id, "Running task has no in-flight job, requeueing");
                if let Err(e) = self.store.update(&task.id, |t| t.status = TaskStatus::Pending) {
                    error!(task_id = %task.id, error = %e, "Failed to requeue task");
                }
            }
        }

        if self.running.is_empty() {
            let pending = tasks.iter().find(|t| t.status == TaskStatus::Pending);
            if let Some(task) = pending {
                self.start(task.clone()).await;
            }
        }
    }

    async fn start(&mut self, mut task: Task) {
        match self.store.update(&task.id, |t| t.status = TaskStatus::Running) {
            Ok(true) => {}
            // Deleted between read and pickup.
            Ok(false) => return,
            Err(e) => {
                error!(task_id = %task.id, error = %e, "Failed to mark task running");
                return;
            }
        }
        task.status = TaskStatus::Running;
        self.notifier.broadcast().await;
        info!(task_id = %task.id, kind = ?task.file_kind, "Worker picked up task");

        let cancel = CancellationToken::new();
        let job_cancel = cancel.clone();
        let gateway = (self.gateway)(&task);
        let store = self.store.clone();
        let notifier = self.notifier.clone();
        let id = task.id.clone();
        let snapshot = task.clone();

        let handle =
            tokio::spawn(async move { run_job(task, gateway, store, notifier, job_cancel).await });
        self.running.insert(
            id,
            RunningJob {
                cancel,
                handle,
                task: snapshot,
            },
        );
    }

    async fn settle(&mut self, id: &str) {
        let Some(job) = self.running.remove(id) else {
            return;
        };

        let status = match job.handle.await {
            Ok(Ok(())) => TaskStatus::Completed,
            Ok(Err(e)) if e.is_cancelled() => TaskStatus::Cancelled,
            Ok(Err(e)) => {
                error!(task_id = %id, error = %e, "Task failed");
                TaskStatus::Error
            }
            Err(join_err) if join_err.is_cancelled() => TaskStatus::Cancelled,
            Err(join_err) => {
                error!(task_id = %id, error = %join_err, "Task panicked");
                TaskStatus::Error
            }
        };

        // The record may have been deleted while the job was finishing; in
        // that case there is nothing to write back, but the job can have
        // re-checkpointed an output between the delete's cleanup and its own
        // cancellation, so any leftover output is removed here.
        match self.store.update(id, |t| t.status = status) {
            Ok(true) => info!(task_id = %id, status = %status, "Task finished"),
            Ok(false) => {
                info!(task_id = %id, "Task deleted while finishing, removing leftover outputs");
                for path in job.task.output_paths() {
                    if path.exists() {
                        if let Err(e) = std::fs::remove_file(&path) {
                            warn!(path = %path.display(), error = %e, "Failed to remove leftover output");
                        }
                    }
                }
            }
            Err(e) => error!(task_id = %id, error = %e, "Failed to persist final status"),
        }
        self.notifier.broadcast().await;
    }

    #[cfg(test)]
    fn running_count(&self) -> usize {
        self.running.len()
    }
}

async fn run_job(
    task: Task,
    gateway: Arc<dyn TextTranslator>,
    store: TaskStore,
    notifier: Notifier,
    cancel: CancellationToken,
) -> Result<()> {
    let glossary = match &task.glossary_path {
        Some(path) => Some(Glossary::load(path)?),
        None => None,
    };

    let progress = progress_callback(store, notifier, task.id.clone());
    let options = PipelineOptions {
        source_lang: task.source_lang.clone(),
        target_lang: task.target_lang.clone(),
        overwrite: task.overwrite,
        batch_size: task.batch_size,
    };

    match task.file_kind {
        FileKind::Tabular => {
            let output = processed_path(&task.filepath, "csv");
            pipeline::translate_table(
                &task.filepath,
                &output,
                &options,
                gateway,
                glossary.as_ref(),
                &cancel,
                Some(&progress),
            )
            .await
        }
        FileKind::Document => {
            idml::translate_document(
                &task.filepath,
                &options,
                gateway,
                glossary.as_ref(),
                &cancel,
                Some(&progress),
            )
            .await
        }
    }
}

fn progress_callback(store: TaskStore, notifier: Notifier, task_id: String) -> ProgressCallback {
    Arc::new(move |processed, total| {
        let store = store.clone();
        let notifier = notifier.clone();
        let task_id = task_id.clone();
        async move {
            match store.update(&task_id, |t| t.progress = Progress { processed, total }) {
                Ok(_) => notifier.broadcast().await,
                Err(e) => warn!(task_id = %task_id, error = %e, "Failed to persist progress"),
            }
        }
        .boxed()
    })
}
