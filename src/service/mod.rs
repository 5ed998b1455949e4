use crate::gateway::TextTranslator;
use crate::glossary::render_instructions;
use crate::notify::{Notifier, TaskFeed, TaskView};
use crate::store::{FileKind, Progress, Task, TaskStatus, TaskStore};
use crate::utils::{extracted_table_path, processed_path, AppConfig, Result, TranslatorError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub struct EnqueueRequest {
    pub file_path: PathBuf,
    pub filename: String,
    pub source_lang: String,
    pub target_lang: String,
    pub overwrite: bool,
    pub glossary_path: Option<PathBuf>,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub path: PathBuf,
    pub filename: String,
}

/// Collaborator-facing contract, free of transport concerns. External
/// callers hand over file paths and credentials; everything else (routing,
/// uploads, auth) stays outside the core.
#[derive(Clone)]
pub struct TranslatorService {
    store: TaskStore,
    notifier: Notifier,
    gateway: Arc<dyn TextTranslator>,
    config: AppConfig,
}

impl TranslatorService {
    pub fn new(
        store: TaskStore,
        notifier: Notifier,
        gateway: Arc<dyn TextTranslator>,
        config: AppConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            gateway,
            config,
        }
    }

    /// Accepts a file and its parameters, copies it into the upload area and
    /// appends a pending task. Returns the generated task id.
    pub async fn enqueue(&self, request: EnqueueRequest, owner_token: &str) -> Result<String> {
        let file_kind = match Path::new(&request.filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("csv") => FileKind::Tabular,
            Some("idml") => FileKind::Document,
            other => {
                return Err(TranslatorError::UnsupportedFile(format!(
                    "only .csv and .idml files are accepted, got {:?}",
                    other.unwrap_or("none")
                )))
            }
        };

        let id = Uuid::new_v4().to_string();
        let upload_dir = &self.config.worker.upload_dir;
        std::fs::create_dir_all(upload_dir)?;

        let filepath = upload_dir.join(format!("{}_{}", id, request.filename));
        std::fs::copy(&request.file_path, &filepath)?;

        let glossary_path = match &request.glossary_path {
            Some(source) => {
                let name = source
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("glossary.csv");
                let dest = upload_dir.join(format!("{}_glossary_{}", id, name));
                std::fs::copy(source, &dest)?;
                Some(dest)
            }
            None => None,
        };

        let task = Task {
            id: id.clone(),
            filename: request.filename,
            filepath,
            file_kind,
            status: TaskStatus::Pending,
            progress: Progress::default(),
            source_lang: request.source_lang,
            target_lang: request.target_lang,
            overwrite: request.overwrite,
            glossary_path,
            note: request.note,
            translation_host: self.config.translation.host.clone(),
            model: self.config.translation.model.clone(),
            batch_size: self.config.translation.batch_size,
            owner_token: owner_token.to_string(),
        };

        self.store.append(task)?;
        self.notifier.broadcast().await;
        info!(task_id = %id, "Task added to queue");
        Ok(id)
    }

    pub fn list(&self, owner_token: &str) -> Vec<TaskView> {
        self.store
            .read()
            .iter()
            .map(|t| TaskView::from_task(t, owner_token))
            .collect()
    }

    /// Removes a task and deletes its files best-effort. If the task is
    /// running, the scheduler notices the missing record on its next cycle
    /// and cancels the in-flight job; this call does not wait for that.
    pub async fn delete(&self, id: &str, owner_token: &str) -> Result<()> {
        let task = self
            .store
            .find(id)
            .ok_or_else(|| TranslatorError::TaskNotFound(id.to_string()))?;
        if task.owner_token != owner_token {
            return Err(TranslatorError::NotOwner(id.to_string()));
        }

        self.store.remove(id)?;
        if task.status == TaskStatus::Running {
            info!(task_id = %id, "Deleted a running task, cancellation will follow");
        }

        for path in task_files(&task) {
            if path.exists() {
                match std::fs::remove_file(&path) {
                    Ok(()) => info!(path = %path.display(), "Deleted file"),
                    Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete file"),
                }
            }
        }

        self.notifier.broadcast().await;
        Ok(())
    }

    /// Resolves the most relevant file for a task: the final output when
    /// completed, the in-progress intermediate when available, otherwise the
    /// original upload. The filename carries a status-dependent suffix.
    pub fn download(&self, id: &str) -> Result<Download> {
        let task = self
            .store
            .find(id)
            .ok_or_else(|| TranslatorError::TaskNotFound(id.to_string()))?;

        let stem = Path::new(&task.filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("output")
            .to_string();
        let target = if task.target_lang.is_empty() {
            "multi".to_string()
        } else {
            task.target_lang.clone()
        };
        let completed = task.status == TaskStatus::Completed;

        match task.file_kind {
            FileKind::Tabular => {
                let output = processed_path(&task.filepath, "csv");
                if output.exists() {
                    let suffix = if completed { "translated" } else { "inprogress" };
                    return Ok(Download {
                        path: output,
                        filename: format!("{}_{}_{}.csv", stem, suffix, target),
                    });
                }
            }
            FileKind::Document => {
                let output = processed_path(&task.filepath, "idml");
                if completed && output.exists() {
                    return Ok(Download {
                        path: output,
                        filename: format!("{}_translated_{}.idml", stem, target),
                    });
                }
                let partial = processed_path(&extracted_table_path(&task.filepath), "csv");
                if !completed && partial.exists() {
                    return Ok(Download {
                        path: partial,
                        filename: format!("{}_inprogress_{}.csv", stem, target),
                    });
                }
            }
        }

        if task.filepath.exists() {
            return Ok(Download {
                path: task.filepath.clone(),
                filename: task.filename.clone(),
            });
        }

        Err(TranslatorError::NoDownload(id.to_string()))
    }

    /// Synchronous single-string translation bypassing the queue, for
    /// interactive use. Same gateway underneath.
    pub async fn live_translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String> {
        let instructions = render_instructions(text, target_lang, None);
        self.gateway
            .translate(text, source_lang, target_lang, &instructions)
            .await
    }

    pub async fn subscribe(&self, owner_token: &str) -> TaskFeed {
        self.notifier.subscribe(owner_token).await
    }
}

fn task_files(task: &Task) -> Vec<PathBuf> {
    let mut files = vec![task.filepath.clone()];
    if let Some(glossary) = &task.glossary_path {
        files.push(glossary.clone());
    }
    files.extend(task.output_paths());
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::mock::MockTranslator;

    fn service_in(dir: &tempfile::TempDir) -> (TranslatorService, TaskStore) {
        let mut config = AppConfig::default();
        config.worker.upload_dir = dir.path().join("uploads");
        config.worker.tasks_file = dir.path().join("tasks.json");
        config.translation.host = "http://localhost:11434".to_string();
        config.translation.model = "test-model".to_string();

        let store = TaskStore::new(config.worker.tasks_file.clone());
        store.initialize().unwrap();
        let notifier = Notifier::new(store.clone());
        let service = TranslatorService::new(
            store.clone(),
            notifier,
            Arc::new(MockTranslator::new()),
            config,
        );
        (service, store)
    }

    fn enqueue_request(dir: &tempfile::TempDir, filename: &str) -> EnqueueRequest {
        let source = dir.path().join(filename);
        std::fs::write(&source, "source,target\nHello,\n").unwrap();
        EnqueueRequest {
            file_path: source,
            filename: filename.to_string(),
            source_lang: "en".to_string(),
            target_lang: "zh-Hant".to_string(),
            overwrite: false,
            glossary_path: None,
            note: String::new(),
        }
    }

    #[tokio::test]
    async fn enqueue_copies_upload_and_appends_pending_task() {
        let dir = tempfile::tempdir().unwrap();
        let (service, store) = service_in(&dir);

        let id = service
            .enqueue(enqueue_request(&dir, "hello.csv"), "owner-a")
            .await
            .unwrap();

        let task = store.find(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.file_kind, FileKind::Tabular);
        assert!(task.filepath.exists());
        assert!(task
            .filepath
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .ends_with("_hello.csv"));
    }

    #[tokio::test]
    async fn enqueue_rejects_unknown_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _store) = service_in(&dir);

        let result = service
            .enqueue(enqueue_request(&dir, "hello.txt"), "owner-a")
            .await;
        assert!(matches!(result, Err(TranslatorError::UnsupportedFile(_))));
    }

    #[tokio::test]
    async fn delete_requires_ownership() {
        let dir = tempfile::tempdir().unwrap();
        let (service, store) = service_in(&dir);
        let id = service
            .enqueue(enqueue_request(&dir, "hello.csv"), "owner-a")
            .await
            .unwrap();

        let result = service.delete(&id, "owner-b").await;
        assert!(matches!(result, Err(TranslatorError::NotOwner(_))));
        assert!(store.find(&id).is_some());

        service.delete(&id, "owner-a").await.unwrap();
        assert!(store.find(&id).is_none());
    }

    #[tokio::test]
    async fn delete_removes_associated_files() {
        let dir = tempfile::tempdir().unwrap();
        let (service, store) = service_in(&dir);
        let id = service
            .enqueue(enqueue_request(&dir, "hello.csv"), "owner-a")
            .await
            .unwrap();

        let task = store.find(&id).unwrap();
        let output = processed_path(&task.filepath, "csv");
        std::fs::write(&output, "source,target\nHello,你好\n").unwrap();

        service.delete(&id, "owner-a").await.unwrap();
        assert!(!task.filepath.exists());
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn download_falls_back_to_the_original_upload() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _store) = service_in(&dir);
        let id = service
            .enqueue(enqueue_request(&dir, "hello.csv"), "owner-a")
            .await
            .unwrap();

        let download = service.download(&id).unwrap();
        assert_eq!(download.filename, "hello.csv");
    }

    #[tokio::test]
    async fn download_names_reflect_task_status() {
        let dir = tempfile::tempdir().unwrap();
        let (service, store) = service_in(&dir);
        let id = service
            .enqueue(enqueue_request(&dir, "hello.csv"), "owner-a")
            .await
            .unwrap();

        let task = store.find(&id).unwrap();
        std::fs::write(
            processed_path(&task.filepath, "csv"),
            "source,target\nHello,你好\n",
        )
        .unwrap();

        store
            .update(&id, |t| t.status = TaskStatus::Running)
            .unwrap();
        assert_eq!(
            service.download(&id).unwrap().filename,
            "hello_inprogress_zh-Hant.csv"
        );

        store
            .update(&id, |t| t.status = TaskStatus::Completed)
            .unwrap();
        assert_eq!(
            service.download(&id).unwrap().filename,
            "hello_translated_zh-Hant.csv"
        );
    }

    #[tokio::test]
    async fn list_annotates_ownership() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _store) = service_in(&dir);
        service
            .enqueue(enqueue_request(&dir, "hello.csv"), "owner-a")
            .await
            .unwrap();

        assert!(service.list("owner-a")[0].is_owner);
        assert!(!service.list("owner-b")[0].is_owner);
    }
}
