use crate::utils::{extracted_table_path, processed_path, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Tabular,
    Document,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Cancelled,
    Error,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Cancelled | TaskStatus::Error
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
            TaskStatus::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Progress {
    pub processed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub filename: String,
    pub filepath: PathBuf,
    pub file_kind: FileKind,
    pub status: TaskStatus,
    pub progress: Progress,
    pub source_lang: String,
    pub target_lang: String,
    pub overwrite: bool,
    pub glossary_path: Option<PathBuf>,
    pub note: String,
    pub translation_host: String,
    pub model: String,
    pub batch_size: usize,
    pub owner_token: String,
}

impl Task {
    /// Output files a run may have produced for this task. The original
    /// upload and the glossary are not included.
    pub fn output_paths(&self) -> Vec<PathBuf> {
        match self.file_kind {
            FileKind::Tabular => vec![processed_path(&self.filepath, "csv")],
            FileKind::Document => {
                let table = extracted_table_path(&self.filepath);
                vec![
                    processed_path(&self.filepath, "idml"),
                    processed_path(&table, "csv"),
                    table,
                ]
            }
        }
    }
}

/// Durable task list on a single JSON file, insertion order preserved.
/// Every write is a whole-file rewrite through a temp-file rename, so readers
/// never observe a torn file. The scheduler is the only writer of
/// status/progress fields; collaborators only append or remove whole records.
#[derive(Debug, Clone)]
pub struct TaskStore {
    path: PathBuf,
}

impl TaskStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates an empty task list when none exists yet.
    pub fn initialize(&self) -> Result<()> {
        if !self.path.exists() {
            self.write(&[])?;
        }
        Ok(())
    }

    /// A missing or corrupted file reads as an empty list rather than an
    /// error, matching crash-recovery expectations.
    pub fn read(&self) -> Vec<Task> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(_) => return Vec::new(),
        };
        match serde_json::from_str(&content) {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Task file is corrupted, treating as empty");
                Vec::new()
            }
        }
    }

    pub fn write(&self, tasks: &[Task]) -> Result<()> {
        let data = serde_json::to_vec_pretty(&tasks)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn append(&self, task: Task) -> Result<()> {
        let mut tasks = self.read();
        tasks.push(task);
        self.write(&tasks)
    }

    pub fn find(&self, id: &str) -> Option<Task> {
        self.read().into_iter().find(|t| t.id == id)
    }

    /// Read-modify-write of one record. Returns false when the record no
    /// longer exists (deleted by a collaborator in the meantime).
    pub fn update<F>(&self, id: &str, mutate: F) -> Result<bool>
    where
        F: FnOnce(&mut Task),
    {
        let mut tasks = self.read();
        let Some(task) = tasks.iter_mut().find(|t| t.id == id) else {
            return Ok(false);
        };
        mutate(task);
        self.write(&tasks)?;
        Ok(true)
    }

    /// Removes a record, returning it so the caller can clean up its files.
    pub fn remove(&self, id: &str) -> Result<Option<Task>> {
        let mut tasks = self.read();
        let Some(pos) = tasks.iter().position(|t| t.id == id) else {
            return Ok(None);
        };
        let removed = tasks.remove(pos);
        self.write(&tasks)?;
        Ok(Some(removed))
    }
}

#[cfg(test)]
pub fn sample_task(id: &str, filepath: &Path) -> Task {
    Task {
        id: id.to_string(),
        filename: filepath
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file.csv")
            .to_string(),
        filepath: filepath.to_path_buf(),
        file_kind: FileKind::Tabular,
        status: TaskStatus::Pending,
        progress: Progress::default(),
        source_lang: "en".to_string(),
        target_lang: "zh-Hant".to_string(),
        overwrite: false,
        glossary_path: None,
        note: String::new(),
        translation_host: "http://localhost:11434".to_string(),
        model: "test-model".to_string(),
        batch_size: 10,
        owner_token: "owner-a".to_string(),
    }
}
