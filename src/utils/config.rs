use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub worker: WorkerConfig,
    pub translation: TranslationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub poll_interval_ms: u64,
    pub upload_dir: PathBuf,
    pub tasks_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationConfig {
    pub host: String,
    pub model: String,
    pub batch_size: usize,
    pub timeout_seconds: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            worker: WorkerConfig {
                poll_interval_ms: 5000,
                upload_dir: PathBuf::from("uploads"),
                tasks_file: PathBuf::from("tasks.json"),
            },
            translation: TranslationConfig {
                host: String::new(),
                model: String::new(),
                batch_size: 10,
                timeout_seconds: 120,
            },
        }
    }
}

impl AppConfig {
    pub fn load_from_file(path: &str) -> crate::utils::errors::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::utils::errors::TranslatorError::Config(e.to_string()))?;
        toml::from_str(&content)
            .map_err(|e| crate::utils::errors::TranslatorError::Config(e.to_string()))
    }

    pub fn load_or_default(path: Option<&str>) -> Self {
        let mut config = if let Some(p) = path {
            Self::load_from_file(p).unwrap_or_default()
        } else {
            Self::default()
        };
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("TRANSLATOR_HOST") {
            self.translation.host = host;
        }
        if let Ok(model) = std::env::var("TRANSLATOR_MODEL") {
            self.translation.model = model;
        }
    }

    /// The translation endpoint and model have no usable defaults; without
    /// them no task can be processed, so startup must refuse to continue.
    pub fn validate(&self) -> crate::utils::errors::Result<()> {
        if self.translation.host.is_empty() {
            return Err(crate::utils::errors::TranslatorError::Config(
                "translation host is not configured (set TRANSLATOR_HOST or [translation] host)"
                    .to_string(),
            ));
        }
        if self.translation.model.is_empty() {
            return Err(crate::utils::errors::TranslatorError::Config(
                "translation model is not configured (set TRANSLATOR_MODEL or [translation] model)"
                    .to_string(),
            ));
        }
        Ok(())
    }
}
