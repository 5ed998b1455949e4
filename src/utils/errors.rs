use thiserror::Error;

#[derive(Error, Debug)]
pub enum TranslatorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("API error: {0}")]
    Api(String),

    #[error("Missing required column: {0}")]
    MissingColumn(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Caller does not own task: {0}")]
    NotOwner(String),

    #[error("Unsupported file type: {0}")]
    UnsupportedFile(String),

    #[error("No downloadable file for task: {0}")]
    NoDownload(String),

    #[error("Task was cancelled")]
    Cancelled,
}

impl TranslatorError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TranslatorError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, TranslatorError>;
