pub mod config;
pub mod errors;

pub use config::AppConfig;
pub use errors::{Result, TranslatorError};

use std::path::{Path, PathBuf};

/// Sibling path `{stem}_processed.{ext}`, the intermediate/final output
/// location for a task. Kept distinct from the upload so the original file is
/// never mutated.
pub fn processed_path(path: &Path, ext: &str) -> PathBuf {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("output");
    path.with_file_name(format!("{}_processed.{}", stem, ext))
}

/// Sibling path `{stem}.csv`, where a document task materializes its
/// extracted text table before the pipeline runs over it.
pub fn extracted_table_path(path: &Path) -> PathBuf {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("output");
    path.with_file_name(format!("{}.csv", stem))
}
