use crate::utils::Result;
use std::path::Path;

/// In-memory tabular structure backing both CSV tasks and the intermediate
/// tables produced by document extraction. Every cell is text; short rows are
/// padded with empty strings so absent values read as `""`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl TranslationTable {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    pub fn read_csv(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(file);

        let headers: Vec<String> = reader.headers()?.iter().map(|s| s.to_string()).collect();
        let width = headers.len();

        let mut rows = Vec::new();
        for result in reader.records() {
            let record = result?;
            let mut row: Vec<String> = record.iter().map(|s| s.to_string()).collect();
            row.resize(width, String::new());
            row.truncate(width);
            rows.push(row);
        }

        Ok(Self { headers, rows })
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Appends a new empty column and returns its index.
    pub fn add_column(&mut self, name: &str) -> usize {
        self.headers.push(name.to_string());
        for row in &mut self.rows {
            row.push(String::new());
        }
        self.headers.len() - 1
    }

    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map(|s| s.as_str())
            .unwrap_or("")
    }

    pub fn set_cell(&mut self, row: usize, col: usize, value: String) {
        if let Some(r) = self.rows.get_mut(row) {
            if let Some(c) = r.get_mut(col) {
                *c = value;
            }
        }
    }

    pub fn push_row(&mut self, mut row: Vec<String>) {
        row.resize(self.headers.len(), String::new());
        self.rows.push(row);
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}
