use crate::gateway::TextTranslator;
use crate::glossary::Glossary;
use crate::pipeline::{self, PipelineOptions, ProgressCallback};
use crate::table::TranslationTable;
use crate::utils::{extracted_table_path, processed_path, Result, TranslatorError};
use quick_xml::events::{BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

fn is_story_entry(name: &str) -> bool {
    name.starts_with("Stories/Story_") && name.ends_with(".xml")
}

/// Text runs live at `CharacterStyleRange/Content` inside story XML.
fn in_content_run(stack: &[String]) -> bool {
    stack.len() >= 2
        && stack[stack.len() - 1] == "Content"
        && stack[stack.len() - 2] == "CharacterStyleRange"
}

/// Extracts every translatable text run from the document into a
/// `source`/`target` table, preserving discovery order. Duplicate runs are
/// kept as separate rows; re-injection later matches by text value, so they
/// all receive the same translation.
pub fn extract_stories(document_path: &Path) -> Result<TranslationTable> {
    let file = std::fs::File::open(document_path)?;
    let mut archive = ZipArchive::new(file)
        .map_err(|_| TranslatorError::InvalidDocument("not a valid archive".to_string()))?;

    let mut table = TranslationTable::new(vec!["source".to_string(), "target".to_string()]);

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if !is_story_entry(entry.name()) {
            continue;
        }
        let mut xml = Vec::new();
        entry.read_to_end(&mut xml)?;
        collect_runs(&xml, &mut table)?;
    }

    Ok(table)
}

fn collect_runs(xml: &[u8], table: &mut TranslationTable) -> Result<()> {
    let mut reader = Reader::from_reader(xml);
    let mut stack: Vec<String> = Vec::new();
    let mut buf = Vec::new();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| TranslatorError::InvalidDocument(format!("corrupted XML: {}", e)))?;
        match event {
            Event::Eof => break,
            Event::Start(e) => {
                stack.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            }
            Event::End(_) => {
                stack.pop();
            }
            Event::Text(text) if in_content_run(&stack) => {
                let decoded = text
                    .unescape()
                    .map_err(|e| TranslatorError::InvalidDocument(format!("corrupted XML: {}", e)))?;
                let trimmed = decoded.trim();
                if !trimmed.is_empty() {
                    table.push_row(vec![trimmed.to_string(), String::new()]);
                }
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(())
}

/// Rebuilds the document with translations applied. Non-story entries are
/// copied byte-for-byte; story entries are re-serialized with every text run
/// whose trimmed content has a non-empty translation replaced. Entry names
/// and order are never changed.
pub fn rebuild_stories(document_path: &Path, translated: &TranslationTable) -> Result<Vec<u8>> {
    let source_idx = translated
        .column_index("source")
        .ok_or_else(|| TranslatorError::MissingColumn("source".to_string()))?;
    let target_idx = translated
        .column_index("target")
        .ok_or_else(|| TranslatorError::MissingColumn("target".to_string()))?;

    let mut lookup: HashMap<&str, &str> = HashMap::new();
    for row in 0..translated.row_count() {
        lookup.insert(
            translated.cell(row, source_idx),
            translated.cell(row, target_idx),
        );
    }

    let file = std::fs::File::open(document_path)?;
    let mut archive = ZipArchive::new(file)
        .map_err(|_| TranslatorError::InvalidDocument("not a valid archive".to_string()))?;

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let entry_options =
        SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let name = entry.name().to_string();
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes)?;

        let out_bytes = if is_story_entry(&name) {
            rewrite_runs(&bytes, &lookup)?
        } else {
            bytes
        };

        writer.start_file(name, entry_options)?;
        writer.write_all(&out_bytes)?;
    }

    let cursor = writer.finish()?;
    Ok(cursor.into_inner())
}

fn rewrite_runs(xml: &[u8], lookup: &HashMap<&str, &str>) -> Result<Vec<u8>> {
    let mut reader = Reader::from_reader(xml);
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut stack: Vec<String> = Vec::new();
    let mut buf = Vec::new();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| TranslatorError::InvalidDocument(format!("corrupted XML: {}", e)))?;
        match event {
            Event::Eof => break,
            Event::Start(e) => {
                stack.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
                writer.write_event(Event::Start(e.into_owned()))?;
            }
            Event::End(e) => {
                stack.pop();
                writer.write_event(Event::End(e.into_owned()))?;
            }
            Event::Text(text) if in_content_run(&stack) => {
                let decoded = text
                    .unescape()
                    .map_err(|e| TranslatorError::InvalidDocument(format!("corrupted XML: {}", e)))?;
                match lookup.get(decoded.trim()) {
                    // An empty or missing translation leaves the run untouched.
                    Some(translation) if !translation.is_empty() => {
                        writer.write_event(Event::Text(BytesText::new(translation)))?;
                    }
                    _ => {
                        writer.write_event(Event::Text(text.into_owned()))?;
                    }
                }
            }
            event => {
                writer.write_event(event.into_owned())?;
            }
        }
        buf.clear();
    }

    Ok(writer.into_inner().into_inner())
}

/// Document task orchestration: extract into an intermediate table, run the
/// pipeline over it (always in overwrite mode, since the extracted table has
/// an empty target side), then rebuild the document from the translated
/// table. Intermediates are deleted on success and on failure, but kept on
/// cancellation so a partially-translated run can be inspected or resumed.
pub async fn translate_document(
    document_path: &Path,
    options: &PipelineOptions,
    gateway: Arc<dyn TextTranslator>,
    glossary: Option<&Glossary>,
    cancel: &CancellationToken,
    progress: Option<&ProgressCallback>,
) -> Result<()> {
    let extracted = extract_stories(document_path)?;
    info!(
        runs = extracted.row_count(),
        document = %document_path.display(),
        "Extracted text runs from document"
    );

    let table_path = extracted_table_path(document_path);
    extracted.write_csv(&table_path)?;
    let translated_path = processed_path(&table_path, "csv");

    let mut pipeline_options = options.clone();
    pipeline_options.overwrite = true;

    let outcome = pipeline::translate_table(
        &table_path,
        &translated_path,
        &pipeline_options,
        gateway,
        glossary,
        cancel,
        progress,
    )
    .await;

    match outcome {
        Ok(()) => {
            let translated = TranslationTable::read_csv(&translated_path)?;
            let rebuilt = rebuild_stories(document_path, &translated)?;
            let final_path = processed_path(document_path, "idml");
            std::fs::write(&final_path, rebuilt)?;
            info!(output = %final_path.display(), "Rebuilt translated document");
            remove_intermediates(&[&table_path, &translated_path]);
            Ok(())
        }
        Err(e) if e.is_cancelled() => Err(e),
        Err(e) => {
            remove_intermediates(&[&table_path, &translated_path]);
            Err(e)
        }
    }
}

fn remove_intermediates(paths: &[&Path]) {
    for path in paths {
        if path.exists() {
            if let Err(e) = std::fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "Failed to remove intermediate file");
            }
        }
    }
}
