use crate::gateway::{translate_or_empty, TextTranslator};
use crate::glossary::{render_instructions, Glossary};
use crate::table::TranslationTable;
use crate::utils::{Result, TranslatorError};
use futures::future::{join_all, BoxFuture};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// `(processed, total)` reported on every batch boundary. Batches, not
/// units, are the unit of durability: each callback follows a checkpoint
/// write of the whole table.
pub type ProgressCallback = Arc<dyn Fn(usize, usize) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub source_lang: String,
    pub target_lang: String,
    pub overwrite: bool,
    pub batch_size: usize,
}

struct WorkItem {
    row: usize,
    col: usize,
    lang: String,
}

/// Translates a tabular file into `output`, leaving `input` untouched.
///
/// Two column layouts are understood. When a column matches
/// `options.source_lang`, the table is in header-language mode: every other
/// column is a target language named by its header. Otherwise a `source`
/// column is required and a `target` column (created if absent) receives
/// `options.target_lang`.
pub async fn translate_table(
    input: &Path,
    output: &Path,
    options: &PipelineOptions,
    gateway: Arc<dyn TextTranslator>,
    glossary: Option<&Glossary>,
    cancel: &CancellationToken,
    progress: Option<&ProgressCallback>,
) -> Result<()> {
    let mut table = TranslationTable::read_csv(input)?;
    let (source_idx, targets) = column_plan(&mut table, options)?;

    let mut work = Vec::new();
    for (col, lang) in &targets {
        for row in 0..table.row_count() {
            if table.cell(row, source_idx).is_empty() {
                continue;
            }
            if !options.overwrite && !table.cell(row, *col).is_empty() {
                continue;
            }
            work.push(WorkItem {
                row,
                col: *col,
                lang: lang.clone(),
            });
        }
    }

    let total = work.len();
    report(progress, 0, total).await;

    if total == 0 {
        // Copy-through: downstream retrieval expects an output file even
        // when there was nothing to translate.
        table.write_csv(output)?;
        return Ok(());
    }

    let batch_size = options.batch_size.max(1);
    let mut processed = 0;

    for batch in work.chunks(batch_size) {
        if cancel.is_cancelled() {
            return Err(TranslatorError::Cancelled);
        }

        let calls = batch.iter().map(|item| {
            let text = table.cell(item.row, source_idx).to_string();
            let instructions = render_instructions(&text, &item.lang, glossary);
            let source_lang = options.source_lang.clone();
            let target_lang = item.lang.clone();
            let gateway = gateway.clone();
            async move {
                translate_or_empty(
                    gateway.as_ref(),
                    &text,
                    &source_lang,
                    &target_lang,
                    &instructions,
                )
                .await
            }
        });
        let joined = join_all(calls);

        let results = tokio::select! {
            results = joined => results,
            _ = cancel.cancelled() => return Err(TranslatorError::Cancelled),
        };

        for (item, translated) in batch.iter().zip(results) {
            table.set_cell(item.row, item.col, translated);
        }
        processed += batch.len();

        // A failed checkpoint write makes durable state unreliable; abort.
        table.write_csv(output)?;
        report(progress, processed, total).await;
    }

    info!(
        units = total,
        output = %output.display(),
        "Table translation completed"
    );
    Ok(())
}

fn column_plan(
    table: &mut TranslationTable,
    options: &PipelineOptions,
) -> Result<(usize, Vec<(usize, String)>)> {
    if let Some(source_idx) = table.column_index(&options.source_lang) {
        let targets: Vec<(usize, String)> = table
            .headers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != source_idx)
            .map(|(i, h)| (i, h.clone()))
            .collect();
        return Ok((source_idx, targets));
    }

    let source_idx = table
        .column_index("source")
        .ok_or_else(|| TranslatorError::MissingColumn("source".to_string()))?;
    let target_idx = match table.column_index("target") {
        Some(idx) => idx,
        None => table.add_column("target"),
    };
    Ok((source_idx, vec![(target_idx, options.target_lang.clone())]))
}

async fn report(progress: Option<&ProgressCallback>, processed: usize, total: usize) {
    if let Some(callback) = progress {
        callback(processed, total).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::mock::MockTranslator;
    use futures::FutureExt;
    use std::sync::Mutex;

    fn options(source: &str, target: &str, overwrite: bool) -> PipelineOptions {
        PipelineOptions {
            source_lang: source.to_string(),
            target_lang: target.to_string(),
            overwrite,
            batch_size: 2,
        }
    }

    fn write_csv(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[tokio::test]
    async fn missing_source_column_fails_before_any_calls() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_csv(&dir, "in.csv", "text,target\nHello,\n");
        let output = dir.path().join("out.csv");
        let gateway = Arc::new(MockTranslator::new());

        let result = translate_table(
            &input,
            &output,
            &options("en", "fr", false),
            gateway.clone(),
            None,
            &CancellationToken::new(),
            None,
        )
        .await;

        assert!(matches!(result, Err(TranslatorError::MissingColumn(_))));
        assert_eq!(gateway.call_count(), 0);
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn header_language_mode_fans_out_to_all_target_columns() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_csv(
            &dir,
            "in.csv",
            "en,zh-Hant,fr\nHello,,\nWorld,既有,\n",
        );
        let output = dir.path().join("out.csv");
        let gateway = Arc::new(MockTranslator::new());

        let reports: Arc<Mutex<Vec<(usize, usize)>>> = Arc::new(Mutex::new(Vec::new()));
        let reports_sink = reports.clone();
        let progress: ProgressCallback = Arc::new(move |processed, total| {
            let reports_sink = reports_sink.clone();
            async move {
                reports_sink.lock().unwrap().push((processed, total));
            }
            .boxed()
        });

        translate_table(
            &input,
            &output,
            &options("en", "", false),
            gateway.clone(),
            None,
            &CancellationToken::new(),
            Some(&progress),
        )
        .await
        .unwrap();

        // zh-Hant has one empty target cell, fr has two.
        assert_eq!(gateway.call_count(), 3);

        let result = TranslationTable::read_csv(&output).unwrap();
        assert_eq!(result.cell(0, 1), "[zh-Hant] Hello");
        assert_eq!(result.cell(1, 1), "既有");
        assert_eq!(result.cell(0, 2), "[fr] Hello");
        assert_eq!(result.cell(1, 2), "[fr] World");

        let reports = reports.lock().unwrap();
        assert_eq!(reports.first(), Some(&(0, 3)));
        assert_eq!(reports.last(), Some(&(3, 3)));
        // processed never decreases within a run
        assert!(reports.windows(2).all(|w| w[0].0 <= w[1].0));
    }

    #[tokio::test]
    async fn second_run_on_own_output_translates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_csv(&dir, "in.csv", "source,target\nHello,\nWorld,\n");
        let output = dir.path().join("out.csv");
        let opts = options("en", "zh-Hant", false);

        let gateway = Arc::new(MockTranslator::new());
        translate_table(
            &input,
            &output,
            &opts,
            gateway.clone(),
            None,
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap();
        assert_eq!(gateway.call_count(), 2);

        let second_output = dir.path().join("out2.csv");
        let gateway = Arc::new(MockTranslator::new());
        translate_table(
            &output,
            &second_output,
            &opts,
            gateway.clone(),
            None,
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap();
        assert_eq!(gateway.call_count(), 0);
        assert_eq!(
            std::fs::read_to_string(&output).unwrap(),
            std::fs::read_to_string(&second_output).unwrap()
        );
    }

    #[tokio::test]
    async fn overwrite_retranslates_filled_targets() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_csv(&dir, "in.csv", "source,target\nHello,舊翻譯\n");
        let output = dir.path().join("out.csv");
        let gateway = Arc::new(MockTranslator::new());

        translate_table(
            &input,
            &output,
            &options("en", "zh-Hant", true),
            gateway.clone(),
            None,
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(gateway.call_count(), 1);
        let result = TranslationTable::read_csv(&output).unwrap();
        assert_eq!(result.cell(0, 1), "[zh-Hant] Hello");
    }

    #[tokio::test]
    async fn failed_unit_becomes_an_empty_cell_and_the_run_still_completes() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_csv(&dir, "in.csv", "source,target\nHello,\nWorld,\n");
        let output = dir.path().join("out.csv");
        let gateway = Arc::new(MockTranslator::failing_on("Hello"));

        translate_table(
            &input,
            &output,
            &options("en", "zh-Hant", false),
            gateway.clone(),
            None,
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(gateway.call_count(), 2);
        let result = TranslationTable::read_csv(&output).unwrap();
        assert_eq!(result.cell(0, 1), "");
        assert_eq!(result.cell(1, 1), "[zh-Hant] World");
    }

    #[tokio::test]
    async fn empty_work_list_still_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_csv(&dir, "in.csv", "source,target\nHello,你好\n");
        let output = dir.path().join("out.csv");
        let gateway = Arc::new(MockTranslator::new());

        translate_table(
            &input,
            &output,
            &options("en", "zh-Hant", false),
            gateway.clone(),
            None,
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(gateway.call_count(), 0);
        let result = TranslationTable::read_csv(&output).unwrap();
        assert_eq!(result.cell(0, 1), "你好");
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_the_next_batch() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_csv(&dir, "in.csv", "source,target\nHello,\n");
        let output = dir.path().join("out.csv");
        let gateway = Arc::new(MockTranslator::new());

        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = translate_table(
            &input,
            &output,
            &options("en", "fr", false),
            gateway.clone(),
            None,
            &cancel,
            None,
        )
        .await;

        assert!(matches!(result, Err(TranslatorError::Cancelled)));
        assert_eq!(gateway.call_count(), 0);
    }

    #[tokio::test]
    async fn cancellation_interrupts_an_inflight_batch() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_csv(&dir, "in.csv", "source,target\nHello,\n");
        let output = dir.path().join("out.csv");
        let gateway = Arc::new(MockTranslator::hanging());

        let cancel = CancellationToken::new();
        let cancel_after = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            cancel_after.cancel();
        });

        let result = translate_table(
            &input,
            &output,
            &options("en", "fr", false),
            gateway.clone(),
            None,
            &cancel,
            None,
        )
        .await;

        assert!(matches!(result, Err(TranslatorError::Cancelled)));
        assert_eq!(gateway.call_count(), 1);
    }
}
