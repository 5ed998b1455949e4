use doc_translator::glossary::Glossary;
use doc_translator::pipeline::PipelineOptions;
use doc_translator::utils::processed_path;
use doc_translator::{
    ollama_gateway_factory, AppConfig, Notifier, OllamaGateway, Scheduler, TaskStore,
    TextTranslator,
};
use std::env;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("doc_translator=info".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = AppConfig::load_or_default(Some("config.toml"));
    config.validate()?;

    let args: Vec<String> = env::args().collect();
    if args.len() > 1 && args[1] == "translate" {
        return translate_once(&config, &args[2..]).await;
    }

    run_worker(config).await
}

/// Queue daemon: polls the task file and processes one task at a time until
/// interrupted. Ctrl-C requests shutdown; the scheduler cancels the in-flight
/// job and waits for it to settle before exiting.
async fn run_worker(config: AppConfig) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.worker.upload_dir)?;

    let store = TaskStore::new(config.worker.tasks_file.clone());
    store.initialize()?;

    let notifier = Notifier::new(store.clone());
    let scheduler = Scheduler::new(
        store,
        notifier,
        ollama_gateway_factory(config.translation.timeout_seconds),
        &config,
    );
    let shutdown = CancellationToken::new();

    let worker = tokio::spawn(scheduler.run(shutdown.clone()));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    shutdown.cancel();
    worker.await?;

    tracing::info!("Worker shut down");
    Ok(())
}

/// One-shot mode: translate a single file directly, bypassing the queue.
///
///   doc-translator translate <file> <source_lang> [target_lang]
///       [--overwrite] [--glossary <path>]
async fn translate_once(config: &AppConfig, args: &[String]) -> anyhow::Result<()> {
    let mut input = None;
    let mut source_lang = None;
    let mut target_lang = String::new();
    let mut overwrite = false;
    let mut glossary_path = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--overwrite" => overwrite = true,
            "--glossary" => {
                glossary_path = Some(
                    iter.next()
                        .ok_or_else(|| anyhow::anyhow!("--glossary requires a path"))?
                        .clone(),
                )
            }
            value if input.is_none() => input = Some(value.to_string()),
            value if source_lang.is_none() => source_lang = Some(value.to_string()),
            value => target_lang = value.to_string(),
        }
    }

    let input = input.ok_or_else(|| {
        anyhow::anyhow!(
            "usage: doc-translator translate <file> <source_lang> [target_lang] [--overwrite] [--glossary <path>]"
        )
    })?;
    let source_lang =
        source_lang.ok_or_else(|| anyhow::anyhow!("a source language is required"))?;

    let input = Path::new(&input);
    let glossary = match &glossary_path {
        Some(path) => Some(Glossary::load(Path::new(path))?),
        None => None,
    };

    let options = PipelineOptions {
        source_lang,
        target_lang,
        overwrite,
        batch_size: config.translation.batch_size,
    };
    let gateway: Arc<dyn TextTranslator> = Arc::new(OllamaGateway::new(
        config.translation.host.clone(),
        config.translation.model.clone(),
        config.translation.timeout_seconds,
    ));
    let cancel = CancellationToken::new();

    match input.extension().and_then(|e| e.to_str()) {
        Some("idml") => {
            doc_translator::idml::translate_document(
                input,
                &options,
                gateway,
                glossary.as_ref(),
                &cancel,
                None,
            )
            .await?;
            println!("{}", processed_path(input, "idml").display());
        }
        _ => {
            let output = processed_path(input, "csv");
            doc_translator::pipeline::translate_table(
                input,
                &output,
                &options,
                gateway,
                glossary.as_ref(),
                &cancel,
                None,
            )
            .await?;
            println!("{}", output.display());
        }
    }

    Ok(())
}
