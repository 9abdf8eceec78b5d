//! CLI command implementations.
//!
//! Contains the business logic for each command. Every command returns a
//! string for `main` to print; errors propagate as [`CommandError`] and
//! map to a non-zero exit code.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

use crate::agent::agentic_loop::agentic_loop;
use crate::agent::executor::ToolExecutor;
use crate::agent::message::{ChatRequest, system_message, user_message};
use crate::agent::providers::OpenAiCompatFactory;
use crate::agent::provider::ProviderFactory;
use crate::agent::tool::ToolSet;
use crate::chunking::Strategy;
use crate::cli::parser::{Cli, Commands};
use crate::config::{AgentCatalog, CatalogLoader, base_url_from_env, credentials_from_env};
use crate::error::{CommandError, IngestError, Result};
use crate::ingest::{IngestParams, IngestReport, Ingester};
use crate::repair::{RepairParams, RepairStats, Repairer, ValidationReport};
use crate::storage::{SqliteStore, Store};
use crate::summarize::service::{DEFAULT_MAX_RETRIES, ServiceOptions};
use crate::summarize::{ModelRotator, SummarizationService};
use crate::tokens::Cl100kMeter;

/// Executes the parsed CLI command.
///
/// # Errors
///
/// Returns an error if the command fails to execute.
pub fn execute(cli: &Cli) -> Result<String> {
    let db_path = cli.get_db_path();

    match &cli.command {
        Commands::Ingest {
            file,
            strategy,
            max_chunk_tokens,
            group_size,
            max_depth,
            workers,
        } => cmd_ingest(
            cli,
            &db_path,
            file,
            strategy,
            IngestOptions {
                max_chunk_tokens: *max_chunk_tokens,
                group_size: *group_size,
                max_depth: *max_depth,
                workers: *workers,
            },
        ),
        Commands::Query { text, max_steps } => cmd_query(cli, &db_path, text, *max_steps),
        Commands::Repair {
            dry_run,
            group_size,
            max_depth,
            workers,
        } => cmd_repair(cli, &db_path, *dry_run, *group_size, *max_depth, *workers),
        Commands::Status => cmd_status(&db_path),
    }
}

/// Numeric knobs of the ingest command.
struct IngestOptions {
    max_chunk_tokens: usize,
    group_size: usize,
    max_depth: usize,
    workers: usize,
}

fn open_store(db_path: &Path) -> Result<SqliteStore> {
    let store = SqliteStore::open(db_path)?;
    store.init()?;
    Ok(store)
}

fn load_catalog(cli: &Cli) -> Result<Arc<AgentCatalog>> {
    let loader = CatalogLoader::new(cli.agents_config.clone());
    Ok(loader.load()?)
}

/// Assembles the shared worker/rotator/pool triad from the catalog and the
/// process environment.
fn build_service(catalog: &AgentCatalog, workers: usize) -> Result<SummarizationService> {
    let credentials = credentials_from_env();
    let factory = Arc::new(OpenAiCompatFactory::new(base_url_from_env()));
    let (models, calls_per_model) = catalog.model_pool("summarization-agent")?;
    let rotator = ModelRotator::new(models, calls_per_model)?;
    let service = SummarizationService::new(
        factory,
        credentials,
        rotator,
        catalog.instructions("summarization-agent")?,
        catalog.instructions("chunk-analyzer")?,
        ServiceOptions {
            workers,
            max_retries: DEFAULT_MAX_RETRIES,
        },
    )?;
    Ok(service)
}

fn new_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new()
        .map_err(|e| CommandError::ExecutionFailed(format!("failed to start async runtime: {e}")))
}

fn cmd_ingest(
    cli: &Cli,
    db_path: &Path,
    file: &Path,
    strategy: &str,
    options: IngestOptions,
) -> Result<String> {
    let strategy: Strategy = strategy.parse().map_err(CommandError::Ingest)?;

    let store = open_store(db_path)?;
    let catalog = load_catalog(cli)?;
    let service = build_service(&catalog, options.workers)?;
    let meter = Cl100kMeter::new()?;
    let rt = new_runtime()?;

    // Resuming against a non-empty store: repair finishes what the
    // interrupted run left behind.
    let stats = store.stats()?;
    if stats.chunks > 0 {
        info!(chunks = stats.chunks, "existing index detected, resuming via repair");
        let repairer = Repairer::new(
            &store,
            &service,
            RepairParams {
                group_size: options.group_size,
                max_depth: options.max_depth,
            },
        );
        let repair_stats = rt.block_on(repairer.repair(false))?;
        let mut output = format!(
            "Existing index detected ({} chunks); resumed via repair.\n",
            stats.chunks
        );
        output.push_str(&format_repair_stats(&repair_stats));
        return Ok(output);
    }

    let cancel = Arc::new(AtomicBool::new(false));
    let ingester = Ingester::new(
        &store,
        &service,
        &meter,
        IngestParams {
            max_chunk_tokens: options.max_chunk_tokens,
            group_size: options.group_size,
            max_depth: options.max_depth,
            strategy,
        },
    )?
    .with_cancel_flag(Arc::clone(&cancel));

    let result = rt.block_on(async {
        let watcher_flag = Arc::clone(&cancel);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                watcher_flag.store(true, Ordering::Relaxed);
            }
        });
        ingester.ingest_file(file).await
    });

    match result {
        Ok(report) => Ok(format_ingest_report(db_path, &report)),
        Err(IngestError::Interrupted) => Ok(
            "Interrupted; partial progress saved. Re-run `ingest` or run `repair` to resume."
                .to_string(),
        ),
        Err(e) => Err(e.into()),
    }
}

fn cmd_query(cli: &Cli, db_path: &Path, text: &str, max_steps: usize) -> Result<String> {
    if text.trim().is_empty() {
        return Err(CommandError::ExecutionFailed(
            "query text cannot be empty".to_string(),
        ));
    }

    let store = open_store(db_path)?;
    if store.stats()?.summaries == 0 {
        return Err(CommandError::ExecutionFailed(format!(
            "the index at {} is empty; run `ingest` first",
            db_path.display()
        )));
    }

    let catalog = load_catalog(cli)?;
    let service = build_service(&catalog, crate::summarize::service::DEFAULT_WORKERS)?;

    // The driving agent: the navigator catalog entry's first model.
    let (models, _) = catalog.model_pool("document-navigator")?;
    let model = models
        .first()
        .cloned()
        .ok_or(crate::error::ConfigError::EmptyModelPool)?;
    let instructions = catalog.instructions("document-navigator")?;

    let credentials = credentials_from_env();
    let credential = credentials.first().cloned().unwrap_or_default();
    let factory = OpenAiCompatFactory::new(base_url_from_env());
    let provider = factory.create(&model, &credential)?;

    let mut request = ChatRequest {
        model: model.model_id.clone(),
        messages: vec![system_message(&instructions), user_message(text)],
        temperature: Some(model.temperature),
        max_tokens: model.max_tokens,
        json_mode: false,
        tools: ToolSet::navigator_tools().definitions().to_vec(),
    };

    let rt = new_runtime()?;
    let executor = ToolExecutor::new(&store, &service);
    let response = rt.block_on(agentic_loop(&*provider, &mut request, &executor, max_steps))?;

    Ok(response.content)
}

fn cmd_repair(
    cli: &Cli,
    db_path: &Path,
    dry_run: bool,
    group_size: usize,
    max_depth: usize,
    workers: usize,
) -> Result<String> {
    let store = open_store(db_path)?;
    let catalog = load_catalog(cli)?;
    let service = build_service(&catalog, workers)?;
    let repairer = Repairer::new(
        &store,
        &service,
        RepairParams {
            group_size,
            max_depth,
        },
    );

    let report = repairer.validate()?;
    let rt = new_runtime()?;
    let stats = rt.block_on(repairer.repair(dry_run))?;

    let mut output = format_validation(&report);
    if dry_run {
        output.push_str("Dry run; nothing was changed.\n");
    }
    output.push_str(&format_repair_stats(&stats));
    Ok(output)
}

fn cmd_status(db_path: &Path) -> Result<String> {
    let store = open_store(db_path)?;
    let stats = store.stats()?;
    let roots = store.roots()?;
    Ok(format!(
        "Database: {}\nChunks: {}\nSummaries: {}\nMax level: {}\nRoots: {}\n",
        db_path.display(),
        stats.chunks,
        stats.summaries,
        stats
            .max_level
            .map_or_else(|| "-".to_string(), |l| l.to_string()),
        roots.len(),
    ))
}

fn format_ingest_report(db_path: &Path, report: &IngestReport) -> String {
    format!(
        "Ingestion complete.\nChunks: {}\nLeaves: {}\nLevels built: {}\nRoots: {}\nDatabase: {}\n",
        report.chunks,
        report.leaves,
        report.levels_built,
        report.roots,
        db_path.display(),
    )
}

fn format_validation(report: &ValidationReport) -> String {
    let mut output = String::new();
    let _ = writeln!(
        output,
        "Validation: {} provider errors, {} thinking blocks, {} code fences, \
         {} uncovered chunks, {} orphans at level {}",
        report.provider_error.len(),
        report.control_tokens.len(),
        report.code_fence.len(),
        report.missing_level_0.len(),
        report.orphan_summary_ids.len(),
        report
            .current_max_level
            .map_or_else(|| "-".to_string(), |l| l.to_string()),
    );
    output
}

fn format_repair_stats(stats: &RepairStats) -> String {
    format!(
        "Cleaned: {}\nRegenerated: {}\nFailed: {}\nLeaves filled: {}\nLevels extended: {}\n",
        stats.cleaned, stats.regenerated, stats.failed, stats.generated_level_0, stats.levels_extended,
    )
}
