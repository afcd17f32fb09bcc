//! Archive command handler: gate a URL list, then fetch and index what passes.

use std::sync::Arc;

use anyhow::{Context, Result};
use archiver_core::Database;
use archiver_core::allowlist::{AllowListStore, DecisionEngine};
use archiver_core::archive::{ArchiveOptions, Archiver};
use archiver_core::history::HistoryStore;
use archiver_core::index::{ElasticsearchIndex, MemoryIndex, SearchIndex};
use archiver_core::ingest::{IngestOptions, IngestReport, ingest};
use archiver_core::plugin::PluginRegistry;
use serde_json::json;
use tracing::{info, warn};

use crate::cli::ArchiveArgs;
use crate::config::Settings;

/// Name of the built-in source reading URL list files.
const URL_LIST_SOURCE: &str = "UrlList";

pub async fn run_archive_command(args: &ArchiveArgs, settings: &Settings) -> Result<()> {
    let registry = Arc::new(PluginRegistry::load(Vec::new())?);
    let pipeline = settings.pipeline();
    registry.validate(&pipeline)?;

    if let Some(parent) = settings.database_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create '{}'", parent.display()))?;
    }
    let db = Database::new_with_options(&settings.database_path, settings.database_options())
        .await
        .with_context(|| {
            format!("Failed to open database '{}'", settings.database_path.display())
        })?;
    let history = HistoryStore::new(db.clone());

    let report = gate(args, settings, &registry, &db, &history).await?;
    println!(
        "{} of {} URLs queued ({} blocked, {} filtered, {} scraped recently, {} invalid)",
        report.backlog.len(),
        report.total,
        report.blocked,
        report.filtered,
        report.too_soon,
        report.invalid
    );

    let index: Arc<dyn SearchIndex> = if args.dry_index {
        info!("indexing into memory only");
        Arc::new(MemoryIndex::new())
    } else {
        let es = ElasticsearchIndex::new(
            &settings.elastic_host,
            settings.elastic_user.as_deref(),
            settings.elastic_password.as_deref(),
            &settings.client_options(),
        )?;
        es.ensure_pages_index()
            .await
            .context("Failed to prepare the page index")?;
        Arc::new(es)
    };

    let options = ArchiveOptions {
        max_workers: args.workers.map_or(settings.import_workers, usize::from),
        ..ArchiveOptions::default()
    };
    let archiver = Archiver::new(
        registry,
        pipeline,
        settings.plugin_context(),
        index,
        history,
        options,
    )?;

    let cancel = archiver.cancel_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping workers");
            cancel.cancel();
        }
    });
    let stats = archiver.run(report.backlog).await;
    interrupt.abort();
    let stats = stats?;
    db.close().await;

    println!(
        "Archived {} pages ({} already archived, {} failed)",
        stats.archived(),
        stats.duplicates(),
        stats.failed()
    );
    if stats.canceled() {
        println!("Run was interrupted before the backlog was finished.");
    }
    if stats.worker_errors() > 0 {
        warn!(workers = stats.worker_errors(), "some workers stopped early");
    }
    Ok(())
}

/// Streams the URL list through the allow/deny policy and the recency check.
async fn gate(
    args: &ArchiveArgs,
    settings: &Settings,
    registry: &PluginRegistry,
    db: &Database,
    history: &HistoryStore,
) -> Result<IngestReport> {
    let mut source = registry.create_source(URL_LIST_SOURCE, &json!({ "path": args.file }))?;
    source.enter().await?;

    let mut engine =
        DecisionEngine::new(AllowListStore::new(db.clone()), registry.build_matchers()?);
    engine.enter().await?;

    let options = IngestOptions {
        rescrape_after: chrono::Duration::hours(i64::from(settings.rescrape_after_hours)),
        strict: args.strict,
    };
    let report = ingest(source.items(), &mut engine, history, &options).await;

    if let Err(err) = engine.exit().await {
        warn!(error = %err, "allow/deny engine exit failed");
    }
    if let Err(err) = source.exit().await {
        warn!(error = %err, "history source exit failed");
    }
    Ok(report?)
}
