//! Command implementations for the `crossref` tool.
//!
//! Every command opens the store, runs against a fresh engine instance
//! and shuts it down again, so the next invocation sees persisted state.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crossref_engine::{CrossrefEngine, EngineConfig, SearchFilters};
use crossref_graph::{Backlink, EdgeKind, TraverseOptions};
use crossref_identity::RegistrationStatus;
use crossref_indexing::IndexOutcome;
use crossref_scheduler::SystemClock;
use crossref_storage::Storage;
use crossref_types::{DocumentId, SemanticType, Settings, Uid};

use crate::cli::{Commands, DirectionArg, ForkArg};
use crate::import::{load_document, ImportOptions};

/// Load configuration and apply CLI overrides (highest precedence).
pub fn load_settings(
    config_path: Option<&str>,
    db_path: Option<&str>,
    log_level: Option<&str>,
) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    if let Some(db_path) = db_path {
        settings.db_path = db_path.to_string();
    }
    if let Some(log_level) = log_level {
        settings.log_level = log_level.to_string();
    }
    Ok(settings)
}

/// Log to stderr. `RUST_LOG` wins over the configured level.
pub fn init_logging(settings: &Settings) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

/// Open the store named by `settings` and start an engine on it.
pub async fn open_engine(settings: &Settings) -> Result<CrossrefEngine> {
    let db_path = settings.expanded_db_path();
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    info!(db_path = %db_path.display(), "Opening store");
    let storage = Arc::new(Storage::open(&db_path).context("Failed to open storage")?);
    CrossrefEngine::open(
        storage,
        EngineConfig::from(settings),
        Arc::new(SystemClock),
        None,
    )
    .await
    .context("Failed to open engine")
}

/// Run one command, writing its report to `out`.
pub async fn run(command: Commands, settings: &Settings, out: &mut dyn Write) -> Result<()> {
    let engine = open_engine(settings).await?;
    let result = dispatch(&engine, command, out).await;
    engine.shutdown().await;
    result
}

async fn dispatch(engine: &CrossrefEngine, command: Commands, out: &mut dyn Write) -> Result<()> {
    match command {
        Commands::Import {
            file,
            source,
            name,
            id,
            fork,
        } => {
            let options = ImportOptions {
                source,
                name,
                document_id: id,
            };
            import(engine, Path::new(&file), &options, fork, out).await
        }
        Commands::Search {
            text,
            limit,
            semantic_type,
            documents,
        } => {
            let mut filters = SearchFilters {
                limit,
                semantic_type: semantic_type.as_deref().map(SemanticType::parse),
                documents: Vec::new(),
            };
            for document in &documents {
                filters = filters.with_document(parse_document_id(document)?);
            }
            search(engine, &text, &filters, out).await
        }
        Commands::Backlinks { uid } => backlinks(engine, &parse_uid(&uid)?, out).await,
        Commands::Traverse {
            uid,
            depth,
            kinds,
            direction,
        } => traverse(engine, &parse_uid(&uid)?, depth, &kinds, direction, out).await,
        Commands::Show { uid, harden } => show(engine, &parse_uid(&uid)?, harden, out).await,
        Commands::Documents => documents(engine, out),
        Commands::Unregister { document_id } => {
            let document_id = parse_document_id(&document_id)?;
            if engine.unregister_document(&document_id).await? {
                writeln!(out, "Unregistered {document_id}")?;
            } else {
                writeln!(out, "{document_id} was not registered; corpus entries purged")?;
            }
            Ok(())
        }
        Commands::Rebuild => {
            match engine.rebuild().await.context("Rebuild failed")? {
                IndexOutcome::Rebuilt { documents, entries } => {
                    writeln!(out, "Rebuilt {documents} documents, {entries} nodes")?
                }
                other => writeln!(out, "Rebuild did not complete: {other:?}")?,
            }
            Ok(())
        }
        Commands::Stats => stats(engine, out).await,
    }
}

fn parse_uid(text: &str) -> Result<Uid> {
    Uid::parse(text).with_context(|| format!("Invalid uid: {text}"))
}

fn parse_document_id(text: &str) -> Result<DocumentId> {
    DocumentId::parse(text).with_context(|| format!("Invalid document id: {text}"))
}

/// Register a file. A CLI run is one-shot, so content updates are indexed
/// immediately instead of waiting for the debounce.
pub async fn import(
    engine: &CrossrefEngine,
    path: &Path,
    options: &ImportOptions,
    fork: Option<ForkArg>,
    out: &mut dyn Write,
) -> Result<()> {
    let raw = load_document(path, options)?;
    let mut outcome = engine
        .register_document(&raw)
        .await
        .context("Registration failed")?;

    if let Some(ticket) = outcome.fork_ticket().cloned() {
        let Some(choice) = fork else {
            writeln!(
                out,
                "Fork pending for {}: {} was registered from {} with different content.",
                ticket.document_id,
                ticket.document_id,
                ticket
                    .known_source
                    .as_ref()
                    .map(|s| s.as_str())
                    .unwrap_or("an unknown source"),
            )?;
            writeln!(out, "Re-run with --fork same or --fork copy.")?;
            return Ok(());
        };
        outcome = engine
            .resolve_fork(&ticket, choice.into())
            .await
            .context("Fork resolution failed")?;
    }

    if outcome.status == RegistrationStatus::Updated && outcome.reindex.is_none() {
        outcome.reindex = engine.flush_now(&outcome.document_id).await?;
    }

    let status = match &outcome.status {
        RegistrationStatus::New => "new".to_string(),
        RegistrationStatus::Unchanged => "unchanged".to_string(),
        RegistrationStatus::Updated => "updated".to_string(),
        RegistrationStatus::Relocated { .. } => "relocated".to_string(),
        RegistrationStatus::ForkPending(_) => "fork pending".to_string(),
        RegistrationStatus::Deferred { holder } => format!("deferred to {holder}"),
    };
    writeln!(out, "{} {status}", outcome.document_id)?;
    if let Some(delta) = outcome.reindex.as_ref().and_then(|r| r.delta()) {
        writeln!(
            out,
            "  added {}, updated {}, removed {}, unresolved links {}",
            delta.added.len(),
            delta.updated.len(),
            delta.removed.len(),
            delta.unresolved.len()
        )?;
    }
    Ok(())
}

async fn search(
    engine: &CrossrefEngine,
    text: &str,
    filters: &SearchFilters,
    out: &mut dyn Write,
) -> Result<()> {
    let hits = engine.search(text, filters).await?;
    if hits.is_empty() {
        writeln!(out, "No results")?;
    }
    for hit in hits {
        writeln!(
            out,
            "{:>7.3}  {}  [{}]  {}",
            hit.score,
            hit.uid,
            hit.semantic_type.tag(),
            hit.title
        )?;
    }
    Ok(())
}

async fn backlinks(engine: &CrossrefEngine, uid: &Uid, out: &mut dyn Write) -> Result<()> {
    let backlinks = engine.get_backlinks(uid).await;
    if backlinks.is_empty() {
        writeln!(out, "No backlinks")?;
    }
    for backlink in backlinks {
        match backlink {
            Backlink::Membership {
                group_id,
                label,
                siblings,
            } => writeln!(
                out,
                "member of {group_id} \"{label}\" with {} others",
                siblings.len()
            )?,
            Backlink::Mention {
                source,
                kind,
                excerpt,
            } => writeln!(out, "{kind:?} mention from {source}: {excerpt}")?,
        }
    }
    Ok(())
}

async fn traverse(
    engine: &CrossrefEngine,
    uid: &Uid,
    depth: usize,
    kinds: &[String],
    direction: DirectionArg,
    out: &mut dyn Write,
) -> Result<()> {
    let mut options = TraverseOptions::default()
        .with_max_depth(depth)
        .with_direction(direction.into());
    if !kinds.is_empty() {
        let parsed = kinds
            .iter()
            .map(|k| EdgeKind::parse(k).with_context(|| format!("Unknown edge kind: {k}")))
            .collect::<Result<Vec<_>>>()?;
        options = options.with_kinds(parsed);
    }

    for step in engine.traverse(uid, &options).await {
        writeln!(
            out,
            "{}{} via {} from {}",
            "  ".repeat(step.depth),
            step.uid,
            step.via,
            step.from
        )?;
    }
    Ok(())
}

async fn show(engine: &CrossrefEngine, uid: &Uid, harden: bool, out: &mut dyn Write) -> Result<()> {
    let Some(view) = engine.open_node(uid).await? else {
        anyhow::bail!("Node not found: {uid}");
    };

    writeln!(out, "{} [{}]", view.title, view.semantic_type.tag())?;
    if !view.tags.is_empty() {
        let tags: Vec<&str> = view.tags.iter().map(String::as_str).collect();
        writeln!(out, "tags: {}", tags.join(", "))?;
    }
    if let Some(parent) = &view.parent {
        writeln!(out, "parent: {parent}")?;
    }
    writeln!(out)?;
    writeln!(out, "{}", view.rendered)?;
    writeln!(out)?;
    writeln!(
        out,
        "{} backlinks, {} unresolved links",
        view.backlinks.len(),
        view.unresolved.len()
    )?;

    match (view.hardening, harden) {
        (Some(patch), true) => {
            if engine.apply_hardening(&patch).await? {
                engine.flush_now(uid.document_id()).await?;
                writeln!(out, "Soft links hardened")?;
            } else {
                writeln!(out, "Document is busy; try again")?;
            }
        }
        (Some(_), false) => writeln!(out, "Soft links can be hardened with --harden")?,
        (None, _) => {}
    }
    Ok(())
}

fn documents(engine: &CrossrefEngine, out: &mut dyn Write) -> Result<()> {
    let records = engine.documents()?;
    if records.is_empty() {
        writeln!(out, "No documents")?;
    }
    for record in records {
        writeln!(
            out,
            "{}  {:>5} nodes  {}  ({})",
            record.document_id,
            record.node_count,
            record.display_name,
            record
                .source
                .as_ref()
                .map(|s| s.as_str())
                .unwrap_or("no source")
        )?;
    }
    Ok(())
}

async fn stats(engine: &CrossrefEngine, out: &mut dyn Write) -> Result<()> {
    let stats = engine.stats().await?;
    writeln!(out, "Documents:        {}", stats.storage.document_count)?;
    writeln!(out, "Snapshots:        {}", stats.storage.snapshot_count)?;
    writeln!(out, "Checkpoints:      {}", stats.storage.checkpoint_count)?;
    writeln!(out, "Leases:           {}", stats.storage.lease_count)?;
    writeln!(out, "Indexed nodes:    {}", stats.corpus.entries)?;
    writeln!(out, "Groupings:        {}", stats.corpus.memberships)?;
    writeln!(out, "Mentions:         {}", stats.corpus.mentions)?;
    writeln!(out, "Unresolved links: {}", stats.corpus.unresolved_links)?;
    writeln!(out, "Index blob:       {} bytes", stats.storage.index_blob_bytes)?;
    writeln!(out, "Graph blob:       {} bytes", stats.storage.graph_blob_bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_win() {
        let settings = load_settings(None, Some("/tmp/crossref-test-db"), Some("debug")).unwrap();
        assert_eq!(settings.db_path, "/tmp/crossref-test-db");
        assert_eq!(settings.log_level, "debug");
    }

    #[test]
    fn test_invalid_uid_is_reported() {
        let err = parse_uid("no-separator").unwrap_err();
        assert!(err.to_string().contains("Invalid uid"));
    }
}
