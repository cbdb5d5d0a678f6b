//! crossref
//!
//! Register documents into a local cross-reference store and query it.
//!
//! # Usage
//!
//! ```bash
//! crossref import notes.json
//! crossref search "rollout plan" --type task
//! crossref backlinks DOC:GUID
//! crossref show DOC:GUID --harden
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/crossref/config.toml)
//! 3. Environment variables (CROSSREF_*)
//! 4. CLI flags

use std::io::Write;

use anyhow::Result;
use clap::Parser;

use crossref_cli::{init_logging, load_settings, run, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(
        cli.config.as_deref(),
        cli.db_path.as_deref(),
        cli.log_level.as_deref(),
    )?;
    init_logging(&settings)?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    run(cli.command, &settings, &mut out).await?;
    out.flush()?;
    Ok(())
}
