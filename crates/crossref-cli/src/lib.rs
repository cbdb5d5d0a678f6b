//! Library side of the `crossref` command-line tool.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations run against a local store
//! - `import`: Reading engine JSON and tree exports from disk

pub mod cli;
pub mod commands;
pub mod import;

pub use cli::{Cli, Commands, DirectionArg, ForkArg};
pub use commands::{init_logging, load_settings, open_engine, run};
pub use import::{load_document, parse_document, ImportOptions};
