//! CLI argument parsing for the `crossref` tool.
//!
//! Flags override every other configuration source.

use clap::{Parser, Subcommand, ValueEnum};

use crossref_graph::Direction;
use crossref_identity::ForkChoice;

/// Cross-reference engine over a local store
#[derive(Parser, Debug)]
#[command(name = "crossref")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/crossref/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Override database path
    #[arg(long, global = true)]
    pub db_path: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Register a document from a JSON file
    Import {
        /// Engine document JSON or a tree export
        file: String,

        /// Source fingerprint (default: canonical path of the file)
        #[arg(long)]
        source: Option<String>,

        /// Display name override
        #[arg(long)]
        name: Option<String>,

        /// Claim an existing document id
        #[arg(long)]
        id: Option<String>,

        /// Answer a fork decision if one is raised
        #[arg(long, value_enum)]
        fork: Option<ForkArg>,
    },

    /// Full-text search across all documents
    Search {
        text: String,

        /// Maximum results (default from config)
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Only nodes of this semantic type
        #[arg(short, long = "type")]
        semantic_type: Option<String>,

        /// Only nodes of this document (repeatable)
        #[arg(short, long = "doc")]
        documents: Vec<String>,
    },

    /// List everything pointing at a node
    Backlinks {
        /// Node uid (DOCUMENT_ID:NODE_GUID)
        uid: String,
    },

    /// Walk the graph outward from a node
    Traverse {
        uid: String,

        #[arg(long, default_value = "2")]
        depth: usize,

        /// Edge kinds to follow (membership, mention)
        #[arg(long, value_delimiter = ',')]
        kinds: Vec<String>,

        #[arg(long, value_enum, default_value = "both")]
        direction: DirectionArg,
    },

    /// Show a node with links rendered
    Show {
        uid: String,

        /// Rewrite resolvable soft links as hard links
        #[arg(long)]
        harden: bool,
    },

    /// List registered documents
    Documents,

    /// Remove a document and every edge touching it
    Unregister { document_id: String },

    /// Rebuild the index and graph from stored snapshots
    Rebuild,

    /// Show store and corpus statistics
    Stats,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkArg {
    /// Same document, evolved
    Same,
    /// Independent copy under a new id
    Copy,
}

impl From<ForkArg> for ForkChoice {
    fn from(arg: ForkArg) -> Self {
        match arg {
            ForkArg::Same => ForkChoice::SameDocument,
            ForkArg::Copy => ForkChoice::IndependentCopy,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionArg {
    Outgoing,
    Incoming,
    Both,
}

impl From<DirectionArg> for Direction {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::Outgoing => Direction::Outgoing,
            DirectionArg::Incoming => Direction::Incoming,
            DirectionArg::Both => Direction::Both,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_import_with_fork() {
        let cli = Cli::parse_from(["crossref", "import", "plan.json", "--fork", "copy"]);
        match cli.command {
            Commands::Import { file, fork, .. } => {
                assert_eq!(file, "plan.json");
                assert_eq!(fork, Some(ForkArg::Copy));
            }
            _ => panic!("Expected Import command"),
        }
    }

    #[test]
    fn test_cli_search_filters() {
        let cli = Cli::parse_from([
            "crossref", "search", "budget", "-n", "5", "--type", "task", "--doc", "D1", "--doc",
            "D2",
        ]);
        match cli.command {
            Commands::Search {
                text,
                limit,
                semantic_type,
                documents,
            } => {
                assert_eq!(text, "budget");
                assert_eq!(limit, Some(5));
                assert_eq!(semantic_type.as_deref(), Some("task"));
                assert_eq!(documents, vec!["D1", "D2"]);
            }
            _ => panic!("Expected Search command"),
        }
    }

    #[test]
    fn test_cli_traverse_kinds() {
        let cli = Cli::parse_from([
            "crossref",
            "traverse",
            "D1:G1",
            "--kinds",
            "membership,mention",
            "--direction",
            "outgoing",
        ]);
        match cli.command {
            Commands::Traverse {
                depth,
                kinds,
                direction,
                ..
            } => {
                assert_eq!(depth, 2);
                assert_eq!(kinds, vec!["membership", "mention"]);
                assert_eq!(direction, DirectionArg::Outgoing);
            }
            _ => panic!("Expected Traverse command"),
        }
    }

    #[test]
    fn test_global_flags_after_command() {
        let cli = Cli::parse_from(["crossref", "stats", "--db-path", "/tmp/x", "-l", "debug"]);
        assert_eq!(cli.db_path.as_deref(), Some("/tmp/x"));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(matches!(cli.command, Commands::Stats));
    }
}
