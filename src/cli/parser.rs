//! Command-line argument parsing.
//!
//! Defines the CLI structure using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Default database file in the working directory.
const DEFAULT_DB_PATH: &str = "rlm-tree.db";

/// rlm-tree: hierarchical summary-tree index for documents larger than any
/// model context.
///
/// `ingest` builds a tree of summaries over a file; `query` lets an agent
/// navigate that tree and answer a question without ever loading the raw
/// document.
#[derive(Parser, Debug)]
#[command(name = "rlm-tree")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the summary-tree database file.
    ///
    /// Defaults to `rlm-tree.db` in the current directory.
    #[arg(short, long, alias = "db", env = "RLM_DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// Path to the agent catalog (YAML).
    ///
    /// Without it, compiled-in defaults cover the built-in agents.
    #[arg(long, env = "RLM_AGENTS_CONFIG")]
    pub agents_config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// The database path, defaulting to [`DEFAULT_DB_PATH`].
    #[must_use]
    pub fn get_db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH))
    }
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest a text file into the summary tree.
    ///
    /// Re-running against a store that already holds chunks resumes via
    /// repair instead of re-ingesting.
    #[command(after_help = r#"Examples:
  rlm-tree ingest book.txt                          # Fixed-window chunking
  rlm-tree ingest book.txt --strategy llm           # Model-chosen boundaries
  rlm-tree ingest book.txt --max-chunk-tokens 2000 --group-size 8 --max-depth 2
  rlm-tree --db-path ./book.db ingest book.txt      # Custom database path
"#)]
    Ingest {
        /// Path to the file to ingest.
        file: PathBuf,

        /// Chunking strategy (fixed, llm).
        #[arg(short, long, default_value = "fixed")]
        strategy: String,

        /// Token cap per chunk.
        #[arg(long, default_value_t = 4000)]
        max_chunk_tokens: usize,

        /// Children per parent node.
        #[arg(long, default_value_t = 5)]
        group_size: usize,

        /// Hierarchy levels to build above the leaves.
        #[arg(long, default_value_t = 1)]
        max_depth: usize,

        /// Worker parallelism (credential slots).
        #[arg(short, long, default_value_t = 20)]
        workers: usize,
    },

    /// Ask a question against the indexed document.
    #[command(after_help = r#"Examples:
  rlm-tree query "Who signed the treaty, and when?"
  rlm-tree query "Summarize chapter three" --max-steps 30
"#)]
    Query {
        /// The question to answer.
        text: String,

        /// Maximum navigation steps before the agent must answer.
        #[arg(long, default_value_t = 20)]
        max_steps: usize,
    },

    /// Validate the store and heal pollution and structural gaps.
    #[command(after_help = r#"Examples:
  rlm-tree repair --dry-run       # Report what would change
  rlm-tree repair                 # Clean, regenerate, fill, extend
"#)]
    Repair {
        /// Report counts without mutating anything.
        #[arg(long)]
        dry_run: bool,

        /// Children per parent node for hierarchy extension.
        #[arg(long, default_value_t = 5)]
        group_size: usize,

        /// Hierarchy levels permitted above the leaves.
        #[arg(long, default_value_t = 1)]
        max_depth: usize,

        /// Worker parallelism (credential slots).
        #[arg(short, long, default_value_t = 20)]
        workers: usize,
    },

    /// Show store statistics.
    Status,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_db_path() {
        let cli = Cli::parse_from(["rlm-tree", "status"]);
        assert_eq!(cli.get_db_path(), PathBuf::from(DEFAULT_DB_PATH));
    }

    #[test]
    fn test_ingest_defaults() {
        let cli = Cli::parse_from(["rlm-tree", "ingest", "book.txt"]);
        match cli.command {
            Commands::Ingest {
                strategy,
                max_chunk_tokens,
                group_size,
                max_depth,
                workers,
                ..
            } => {
                assert_eq!(strategy, "fixed");
                assert_eq!(max_chunk_tokens, 4000);
                assert_eq!(group_size, 5);
                assert_eq!(max_depth, 1);
                assert_eq!(workers, 20);
            }
            _ => unreachable!("expected ingest"),
        }
    }

    #[test]
    fn test_query_parsing() {
        let cli = Cli::parse_from(["rlm-tree", "query", "what happened?", "--max-steps", "7"]);
        match cli.command {
            Commands::Query { text, max_steps } => {
                assert_eq!(text, "what happened?");
                assert_eq!(max_steps, 7);
            }
            _ => unreachable!("expected query"),
        }
    }

    #[test]
    fn test_repair_dry_run_flag() {
        let cli = Cli::parse_from(["rlm-tree", "repair", "--dry-run"]);
        match cli.command {
            Commands::Repair { dry_run, .. } => assert!(dry_run),
            _ => unreachable!("expected repair"),
        }
    }
}
