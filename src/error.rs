//! Error types for the summary-tree pipeline.
//!
//! Each subsystem has its own error enum; [`CommandError`] is the umbrella
//! type at the CLI boundary. Per-item LLM failures deliberately do *not*
//! appear here: workers degrade them into sentinel summary strings that the
//! repairer heals later.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the CLI layer.
pub type Result<T, E = CommandError> = std::result::Result<T, E>;

/// Errors from the persistent store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying SQLite failure.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Schema migration could not be applied.
    #[error("schema migration failed: {message}")]
    Migration {
        /// What went wrong.
        message: String,
    },

    /// A parent pointer was already set to a different node.
    #[error("summary {id} already has a parent; refusing to repoint it")]
    ParentAlreadySet {
        /// The child node whose parent was being set.
        id: i64,
    },
}

/// Errors from the agent/provider layer.
#[derive(Debug, Error)]
pub enum AgentError {
    /// No API credentials were found in the environment.
    #[error("no API key found; set RLM_API_KEYS or OPENAI_API_KEY")]
    ApiKeyMissing,

    /// The configured provider name has no backend.
    #[error("unsupported provider: {name}")]
    UnsupportedProvider {
        /// The unrecognised provider name.
        name: String,
    },

    /// The provider API call failed.
    #[error("API request failed: {message}")]
    ApiRequest {
        /// Provider error description.
        message: String,
    },

    /// The model's reply could not be parsed as expected.
    #[error("response parse error: {message}")]
    ResponseParse {
        /// Diagnostic describing the parse failure.
        message: String,
    },

    /// Every retry attempt failed or returned a sentinel failure.
    #[error("all {attempts} attempts failed; last error: {last}")]
    RetriesExhausted {
        /// How many attempts were made.
        attempts: u32,
        /// Description of the final failure.
        last: String,
    },

    /// A tool call could not be executed.
    #[error("tool '{name}' failed: {message}")]
    ToolExecution {
        /// Tool name as requested by the model.
        name: String,
        /// What went wrong.
        message: String,
    },

    /// The tool-calling loop hit its iteration limit.
    #[error("tool loop exceeded {max_iterations} iterations without a final answer")]
    ToolLoopExceeded {
        /// The configured iteration limit.
        max_iterations: usize,
    },

    /// The credential pool was closed while waiting for a slot.
    #[error("credential pool closed")]
    PoolClosed,
}

/// Errors from loading the agent catalog.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The catalog file could not be read.
    #[error("failed to read agent catalog: {0}")]
    Io(#[from] std::io::Error),

    /// The catalog file is not valid YAML.
    #[error("failed to parse agent catalog: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// No entry exists for the requested agent id.
    #[error("no configuration found for agent '{id}'")]
    UnknownAgent {
        /// The missing agent id.
        id: String,
    },

    /// The agent entry has neither a single model nor a rotation pool.
    #[error("agent '{id}' has no model configuration")]
    MissingModel {
        /// The misconfigured agent id.
        id: String,
    },

    /// A model rotation pool was constructed with no members.
    #[error("model rotation pool is empty")]
    EmptyModelPool,
}

/// Errors from the ingestion pipeline.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The input file does not exist.
    #[error("file not found: {path}")]
    FileNotFound {
        /// The missing path.
        path: PathBuf,
    },

    /// The input path exists but is not a regular file.
    #[error("path is not a file: {path}")]
    NotAFile {
        /// The offending path.
        path: PathBuf,
    },

    /// The input file is not valid UTF-8.
    #[error("file is not valid UTF-8: {path}")]
    InvalidUtf8 {
        /// The offending path.
        path: PathBuf,
    },

    /// Reading the input file failed.
    #[error("failed to read input: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid ingestion parameters.
    #[error("invalid parameter: {message}")]
    InvalidParameter {
        /// Which parameter and why.
        message: String,
    },

    /// Unknown chunking strategy name.
    #[error("unknown chunking strategy: {name} (valid: fixed, llm)")]
    UnknownStrategy {
        /// The unrecognised strategy name.
        name: String,
    },

    /// A storage operation failed mid-ingest.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The run was interrupted; partial progress is durable.
    #[error("ingestion interrupted; partial progress saved (run `repair` to resume)")]
    Interrupted,
}

/// Errors surfaced at the CLI boundary.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Storage failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Agent/provider failure.
    #[error(transparent)]
    Agent(#[from] AgentError),

    /// Configuration failure.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Ingestion failure.
    #[error(transparent)]
    Ingest(#[from] IngestError),

    /// Tokenizer initialisation failure.
    #[error("tokenizer initialisation failed: {message}")]
    Tokenizer {
        /// What went wrong.
        message: String,
    },

    /// Generic command execution failure.
    #[error("{0}")]
    ExecutionFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AgentError::ToolLoopExceeded { max_iterations: 5 };
        assert!(err.to_string().contains('5'));

        let err = IngestError::UnknownStrategy {
            name: "magic".to_string(),
        };
        assert!(err.to_string().contains("magic"));
        assert!(err.to_string().contains("fixed"));
    }

    #[test]
    fn test_command_error_from_storage() {
        let storage_err = StorageError::Migration {
            message: "bad column".to_string(),
        };
        let cmd: CommandError = storage_err.into();
        assert!(cmd.to_string().contains("bad column"));
    }
}
