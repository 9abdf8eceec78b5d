//! Declarative agent catalog.
//!
//! The catalog maps agent ids to instructions, tool names, model settings
//! (a single config or a rotation pool), and an optional storage binding.
//! It is read from a YAML file and cached by modification time; without a
//! file, compiled-in defaults cover the three built-in agents
//! (`summarization-agent`, `chunk-analyzer`, `document-navigator`).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

/// Default calls per model before the rotator advances.
const DEFAULT_CALLS_PER_MODEL: u32 = 3;
/// Default history window for agents with a storage binding.
const DEFAULT_NUM_HISTORY_RUNS: u32 = 5;

/// A single (provider, model) configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider name (e.g. `"openai"`, `"groq"`, `"openrouter"`).
    pub provider: String,
    /// Provider-specific model identifier.
    pub model_id: String,
    /// Sampling temperature.
    #[serde(default)]
    pub temperature: f32,
    /// Maximum tokens to generate, if capped.
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

/// A rotation pool of model configurations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPoolConfig {
    /// Calls served by each model before rotating to the next.
    #[serde(default = "default_calls_per_model")]
    pub calls_per_model: u32,
    /// Models in rotation order.
    pub models: Vec<ModelConfig>,
}

const fn default_calls_per_model() -> u32 {
    DEFAULT_CALLS_PER_MODEL
}

const fn default_num_history_runs() -> u32 {
    DEFAULT_NUM_HISTORY_RUNS
}

/// Session storage binding for an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageBinding {
    /// Path of the session database.
    pub db_path: String,
    /// Table holding the agent's sessions.
    pub session_table: String,
    /// Whether prior runs are added to the context.
    #[serde(default)]
    pub add_history_to_context: bool,
    /// How many prior runs to include.
    #[serde(default = "default_num_history_runs")]
    pub num_history_runs: u32,
    /// Whether the agent may read its own chat history.
    #[serde(default)]
    pub read_chat_history: bool,
}

/// One agent catalog entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentSpec {
    /// System instructions, joined in order.
    #[serde(default)]
    pub instructions: Vec<String>,
    /// Tool names available to the agent.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Single model configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelConfig>,
    /// Rotation pool; takes precedence over `model` when both are set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub models: Option<ModelPoolConfig>,
    /// Optional session storage binding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageBinding>,
}

/// The full catalog, keyed by agent id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentCatalog {
    agents: BTreeMap<String, AgentSpec>,
}

impl AgentCatalog {
    /// Looks up an agent entry.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&AgentSpec> {
        self.agents.get(id)
    }

    /// Looks up an agent entry, failing if absent.
    pub fn require(&self, id: &str) -> Result<&AgentSpec, ConfigError> {
        self.get(id).ok_or_else(|| ConfigError::UnknownAgent {
            id: id.to_string(),
        })
    }

    /// The agent's system instructions joined with newlines.
    pub fn instructions(&self, id: &str) -> Result<String, ConfigError> {
        Ok(self.require(id)?.instructions.join("\n"))
    }

    /// The agent's model rotation pool.
    ///
    /// A single `model` entry becomes a pool of one.
    pub fn model_pool(&self, id: &str) -> Result<(Vec<ModelConfig>, u32), ConfigError> {
        let spec = self.require(id)?;
        if let Some(pool) = &spec.models
            && !pool.models.is_empty()
        {
            return Ok((pool.models.clone(), pool.calls_per_model.max(1)));
        }
        if let Some(model) = &spec.model {
            return Ok((vec![model.clone()], DEFAULT_CALLS_PER_MODEL));
        }
        Err(ConfigError::MissingModel { id: id.to_string() })
    }

    /// Compiled-in defaults for the built-in agents.
    #[must_use]
    pub fn defaults() -> Self {
        let mut agents = BTreeMap::new();

        agents.insert(
            "summarization-agent".to_string(),
            AgentSpec {
                instructions: vec![
                    "You condense document text into faithful summaries.".to_string(),
                    "Preserve key topics, entities, events, figures, and dates.".to_string(),
                    "Output plain prose only: no markdown fences, no headings, \
                     no reasoning traces."
                        .to_string(),
                ],
                tools: Vec::new(),
                model: None,
                models: Some(ModelPoolConfig {
                    calls_per_model: DEFAULT_CALLS_PER_MODEL,
                    models: vec![
                        ModelConfig {
                            provider: "groq".to_string(),
                            model_id: "llama-3.3-70b-versatile".to_string(),
                            temperature: 0.0,
                            max_tokens: None,
                        },
                        ModelConfig {
                            provider: "cerebras".to_string(),
                            model_id: "llama-3.3-70b".to_string(),
                            temperature: 0.0,
                            max_tokens: None,
                        },
                        ModelConfig {
                            provider: "openrouter".to_string(),
                            model_id: "meta-llama/llama-3.1-70b-instruct".to_string(),
                            temperature: 0.0,
                            max_tokens: None,
                        },
                    ],
                }),
                storage: None,
            },
        );

        agents.insert(
            "chunk-analyzer".to_string(),
            AgentSpec {
                instructions: vec![
                    "You answer one question about one document segment.".to_string(),
                    "Use only the text inside the <context> tags; never rely on \
                     outside knowledge."
                        .to_string(),
                    "If the context does not contain the answer, say so plainly.".to_string(),
                    "Quote the relevant passage when it supports the answer.".to_string(),
                ],
                tools: Vec::new(),
                // Shares the summarization pool and rotator at runtime.
                model: None,
                models: None,
                storage: None,
            },
        );

        agents.insert(
            "document-navigator".to_string(),
            AgentSpec {
                instructions: vec![
                    "You answer questions about a large document using its \
                     summary tree."
                        .to_string(),
                    "Start with inspect_document_hierarchy to see the root \
                     summaries, then descend with examine_summary_node."
                        .to_string(),
                    "Leaf nodes hold raw text you must never read directly: \
                     pass your question as the query argument and a sub-agent \
                     reads the text for you."
                        .to_string(),
                    "Use read_neighbor_node to follow narrative flow and \
                     search_summaries to find starting points by keyword."
                        .to_string(),
                    "Answer from what the tree and sub-agents report; cite \
                     nothing you have not seen."
                        .to_string(),
                ],
                tools: vec![
                    "inspect_document_hierarchy".to_string(),
                    "examine_summary_node".to_string(),
                    "read_neighbor_node".to_string(),
                    "search_summaries".to_string(),
                ],
                model: Some(ModelConfig {
                    provider: "groq".to_string(),
                    model_id: "llama-3.3-70b-versatile".to_string(),
                    temperature: 0.0,
                    max_tokens: None,
                }),
                models: None,
                storage: Some(StorageBinding {
                    db_path: "data/navigator_sessions.db".to_string(),
                    session_table: "navigator_sessions".to_string(),
                    add_history_to_context: false,
                    num_history_runs: DEFAULT_NUM_HISTORY_RUNS,
                    read_chat_history: false,
                }),
            },
        );

        Self { agents }
    }
}

/// Loads the catalog from disk, caching by file modification time.
#[derive(Debug)]
pub struct CatalogLoader {
    path: Option<PathBuf>,
    cache: Mutex<Option<(Option<SystemTime>, Arc<AgentCatalog>)>>,
}

impl CatalogLoader {
    /// Creates a loader for the given file; `None` serves compiled-in
    /// defaults.
    #[must_use]
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            cache: Mutex::new(None),
        }
    }

    /// Returns the catalog, re-reading the file only when its modification
    /// time has changed.
    pub fn load(&self) -> Result<Arc<AgentCatalog>, ConfigError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(self.cached_or_insert(None, AgentCatalog::defaults));
        };

        let mtime = std::fs::metadata(path)?.modified().ok();

        {
            let guard = self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some((cached_mtime, catalog)) = guard.as_ref()
                && *cached_mtime == mtime
            {
                return Ok(Arc::clone(catalog));
            }
        }

        debug!(path = %path.display(), "reloading agent catalog");
        let text = std::fs::read_to_string(path)?;
        let catalog: AgentCatalog = serde_yaml::from_str(&text)?;
        let catalog = Arc::new(catalog);
        let mut guard = self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = Some((mtime, Arc::clone(&catalog)));
        Ok(catalog)
    }

    fn cached_or_insert(
        &self,
        mtime: Option<SystemTime>,
        make: impl FnOnce() -> AgentCatalog,
    ) -> Arc<AgentCatalog> {
        let mut guard = self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some((cached_mtime, catalog)) = guard.as_ref()
            && *cached_mtime == mtime
        {
            return Arc::clone(catalog);
        }
        let catalog = Arc::new(make());
        *guard = Some((mtime, Arc::clone(&catalog)));
        catalog
    }

    /// The configured catalog path, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// Reads API credentials from the process environment.
///
/// `RLM_API_KEYS` holds a comma-separated list; `OPENAI_API_KEY` is the
/// single-key fallback. The keys are opaque here: they go to the provider
/// client verbatim.
#[must_use]
pub fn credentials_from_env() -> Vec<String> {
    if let Ok(keys) = std::env::var("RLM_API_KEYS") {
        let parsed: Vec<String> = keys
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(ToString::to_string)
            .collect();
        if !parsed.is_empty() {
            return parsed;
        }
    }
    std::env::var("OPENAI_API_KEY")
        .ok()
        .filter(|k| !k.trim().is_empty())
        .map(|k| vec![k])
        .unwrap_or_default()
}

/// Reads the base-URL override from the environment.
#[must_use]
pub fn base_url_from_env() -> Option<String> {
    std::env::var("RLM_BASE_URL")
        .or_else(|_| std::env::var("OPENAI_BASE_URL"))
        .ok()
        .filter(|u| !u.trim().is_empty())
}
