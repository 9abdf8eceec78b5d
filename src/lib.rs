//! Hierarchical summary-tree indexing for documents that exceed any model
//! context.
//!
//! The crate pre-computes, per document, a tree of summaries rooted at a
//! single global abstract and grounded at the raw text, then exposes that
//! tree as a navigable structure: an agent descends from summary to
//! summary and delegates the final raw-text read to a disposable
//! sub-agent, so the driving context never sees a chunk.
//!
//! # Architecture
//!
//! ```text
//! ingest:  file → chunker → store ─┬─▶ worker pool → leaf summaries
//!                                  └─▶ level-by-level synthesis → root(s)
//! repair:  validate → clean → regenerate → fill leaves → extend hierarchy
//! query:   agent ⇄ navigator tools ⇄ store
//!                        └─(leaf + question)─▶ sub-agent ─▶ bounded answer
//! ```
//!
//! The ingester, repairer, boundary chunker, and navigator all share one
//! [`SummarizationService`] (credential pool + model rotator + retry
//! discipline); everything is explicitly constructed and threaded, so
//! tests inject mock providers and in-memory stores.

pub mod agent;
pub mod chunking;
pub mod cli;
pub mod config;
pub mod error;
pub mod ingest;
pub mod navigate;
pub mod repair;
pub mod storage;
pub mod summarize;
pub mod tokens;

// Re-export key types
pub use config::{AgentCatalog, CatalogLoader, ModelConfig, ModelPoolConfig};
pub use ingest::{IngestParams, IngestReport, Ingester};
pub use navigate::{Direction, Navigator, NavigatorOp};
pub use repair::{RepairParams, RepairStats, Repairer, ValidationReport};
pub use storage::{SqliteStore, Store};
pub use summarize::{CredentialPool, ModelRotator, ServiceOptions, SummarizationService};
pub use tokens::{Cl100kMeter, TokenMeter};
