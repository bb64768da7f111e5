//! # Dendrite
//!
//! A recursive task-orchestration engine. A goal enters as the root of a
//! task tree; each node is classified SIMPLE (execute directly with tools)
//! or COMPLEX (decompose into subtasks and recurse), and results flow back
//! up through explicit artifact hand-off and parent evaluation.
//!
//! ## Features
//!
//! - **Recursive decomposition**: COMPLEX tasks break into planned subtasks
//!   with declared inputs and outputs, executed depth-first under a hard
//!   depth limit
//! - **Validated oracle protocol**: every structured reply from the
//!   reasoning oracle is schema-validated, with numbered-feedback retries
//!   and deterministic fallbacks instead of hard failures
//! - **Artifact hand-off**: named, typed artifacts move parent -> child by
//!   declared inputs and child -> parent by declared outputs, with `@name`
//!   reference resolution inside tool inputs
//! - **Pluggable strategy**: classification, execution, and evaluation sit
//!   behind [`ExecutionStrategy`]; the oracle-driven default is
//!   [`OracleStrategy`]
//! - **Bounded parallelism**: [`ConcurrencyQueue`] runs independent work
//!   under a concurrency cap with priorities, retry backoff, timeouts, and
//!   lifecycle events
//!
//! ## Quick start
//!
//! ```ignore
//! use dendrite::{Engine, EngineConfig, OracleStrategy};
//! use std::sync::Arc;
//!
//! let strategy = Arc::new(OracleStrategy::new(oracle, discovery));
//! let mut engine = Engine::new(strategy, EngineConfig::default());
//! let root = engine.create_root("Summarize the report and save it");
//! let report = engine.execute(root).await?;
//! ```

#![warn(missing_docs)]

pub mod artifact;
pub mod config;
pub mod engine;
pub mod error;
pub mod oracle;
pub mod protocol;
pub mod queue;
pub mod retry;
pub mod strategy;
pub mod task;
pub mod tools;
pub mod validate;

pub use artifact::{Artifact, ArtifactSpec, ArtifactStore};
pub use config::{EngineConfig, QueueConfig};
pub use engine::{Engine, ExecutionReport};
pub use error::{EngineError, QueueError, Result};
pub use oracle::{InteractionKind, Oracle, SessionLogger};
pub use queue::{AddOptions, ConcurrencyQueue, QueueEvent, QueueStats, TaskHandle};
pub use strategy::{ChildVerdict, ExecutionStrategy, OracleStrategy};
pub use task::{Classification, TaskId, TaskNode, TaskStatus, TaskTree};
pub use tools::{Tool, ToolDescriptor, ToolDiscovery, ToolOutput};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
