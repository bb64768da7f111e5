//! Injected contracts for the external reasoning oracle and session logging.
//!
//! The engine never owns transport or prompt rendering; it consumes these
//! narrow traits and nothing else.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::Result;
use crate::task::TaskId;

/// The external reasoning service consulted at every classification,
/// decomposition, planning, and evaluation step
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Complete a prompt, returning raw reply text
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Kind of oracle interaction, for logging and observability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InteractionKind {
    /// SIMPLE vs COMPLEX classification
    Classification,

    /// COMPLEX goal decomposition into subtasks
    Decomposition,

    /// SIMPLE tool-call planning
    ToolPlanning,

    /// Parent evaluation of a settled child
    ChildEvaluation,

    /// Completion evaluation once no planned subtasks remain
    CompletionEvaluation,
}

impl fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InteractionKind::Classification => "classification",
            InteractionKind::Decomposition => "decomposition",
            InteractionKind::ToolPlanning => "tool-planning",
            InteractionKind::ChildEvaluation => "child-evaluation",
            InteractionKind::CompletionEvaluation => "completion-evaluation",
        };
        write!(f, "{s}")
    }
}

/// Optional observer for every oracle round-trip
#[async_trait]
pub trait SessionLogger: Send + Sync {
    /// Record one prompt/response pair for a task
    async fn log_interaction(
        &self,
        task: TaskId,
        kind: InteractionKind,
        prompt: &str,
        response: &str,
        metadata: Option<Value>,
    );
}
