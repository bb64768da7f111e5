//! Injected tool contracts for SIMPLE task execution.
//!
//! Discovery and execution are external collaborators; the engine only sees
//! descriptors, resolves names to handles, and consumes structured outputs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::error::Result;

/// Metadata describing a discovered tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name, unique within a discovery result
    pub name: String,

    /// What the tool does
    pub description: String,

    /// Discovery confidence that the tool fits the task, 0.0 - 1.0
    pub confidence: f32,

    /// JSON schema for the tool's inputs
    pub input_schema: Value,

    /// JSON schema for the tool's output
    pub output_schema: Value,
}

/// Structured result of a tool invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Whether the invocation succeeded
    pub success: bool,

    /// Output payload
    pub data: Value,

    /// Error message when `success` is false
    pub error: Option<String>,
}

impl ToolOutput {
    /// Successful output with a payload
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    /// Failed output with an error message
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: Some(message.into()),
        }
    }
}

/// An executable tool
#[async_trait]
pub trait Tool: Send + Sync {
    /// Execute the tool with resolved inputs
    async fn execute(&self, inputs: Value) -> Result<ToolOutput>;
}

/// Discovery and resolution of tools for a task description
#[async_trait]
pub trait ToolDiscovery: Send + Sync {
    /// Discover candidate tools for a goal description
    async fn discover(&self, description: &str) -> Result<Vec<ToolDescriptor>>;

    /// Resolve a tool name to an executable handle
    fn resolve(&self, name: &str) -> Option<Arc<dyn Tool>>;
}
