//! Oracle reply payloads and prompt construction for each interaction.
//!
//! One serde type per schema: classification, decomposition, tool-call
//! planning, parent evaluation, and completion evaluation. The prompt
//! builders are deliberately plain `format!` composition; template
//! rendering is an external concern.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::artifact::ArtifactSpec;
use crate::task::{Classification, PlannedSubtask};
use crate::tools::ToolDescriptor;

// ============================================================================
// Reply payloads
// ============================================================================

/// Classification reply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationReply {
    /// SIMPLE or COMPLEX
    pub classification: Classification,

    /// Optional reasoning text
    #[serde(default)]
    pub reasoning: Option<String>,
}

/// A string or a list of strings; oracles produce both forms
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    /// Single spec string
    One(String),
    /// List of spec strings
    Many(Vec<String>),
}

impl OneOrMany {
    /// Flatten into a list of spec strings
    pub fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

/// One subtask in a decomposition reply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskSpec {
    /// Goal text for the subtask
    pub description: String,

    /// Artifact specs the subtask needs from its parent
    #[serde(default)]
    pub inputs: Option<OneOrMany>,

    /// Artifact specs the subtask must produce
    #[serde(default)]
    pub outputs: Option<OneOrMany>,
}

impl SubtaskSpec {
    /// Parse the raw input/output spec strings into a planned subtask
    pub fn into_planned(self) -> PlannedSubtask {
        let inputs = self
            .inputs
            .map(OneOrMany::into_vec)
            .unwrap_or_default();
        let outputs = self
            .outputs
            .map(OneOrMany::into_vec)
            .unwrap_or_default();
        PlannedSubtask {
            description: self.description,
            inputs: ArtifactSpec::parse_all(&inputs),
            outputs: ArtifactSpec::parse_all(&outputs),
        }
    }
}

/// Decomposition reply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecompositionReply {
    /// Ordered subtask list; empty is a hard failure for the node
    pub subtasks: Vec<SubtaskSpec>,
}

/// One planned tool invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedToolCall {
    /// Name of the tool to invoke
    pub tool: String,

    /// Tool inputs; `"@name"` references are resolved before execution
    #[serde(default)]
    pub inputs: Value,

    /// Output mappings: artifact name -> field of the tool output to store
    ///
    /// An empty field string stores the whole output payload.
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
}

/// Tool-call plan reply for a SIMPLE task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolPlanReply {
    /// Sequential tool calls; may be empty when answering directly
    #[serde(default)]
    pub tool_calls: Vec<PlannedToolCall>,

    /// Direct textual answer instead of tool calls
    #[serde(default)]
    pub direct_response: Option<String>,
}

/// Decision a parent makes after a child settles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EvaluationDecision {
    /// Advance to the next planned subtask (or completion evaluation)
    Continue,

    /// The parent node is done
    Complete,

    /// The parent node has failed
    Fail,

    /// Insert an ad hoc subtask and execute it immediately
    CreateSubtask,
}

/// Parent-evaluation reply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReply {
    /// Decision for the parent node
    pub decision: EvaluationDecision,

    /// Reasoning or failure explanation
    #[serde(default)]
    pub reason: Option<String>,

    /// Result text when the decision is `complete`
    #[serde(default)]
    pub result: Option<String>,

    /// Subtask to insert when the decision is `create-subtask`
    #[serde(default)]
    pub subtask: Option<SubtaskSpec>,
}

/// Completion-evaluation reply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionReply {
    /// Whether the node is done
    pub complete: bool,

    /// Summary when done, or what is still missing
    #[serde(default)]
    pub reason: Option<String>,

    /// One additional subtask to append when not done
    #[serde(default)]
    pub additional_subtask: Option<SubtaskSpec>,
}

// ============================================================================
// Prompt builders
// ============================================================================

fn artifact_section(names: &[&str]) -> String {
    if names.is_empty() {
        String::new()
    } else {
        format!("\nAvailable artifacts: {}", names.join(", "))
    }
}

/// Build the classification prompt
pub fn classification_prompt(description: &str, instructions: &str) -> String {
    format!(
        "Classify the following task as SIMPLE (directly executable with tools) \
         or COMPLEX (requires breaking down into subtasks).\n\nTask: {description}\n\n{instructions}"
    )
}

/// Build the decomposition prompt
pub fn decomposition_prompt(description: &str, artifact_names: &[&str], instructions: &str) -> String {
    format!(
        "Break the following task into an ordered list of subtasks. Each subtask \
         may declare inputs it needs and outputs it must produce, written as \
         artifact references like \"@name\" or \"name:type\".\n\n\
         Task: {description}{}\n\n{instructions}",
        artifact_section(artifact_names)
    )
}

/// Build the tool-call planning prompt for a SIMPLE task
pub fn tool_plan_prompt(
    description: &str,
    tools: &[ToolDescriptor],
    artifact_names: &[&str],
    instructions: &str,
) -> String {
    let tool_list = if tools.is_empty() {
        "No tools are available; answer directly.".to_string()
    } else {
        tools
            .iter()
            .map(|t| format!("- {} (confidence {:.2}): {}", t.name, t.confidence, t.description))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "Plan how to execute the following task. Either call the tools below in \
         sequence, using \"@name\" to reference artifacts in inputs, or answer \
         directly.\n\nTask: {description}\n\nTools:\n{tool_list}{}\n\n{instructions}",
        artifact_section(artifact_names)
    )
}

/// Build the parent-evaluation prompt for a settled child
#[allow(clippy::too_many_arguments)]
pub fn evaluation_prompt(
    parent_description: &str,
    child_description: &str,
    child_status: &str,
    child_result: Option<&str>,
    remaining_subtasks: usize,
    artifact_names: &[&str],
    instructions: &str,
) -> String {
    format!(
        "You are evaluating progress on this task: {parent_description}\n\n\
         A subtask just finished.\n\
         Subtask: {child_description}\n\
         Status: {child_status}\n\
         Result: {}\n\
         Remaining planned subtasks: {remaining_subtasks}{}\n\n\
         Decide whether to continue with the next subtask, complete the task, \
         fail the task, or create a new subtask.\n\n{instructions}",
        child_result.unwrap_or("(none)"),
        artifact_section(artifact_names)
    )
}

/// Build the completion-evaluation prompt once no planned subtasks remain
pub fn completion_prompt(
    description: &str,
    executed: &[PlannedSubtask],
    artifact_names: &[&str],
    instructions: &str,
) -> String {
    let history = if executed.is_empty() {
        "(none)".to_string()
    } else {
        executed
            .iter()
            .enumerate()
            .map(|(i, s)| format!("{}. {}", i + 1, s.description))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "All planned subtasks for this task have executed.\n\n\
         Task: {description}\n\nExecuted subtasks:\n{history}{}\n\n\
         Decide whether the task is complete. If it is not, you may supply one \
         additional subtask.\n\n{instructions}",
        artifact_section(artifact_names)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decomposition_accepts_string_or_list_specs() {
        let reply: DecompositionReply = serde_json::from_value(json!({
            "subtasks": [
                {"description": "Draft summary", "outputs": "@draft"},
                {"description": "Save @draft to file", "inputs": ["@draft"], "outputs": ["@path"]},
            ]
        }))
        .unwrap();

        let first = reply.subtasks[0].clone().into_planned();
        assert_eq!(first.outputs.len(), 1);
        assert_eq!(first.outputs[0].name, "draft");

        let second = reply.subtasks[1].clone().into_planned();
        assert_eq!(second.inputs[0].name, "draft");
        assert_eq!(second.outputs[0].name, "path");
    }

    #[test]
    fn test_evaluation_decision_kebab_case() {
        let reply: EvaluationReply =
            serde_json::from_value(json!({"decision": "create-subtask"})).unwrap();
        assert_eq!(reply.decision, EvaluationDecision::CreateSubtask);
    }

    #[test]
    fn test_tool_plan_defaults() {
        let reply: ToolPlanReply =
            serde_json::from_value(json!({"direct_response": "Paris"})).unwrap();
        assert!(reply.tool_calls.is_empty());
        assert_eq!(reply.direct_response.as_deref(), Some("Paris"));
    }

    #[test]
    fn test_classification_reply_uppercase() {
        let reply: ClassificationReply =
            serde_json::from_value(json!({"classification": "COMPLEX"})).unwrap();
        assert_eq!(reply.classification, Classification::Complex);
    }
}
