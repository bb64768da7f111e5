//! Task nodes, the execution tree arena, and the node lifecycle state machine.
//!
//! The tree is an arena: child lists own node ids, the parent link is a
//! non-owning back-reference, so the two-way parent/child relationship never
//! forms an ownership cycle. Status transitions are forward-only
//! (pending -> in-progress -> completed | failed) and guarded at the type
//! level by [`TaskStatus::can_transition_to`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::artifact::{ArtifactSpec, ArtifactStore};
use crate::error::{EngineError, Result};

// ============================================================================
// Identifiers and status
// ============================================================================

/// Unique identifier for a task node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Create a new unique task id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a task node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    /// Created, not yet started
    Pending,

    /// Currently executing
    InProgress,

    /// Finished successfully (terminal)
    Completed,

    /// Finished unsuccessfully (terminal)
    Failed,
}

impl TaskStatus {
    /// Whether this status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Whether a transition to `next` is allowed
    ///
    /// Transitions only move forward and never skip `InProgress`.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::InProgress)
                | (TaskStatus::InProgress, TaskStatus::Completed)
                | (TaskStatus::InProgress, TaskStatus::Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Oracle-assigned classification of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Classification {
    /// Directly executable via discovered tools
    Simple,

    /// Requires decomposition into subtasks
    Complex,
}

/// Structured reason a node failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind", content = "detail")]
pub enum FailureReason {
    /// Node was created at or beyond the depth limit
    DepthLimitExceeded,

    /// Decomposition returned zero subtasks
    DecompositionEmpty,

    /// A planned tool call named an unknown tool
    ToolNotFound(String),

    /// Oracle transport failure
    Oracle(String),

    /// Parent or completion evaluation decided to fail the node
    Evaluation(String),

    /// Any other strategy-level failure
    Other(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::DepthLimitExceeded => write!(f, "depth limit exceeded"),
            FailureReason::DecompositionEmpty => write!(f, "decomposition produced no subtasks"),
            FailureReason::ToolNotFound(tool) => write!(f, "tool not found: {tool}"),
            FailureReason::Oracle(msg) => write!(f, "oracle request failed: {msg}"),
            FailureReason::Evaluation(reason) => write!(f, "failed by evaluation: {reason}"),
            FailureReason::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl From<&EngineError> for FailureReason {
    fn from(err: &EngineError) -> Self {
        match err {
            EngineError::DepthLimitExceeded { .. } => FailureReason::DepthLimitExceeded,
            EngineError::DecompositionEmpty { .. } => FailureReason::DecompositionEmpty,
            EngineError::ToolNotFound { tool } => FailureReason::ToolNotFound(tool.clone()),
            EngineError::Oracle { message } => FailureReason::Oracle(message.clone()),
            EngineError::EvaluationFailed { reason } => FailureReason::Evaluation(reason.clone()),
            other => FailureReason::Other(other.to_string()),
        }
    }
}

// ============================================================================
// Conversation log
// ============================================================================

/// Role of a conversation entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Engine bookkeeping
    System,
    /// Prompt sent to the oracle
    User,
    /// Oracle reply
    Assistant,
    /// Tool execution record
    Tool,
}

/// One append-only conversation log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEntry {
    /// Entry id
    pub id: Uuid,

    /// When the entry was appended
    pub timestamp: DateTime<Utc>,

    /// Who produced the content
    pub role: Role,

    /// Entry content
    pub content: String,

    /// Optional structured metadata
    pub metadata: Option<Value>,
}

// ============================================================================
// Planned subtasks
// ============================================================================

/// A subtask produced by decomposition, not yet materialized as a node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedSubtask {
    /// Goal text for the subtask
    pub description: String,

    /// Artifacts the subtask expects to receive from its parent
    pub inputs: Vec<ArtifactSpec>,

    /// Artifacts the subtask must deliver back to its parent
    pub outputs: Vec<ArtifactSpec>,
}

// ============================================================================
// Task node
// ============================================================================

/// A node in the recursive execution tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskNode {
    /// Unique id
    pub id: TaskId,

    /// Goal text
    pub description: String,

    /// Lifecycle status
    pub status: TaskStatus,

    /// Final result text once terminal
    pub result: Option<String>,

    /// Structured failure reason once failed
    pub failure: Option<FailureReason>,

    /// Non-owning back-reference to the parent, set once at construction
    pub parent: Option<TaskId>,

    /// Exclusively-owned ordered child list
    pub children: Vec<TaskId>,

    /// Distance from the root (root is 0)
    pub depth: usize,

    /// Append-only conversation log
    pub conversation: Vec<ConversationEntry>,

    /// Exclusively-owned artifact store
    pub artifacts: ArtifactStore,

    /// Artifacts this node expects from its parent
    pub goal_inputs: Vec<ArtifactSpec>,

    /// Artifacts this node must deliver to its parent
    pub goal_outputs: Vec<ArtifactSpec>,

    /// Ordered subtask plan produced by decomposition
    pub planned_subtasks: Vec<PlannedSubtask>,

    /// Index of the next planned subtask to execute; monotonic
    /// non-decreasing and never exceeds `planned_subtasks.len()`
    pub current_subtask: usize,

    /// Cached oracle classification
    pub classification: Option<Classification>,

    /// Whether decomposition has already run for this node
    pub is_decomposed: bool,

    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl TaskNode {
    fn new(description: String, parent: Option<TaskId>, depth: usize) -> Self {
        Self {
            id: TaskId::new(),
            description,
            status: TaskStatus::Pending,
            result: None,
            failure: None,
            parent,
            children: Vec::new(),
            depth,
            conversation: Vec::new(),
            artifacts: ArtifactStore::new(),
            goal_inputs: Vec::new(),
            goal_outputs: Vec::new(),
            planned_subtasks: Vec::new(),
            current_subtask: 0,
            classification: None,
            is_decomposed: false,
            created_at: Utc::now(),
        }
    }

    /// Append a conversation entry
    pub fn record(&mut self, role: Role, content: impl Into<String>) {
        self.record_with_metadata(role, content, None);
    }

    /// Append a conversation entry with structured metadata
    pub fn record_with_metadata(
        &mut self,
        role: Role,
        content: impl Into<String>,
        metadata: Option<Value>,
    ) {
        self.conversation.push(ConversationEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            role,
            content: content.into(),
            metadata,
        });
    }

    /// Transition the node's status, enforcing the forward-only lifecycle
    pub fn set_status(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::InvalidStatusTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Whether this node failed because of the depth limit
    pub fn is_depth_limited(&self) -> bool {
        matches!(self.failure, Some(FailureReason::DepthLimitExceeded))
    }
}

/// Compact observable view of a node and its subtree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSummary {
    /// Node id
    pub id: TaskId,

    /// Goal text
    pub description: String,

    /// Lifecycle status
    pub status: TaskStatus,

    /// Cached classification
    pub classification: Option<Classification>,

    /// Tree depth
    pub depth: usize,

    /// Result text once terminal
    pub result: Option<String>,

    /// Names of artifacts in the node's store
    pub artifact_names: Vec<String>,

    /// Summaries of child nodes, in execution order
    pub children: Vec<TaskSummary>,
}

// ============================================================================
// Task tree arena
// ============================================================================

/// Arena of task nodes
///
/// Owns every node; relationships are ids, not references.
#[derive(Debug, Default)]
pub struct TaskTree {
    nodes: HashMap<TaskId, TaskNode>,
}

impl TaskTree {
    /// Create an empty tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a root node
    pub fn create_root(&mut self, description: impl Into<String>) -> TaskId {
        let node = TaskNode::new(description.into(), None, 0);
        let id = node.id;
        self.nodes.insert(id, node);
        id
    }

    /// Create a child node, registering it with its parent
    pub fn create_child(
        &mut self,
        parent: TaskId,
        description: impl Into<String>,
        goal_inputs: Vec<ArtifactSpec>,
        goal_outputs: Vec<ArtifactSpec>,
    ) -> Result<TaskId> {
        let depth = self.get(parent)?.depth + 1;
        let mut node = TaskNode::new(description.into(), Some(parent), depth);
        node.goal_inputs = goal_inputs;
        node.goal_outputs = goal_outputs;
        let id = node.id;
        self.nodes.insert(id, node);
        self.get_mut(parent)?.children.push(id);
        Ok(id)
    }

    /// Shared access to a node
    pub fn get(&self, id: TaskId) -> Result<&TaskNode> {
        self.nodes
            .get(&id)
            .ok_or_else(|| EngineError::TaskNotFound { id: id.to_string() })
    }

    /// Exclusive access to a node
    pub fn get_mut(&mut self, id: TaskId) -> Result<&mut TaskNode> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| EngineError::TaskNotFound { id: id.to_string() })
    }

    /// Number of nodes in the arena
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the arena is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Copy the named (or goal-input-declared) artifacts from a parent's
    /// store into a child's store
    pub fn handoff_inputs(&mut self, parent: TaskId, child: TaskId) -> Result<()> {
        let names: Vec<String> = self
            .get(child)?
            .goal_inputs
            .iter()
            .map(|spec| spec.name.clone())
            .collect();
        let parent_store = self.get(parent)?.artifacts.clone();
        let child_node = self.get_mut(child)?;
        child_node.artifacts.receive_from(&parent_store, &names);
        Ok(())
    }

    /// Copy a child's declared goal outputs back into its parent's store
    pub fn deliver_outputs(&mut self, child: TaskId, parent: TaskId) -> Result<()> {
        let child_node = self.get(child)?;
        let outputs = child_node.goal_outputs.clone();
        let child_store = child_node.artifacts.clone();
        let parent_node = self.get_mut(parent)?;
        child_store.deliver_to(&mut parent_node.artifacts, &outputs);
        Ok(())
    }

    /// Serialize a node and its subtree to JSON
    pub fn snapshot(&self, id: TaskId) -> Result<Value> {
        let node = self.get(id)?;
        let children = node
            .children
            .iter()
            .map(|&child| self.snapshot(child))
            .collect::<Result<Vec<_>>>()?;
        Ok(json!({
            "id": node.id,
            "description": node.description,
            "status": node.status,
            "classification": node.classification,
            "depth": node.depth,
            "result": node.result,
            "failure": node.failure,
            "goalInputs": node.goal_inputs,
            "goalOutputs": node.goal_outputs,
            "plannedSubtasks": node.planned_subtasks,
            "currentSubtask": node.current_subtask,
            "artifacts": node.artifacts,
            "conversation": node.conversation,
            "children": children,
        }))
    }

    /// Build a compact summary of a node and its subtree
    pub fn summary(&self, id: TaskId) -> Result<TaskSummary> {
        let node = self.get(id)?;
        let children = node
            .children
            .iter()
            .map(|&child| self.summary(child))
            .collect::<Result<Vec<_>>>()?;
        Ok(TaskSummary {
            id: node.id,
            description: node.description.clone(),
            status: node.status,
            classification: node.classification,
            depth: node.depth,
            result: node.result.clone(),
            artifact_names: node
                .artifacts
                .names()
                .into_iter()
                .map(str::to_string)
                .collect(),
            children,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions_forward_only() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::InProgress));
        assert!(TaskStatus::InProgress.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::InProgress.can_transition_to(TaskStatus::Failed));

        // never backward, never skipping in-progress
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Failed));
        assert!(!TaskStatus::InProgress.can_transition_to(TaskStatus::Pending));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Failed));
        assert!(!TaskStatus::Failed.can_transition_to(TaskStatus::InProgress));
    }

    #[test]
    fn test_set_status_guards_invalid_transition() {
        let mut tree = TaskTree::new();
        let id = tree.create_root("goal");
        let node = tree.get_mut(id).unwrap();
        let err = node.set_status(TaskStatus::Completed).unwrap_err();
        assert!(matches!(err, EngineError::InvalidStatusTransition { .. }));
        assert_eq!(node.status, TaskStatus::Pending);
    }

    #[test]
    fn test_child_depth_and_registration() {
        let mut tree = TaskTree::new();
        let root = tree.create_root("root");
        let child = tree
            .create_child(root, "child", Vec::new(), Vec::new())
            .unwrap();
        let grandchild = tree
            .create_child(child, "grandchild", Vec::new(), Vec::new())
            .unwrap();

        assert_eq!(tree.get(root).unwrap().depth, 0);
        assert_eq!(tree.get(child).unwrap().depth, 1);
        assert_eq!(tree.get(grandchild).unwrap().depth, 2);
        assert_eq!(tree.get(root).unwrap().children, vec![child]);
        assert_eq!(tree.get(grandchild).unwrap().parent, Some(child));
    }

    #[test]
    fn test_snapshot_includes_subtree() {
        let mut tree = TaskTree::new();
        let root = tree.create_root("root");
        tree.create_child(root, "child", Vec::new(), Vec::new())
            .unwrap();

        let snapshot = tree.snapshot(root).unwrap();
        assert_eq!(snapshot["description"], "root");
        assert_eq!(snapshot["children"][0]["description"], "child");
        assert_eq!(snapshot["children"][0]["depth"], 1);
    }

    #[test]
    fn test_summary_collects_artifact_names() {
        let mut tree = TaskTree::new();
        let root = tree.create_root("root");
        tree.get_mut(root)
            .unwrap()
            .artifacts
            .store("draft", serde_json::json!("text"), None, None);

        let summary = tree.summary(root).unwrap();
        assert_eq!(summary.artifact_names, vec!["draft".to_string()]);
        assert!(summary.children.is_empty());
    }
}
