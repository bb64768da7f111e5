//! Error taxonomy for the orchestration engine and the concurrency queue.
//!
//! Nearly all failures are caught at the node boundary and converted into a
//! structured `ExecutionReport` rather than thrown, so callers of
//! [`crate::engine::Engine::execute`] do not need their own error handling
//! except for genuine internal invariant violations.

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine errors
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A node was created at or beyond the configured depth limit.
    ///
    /// This is the one failure designed to bypass normal parent evaluation
    /// and propagate straight to the root.
    #[error("depth limit exceeded: depth {depth} >= max depth {max_depth}")]
    DepthLimitExceeded {
        /// Depth of the offending node
        depth: usize,
        /// Configured maximum depth
        max_depth: usize,
    },

    /// Decomposition produced zero subtasks; fatal for that node only.
    #[error("decomposition produced no subtasks for task {task_id}")]
    DecompositionEmpty {
        /// The node whose decomposition came back empty
        task_id: String,
    },

    /// A planned tool call named a tool the discovery layer cannot resolve.
    #[error("tool not found: {tool}")]
    ToolNotFound {
        /// Name of the missing tool
        tool: String,
    },

    /// Transport failure from the injected reasoning oracle.
    #[error("oracle request failed: {message}")]
    Oracle {
        /// Underlying failure description
        message: String,
    },

    /// A parent-evaluation or completion-evaluation decision failed the node.
    #[error("task failed by evaluation: {reason}")]
    EvaluationFailed {
        /// Reason supplied by the evaluation decision
        reason: String,
    },

    /// Strategy-level failure that fits no other variant.
    #[error("{message}")]
    Strategy {
        /// Failure description
        message: String,
    },

    /// Arena lookup failure; indicates an internal bookkeeping bug.
    #[error("task not found: {id}")]
    TaskNotFound {
        /// The unknown task id
        id: String,
    },

    /// Attempted a backward or skipping status transition.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidStatusTransition {
        /// Current status
        from: String,
        /// Requested status
        to: String,
    },
}

/// Queue errors
///
/// Cloneable so a terminal outcome can be fanned out to every waiter
/// registered for the same queue entry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// The queue is draining and no longer accepts new work.
    #[error("queue is draining; new tasks are rejected")]
    Draining,

    /// The entry was cancelled before completing.
    #[error("task {id} was cancelled")]
    Cancelled {
        /// Cancelled entry id
        id: String,
    },

    /// The final attempt exceeded its per-attempt timeout.
    #[error("task {id} timed out")]
    Timeout {
        /// Timed-out entry id
        id: String,
    },

    /// The entry failed on its final attempt.
    #[error("task {id} failed after {attempts} attempt(s): {message}")]
    AttemptsExhausted {
        /// Failed entry id
        id: String,
        /// Attempts consumed
        attempts: u32,
        /// Final failure message
        message: String,
    },

    /// No queued, running, or settled entry with this id.
    #[error("queue task not found: {id}")]
    TaskNotFound {
        /// The unknown entry id
        id: String,
    },

    /// The queue was dropped while a waiter was still registered.
    #[error("queue closed before task {id} settled")]
    Closed {
        /// Entry the waiter was watching
        id: String,
    },
}
