//! Orchestration engine: composes the task tree with an execution strategy.
//!
//! [`Engine::execute`] is the sole entry point per node. It drives the
//! lifecycle (pending -> in-progress -> completed | failed), enforces the
//! depth limit before any other logic, classifies once, dispatches to the
//! strategy's SIMPLE or COMPLEX path, and converts every failure into a
//! structured [`ExecutionReport`] at the node boundary so callers never
//! need their own error handling around it.
//!
//! The engine itself is single-threaded cooperative: one call stack drives
//! one node's recursive descent at a time. True parallelism across
//! independent units of work goes through
//! [`ConcurrencyQueue`](crate::queue::ConcurrencyQueue).

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::artifact::Artifact;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::strategy::ExecutionStrategy;
use crate::task::{Classification, FailureReason, Role, TaskId, TaskStatus, TaskTree};

/// Outcome of executing one node, returned to the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Whether the node completed
    pub success: bool,

    /// Result text, or an explanatory failure string
    pub result: Option<String>,

    /// The node's artifacts at settlement (partial artifacts on failure)
    pub artifacts: HashMap<String, Artifact>,
}

/// Recursive task-orchestration engine
pub struct Engine {
    tree: TaskTree,
    strategy: Arc<dyn ExecutionStrategy>,
    config: EngineConfig,
}

impl Engine {
    /// Create an engine with an injected strategy
    pub fn new(strategy: Arc<dyn ExecutionStrategy>, config: EngineConfig) -> Self {
        Self {
            tree: TaskTree::new(),
            strategy,
            config,
        }
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shared access to the task tree
    pub fn tree(&self) -> &TaskTree {
        &self.tree
    }

    /// Exclusive access to the task tree
    pub fn tree_mut(&mut self) -> &mut TaskTree {
        &mut self.tree
    }

    /// Create a root task for a goal
    pub fn create_root(&mut self, description: impl Into<String>) -> TaskId {
        self.tree.create_root(description)
    }

    /// Execute a node to settlement
    ///
    /// Returns a `BoxFuture` because COMPLEX execution re-enters the engine
    /// for each child.
    pub fn execute(&mut self, id: TaskId) -> BoxFuture<'_, Result<ExecutionReport>> {
        Box::pin(async move {
            let depth = {
                let node = self.tree.get_mut(id)?;
                node.set_status(TaskStatus::InProgress)?;
                let description = node.description.clone();
                node.record(Role::System, format!("task started: {description}"));
                node.depth
            };
            info!(task = %id, depth, "executing task");

            // The depth check precedes classification and every other step.
            if depth >= self.config.max_depth {
                warn!(
                    task = %id,
                    depth,
                    max_depth = self.config.max_depth,
                    "depth limit reached; failing without classification"
                );
                self.fail(id, FailureReason::DepthLimitExceeded)?;
                return self.report(id);
            }

            let strategy = Arc::clone(&self.strategy);

            let classification = match self.tree.get(id)?.classification {
                Some(cached) => cached,
                None => match strategy.classify(self, id).await {
                    Ok(classification) => {
                        let node = self.tree.get_mut(id)?;
                        node.classification = Some(classification);
                        node.record(
                            Role::System,
                            format!("classified as {}", label(classification)),
                        );
                        classification
                    }
                    Err(err) => {
                        self.fail(id, FailureReason::from(&err))?;
                        return self.report(id);
                    }
                },
            };
            debug!(task = %id, classification = label(classification), "dispatching");

            let outcome = match classification {
                Classification::Simple => strategy.execute_simple(self, id).await,
                Classification::Complex => strategy.execute_complex(self, id).await,
            };

            match outcome {
                Ok(result) => {
                    if !self.tree.get(id)?.status.is_terminal() {
                        self.complete(id, result)?;
                    }
                }
                Err(err) => {
                    if self.tree.get(id)?.status != TaskStatus::Failed {
                        self.fail(id, FailureReason::from(&err))?;
                    }
                }
            }

            self.report(id)
        })
    }

    /// Mark a node completed and notify its parent
    pub(crate) fn complete(&mut self, id: TaskId, result: String) -> Result<()> {
        let parent = {
            let node = self.tree.get_mut(id)?;
            node.set_status(TaskStatus::Completed)?;
            node.result = Some(result);
            node.record(Role::System, "task completed");
            node.parent
        };
        info!(task = %id, "task completed");

        // Informational bookkeeping only; the authoritative next-step
        // decision happens in parent evaluation.
        if let Some(parent) = parent {
            self.tree
                .get_mut(parent)?
                .record(Role::System, format!("child task {id} completed"));
        }
        Ok(())
    }

    /// Mark a node failed and notify its parent
    ///
    /// The failure reason doubles as the node's result so the report
    /// carries an explanatory string instead of nothing.
    pub(crate) fn fail(&mut self, id: TaskId, reason: FailureReason) -> Result<()> {
        let parent = {
            let node = self.tree.get_mut(id)?;
            node.set_status(TaskStatus::Failed)?;
            node.result = Some(reason.to_string());
            node.record(Role::System, format!("task failed: {reason}"));
            node.failure = Some(reason);
            node.parent
        };
        warn!(task = %id, "task failed");

        if let Some(parent) = parent {
            self.tree
                .get_mut(parent)?
                .record(Role::System, format!("child task {id} failed"));
        }
        Ok(())
    }

    /// Build the settlement report for a node
    pub fn report(&self, id: TaskId) -> Result<ExecutionReport> {
        let node = self.tree.get(id)?;
        Ok(ExecutionReport {
            success: node.status == TaskStatus::Completed,
            result: node.result.clone(),
            artifacts: node.artifacts.to_map(),
        })
    }
}

fn label(classification: Classification) -> &'static str {
    match classification {
        Classification::Simple => "SIMPLE",
        Classification::Complex => "COMPLEX",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::error::EngineError;
    use crate::strategy::ChildVerdict;

    /// Strategy double that counts classify calls and completes directly
    #[derive(Default)]
    struct CountingStrategy {
        classify_calls: AtomicUsize,
    }

    #[async_trait]
    impl ExecutionStrategy for CountingStrategy {
        async fn classify(&self, _engine: &mut Engine, _id: TaskId) -> Result<Classification> {
            self.classify_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Classification::Simple)
        }

        async fn execute_simple(&self, _engine: &mut Engine, _id: TaskId) -> Result<String> {
            Ok("done".to_string())
        }

        async fn execute_complex(&self, _engine: &mut Engine, _id: TaskId) -> Result<String> {
            Ok("done".to_string())
        }

        async fn evaluate_child(
            &self,
            _engine: &mut Engine,
            _parent: TaskId,
            _child: TaskId,
        ) -> Result<ChildVerdict> {
            Ok(ChildVerdict::Continue)
        }
    }

    #[tokio::test]
    async fn test_simple_execution_completes() {
        let strategy = Arc::new(CountingStrategy::default());
        let mut engine = Engine::new(strategy.clone(), EngineConfig::default());
        let root = engine.create_root("do the thing");

        let report = engine.execute(root).await.unwrap();

        assert!(report.success);
        assert_eq!(report.result.as_deref(), Some("done"));
        assert_eq!(engine.tree().get(root).unwrap().status, TaskStatus::Completed);
        assert_eq!(strategy.classify_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_node_at_max_depth_fails_without_classifying() {
        let strategy = Arc::new(CountingStrategy::default());
        let config = EngineConfig {
            max_depth: 0,
            ..EngineConfig::default()
        };
        let mut engine = Engine::new(strategy.clone(), config);
        let root = engine.create_root("too deep");

        let report = engine.execute(root).await.unwrap();

        assert!(!report.success);
        assert!(report.result.unwrap().contains("depth limit"));
        assert_eq!(strategy.classify_calls.load(Ordering::SeqCst), 0);
        assert!(engine.tree().get(root).unwrap().is_depth_limited());
    }

    #[tokio::test]
    async fn test_strategy_failure_becomes_failed_report() {
        struct FailingStrategy;

        #[async_trait]
        impl ExecutionStrategy for FailingStrategy {
            async fn classify(&self, _engine: &mut Engine, _id: TaskId) -> Result<Classification> {
                Ok(Classification::Simple)
            }

            async fn execute_simple(&self, _engine: &mut Engine, _id: TaskId) -> Result<String> {
                Err(EngineError::ToolNotFound {
                    tool: "saw".to_string(),
                })
            }

            async fn execute_complex(&self, _engine: &mut Engine, _id: TaskId) -> Result<String> {
                unreachable!()
            }

            async fn evaluate_child(
                &self,
                _engine: &mut Engine,
                _parent: TaskId,
                _child: TaskId,
            ) -> Result<ChildVerdict> {
                unreachable!()
            }
        }

        let mut engine = Engine::new(Arc::new(FailingStrategy), EngineConfig::default());
        let root = engine.create_root("cut the board");

        let report = engine.execute(root).await.unwrap();

        assert!(!report.success);
        assert!(report.result.unwrap().contains("tool not found: saw"));
        assert_eq!(engine.tree().get(root).unwrap().status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_classification_is_cached_across_dispatch() {
        let strategy = Arc::new(CountingStrategy::default());
        let mut engine = Engine::new(strategy.clone(), EngineConfig::default());
        let root = engine.create_root("cache me");

        engine.execute(root).await.unwrap();

        assert_eq!(
            engine.tree().get(root).unwrap().classification,
            Some(Classification::Simple)
        );
    }
}
