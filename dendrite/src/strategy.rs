//! Execution strategies: the pluggable policy behind the engine.
//!
//! A strategy decides how a node is classified, how SIMPLE work is carried
//! out, how COMPLEX work is decomposed and driven, and how a parent
//! evaluates a settled child. Strategies are injected at engine
//! construction; [`OracleStrategy`] is the default, driving every decision
//! through the validated-retry loop against the reasoning oracle.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::oracle::{InteractionKind, Oracle, SessionLogger};
use crate::protocol::{
    classification_prompt, completion_prompt, decomposition_prompt, evaluation_prompt,
    tool_plan_prompt, ClassificationReply, CompletionReply, DecompositionReply,
    EvaluationDecision, EvaluationReply, ToolPlanReply,
};
use crate::retry::{request_validated, RequestContext, Validated};
use crate::task::{Classification, PlannedSubtask, Role, TaskId};
use crate::tools::{ToolDescriptor, ToolDiscovery};
use crate::validate::{JsonValidator, ResponseValidator};

// ============================================================================
// Strategy contract
// ============================================================================

/// Verdict a strategy returns from child evaluation
#[derive(Debug)]
pub enum ChildVerdict {
    /// Advance to the next planned subtask, or completion evaluation if
    /// none remain
    Continue,

    /// The parent node is done
    Complete {
        /// Result text for the parent, when the evaluation supplied one
        result: Option<String>,
    },

    /// The parent node has failed
    Fail {
        /// Failure explanation
        reason: String,
    },

    /// Insert an ad hoc subtask to execute next
    Insert(PlannedSubtask),
}

/// Pluggable execution policy for task nodes
///
/// Methods receive the engine mutably so COMPLEX execution can recurse
/// into child nodes through it.
#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    /// Classify a node as SIMPLE or COMPLEX
    async fn classify(&self, engine: &mut Engine, id: TaskId) -> Result<Classification>;

    /// Execute a SIMPLE node to a result in one pass
    async fn execute_simple(&self, engine: &mut Engine, id: TaskId) -> Result<String>;

    /// Decompose and drive a COMPLEX node to a result
    async fn execute_complex(&self, engine: &mut Engine, id: TaskId) -> Result<String>;

    /// Evaluate a settled child on behalf of its parent
    async fn evaluate_child(
        &self,
        engine: &mut Engine,
        parent: TaskId,
        child: TaskId,
    ) -> Result<ChildVerdict>;
}

// ============================================================================
// Validators and instructions
// ============================================================================

/// One validator per oracle reply schema
pub struct ValidatorSet {
    /// Classification replies
    pub classification: Arc<dyn ResponseValidator<ClassificationReply>>,
    /// Decomposition replies
    pub decomposition: Arc<dyn ResponseValidator<DecompositionReply>>,
    /// Tool-call plan replies
    pub tool_plan: Arc<dyn ResponseValidator<ToolPlanReply>>,
    /// Parent-evaluation replies
    pub evaluation: Arc<dyn ResponseValidator<EvaluationReply>>,
    /// Completion-evaluation replies
    pub completion: Arc<dyn ResponseValidator<CompletionReply>>,
}

impl Default for ValidatorSet {
    fn default() -> Self {
        Self {
            classification: Arc::new(JsonValidator::new(
                "Classify the task.",
                json!({"classification": "SIMPLE", "reasoning": "can be done with one tool"}),
            )),
            decomposition: Arc::new(JsonValidator::new(
                "List the subtasks in execution order.",
                json!({"subtasks": [
                    {"description": "Draft summary", "outputs": "@draft"},
                    {"description": "Save @draft to file", "inputs": ["@draft"], "outputs": "@path"},
                ]}),
            )),
            tool_plan: Arc::new(JsonValidator::new(
                "Plan tool calls, or answer directly.",
                json!({"tool_calls": [
                    {"tool": "write_file", "inputs": {"content": "@draft"}, "outputs": {"path": "path"}},
                ], "direct_response": null}),
            )),
            evaluation: Arc::new(JsonValidator::new(
                "Decide the next step for the task.",
                json!({"decision": "continue", "reason": "the subtask produced what was needed"}),
            )),
            completion: Arc::new(JsonValidator::new(
                "Decide whether the task is complete.",
                json!({"complete": true, "reason": "all outputs were produced"}),
            )),
        }
    }
}

/// Format instructions for every interaction, built once at construction
///
/// Replaces the original system's process-wide lazily-built cache of
/// output-format instructions with explicit configuration.
pub struct InstructionCatalog {
    /// Classification instructions
    pub classification: String,
    /// Decomposition instructions
    pub decomposition: String,
    /// Tool-plan instructions
    pub tool_plan: String,
    /// Evaluation instructions
    pub evaluation: String,
    /// Completion instructions
    pub completion: String,
}

impl InstructionCatalog {
    fn from_validators(validators: &ValidatorSet) -> Self {
        Self {
            classification: validators.classification.format_instructions(),
            decomposition: validators.decomposition.format_instructions(),
            tool_plan: validators.tool_plan.format_instructions(),
            evaluation: validators.evaluation.format_instructions(),
            completion: validators.completion.format_instructions(),
        }
    }
}

// ============================================================================
// Oracle-driven strategy
// ============================================================================

/// Outcome of completion evaluation
enum CompletionOutcome {
    /// The node is done with this result
    Done(String),

    /// One more subtask to append and execute
    MoreWork(PlannedSubtask),
}

/// Default strategy: every decision is a validated oracle request
pub struct OracleStrategy {
    oracle: Arc<dyn Oracle>,
    discovery: Arc<dyn ToolDiscovery>,
    logger: Option<Arc<dyn SessionLogger>>,
    validators: ValidatorSet,
    instructions: InstructionCatalog,
}

impl OracleStrategy {
    /// Create a strategy with the default serde-backed validators
    pub fn new(oracle: Arc<dyn Oracle>, discovery: Arc<dyn ToolDiscovery>) -> Self {
        Self::with_validators(oracle, discovery, ValidatorSet::default())
    }

    /// Create a strategy with injected validators
    pub fn with_validators(
        oracle: Arc<dyn Oracle>,
        discovery: Arc<dyn ToolDiscovery>,
        validators: ValidatorSet,
    ) -> Self {
        let instructions = InstructionCatalog::from_validators(&validators);
        Self {
            oracle,
            discovery,
            logger: None,
            validators,
            instructions,
        }
    }

    /// Attach a session logger
    pub fn with_logger(mut self, logger: Arc<dyn SessionLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    fn request_context<'a>(
        &'a self,
        engine: &Engine,
        task: TaskId,
        kind: InteractionKind,
        description: &'a str,
    ) -> RequestContext<'a> {
        RequestContext {
            oracle: self.oracle.as_ref(),
            logger: self.logger.as_deref(),
            task,
            kind,
            description,
            max_attempts: engine.config().max_validation_attempts,
        }
    }

    /// Decompose a node once, storing the planned subtasks on it
    async fn decompose(&self, engine: &mut Engine, id: TaskId) -> Result<()> {
        let (description, artifact_names) = {
            let node = engine.tree().get(id)?;
            (
                node.description.clone(),
                node.artifacts
                    .names()
                    .into_iter()
                    .map(str::to_string)
                    .collect::<Vec<_>>(),
            )
        };
        let names: Vec<&str> = artifact_names.iter().map(String::as_str).collect();
        let prompt = decomposition_prompt(&description, &names, &self.instructions.decomposition);
        let ctx = self.request_context(engine, id, InteractionKind::Decomposition, &description);

        match request_validated(&ctx, self.validators.decomposition.as_ref(), &prompt).await? {
            Validated::Parsed(reply) => {
                if reply.subtasks.is_empty() {
                    return Err(EngineError::DecompositionEmpty {
                        task_id: id.to_string(),
                    });
                }
                let planned: Vec<PlannedSubtask> = reply
                    .subtasks
                    .into_iter()
                    .map(|spec| spec.into_planned())
                    .collect();
                info!(task = %id, subtasks = planned.len(), "task decomposed");

                let node = engine.tree_mut().get_mut(id)?;
                node.record_with_metadata(
                    Role::Assistant,
                    format!("decomposed into {} subtask(s)", planned.len()),
                    Some(json!({"subtasks": planned})),
                );
                node.planned_subtasks = planned;
                node.is_decomposed = true;
                Ok(())
            }
            Validated::Fallback(text) => Err(EngineError::Strategy { message: text }),
        }
    }

    /// Completion evaluation once no planned subtasks remain
    async fn evaluate_completion(
        &self,
        engine: &mut Engine,
        id: TaskId,
    ) -> Result<CompletionOutcome> {
        let (description, executed, artifact_names) = {
            let node = engine.tree().get(id)?;
            (
                node.description.clone(),
                node.planned_subtasks.clone(),
                node.artifacts
                    .names()
                    .into_iter()
                    .map(str::to_string)
                    .collect::<Vec<_>>(),
            )
        };
        let names: Vec<&str> = artifact_names.iter().map(String::as_str).collect();
        let prompt = completion_prompt(&description, &executed, &names, &self.instructions.completion);
        let ctx =
            self.request_context(engine, id, InteractionKind::CompletionEvaluation, &description);

        let outcome =
            match request_validated(&ctx, self.validators.completion.as_ref(), &prompt).await? {
                Validated::Parsed(reply) => {
                    if reply.complete {
                        CompletionOutcome::Done(reply.reason.unwrap_or_else(|| {
                            format!("completed {} subtask(s)", executed.len())
                        }))
                    } else {
                        match reply.additional_subtask {
                            Some(spec) => CompletionOutcome::MoreWork(spec.into_planned()),
                            // Not complete but no concrete new work either:
                            // completing with the explanation beats looping.
                            None => CompletionOutcome::Done(reply.reason.unwrap_or_else(|| {
                                format!("completed {} subtask(s)", executed.len())
                            })),
                        }
                    }
                }
                Validated::Fallback(text) => CompletionOutcome::Done(text),
            };

        if let CompletionOutcome::MoreWork(subtask) = &outcome {
            engine.tree_mut().get_mut(id)?.record(
                Role::Assistant,
                format!("completion evaluation added subtask: {}", subtask.description),
            );
        }
        Ok(outcome)
    }

    /// Execute one planned tool call, recording the outcome in the batch
    ///
    /// Tool-execution exceptions are caught per call; only an unresolvable
    /// tool name aborts the task.
    async fn run_tool_call(
        &self,
        engine: &mut Engine,
        id: TaskId,
        call: &crate::protocol::PlannedToolCall,
        discovered: &[ToolDescriptor],
        records: &mut Vec<Value>,
    ) -> Result<()> {
        let tool = self
            .discovery
            .resolve(&call.tool)
            .ok_or_else(|| EngineError::ToolNotFound {
                tool: call.tool.clone(),
            })?;
        let descriptor = discovered.iter().find(|t| t.name == call.tool);

        let inputs = engine
            .tree()
            .get(id)?
            .artifacts
            .resolve_references(&call.inputs);
        debug!(task = %id, tool = %call.tool, "executing tool call");

        match tool.execute(inputs).await {
            Ok(output) if output.success => {
                let node = engine.tree_mut().get_mut(id)?;
                for (artifact_name, field) in &call.outputs {
                    let value = if field.is_empty() {
                        output.data.clone()
                    } else {
                        output.data.get(field).cloned().unwrap_or(Value::Null)
                    };
                    match descriptor {
                        Some(descriptor) => {
                            node.artifacts
                                .store_tool_result(artifact_name, value, descriptor)
                        }
                        None => node.artifacts.store(artifact_name, value, None, None),
                    }
                }
                node.record_with_metadata(
                    Role::Tool,
                    format!("tool {} succeeded", call.tool),
                    Some(output.data.clone()),
                );
                records.push(json!({"tool": call.tool, "success": true, "data": output.data}));
            }
            Ok(output) => {
                let error = output.error.unwrap_or_else(|| "tool reported failure".to_string());
                warn!(task = %id, tool = %call.tool, error = %error, "tool call failed");
                engine
                    .tree_mut()
                    .get_mut(id)?
                    .record(Role::Tool, format!("tool {} failed: {error}", call.tool));
                records.push(json!({"tool": call.tool, "success": false, "error": error}));
            }
            Err(err) => {
                warn!(task = %id, tool = %call.tool, error = %err, "tool call raised an error");
                engine
                    .tree_mut()
                    .get_mut(id)?
                    .record(Role::Tool, format!("tool {} failed: {err}", call.tool));
                records.push(json!({"tool": call.tool, "success": false, "error": err.to_string()}));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ExecutionStrategy for OracleStrategy {
    async fn classify(&self, engine: &mut Engine, id: TaskId) -> Result<Classification> {
        let description = engine.tree().get(id)?.description.clone();
        let prompt = classification_prompt(&description, &self.instructions.classification);
        let ctx = self.request_context(engine, id, InteractionKind::Classification, &description);

        match request_validated(&ctx, self.validators.classification.as_ref(), &prompt).await? {
            Validated::Parsed(reply) => Ok(reply.classification),
            Validated::Fallback(_) => {
                // An unclassifiable task still gets one direct attempt.
                warn!(task = %id, "classification fell back; treating task as SIMPLE");
                Ok(Classification::Simple)
            }
        }
    }

    async fn execute_simple(&self, engine: &mut Engine, id: TaskId) -> Result<String> {
        let (description, artifact_names) = {
            let node = engine.tree().get(id)?;
            (
                node.description.clone(),
                node.artifacts
                    .names()
                    .into_iter()
                    .map(str::to_string)
                    .collect::<Vec<_>>(),
            )
        };

        let discovered = self.discovery.discover(&description).await?;
        engine.tree_mut().get_mut(id)?.record(
            Role::System,
            format!("discovered {} tool(s)", discovered.len()),
        );

        let names: Vec<&str> = artifact_names.iter().map(String::as_str).collect();
        let prompt = tool_plan_prompt(
            &description,
            &discovered,
            &names,
            &self.instructions.tool_plan,
        );
        let ctx = self.request_context(engine, id, InteractionKind::ToolPlanning, &description);

        let plan = match request_validated(&ctx, self.validators.tool_plan.as_ref(), &prompt).await?
        {
            Validated::Parsed(plan) => plan,
            Validated::Fallback(text) => {
                // The fallback explanation is the result, not an error.
                engine
                    .tree_mut()
                    .get_mut(id)?
                    .record(Role::Assistant, text.clone());
                return Ok(text);
            }
        };

        engine.tree_mut().get_mut(id)?.record_with_metadata(
            Role::Assistant,
            format!("planned {} tool call(s)", plan.tool_calls.len()),
            serde_json::to_value(&plan).ok(),
        );

        if plan.tool_calls.is_empty() {
            return Ok(plan
                .direct_response
                .unwrap_or_else(|| "no action required".to_string()));
        }

        let mut records = Vec::with_capacity(plan.tool_calls.len());
        for call in &plan.tool_calls {
            self.run_tool_call(engine, id, call, &discovered, &mut records)
                .await?;
        }

        match plan.direct_response {
            Some(text) => Ok(text),
            None => Ok(serde_json::to_string(&records).unwrap_or_else(|_| {
                format!("executed {} tool call(s)", records.len())
            })),
        }
    }

    async fn execute_complex(&self, engine: &mut Engine, id: TaskId) -> Result<String> {
        if !engine.tree().get(id)?.is_decomposed {
            self.decompose(engine, id).await?;
        }

        loop {
            let (cursor, planned_len) = {
                let node = engine.tree().get(id)?;
                (node.current_subtask, node.planned_subtasks.len())
            };

            if cursor >= planned_len {
                match self.evaluate_completion(engine, id).await? {
                    CompletionOutcome::Done(result) => return Ok(result),
                    CompletionOutcome::MoreWork(subtask) => {
                        engine.tree_mut().get_mut(id)?.planned_subtasks.push(subtask);
                        continue;
                    }
                }
            }

            let planned = engine.tree().get(id)?.planned_subtasks[cursor].clone();
            debug!(task = %id, subtask = %planned.description, index = cursor, "starting subtask");

            let child = engine.tree_mut().create_child(
                id,
                planned.description,
                planned.inputs,
                planned.outputs,
            )?;
            engine.tree_mut().handoff_inputs(id, child)?;

            engine.execute(child).await?;

            // The cursor advances only after the subtask has fully settled.
            engine.tree_mut().get_mut(id)?.current_subtask = cursor + 1;

            match self.evaluate_child(engine, id, child).await? {
                ChildVerdict::Continue => continue,
                ChildVerdict::Complete { result } => {
                    return Ok(result.unwrap_or_else(|| {
                        format!("completed after {} subtask(s)", cursor + 1)
                    }));
                }
                ChildVerdict::Fail { reason } => {
                    return Err(EngineError::EvaluationFailed { reason });
                }
                ChildVerdict::Insert(subtask) => {
                    let node = engine.tree_mut().get_mut(id)?;
                    let at = node.current_subtask.min(node.planned_subtasks.len());
                    node.record(
                        Role::Assistant,
                        format!("evaluation inserted subtask: {}", subtask.description),
                    );
                    node.planned_subtasks.insert(at, subtask);
                    continue;
                }
            }
        }
    }

    async fn evaluate_child(
        &self,
        engine: &mut Engine,
        parent: TaskId,
        child: TaskId,
    ) -> Result<ChildVerdict> {
        // Goal outputs flow to the parent before anything consumes them.
        engine.tree_mut().deliver_outputs(child, parent)?;

        let (child_description, child_status, child_result, depth_limited) = {
            let node = engine.tree().get(child)?;
            (
                node.description.clone(),
                node.status.to_string(),
                node.result.clone(),
                node.is_depth_limited(),
            )
        };

        // A depth-limited child fails the parent outright; no oracle
        // consultation on the way up.
        if depth_limited {
            let child_depth = engine.tree().get(child)?.depth;
            return Err(EngineError::DepthLimitExceeded {
                depth: child_depth,
                max_depth: engine.config().max_depth,
            });
        }

        let (description, remaining, artifact_names) = {
            let node = engine.tree().get(parent)?;
            (
                node.description.clone(),
                node.planned_subtasks.len().saturating_sub(node.current_subtask),
                node.artifacts
                    .names()
                    .into_iter()
                    .map(str::to_string)
                    .collect::<Vec<_>>(),
            )
        };
        let names: Vec<&str> = artifact_names.iter().map(String::as_str).collect();
        let prompt = evaluation_prompt(
            &description,
            &child_description,
            &child_status,
            child_result.as_deref(),
            remaining,
            &names,
            &self.instructions.evaluation,
        );
        let ctx = self.request_context(engine, parent, InteractionKind::ChildEvaluation, &description);

        let verdict =
            match request_validated(&ctx, self.validators.evaluation.as_ref(), &prompt).await? {
                Validated::Parsed(reply) => match reply.decision {
                    EvaluationDecision::Continue => ChildVerdict::Continue,
                    EvaluationDecision::Complete => ChildVerdict::Complete {
                        result: reply.result.or(reply.reason),
                    },
                    EvaluationDecision::Fail => ChildVerdict::Fail {
                        reason: reply
                            .reason
                            .unwrap_or_else(|| "evaluation decided to fail the task".to_string()),
                    },
                    EvaluationDecision::CreateSubtask => match reply.subtask {
                        Some(spec) => ChildVerdict::Insert(spec.into_planned()),
                        None => {
                            warn!(task = %parent, "create-subtask decision without a subtask; continuing");
                            ChildVerdict::Continue
                        }
                    },
                },
                Validated::Fallback(_) => {
                    warn!(task = %parent, "child evaluation fell back; continuing");
                    ChildVerdict::Continue
                }
            };

        let decision = match &verdict {
            ChildVerdict::Continue => "continue",
            ChildVerdict::Complete { .. } => "complete",
            ChildVerdict::Fail { .. } => "fail",
            ChildVerdict::Insert(_) => "create-subtask",
        };
        engine
            .tree_mut()
            .get_mut(parent)?
            .record(Role::Assistant, format!("evaluation decision: {decision}"));
        Ok(verdict)
    }
}
