//! Validated oracle-response retry loop.
//!
//! Every schema-bound oracle interaction goes through [`request_validated`]:
//! call the oracle, validate the raw text, and on failure retry with a
//! numbered list of validation issues prepended to the original prompt.
//! Exhausting the attempt budget never produces an error; it produces a
//! deterministic fallback string shaped by whether the task description
//! reads like a question.

use regex::Regex;
use serde_json::json;
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::error::Result;
use crate::oracle::{InteractionKind, Oracle, SessionLogger};
use crate::task::TaskId;
use crate::validate::{ResponseValidator, ValidationIssue};

fn question_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(what|explain)\b|\?").expect("valid regex"))
}

/// Outcome of a validated oracle request
#[derive(Debug)]
pub enum Validated<T> {
    /// The oracle produced a schema-valid reply within the attempt budget
    Parsed(T),

    /// Every attempt failed validation; a deterministic explanation stands
    /// in for the reply
    Fallback(String),
}

/// Everything a validated request needs besides the validator itself
pub struct RequestContext<'a> {
    /// The reasoning oracle
    pub oracle: &'a dyn Oracle,

    /// Optional per-interaction logger
    pub logger: Option<&'a dyn SessionLogger>,

    /// Task the interaction belongs to
    pub task: TaskId,

    /// Which protocol step this is
    pub kind: InteractionKind,

    /// Goal text of the task, used to shape the fallback
    pub description: &'a str,

    /// Maximum oracle calls (initial call + retries)
    pub max_attempts: usize,
}

/// Run the validated-retry loop for one interaction
///
/// Oracle transport errors propagate; validation failure never does.
pub async fn request_validated<T>(
    ctx: &RequestContext<'_>,
    validator: &dyn ResponseValidator<T>,
    base_prompt: &str,
) -> Result<Validated<T>> {
    let max_attempts = ctx.max_attempts.max(1);
    let mut issues: Vec<ValidationIssue> = Vec::new();

    for attempt in 1..=max_attempts {
        let prompt = if issues.is_empty() {
            base_prompt.to_string()
        } else {
            feedback_prompt(&issues, base_prompt)
        };

        let response = ctx.oracle.complete(&prompt).await?;

        if let Some(logger) = ctx.logger {
            logger
                .log_interaction(
                    ctx.task,
                    ctx.kind,
                    &prompt,
                    &response,
                    Some(json!({"attempt": attempt, "max_attempts": max_attempts})),
                )
                .await;
        }

        match validator.process(&response) {
            Ok(parsed) => {
                debug!(task = %ctx.task, kind = %ctx.kind, attempt, "oracle reply validated");
                return Ok(Validated::Parsed(parsed));
            }
            Err(new_issues) => {
                warn!(
                    task = %ctx.task,
                    kind = %ctx.kind,
                    attempt,
                    issues = new_issues.len(),
                    "oracle reply failed validation"
                );
                issues = new_issues;
            }
        }
    }

    Ok(Validated::Fallback(fallback_text(
        ctx.description,
        max_attempts,
    )))
}

/// Rebuild the prompt with numbered validation issues ahead of the original
fn feedback_prompt(issues: &[ValidationIssue], base_prompt: &str) -> String {
    let mut feedback = String::from("Your previous response failed validation:\n");
    for (i, issue) in issues.iter().enumerate() {
        feedback.push_str(&format!("{}. ", i + 1));
        if let Some(path) = &issue.path {
            feedback.push_str(&format!("{path}: "));
        }
        feedback.push_str(&issue.message);
        if let Some(suggestion) = &issue.suggestion {
            feedback.push_str(&format!(" (suggestion: {suggestion})"));
        }
        feedback.push('\n');
    }
    feedback.push_str("Please correct these issues and respond again.\n\n");
    feedback.push_str(base_prompt);
    feedback
}

/// Deterministic fallback once all attempts are exhausted
fn fallback_text(description: &str, attempts: usize) -> String {
    if question_regex().is_match(description) {
        format!(
            "I'm sorry, I couldn't produce a well-formed answer to \"{description}\". \
             The reasoning service replied {attempts} time(s) but none of the replies \
             passed validation, so no structured answer is available."
        )
    } else {
        format!(
            "Unable to produce a response in the required format after {attempts} \
             attempt(s) for task \"{description}\"."
        )
    }
}
