//! Response validation contract and the serde-backed default validator.
//!
//! Schema validation is an opaque dependency of the engine: the retry loop
//! only calls [`ResponseValidator::process`] and
//! [`ResponseValidator::format_instructions`]. [`JsonValidator`] is the
//! shipped implementation, which extracts the JSON payload from raw oracle
//! text (code fences and surrounding prose tolerated) and deserializes it
//! into the target type.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::marker::PhantomData;

/// One validation failure, with an optional fix suggestion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Location of the problem, when known (e.g. a field path)
    pub path: Option<String>,

    /// What went wrong
    pub message: String,

    /// How to fix it
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    /// Issue with just a message
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            path: None,
            message: message.into(),
            suggestion: None,
        }
    }

    /// Attach a suggestion
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// Validates raw oracle text against one reply schema
pub trait ResponseValidator<T>: Send + Sync {
    /// Parse and validate raw oracle text
    fn process(&self, raw: &str) -> Result<T, Vec<ValidationIssue>>;

    /// Format instructions describing the expected reply shape
    fn format_instructions(&self) -> String;
}

/// Serde-backed validator for JSON replies
pub struct JsonValidator<T> {
    instructions: String,
    example: Value,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonValidator<T> {
    /// Create a validator with shape instructions and an example payload
    pub fn new(instructions: impl Into<String>, example: Value) -> Self {
        Self {
            instructions: instructions.into(),
            example,
            _marker: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> ResponseValidator<T> for JsonValidator<T> {
    fn process(&self, raw: &str) -> Result<T, Vec<ValidationIssue>> {
        let payload = extract_json(raw).ok_or_else(|| {
            vec![
                ValidationIssue::message("no JSON object or array found in the response")
                    .with_suggestion("reply with a single JSON payload, optionally fenced"),
            ]
        })?;

        serde_json::from_str(payload).map_err(|err| {
            vec![ValidationIssue {
                path: None,
                message: format!("JSON does not match the expected shape: {err}"),
                suggestion: Some(format!(
                    "follow this example exactly: {}",
                    self.example
                )),
            }]
        })
    }

    fn format_instructions(&self) -> String {
        format!(
            "{}\nRespond with a single JSON payload matching this example:\n{}",
            self.instructions,
            serde_json::to_string_pretty(&self.example).unwrap_or_else(|_| self.example.to_string())
        )
    }
}

/// Locate the JSON payload inside raw oracle text
///
/// Prefers a fenced block; otherwise takes the outermost `{...}` or
/// `[...]` span.
fn extract_json(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();

    if let Some(fenced) = extract_fenced(trimmed) {
        return Some(fenced);
    }

    let object = span(trimmed, '{', '}');
    let array = span(trimmed, '[', ']');
    match (object, array) {
        (Some(o), Some(a)) => {
            // prefer whichever starts first
            let o_start = trimmed.find('{').unwrap_or(usize::MAX);
            let a_start = trimmed.find('[').unwrap_or(usize::MAX);
            Some(if o_start <= a_start { o } else { a })
        }
        (Some(o), None) => Some(o),
        (None, Some(a)) => Some(a),
        (None, None) => None,
    }
}

fn extract_fenced(raw: &str) -> Option<&str> {
    let start = raw.find("```")?;
    let after = &raw[start + 3..];
    let body_start = after.find('\n')?;
    let body = &after[body_start + 1..];
    let end = body.find("```")?;
    let inner = body[..end].trim();
    if inner.is_empty() {
        None
    } else {
        Some(inner)
    }
}

fn span(raw: &str, open: char, close: char) -> Option<&str> {
    let start = raw.find(open)?;
    let end = raw.rfind(close)?;
    if end > start {
        Some(&raw[start..=end])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Reply {
        answer: String,
    }

    fn validator() -> JsonValidator<Reply> {
        JsonValidator::new("Answer the question.", json!({"answer": "..."}))
    }

    #[test]
    fn test_plain_json() {
        let reply: Reply = validator().process(r#"{"answer": "42"}"#).unwrap();
        assert_eq!(reply.answer, "42");
    }

    #[test]
    fn test_fenced_json_with_prose() {
        let raw = "Sure, here you go:\n```json\n{\"answer\": \"42\"}\n```\nLet me know!";
        let reply: Reply = validator().process(raw).unwrap();
        assert_eq!(reply.answer, "42");
    }

    #[test]
    fn test_embedded_json() {
        let raw = "The result is {\"answer\": \"42\"} as requested.";
        let reply: Reply = validator().process(raw).unwrap();
        assert_eq!(reply.answer, "42");
    }

    #[test]
    fn test_missing_json_yields_issue() {
        let issues = validator().process("no structured data here").unwrap_err();
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message.contains("no JSON"));
        assert!(issues[0].suggestion.is_some());
    }

    #[test]
    fn test_shape_mismatch_includes_example_suggestion() {
        let issues = validator().process(r#"{"wrong": true}"#).unwrap_err();
        assert!(issues[0].message.contains("expected shape"));
        assert!(issues[0].suggestion.as_ref().unwrap().contains("answer"));
    }

    #[test]
    fn test_format_instructions_carry_example() {
        let text = ResponseValidator::<Reply>::format_instructions(&validator());
        assert!(text.contains("Answer the question."));
        assert!(text.contains("\"answer\""));
    }
}
