//! Artifact store and the parent/child goal-flow contract.
//!
//! Every task node owns its artifact store exclusively. Cross-node
//! visibility happens only through [`ArtifactStore::receive_from`] before a
//! child starts and [`ArtifactStore::deliver_to`] after it completes; sibling
//! nodes never share a store.
//!
//! Artifacts are referenced from prompts and tool inputs with `"@name"`
//! tokens, substituted by [`ArtifactStore::resolve_references`].

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::tools::ToolDescriptor;

/// Type hints recognized in bare `name_typehint` artifact specs
const TYPE_HINTS: &[&str] = &[
    "json", "code", "text", "config", "schema", "data", "file", "url", "result",
];

fn reference_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@([A-Za-z_][A-Za-z0-9_-]*)").expect("valid regex"))
}

// ============================================================================
// Artifact
// ============================================================================

/// A named, typed intermediate value produced by a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Stored value
    pub value: Value,

    /// Declared or inferred type (e.g. `json`, `text`, `file`)
    pub kind: Option<String>,

    /// Human-readable description
    pub description: Option<String>,
}

// ============================================================================
// Artifact specifications
// ============================================================================

/// A parsed artifact declaration from a goal-input/output or subtask spec
///
/// Accepted forms: `"@name"`, `"name:type"`, `"name (type)"`, or a bare
/// `"name_typehint"` where the hint is one of a fixed set. Anything else
/// parses to a name with no type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSpec {
    /// Artifact name without any `@` prefix
    pub name: String,

    /// Declared type, if the spec carried one
    pub kind: Option<String>,

    /// Optional description
    pub description: Option<String>,
}

impl ArtifactSpec {
    /// Create a spec with just a name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: None,
            description: None,
        }
    }

    /// Parse a single artifact spec string
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();

        if let Some(rest) = raw.strip_prefix('@') {
            return Self::named(rest.trim());
        }

        if let Some((name, kind)) = raw.split_once(':') {
            let name = name.trim();
            let kind = kind.trim();
            if !name.is_empty() && !kind.is_empty() {
                return Self {
                    name: name.to_string(),
                    kind: Some(kind.to_string()),
                    description: None,
                };
            }
        }

        static PAREN: OnceLock<Regex> = OnceLock::new();
        let paren = PAREN.get_or_init(|| {
            Regex::new(r"^([A-Za-z_][A-Za-z0-9_-]*)\s*\(([A-Za-z0-9_-]+)\)$").expect("valid regex")
        });
        if let Some(caps) = paren.captures(raw) {
            return Self {
                name: caps[1].to_string(),
                kind: Some(caps[2].to_string()),
                description: None,
            };
        }

        if let Some((_, hint)) = raw.rsplit_once('_') {
            if TYPE_HINTS.contains(&hint) {
                return Self {
                    name: raw.to_string(),
                    kind: Some(hint.to_string()),
                    description: None,
                };
            }
        }

        Self::named(raw)
    }

    /// Parse a list of spec strings
    pub fn parse_all<S: AsRef<str>>(raw: &[S]) -> Vec<Self> {
        raw.iter().map(|s| Self::parse(s.as_ref())).collect()
    }
}

// ============================================================================
// Artifact store
// ============================================================================

/// Per-node named artifact store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactStore {
    entries: HashMap<String, Artifact>,
}

impl ArtifactStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value under a name, replacing any previous entry
    pub fn store(
        &mut self,
        name: impl Into<String>,
        value: Value,
        kind: Option<String>,
        description: Option<String>,
    ) {
        let name = normalize(name.into());
        debug!(artifact = %name, "storing artifact");
        self.entries.insert(
            name,
            Artifact {
                value,
                kind,
                description,
            },
        );
    }

    /// Store a tool result, inferring a type from the tool's declared
    /// output schema when available
    pub fn store_tool_result(&mut self, name: impl Into<String>, value: Value, tool: &ToolDescriptor) {
        let inferred = tool
            .output_schema
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_string);
        self.store(
            name,
            value,
            inferred,
            Some(format!("output of tool {}", tool.name)),
        );
    }

    /// Look up an artifact by name (a leading `@` is tolerated)
    pub fn get(&self, name: &str) -> Option<&Artifact> {
        self.entries.get(name.trim_start_matches('@'))
    }

    /// Whether an artifact with this name exists
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Names of all stored artifacts
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Number of stored artifacts
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(name, artifact)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Artifact)> {
        self.entries.iter()
    }

    /// Clone the store contents into a plain map
    pub fn to_map(&self) -> HashMap<String, Artifact> {
        self.entries.clone()
    }

    /// Recursively replace `"@name"` tokens with stored values
    ///
    /// A string that is exactly one reference is replaced by the stored
    /// value itself, preserving its JSON type. References embedded inside a
    /// larger string are replaced with a string rendering. Unresolved
    /// tokens are left untouched.
    pub fn resolve_references(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => self.resolve_string(s),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.resolve_references(v)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve_references(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn resolve_string(&self, s: &str) -> Value {
        let trimmed = s.trim();
        if let Some(rest) = trimmed.strip_prefix('@') {
            if let Some(artifact) = self.entries.get(rest) {
                return artifact.value.clone();
            }
        }

        let replaced = reference_regex().replace_all(s, |caps: &regex::Captures<'_>| {
            match self.entries.get(&caps[1]) {
                Some(artifact) => render(&artifact.value),
                None => caps[0].to_string(),
            }
        });
        Value::String(replaced.into_owned())
    }

    /// Copy the named entries from a parent store into this one
    ///
    /// Called on a child store before the child begins executing; missing
    /// names are skipped silently.
    pub fn receive_from<S: AsRef<str>>(&mut self, parent: &ArtifactStore, names: &[S]) {
        for name in names {
            let name = name.as_ref().trim_start_matches('@');
            if let Some(artifact) = parent.entries.get(name) {
                self.entries.insert(name.to_string(), artifact.clone());
            }
        }
    }

    /// Copy declared goal outputs from this store into the parent store
    ///
    /// Called after the owning child completes. A declared-but-unproduced
    /// output is logged, not an error.
    pub fn deliver_to(&self, parent: &mut ArtifactStore, goal_outputs: &[ArtifactSpec]) {
        for spec in goal_outputs {
            match self.entries.get(&spec.name) {
                Some(artifact) => {
                    parent.entries.insert(spec.name.clone(), artifact.clone());
                }
                None => {
                    warn!(artifact = %spec.name, "declared goal output was not produced");
                }
            }
        }
    }
}

fn normalize(name: String) -> String {
    match name.strip_prefix('@') {
        Some(rest) => rest.to_string(),
        None => name,
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor(output_type: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: "writer".to_string(),
            description: "writes things".to_string(),
            confidence: 0.9,
            input_schema: json!({"type": "object"}),
            output_schema: json!({"type": output_type}),
        }
    }

    #[test]
    fn test_spec_grammar() {
        assert_eq!(ArtifactSpec::parse("@draft"), ArtifactSpec::named("draft"));
        assert_eq!(
            ArtifactSpec::parse("summary:text"),
            ArtifactSpec {
                name: "summary".to_string(),
                kind: Some("text".to_string()),
                description: None,
            }
        );
        assert_eq!(
            ArtifactSpec::parse("report (json)"),
            ArtifactSpec {
                name: "report".to_string(),
                kind: Some("json".to_string()),
                description: None,
            }
        );
        assert_eq!(
            ArtifactSpec::parse("settings_config"),
            ArtifactSpec {
                name: "settings_config".to_string(),
                kind: Some("config".to_string()),
                description: None,
            }
        );
        // unmatched forms default to a bare name
        assert_eq!(
            ArtifactSpec::parse("draft_chapter"),
            ArtifactSpec::named("draft_chapter")
        );
    }

    #[test]
    fn test_exact_reference_preserves_type() {
        let mut store = ArtifactStore::new();
        store.store("count", json!(42), None, None);
        let resolved = store.resolve_references(&json!({"n": "@count"}));
        assert_eq!(resolved, json!({"n": 42}));
    }

    #[test]
    fn test_embedded_reference_renders_string() {
        let mut store = ArtifactStore::new();
        store.store("draft", json!("two paragraphs"), None, None);
        let resolved = store.resolve_references(&json!("Save @draft to disk"));
        assert_eq!(resolved, json!("Save two paragraphs to disk"));
    }

    #[test]
    fn test_unresolved_reference_left_untouched() {
        let store = ArtifactStore::new();
        let resolved = store.resolve_references(&json!(["@missing", {"x": "@also_missing"}]));
        assert_eq!(resolved, json!(["@missing", {"x": "@also_missing"}]));
    }

    #[test]
    fn test_store_tool_result_infers_kind() {
        let mut store = ArtifactStore::new();
        store.store_tool_result("path", json!("/tmp/out.txt"), &descriptor("string"));
        let artifact = store.get("path").unwrap();
        assert_eq!(artifact.kind.as_deref(), Some("string"));
    }

    #[test]
    fn test_receive_copies_only_named_entries() {
        let mut parent = ArtifactStore::new();
        parent.store("draft", json!("text"), None, None);
        parent.store("secret", json!("hidden"), None, None);

        let mut child = ArtifactStore::new();
        child.receive_from(&parent, &["@draft", "missing"]);

        assert!(child.contains("draft"));
        assert!(!child.contains("secret"));
        assert!(!child.contains("missing"));
    }

    #[test]
    fn test_deliver_copies_exactly_produced_outputs() {
        let mut child = ArtifactStore::new();
        child.store("draft", json!("text"), None, None);
        child.store("scratch", json!("junk"), None, None);

        let mut parent = ArtifactStore::new();
        let outputs = vec![ArtifactSpec::named("draft"), ArtifactSpec::named("path")];
        child.deliver_to(&mut parent, &outputs);

        assert_eq!(parent.get("draft").unwrap().value, json!("text"));
        // absent names are not copied and do not error
        assert!(!parent.contains("path"));
        // undeclared entries stay private to the child
        assert!(!parent.contains("scratch"));
    }
}
