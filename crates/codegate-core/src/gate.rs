//! Safety Gate — static screening of snippet source before execution
//!
//! Matches the raw snippet text against an ordered deny-list of
//! capability-escalation patterns: dynamic evaluation, construction of new
//! callable code, module loading, and references to ambient host objects.
//! Text matching is evadable by obfuscated equivalents. It stops naive
//! misuse by generated code; it is not a hard isolation boundary.

use tracing::{debug, warn};

use crate::config::GateConfig;
use crate::error::GatewayError;

/// Built-in deny patterns, evaluated in this order
const BUILTIN_PATTERNS: &[(&str, &str)] = &[
    ("dynamic_eval", r"\beval\s*\("),
    ("function_constructor", r"\bnew\s+Function\b|\bFunction\s*\("),
    (
        "constructor_access",
        r#"\.\s*constructor\b|\[\s*["'`]constructor["'`]\s*\]"#,
    ),
    (
        "dynamic_import",
        r"(?m)\bimport\s*\(|\brequire\s*\(|\bimportScripts\s*\(|^\s*import\s+.*\bfrom\s",
    ),
    (
        "ambient_globals",
        r"\bglobalThis\b|(?:^|[^.\w$])(?:global|window|self|process|Deno|Bun)\s*(?:\?\.|\.|\[)",
    ),
    (
        "prototype_tampering",
        r"__proto__|__(?:define|lookup)(?:Getter|Setter)__",
    ),
];

struct CompiledDenyPattern {
    name: String,
    regex: regex::Regex,
}

/// Ordered set of deny predicates applied to snippet text
pub struct SafetyGate {
    patterns: Vec<CompiledDenyPattern>,
}

impl Default for SafetyGate {
    fn default() -> Self {
        Self::new()
    }
}

impl SafetyGate {
    /// Gate with only the built-in deny set
    pub fn new() -> Self {
        Self::with_patterns(
            BUILTIN_PATTERNS
                .iter()
                .map(|(name, pattern)| (name.to_string(), pattern.to_string())),
        )
    }

    /// Built-in deny set followed by the configured extra patterns
    pub fn from_config(config: &GateConfig) -> Self {
        let extras = config
            .extra_patterns
            .iter()
            .enumerate()
            .map(|(i, pattern)| (format!("custom_{}", i), pattern.clone()));
        let builtins = BUILTIN_PATTERNS
            .iter()
            .map(|(name, pattern)| (name.to_string(), pattern.to_string()));
        Self::with_patterns(builtins.chain(extras))
    }

    fn with_patterns(raw: impl IntoIterator<Item = (String, String)>) -> Self {
        let patterns = raw
            .into_iter()
            .filter_map(|(name, pattern)| match regex::Regex::new(&pattern) {
                Ok(regex) => Some(CompiledDenyPattern { name, regex }),
                Err(e) => {
                    warn!("Failed to compile deny pattern '{}': {}", name, e);
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    /// Name of the first deny rule the snippet matches, if any
    pub fn matched_rule(&self, snippet: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|p| p.regex.is_match(snippet))
            .map(|p| p.name.as_str())
    }

    /// Screen a snippet. Rejection carries the fixed validation message only.
    pub fn check(&self, snippet: &str) -> Result<(), GatewayError> {
        match self.matched_rule(snippet) {
            Some(rule) => {
                warn!("Safety gate: rejected snippet (rule='{}')", rule);
                Err(GatewayError::Validation)
            }
            None => {
                debug!("Safety gate: passed {} rules", self.patterns.len());
                Ok(())
            }
        }
    }

    pub fn rule_count(&self) -> usize {
        self.patterns.len()
    }
}
