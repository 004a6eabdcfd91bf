use serde::{Deserialize, Serialize};

/// Tunable resource ceilings for a single interpreter instance.
///
/// These correspond to the server's `@config`-style evaluation limits. A
/// host deserializes this from its configuration file; the defaults match
/// the stock server values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Maximum nesting depth of `process_expression` calls before the
    /// sticky call-limit trip.
    pub max_call_depth: u32,
    /// Maximum function invocations within one top-level evaluation.
    pub max_function_invocations: u64,
    /// Maximum function recursion depth within one top-level evaluation.
    pub max_function_recursion: u32,
    /// Maximum multi-character named Q-registers per scope.
    pub max_named_registers: usize,
    /// Hard cap on the evaluator's output buffer, in bytes.
    pub buffer_len: usize,
    /// Maximum `@include`-style tail substitution depth in the queue.
    pub max_include_depth: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_call_depth: 100,
            max_function_invocations: 100_000,
            max_function_recursion: 100,
            max_named_registers: 100,
            buffer_len: 8192,
            max_include_depth: 10,
        }
    }
}
