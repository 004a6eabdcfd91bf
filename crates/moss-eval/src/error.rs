//! Evaluator errors and in-band sentinel texts.
//!
//! Softcode errors are part of the language's observable contract:
//! they are literal `#-1 ...` strings written into the output stream so
//! scripts can branch on them. The only condition that propagates as a
//! Rust error is CPU-budget exhaustion, which must unwind every pending
//! nested parse promptly.

use thiserror::Error;

/// Errors that unwind the recursive parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EvalError {
    /// The per-entry CPU budget ran out. Cooperative, not fatal: the
    /// caller abandons the remainder of the entry and yields.
    #[error("cpu budget exhausted")]
    CpuLimit,
}

pub type EvalResult<T> = Result<T, EvalError>;

/// Sticky call-depth marker.
pub const E_CALL_LIMIT: &str = "#-1 CALL LIMIT EXCEEDED";
/// Sticky invocation-count marker.
pub const E_INVOKE_LIMIT: &str = "#-1 FUNCTION INVOCATION LIMIT EXCEEDED";
/// Sticky recursion-depth marker.
pub const E_RECURSE_LIMIT: &str = "#-1 FUNCTION RECURSION LIMIT EXCEEDED";
/// Register ceiling, surfaced from the register store's sentinel.
pub const E_TOO_MANY_REGS: &str = "#-1 TOO MANY REGISTERS";
/// Permission check failed (after argument evaluation).
pub const E_PERM_DENIED: &str = "#-1 PERMISSION DENIED";
/// One-time notice when the CPU budget trips mid-evaluation.
pub const CPU_NOTICE: &str = "WARNING: CPU usage exceeded.";

/// `#-1 FUNCTION (NAME) NOT FOUND`
pub fn e_not_found(name: &str) -> String {
    format!("#-1 FUNCTION ({}) NOT FOUND", name.to_ascii_uppercase())
}

/// `#-1 FUNCTION (NAME) DISABLED`
pub fn e_disabled(name: &str) -> String {
    format!("#-1 FUNCTION ({}) DISABLED", name.to_ascii_uppercase())
}

/// The three arity-mismatch formats: exact, at-least, between.
pub fn e_arity(name: &str, min: usize, max: Option<usize>, got: usize) -> String {
    let name = name.to_ascii_uppercase();
    match max {
        Some(max) if max == min => {
            format!("#-1 FUNCTION ({name}) EXPECTS {min} ARGUMENTS BUT GOT {got}")
        }
        Some(max) => format!(
            "#-1 FUNCTION ({name}) EXPECTS BETWEEN {min} AND {max} ARGUMENTS BUT GOT {got}"
        ),
        None => format!("#-1 FUNCTION ({name}) EXPECTS AT LEAST {min} ARGUMENTS BUT GOT {got}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arity_formats() {
        assert_eq!(
            e_arity("add", 2, Some(2), 3),
            "#-1 FUNCTION (ADD) EXPECTS 2 ARGUMENTS BUT GOT 3"
        );
        assert_eq!(
            e_arity("mid", 2, Some(4), 1),
            "#-1 FUNCTION (MID) EXPECTS BETWEEN 2 AND 4 ARGUMENTS BUT GOT 1"
        );
        assert_eq!(
            e_arity("cat", 1, None, 0),
            "#-1 FUNCTION (CAT) EXPECTS AT LEAST 1 ARGUMENTS BUT GOT 0"
        );
    }
}
