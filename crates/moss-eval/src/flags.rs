//! Evaluation and termination flag sets for `process_expression`.
//!
//! Both are `u32`-backed copy structs with const members rather than
//! enums: a single parse is governed by an arbitrary combination of
//! flags, and callers build derived sets by masking.

/// Flags governing *how* a span is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalFlags(u32);

impl EvalFlags {
    /// Substitutions and function calls are performed.
    pub const EVAL: Self = Self(1 << 0);
    /// A `(` may close a function name accumulated since span start.
    pub const FUNC_CHECK: Self = Self(1 << 1);
    /// The span *must* resolve to a function call (bracket context).
    pub const FUNC_MANDATORY: Self = Self(1 << 2);
    /// Strip one enclosing brace layer if the first input char is `{`.
    pub const STRIP_BRACES: Self = Self(1 << 3);
    /// Collapse runs of spaces to a single space.
    pub const COMPRESS_SPACE: Self = Self(1 << 4);
    /// Literal mode: backslash is an ordinary character.
    pub const LITERAL: Self = Self(1 << 5);
    /// Restrict the *outermost* call in this chain to built-ins.
    pub const BUILTIN_ONLY: Self = Self(1 << 6);
    /// `$N`/`$<name>` regex-capture references are live.
    pub const DOLLAR: Self = Self(1 << 7);
    /// Force debug tracing on regardless of the executor's setting.
    pub const DEBUG: Self = Self(1 << 8);
    /// User-defined functions may be dispatched.
    pub const UDF_ALLOWED: Self = Self(1 << 9);

    /// No evaluation at all: copy text through, balancing delimiters.
    pub const NOTHING: Self = Self(0);

    /// The standard flag set for command/attribute evaluation.
    pub fn standard() -> Self {
        Self::EVAL | Self::FUNC_CHECK | Self::UDF_ALLOWED
    }

    pub fn has(self, flag: Self) -> bool {
        self.0 & flag.0 != 0
    }

    #[must_use]
    pub fn without(self, flag: Self) -> Self {
        Self(self.0 & !flag.0)
    }

    /// Whether evaluation is fully off (verbatim copy mode).
    pub fn is_parse_off(self) -> bool {
        !self.has(Self::EVAL)
    }
}

impl std::ops::BitOr for EvalFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for EvalFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Flags naming which characters terminate the current parse.
///
/// The terminator itself is left unconsumed; callers inspect the cursor
/// to learn which character stopped the scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermFlags(u32);

impl TermFlags {
    pub const NOTHING: Self = Self(0);
    pub const BRACE: Self = Self(1 << 0);
    pub const BRACKET: Self = Self(1 << 1);
    pub const PAREN: Self = Self(1 << 2);
    pub const COMMA: Self = Self(1 << 3);
    pub const SEMI: Self = Self(1 << 4);
    pub const EQUALS: Self = Self(1 << 5);
    pub const SPACE: Self = Self(1 << 6);
    pub const GT: Self = Self(1 << 7);

    pub fn has(self, flag: Self) -> bool {
        self.0 & flag.0 != 0
    }

    /// Whether `b` terminates a parse under these flags.
    pub fn stops_at(self, b: u8) -> bool {
        match b {
            b'}' => self.has(Self::BRACE),
            b']' => self.has(Self::BRACKET),
            b')' => self.has(Self::PAREN),
            b',' => self.has(Self::COMMA),
            b';' => self.has(Self::SEMI),
            b'=' => self.has(Self::EQUALS),
            b' ' => self.has(Self::SPACE),
            b'>' => self.has(Self::GT),
            _ => false,
        }
    }
}

impl std::ops::BitOr for TermFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn term_flags_stop_only_named_chars() {
        let t = TermFlags::COMMA | TermFlags::PAREN;
        assert!(t.stops_at(b','));
        assert!(t.stops_at(b')'));
        assert!(!t.stops_at(b';'));
        assert!(!t.stops_at(b'x'));
    }

    #[test]
    fn eval_flag_masking() {
        let f = EvalFlags::standard();
        assert!(f.has(EvalFlags::EVAL));
        assert!(f.has(EvalFlags::FUNC_CHECK));
        let g = f.without(EvalFlags::FUNC_CHECK);
        assert!(!g.has(EvalFlags::FUNC_CHECK));
        assert!(g.has(EvalFlags::EVAL));
        assert!(EvalFlags::NOTHING.is_parse_off());
    }
}
