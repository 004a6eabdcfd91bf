//! MOSS softcode expression evaluator.
//!
//! Parses and evaluates the in-game scripting language embedded in
//! free-form text: `%` substitutions, `$` capture references, nested
//! brace/bracket groups, and function calls dispatched through a
//! registry, under per-evaluation and process-wide resource ceilings.
//!
//! The scheduler crate re-invokes this evaluator for every dequeued
//! command; the two share [`EvalContext`] and the register store.

mod buffer;
mod context;
mod cursor;
mod error;
mod evaluator;
mod flags;
mod funtab;
mod markup;
pub mod regs;
mod subs;

pub use buffer::OutBuf;
pub use context::{share, DebugFrame, DebugMode, EvalContext, LimitTrip, SharedContext};
pub use cursor::Cursor;
pub use error::{
    e_arity, e_disabled, e_not_found, EvalError, EvalResult, CPU_NOTICE, E_CALL_LIMIT,
    E_INVOKE_LIMIT, E_PERM_DENIED, E_RECURSE_LIMIT, E_TOO_MANY_REGS,
};
pub use evaluator::{Identities, Interpreter};
pub use flags::{EvalFlags, TermFlags};
pub use funtab::{ArgParse, BuiltinFn, CallFrame, FnFlags, FunDef, FunImpl, FunctionTable};
pub use markup::{strip_markup, ESC, TAG_END, TAG_START};
pub use regs::{RegClass, RegScope, RegStack, RegValue, RegsFull, ScopeHandle, ScopeKind};
