//! Per-evaluation context: counters, limit trips, debug trace, registers.

use crate::regs::{RegScope, RegStack, ScopeHandle, ScopeKind};
use std::cell::RefCell;
use std::rc::Rc;

/// Which resource ceiling tripped, if any.
///
/// A trip is sticky for the lifetime of the context: once set it is
/// checked before any counter arithmetic, so an early unwind can never
/// "un-trip" a limit by decrementing past the ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LimitTrip {
    #[default]
    None,
    CallDepth,
    Invocations,
    Recursion,
}

/// Debug-trace setting for a context: inherit the executor's flag, or
/// force on/off for this evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebugMode {
    #[default]
    Inherit,
    On,
    Off,
}

/// One pending debug-trace region: raw source text captured before
/// evaluation, reported against the evaluated result on exit.
#[derive(Debug, Clone)]
pub struct DebugFrame {
    pub source: String,
}

/// Context for one top-level evaluation.
///
/// Created at a command-execution or queue-dequeue boundary; shared via
/// [`SharedContext`] when a continuation deliberately cooperates with its
/// parent (inline evaluation), in which case dropping the last handle
/// frees all chained register scopes.
#[derive(Debug)]
pub struct EvalContext {
    /// Function invocations so far in this evaluation.
    pub invocations: u64,
    /// Current function recursion depth.
    pub recursions: u32,
    /// Current `process_expression` nesting depth.
    pub call_depth: u32,
    /// Sticky limit trip state.
    pub trip: LimitTrip,
    /// Nesting depth of user-defined-function bodies being evaluated.
    pub user_fn_depth: u32,
    /// Debug-trace setting.
    pub debug: DebugMode,
    /// Pending debug-trace regions, innermost last.
    pub debug_frames: Vec<DebugFrame>,
    /// Name of the attribute currently being evaluated, for traces.
    pub attr_name: String,
    /// The raw command text this evaluation came from (`%c`).
    pub cmd_raw: String,
    /// The evaluated command text (`%u`). The scheduler blanks it per
    /// statement; the command runner assigns it after parsing.
    pub cmd_evaled: String,
    /// The register scope chain owned by this context.
    pub regs: RegStack,
}

impl EvalContext {
    pub fn new(name: &str) -> Self {
        Self {
            invocations: 0,
            recursions: 0,
            call_depth: 0,
            trip: LimitTrip::None,
            user_fn_depth: 0,
            debug: DebugMode::Inherit,
            debug_frames: Vec::new(),
            attr_name: name.to_string(),
            cmd_raw: String::new(),
            cmd_evaled: String::new(),
            regs: RegStack::new(),
        }
    }

    /// Context seeded with a flattened environment snapshot (queue
    /// restore): the snapshot becomes a scope above the base.
    pub fn with_snapshot(name: &str, snapshot: RegScope) -> Self {
        let mut ctx = Self::new(name);
        ctx.regs.push_scope(snapshot);
        ctx
    }

    /// Localize registers for a nested construct; restore with the handle.
    pub fn localize(&mut self, kind: ScopeKind) -> ScopeHandle {
        self.regs.localize(kind)
    }

    pub fn restore(&mut self, handle: ScopeHandle) {
        self.regs.restore(handle);
    }
}

/// Shared ownership of a context across cooperating evaluations.
///
/// Plain `Rc` — the engine is single-threaded by design, so no atomics.
pub type SharedContext = Rc<RefCell<EvalContext>>;

/// Wrap a context for sharing.
pub fn share(ctx: EvalContext) -> SharedContext {
    Rc::new(RefCell::new(ctx))
}
