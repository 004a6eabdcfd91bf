//! The softcode expression evaluator.
//!
//! `process_expression` is a single-pass recursive scanner: it consumes
//! bytes from a shared cursor, writes transformed output into a bounded
//! buffer, and recurses for every nested construct (brace group, bracket
//! group, function arguments, user-function bodies). Termination flags
//! name which characters stop the current parse; the terminator is left
//! unconsumed so callers can chain parses over one string.
//!
//! All softcode-visible errors are in-band `#-1 ...` text. The only
//! condition that unwinds the Rust call stack is CPU-budget exhaustion,
//! which must abandon every pending nested parse at once.

use crate::buffer::OutBuf;
use crate::context::{DebugFrame, DebugMode, EvalContext, LimitTrip};
use crate::cursor::Cursor;
use crate::error::{
    e_arity, e_disabled, e_not_found, EvalError, EvalResult, CPU_NOTICE, E_CALL_LIMIT,
    E_INVOKE_LIMIT, E_PERM_DENIED, E_RECURSE_LIMIT,
};
use crate::flags::{EvalFlags, TermFlags};
use crate::funtab::{ArgParse, CallFrame, FnFlags, FunImpl, FunctionTable};
use crate::markup::{strip_markup, ESC, TAG_END, TAG_START};
use crate::regs::{RegClass, ScopeKind};
use moss_types::{Dbref, Limits, Pronouns, World};
use tracing::{debug, trace, warn};

/// The three acting identities threaded through every evaluation:
/// the object running the code, the object that invoked it via a user
/// function (if any), and the object that triggered the whole chain.
#[derive(Debug, Clone, Copy)]
pub struct Identities {
    pub executor: Dbref,
    pub caller: Dbref,
    pub enactor: Dbref,
}

impl Identities {
    /// All three identities are the same object.
    pub fn solo(who: Dbref) -> Self {
        Self {
            executor: who,
            caller: who,
            enactor: who,
        }
    }
}

/// The process-wide interpreter.
///
/// Owns the function table and the process-wide invocation/recursion
/// counters the original kept in file-scope globals; tests instantiate
/// isolated interpreters instead of sharing state.
pub struct Interpreter<'w> {
    world: &'w dyn World,
    pub limits: Limits,
    pub funcs: FunctionTable,
    global_invocations: u64,
    global_recursions: u32,
    cpu_notified: bool,
}

impl<'w> Interpreter<'w> {
    pub fn new(world: &'w dyn World, limits: Limits) -> Self {
        Self {
            world,
            limits,
            funcs: FunctionTable::new(),
            global_invocations: 0,
            global_recursions: 0,
            cpu_notified: false,
        }
    }

    pub fn world(&self) -> &'w dyn World {
        self.world
    }

    /// Begin a fresh execution slice: reset the process-wide counters,
    /// re-arm the one-time CPU notice, and start the CPU budget.
    pub fn begin_slice(&mut self) {
        self.global_invocations = 0;
        self.global_recursions = 0;
        self.cpu_notified = false;
        self.world.cpu_budget_start();
    }

    /// Evaluate a whole string to completion and return the output.
    pub fn evaluate(
        &mut self,
        ctx: &mut EvalContext,
        input: &str,
        ids: Identities,
        eflags: EvalFlags,
    ) -> EvalResult<String> {
        let mut cursor = Cursor::new(input);
        let mut out = OutBuf::new(self.limits.buffer_len);
        self.process_expression(ctx, &mut cursor, &mut out, ids, eflags, TermFlags::NOTHING)?;
        Ok(out.into_string())
    }

    /// The core scanner. Consumes from `input` until end of input or a
    /// terminator named by `tflags`, appending transformed output to
    /// `out`. Returns `Err(CpuLimit)` only when the CPU budget is gone.
    pub fn process_expression(
        &mut self,
        ctx: &mut EvalContext,
        input: &mut Cursor<'_>,
        out: &mut OutBuf,
        ids: Identities,
        mut eflags: EvalFlags,
        tflags: TermFlags,
    ) -> EvalResult<()> {
        // Guard checks: CPU first (one-time notice, then unwind), then
        // administratively-halted executors degrade to verbatim copy.
        if self.world.cpu_budget_over() {
            if !self.cpu_notified {
                self.cpu_notified = true;
                self.world.notify(ids.executor, CPU_NOTICE);
            }
            return Err(EvalError::CpuLimit);
        }
        if self.world.halted(ids.executor) {
            eflags = EvalFlags::NOTHING;
        }
        if eflags.has(EvalFlags::COMPRESS_SPACE) {
            let run = input.run_while(|b| b == b' ');
            input.advance(run);
        }

        // Sticky call-depth limiting: the trip state is authoritative,
        // checked before any counter arithmetic.
        if ctx.trip == LimitTrip::CallDepth {
            emit_marker(out, E_CALL_LIMIT);
            return Ok(());
        }
        ctx.call_depth += 1;
        if ctx.call_depth > self.limits.max_call_depth {
            ctx.trip = LimitTrip::CallDepth;
            trace!(depth = ctx.call_depth, "call depth ceiling tripped");
            emit_marker(out, E_CALL_LIMIT);
            ctx.call_depth -= 1;
            return Ok(());
        }

        // Debug tracing: pre-scan the same span with evaluation off to
        // capture the literal source, report source vs. result on exit.
        let debug_on = eflags.has(EvalFlags::EVAL)
            && ctx.debug != DebugMode::Off
            && (eflags.has(EvalFlags::DEBUG) || ctx.debug == DebugMode::On)
            && self.debug_target(ids.executor).is_some();
        if debug_on {
            let mut pre = input.clone();
            let mut scratch = OutBuf::new(self.limits.buffer_len);
            self.process_expression(ctx, &mut pre, &mut scratch, ids, EvalFlags::NOTHING, tflags)?;
            ctx.debug_frames.push(DebugFrame {
                source: scratch.into_string(),
            });
        }
        let out_start = out.len();

        let result = self.scan(ctx, input, out, ids, eflags, tflags);

        if eflags.has(EvalFlags::COMPRESS_SPACE) && out.len() > out_start {
            out.trim_one_trailing_space();
        }
        if debug_on {
            if let Some(frame) = ctx.debug_frames.pop() {
                let evaled = out.since(out_start);
                if evaled != frame.source {
                    if let Some(target) = self.debug_target(ids.executor) {
                        self.world.notify(
                            target,
                            &format!("{} : {} => {}", ctx.attr_name, frame.source, evaled),
                        );
                    }
                }
            }
        }
        ctx.call_depth -= 1;
        result
    }

    /// Main scan loop body (called with depth/debug bookkeeping done).
    fn scan(
        &mut self,
        ctx: &mut EvalContext,
        input: &mut Cursor<'_>,
        out: &mut OutBuf,
        ids: Identities,
        mut eflags: EvalFlags,
        tflags: TermFlags,
    ) -> EvalResult<()> {
        // Strip a single enclosing brace layer, but only when the very
        // first character is a brace (command-body brace removal).
        if eflags.has(EvalFlags::STRIP_BRACES) && input.peek() == Some(b'{') {
            input.bump();
            let inner = eflags
                .without(EvalFlags::STRIP_BRACES | EvalFlags::FUNC_CHECK | EvalFlags::FUNC_MANDATORY);
            self.process_expression(ctx, input, out, ids, inner, TermFlags::BRACE)?;
            if input.peek() == Some(b'}') {
                input.bump();
            }
        }
        eflags = eflags.without(EvalFlags::STRIP_BRACES);

        let span_start = out.len();
        let mut func_check_live = eflags.has(EvalFlags::FUNC_CHECK);
        let mut pronouns: Option<Pronouns> = None;

        while let Some(b) = input.peek() {
            if tflags.stops_at(b) {
                break;
            }
            match b {
                TAG_START => copy_span(input, out, TAG_END),
                ESC => copy_span(input, out, b'm'),
                b'%' => self.percent_sub(ctx, input, out, ids, eflags, &mut pronouns)?,
                b'$' => self.dollar_sub(ctx, input, out, ids, eflags)?,
                b'{' => {
                    input.bump();
                    if eflags.has(EvalFlags::EVAL) {
                        // Braces suppress function dispatch one level in
                        // and are stripped from evaluated output.
                        let inner =
                            eflags.without(EvalFlags::FUNC_CHECK | EvalFlags::FUNC_MANDATORY);
                        self.process_expression(ctx, input, out, ids, inner, TermFlags::BRACE)?;
                        if input.peek() == Some(b'}') {
                            input.bump();
                        }
                    } else {
                        out.push_byte(b'{');
                        self.process_expression(ctx, input, out, ids, eflags, TermFlags::BRACE)?;
                        if input.peek() == Some(b'}') {
                            out.push_byte(b'}');
                            input.bump();
                        }
                    }
                    func_check_live = false;
                }
                b'[' => {
                    input.bump();
                    if eflags.has(EvalFlags::EVAL) {
                        // Bracket contents must resolve to a function call.
                        let inner = eflags | EvalFlags::FUNC_CHECK | EvalFlags::FUNC_MANDATORY;
                        self.process_expression(ctx, input, out, ids, inner, TermFlags::BRACKET)?;
                        if input.peek() == Some(b']') {
                            input.bump();
                        }
                    } else {
                        out.push_byte(b'[');
                        self.process_expression(ctx, input, out, ids, eflags, TermFlags::BRACKET)?;
                        if input.peek() == Some(b']') {
                            out.push_byte(b']');
                            input.bump();
                        }
                    }
                    func_check_live = false;
                }
                b'(' => {
                    if eflags.has(EvalFlags::EVAL) && func_check_live {
                        self.function_call(ctx, input, out, ids, eflags, span_start)?;
                    } else {
                        out.push_byte(b'(');
                        input.bump();
                        let inner =
                            eflags.without(EvalFlags::FUNC_CHECK | EvalFlags::FUNC_MANDATORY);
                        self.process_expression(ctx, input, out, ids, inner, TermFlags::PAREN)?;
                        if input.peek() == Some(b')') {
                            out.push_byte(b')');
                            input.bump();
                        }
                    }
                    func_check_live = false;
                }
                b' ' => {
                    out.push_byte(b' ');
                    input.bump();
                    if eflags.has(EvalFlags::COMPRESS_SPACE) {
                        let run = input.run_while(|c| c == b' ');
                        input.advance(run);
                    }
                }
                b'\\' => {
                    if eflags.has(EvalFlags::LITERAL) || !eflags.has(EvalFlags::EVAL) {
                        // Literal mode and echo mode show the backslash.
                        out.push_byte(b'\\');
                        input.bump();
                    } else {
                        input.bump();
                        if let Some(c) = input.bump() {
                            out.push_byte(c);
                        }
                    }
                }
                _ => {
                    let run = input.run_while(|c| !is_interesting(c));
                    if run == 0 {
                        // An "interesting" byte with no handler here
                        // (e.g. an unbalanced `}` we don't stop at).
                        out.push_byte(b);
                        input.bump();
                    } else {
                        let bytes = input.take(run);
                        out.push_bytes(bytes);
                    }
                }
            }
        }
        Ok(())
    }

    /// The function-call branch: `name(args...)` with the candidate name
    /// already written to `out` since `span_start`.
    fn function_call(
        &mut self,
        ctx: &mut EvalContext,
        input: &mut Cursor<'_>,
        out: &mut OutBuf,
        ids: Identities,
        eflags: EvalFlags,
        span_start: usize,
    ) -> EvalResult<()> {
        let name = out.since(span_start);
        input.bump(); // consume '('

        // The builtin-only restriction binds the outermost call in the
        // chain; user functions also need the UDF gate open.
        let builtin_only = eflags.has(EvalFlags::BUILTIN_ONLY) || !eflags.has(EvalFlags::UDF_ALLOWED);
        let Some(def) = self.funcs.lookup(&name, builtin_only) else {
            if eflags.has(EvalFlags::FUNC_MANDATORY) {
                out.truncate(span_start);
                out.push_str(&e_not_found(&name));
                self.skip_balanced(ctx, input, ids)?;
                return Ok(());
            }
            // Not a function: literal grouping text.
            out.push_byte(b'(');
            let inner = eflags.without(EvalFlags::FUNC_CHECK | EvalFlags::FUNC_MANDATORY);
            self.process_expression(ctx, input, out, ids, inner, TermFlags::PAREN)?;
            if input.peek() == Some(b')') {
                out.push_byte(b')');
                input.bump();
            }
            return Ok(());
        };

        out.truncate(span_start);

        // Invocation and recursion gates: sticky once tripped, and the
        // argument text is skipped without evaluation.
        if ctx.trip == LimitTrip::Invocations
            || ctx.invocations >= self.limits.max_function_invocations
            || self.global_invocations >= self.limits.max_function_invocations
        {
            ctx.trip = LimitTrip::Invocations;
            trace!(name = %def.name, "function invocation ceiling tripped");
            emit_marker(out, E_INVOKE_LIMIT);
            self.skip_balanced(ctx, input, ids)?;
            return Ok(());
        }
        if ctx.trip == LimitTrip::Recursion
            || ctx.recursions >= self.limits.max_function_recursion
            || self.global_recursions >= self.limits.max_function_recursion
        {
            ctx.trip = LimitTrip::Recursion;
            trace!(name = %def.name, "function recursion ceiling tripped");
            emit_marker(out, E_RECURSE_LIMIT);
            self.skip_balanced(ctx, input, ids)?;
            return Ok(());
        }

        // Parse comma-separated arguments under the function's declared
        // parsing mode.
        let arg_flags = match def.parse {
            ArgParse::Eval => (eflags | EvalFlags::FUNC_CHECK).without(
                EvalFlags::FUNC_MANDATORY | EvalFlags::BUILTIN_ONLY | EvalFlags::LITERAL,
            ),
            ArgParse::Raw => EvalFlags::NOTHING,
            ArgParse::Literal => (eflags | EvalFlags::FUNC_CHECK | EvalFlags::LITERAL)
                .without(EvalFlags::FUNC_MANDATORY | EvalFlags::BUILTIN_ONLY),
        };
        let mut args: Vec<String> = Vec::new();
        loop {
            // Once the variadic tail is reached, commas stop separating.
            let at_tail = def.comma_tail && def.max_args.is_some_and(|m| args.len() + 1 >= m);
            let term = if at_tail {
                TermFlags::PAREN
            } else {
                TermFlags::PAREN | TermFlags::COMMA
            };
            let mut abuf = OutBuf::new(self.limits.buffer_len);
            self.process_expression(ctx, input, &mut abuf, ids, arg_flags, term)?;
            let mut arg = abuf.into_string();
            if def.flags.has(FnFlags::STRIP_ANSI) {
                arg = strip_markup(&arg);
            }
            args.push(arg);
            match input.peek() {
                Some(b',') => {
                    input.bump();
                }
                Some(b')') => {
                    input.bump();
                    break;
                }
                _ => break, // unbalanced: end of input ends the call
            }
        }

        // Permission and enable checks come after argument parsing;
        // argument side effects have already happened by now. This
        // ordering is a compatibility surface, not an accident.
        if def.flags.has(FnFlags::DISABLED)
            || (def.flags.has(FnFlags::NO_SIDEFX) && !self.world.side_effects_ok())
        {
            out.push_str(&e_disabled(&def.name));
            return Ok(());
        }
        if !self
            .world
            .has_privilege(ids.executor, def.flags.required_privilege())
            || (def.flags.has(FnFlags::UDF_ONLY) && ctx.user_fn_depth == 0)
        {
            out.push_str(E_PERM_DENIED);
            return Ok(());
        }

        // Arity validation; a bare `fn()` collapses to zero arguments
        // when the function allows zero.
        let mut nargs = args.len();
        if nargs == 1 && args[0].is_empty() && def.min_args == 0 {
            args.clear();
            nargs = 0;
        }
        if nargs < def.min_args || def.max_args.is_some_and(|m| nargs > m) {
            out.push_str(&e_arity(&def.name, def.min_args, def.max_args, nargs));
            return Ok(());
        }

        if def.flags.has(FnFlags::LOG_ARGS) {
            debug!(name = %def.name, args = ?args, "function call");
        } else if def.flags.has(FnFlags::LOG_NAME) {
            debug!(name = %def.name, "function call");
        }
        if def.flags.has(FnFlags::DEPRECATED) {
            warn!(name = %def.name, executor = %ids.executor, "deprecated function called");
        }

        // Localize Q-registers around the call when flagged: writes land
        // in the fresh scope and are discarded on restore, reads still
        // fall through to the caller's registers.
        let saved = def
            .flags
            .has(FnFlags::LOCALIZE)
            .then(|| ctx.localize(ScopeKind::Q));

        ctx.invocations += 1;
        self.global_invocations += 1;
        ctx.recursions += 1;
        self.global_recursions += 1;

        let result = match def.imp.clone() {
            FunImpl::Builtin(f) => {
                let world = self.world;
                let mut frame = CallFrame {
                    args: &args,
                    out,
                    executor: ids.executor,
                    caller: ids.caller,
                    enactor: ids.enactor,
                    ctx,
                    limits: &self.limits,
                    world,
                };
                f(&mut frame);
                Ok(())
            }
            FunImpl::User { obj, attr } => {
                self.call_user_fn(ctx, out, ids, &def.name, obj, &attr, &args)
            }
        };

        ctx.recursions -= 1;
        self.global_recursions -= 1;
        if let Some(handle) = saved {
            ctx.restore(handle);
        }
        result
    }

    /// Dispatch a user-defined function: evaluate the attribute body with
    /// the arguments bound as `%0`-`%9` in a fresh NEWATTR scope. The
    /// target object becomes the executor; the old executor the caller.
    fn call_user_fn(
        &mut self,
        ctx: &mut EvalContext,
        out: &mut OutBuf,
        ids: Identities,
        name: &str,
        obj: Dbref,
        attr: &str,
        args: &[String],
    ) -> EvalResult<()> {
        let Some(body) = self.world.fetch_attr(obj, attr) else {
            out.push_str(&e_not_found(name));
            return Ok(());
        };
        if !self.world.attr_evaluable(ids.executor, obj, attr) {
            out.push_str(E_PERM_DENIED);
            return Ok(());
        }

        let handle = ctx.localize(ScopeKind::ARG | ScopeKind::NEWATTR);
        for (i, arg) in args.iter().take(10).enumerate() {
            ctx.regs
                .top_mut()
                .set_str(RegClass::Arg, &i.to_string(), arg);
        }
        let saved_attr = std::mem::replace(&mut ctx.attr_name, format!("{obj}/{attr}"));
        ctx.user_fn_depth += 1;

        let mut cursor = Cursor::new(&body);
        let result = self.process_expression(
            ctx,
            &mut cursor,
            out,
            Identities {
                executor: obj,
                caller: ids.executor,
                enactor: ids.enactor,
            },
            EvalFlags::EVAL | EvalFlags::FUNC_CHECK | EvalFlags::UDF_ALLOWED,
            TermFlags::NOTHING,
        );

        ctx.user_fn_depth -= 1;
        ctx.attr_name = saved_attr;
        ctx.restore(handle);
        result
    }

    /// Consume input through the matching `)` without evaluating it
    /// (limit trips and mandatory-lookup failures skip arguments this
    /// way, so their side effects never fire).
    fn skip_balanced(
        &mut self,
        ctx: &mut EvalContext,
        input: &mut Cursor<'_>,
        ids: Identities,
    ) -> EvalResult<()> {
        let mut scratch = OutBuf::new(self.limits.buffer_len);
        self.process_expression(
            ctx,
            input,
            &mut scratch,
            ids,
            EvalFlags::NOTHING,
            TermFlags::PAREN,
        )?;
        if input.peek() == Some(b')') {
            input.bump();
        }
        Ok(())
    }

    /// Who receives debug traces for `executor`, if anyone: the executor
    /// when connected, else its owner when connected.
    pub(crate) fn debug_target(&self, executor: Dbref) -> Option<Dbref> {
        if self.world.is_connected(executor) {
            return Some(executor);
        }
        let owner = self.world.owner(executor);
        self.world.is_connected(owner).then_some(owner)
    }
}

/// Append a limit marker unless it is already the trailing content.
fn emit_marker(out: &mut OutBuf, marker: &str) {
    if !out.ends_with(marker) {
        out.push_str(marker);
    }
}

/// Copy bytes through `end` (inclusive) verbatim: markup/ANSI passthrough.
fn copy_span(input: &mut Cursor<'_>, out: &mut OutBuf, end: u8) {
    while let Some(b) = input.bump() {
        out.push_byte(b);
        if b == end {
            break;
        }
    }
}

/// Bytes the scan loop must stop bulk-copying at.
fn is_interesting(b: u8) -> bool {
    matches!(
        b,
        b'%' | b'$'
            | b'{'
            | b'}'
            | b'['
            | b']'
            | b'('
            | b')'
            | b','
            | b';'
            | b'='
            | b' '
            | b'>'
            | b'\\'
            | TAG_START
            | ESC
    )
}
