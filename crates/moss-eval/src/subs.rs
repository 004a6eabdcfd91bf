//! Percent and dollar substitution dispatch.
//!
//! `%` introduces a fixed table of one- and two-character codes; `$`
//! introduces regex-capture references when a match context is live.
//! Codes consume a predetermined number of following characters even on
//! failure paths so the cursor stays synchronized, and an uppercase code
//! letter mirrors onto the first character of the substituted output.

use crate::buffer::OutBuf;
use crate::context::EvalContext;
use crate::cursor::Cursor;
use crate::error::EvalResult;
use crate::evaluator::{Identities, Interpreter};
use crate::flags::{EvalFlags, TermFlags};
use crate::regs::RegClass;
use moss_types::Pronouns;

impl<'w> Interpreter<'w> {
    /// Handle a `%` substitution; the cursor sits on the `%`.
    pub(crate) fn percent_sub(
        &mut self,
        ctx: &mut EvalContext,
        input: &mut Cursor<'_>,
        out: &mut OutBuf,
        ids: Identities,
        eflags: EvalFlags,
        pronouns: &mut Option<Pronouns>,
    ) -> EvalResult<()> {
        input.bump(); // '%'
        if !eflags.has(EvalFlags::EVAL) {
            // Echo mode still consumes the code character so escaping
            // stays balanced.
            out.push_byte(b'%');
            if let Some(code) = input.bump() {
                out.push_byte(code);
            }
            return Ok(());
        }
        let Some(code) = input.bump() else {
            out.push_byte(b'%');
            return Ok(());
        };
        let upper = code.is_ascii_uppercase();

        let text: Option<String> = match code.to_ascii_lowercase() {
            b'%' => {
                out.push_byte(b'%');
                None
            }
            b'b' => {
                out.push_byte(b' ');
                None
            }
            b't' => {
                out.push_byte(b'\t');
                None
            }
            b'r' => {
                out.push_byte(b'\n');
                None
            }
            b'#' => Some(ids.enactor.to_string()),
            b'!' => Some(ids.executor.to_string()),
            b'@' => Some(ids.caller.to_string()),
            b'n' => Some(self.world().name(ids.enactor)),
            b's' => Some(self.cached_pronouns(ids, pronouns).subjective.clone()),
            b'o' => Some(self.cached_pronouns(ids, pronouns).objective.clone()),
            b'p' => Some(self.cached_pronouns(ids, pronouns).possessive.clone()),
            b'a' => Some(self.cached_pronouns(ids, pronouns).absolute.clone()),
            d @ b'0'..=b'9' => Some(
                ctx.regs
                    .get(RegClass::Arg, &(d as char).to_string())
                    .unwrap_or_default(),
            ),
            b'q' => {
                let name = if input.peek() == Some(b'<') {
                    input.bump();
                    self.eval_angle_name(ctx, input, ids, eflags)?
                } else if let Some(c) = input.bump() {
                    (c as char).to_string()
                } else {
                    String::new()
                };
                Some(ctx.regs.get(RegClass::Q, name.trim()).unwrap_or_default())
            }
            b'i' => Some(leveled(input, |level| ctx.regs.iter_text(level), || {
                ctx.regs.iter_depth()
            })),
            b'$' => Some(leveled(input, |level| ctx.regs.switch_text(level), || {
                ctx.regs.switch_depth()
            })),
            b'?' => Some(format!("{} {}", ctx.invocations, ctx.recursions)),
            b'+' => Some(
                (0..10)
                    .take_while(|i| ctx.regs.get(RegClass::Arg, &i.to_string()).is_some())
                    .count()
                    .to_string(),
            ),
            b'c' => Some(ctx.cmd_raw.clone()),
            b'u' => Some(ctx.cmd_evaled.clone()),
            // Unknown code: the code character itself, literally.
            other => {
                out.push_byte(other);
                None
            }
        };

        if let Some(s) = text {
            if upper && code.is_ascii_alphabetic() {
                out.push_str(&ucfirst(&s));
            } else {
                out.push_str(&s);
            }
        }
        Ok(())
    }

    /// Handle a `$` capture reference; the cursor sits on the `$`.
    pub(crate) fn dollar_sub(
        &mut self,
        ctx: &mut EvalContext,
        input: &mut Cursor<'_>,
        out: &mut OutBuf,
        ids: Identities,
        eflags: EvalFlags,
    ) -> EvalResult<()> {
        input.bump(); // '$'
        let active = eflags.has(EvalFlags::DOLLAR)
            && eflags.has(EvalFlags::EVAL)
            && ctx.regs.has_class(RegClass::Regexp);
        if active {
            match input.peek() {
                Some(d @ b'0'..=b'9') => {
                    input.bump();
                    let name = (d as char).to_string();
                    out.push_str(&ctx.regs.get(RegClass::Regexp, &name).unwrap_or_default());
                }
                Some(b'<') => {
                    input.bump();
                    let name = self.eval_angle_name(ctx, input, ids, eflags)?;
                    out.push_str(
                        &ctx.regs
                            .get(RegClass::Regexp, name.trim())
                            .unwrap_or_default(),
                    );
                }
                _ => out.push_byte(b'$'),
            }
            return Ok(());
        }
        // No capture context: the `$` is literal, but a `<...>` it
        // introduces is still evaluated (it may contain substitutions).
        out.push_byte(b'$');
        if eflags.has(EvalFlags::EVAL) && input.peek() == Some(b'<') {
            input.bump();
            out.push_byte(b'<');
            let inner = eflags.without(EvalFlags::FUNC_CHECK | EvalFlags::FUNC_MANDATORY);
            self.process_expression(ctx, input, out, ids, inner, TermFlags::GT)?;
            if input.peek() == Some(b'>') {
                out.push_byte(b'>');
                input.bump();
            }
        }
        Ok(())
    }

    /// Evaluate the text between `<` (already consumed) and `>` — the
    /// name may itself contain substitutions.
    fn eval_angle_name(
        &mut self,
        ctx: &mut EvalContext,
        input: &mut Cursor<'_>,
        ids: Identities,
        eflags: EvalFlags,
    ) -> EvalResult<String> {
        let mut nbuf = OutBuf::new(self.limits.buffer_len);
        let inner = eflags.without(EvalFlags::FUNC_CHECK | EvalFlags::FUNC_MANDATORY);
        self.process_expression(ctx, input, &mut nbuf, ids, inner, TermFlags::GT)?;
        if input.peek() == Some(b'>') {
            input.bump();
        }
        Ok(nbuf.into_string())
    }

    /// Pronouns for the enactor, computed lazily and cached for the
    /// duration of this evaluator call.
    fn cached_pronouns<'p>(
        &self,
        ids: Identities,
        cache: &'p mut Option<Pronouns>,
    ) -> &'p Pronouns {
        cache.get_or_insert_with(|| self.world().pronouns(ids.enactor))
    }
}

/// Read a level character (`0`-`9`, or `l`/`L` for the topmost level) and
/// fetch through `get`; missing levels substitute empty.
fn leveled(
    input: &mut Cursor<'_>,
    get: impl Fn(u32) -> Option<String>,
    depth: impl Fn() -> u32,
) -> String {
    match input.bump() {
        Some(d @ b'0'..=b'9') => get((d - b'0') as u32).unwrap_or_default(),
        Some(b'l') | Some(b'L') => {
            let n = depth();
            if n == 0 {
                String::new()
            } else {
                get(n - 1).unwrap_or_default()
            }
        }
        _ => String::new(),
    }
}

/// Uppercase the first character (case-preservation convention).
fn ucfirst(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
