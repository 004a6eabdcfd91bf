//! End-to-end evaluator tests.
//!
//! Covers:
//! - Echo-mode round trips and space compression
//! - Escape handling for every "interesting" character
//! - Function dispatch: arity boundaries, zero-argument collapse,
//!   variadic comma tails, unknown names in bracket context
//! - Sticky limit trips (call depth, invocations, recursion)
//! - Permission ordering: arguments evaluate before the check
//! - Percent substitutions and Q-registers
//! - Markup/ANSI passthrough and the CPU budget yield

use moss_eval::{
    e_arity, e_not_found, CallFrame, EvalContext, EvalFlags, FnFlags, FunDef, FunctionTable,
    Identities, Interpreter, RegValue, CPU_NOTICE, E_CALL_LIMIT, E_INVOKE_LIMIT, E_PERM_DENIED,
    E_RECURSE_LIMIT, E_TOO_MANY_REGS,
};
use moss_types::{Dbref, Limits, MemWorld};

const ONE: Dbref = Dbref(1);
const BOX: Dbref = Dbref(2);

// ── Helpers ──────────────────────────────────────────────────────────

fn world() -> MemWorld {
    let w = MemWorld::new();
    w.add_player(ONE, "One");
    w.connect(ONE);
    w.add_object(BOX, ONE, "Box");
    w
}

fn fn_add(f: &mut CallFrame<'_>) {
    let sum: i64 = f
        .args
        .iter()
        .filter_map(|a| a.trim().parse::<i64>().ok())
        .sum();
    f.out.push_str(&sum.to_string());
}

fn fn_ok(f: &mut CallFrame<'_>) {
    f.out.push_str("ok");
}

fn fn_emit(f: &mut CallFrame<'_>) {
    if let Some(msg) = f.args.first() {
        f.world.notify(f.executor, msg);
    }
}

fn fn_last(f: &mut CallFrame<'_>) {
    if let Some(tail) = f.args.last() {
        f.out.push_str(tail);
    }
}

fn fn_setq(f: &mut CallFrame<'_>) {
    if f.args.len() < 2 {
        return;
    }
    let value = RegValue::Owned(f.args[1].clone());
    let ceiling = f.limits.max_named_registers;
    if f.ctx.regs.set_q(&f.args[0], value, ceiling).is_err() {
        f.out.push_str(E_TOO_MANY_REGS);
    }
}

fn table() -> FunctionTable {
    let mut t = FunctionTable::new();
    t.register(FunDef::builtin("add", 2, None, fn_add));
    t.register(FunDef::builtin("mid", 2, Some(4), fn_add));
    t.register(FunDef::builtin("ok", 0, Some(0), fn_ok));
    t.register(FunDef::builtin("emit", 1, Some(1), fn_emit));
    t.register(FunDef::builtin("last", 1, None, fn_last).with_comma_tail(2));
    t.register(FunDef::builtin("setq", 2, Some(2), fn_setq));
    t.register(FunDef::builtin("sfx", 1, Some(1), fn_emit).with_flags(FnFlags::NO_SIDEFX));
    t.register(FunDef::builtin("wiz", 0, Some(1), fn_ok).with_flags(FnFlags::WIZARD));
    t.register(FunDef::builtin("off", 0, Some(1), fn_ok).with_flags(FnFlags::DISABLED));
    t
}

fn eval_with(w: &MemWorld, limits: Limits, input: &str, eflags: EvalFlags) -> String {
    let mut interp = Interpreter::new(w, limits);
    interp.funcs = table();
    let mut ctx = EvalContext::new("test");
    interp
        .evaluate(&mut ctx, input, Identities::solo(ONE), eflags)
        .expect("evaluation should not hit the cpu budget")
}

fn eval(w: &MemWorld, input: &str) -> String {
    eval_with(w, Limits::default(), input, EvalFlags::standard())
}

// ── Scanning ─────────────────────────────────────────────────────────

#[test]
fn echo_mode_reproduces_balanced_input() {
    let w = world();
    let input = "say {hello [there] (1,2)} \\and more; done";
    let got = eval_with(&w, Limits::default(), input, EvalFlags::NOTHING);
    assert_eq!(got, input);
}

#[test]
fn space_compression_collapses_runs() {
    let w = world();
    let flags = EvalFlags::standard() | EvalFlags::COMPRESS_SPACE;
    assert_eq!(eval_with(&w, Limits::default(), "a   b  c", flags), "a b c");
}

#[test]
fn space_compression_is_idempotent() {
    let w = world();
    let flags = EvalFlags::standard() | EvalFlags::COMPRESS_SPACE;
    let once = eval_with(&w, Limits::default(), "a   b  c  ", flags);
    let twice = eval_with(&w, Limits::default(), &once, flags);
    assert_eq!(once, twice);
}

#[test]
fn escapes_produce_the_literal_character() {
    let w = world();
    for (input, want) in [
        (r"\(", "("),
        (r"\{", "{"),
        (r"\%", "%"),
        (r"\,", ","),
        (r"\[", "["),
        (r"\\", r"\"),
        (r"\x", "x"),
    ] {
        assert_eq!(eval(&w, input), want, "escaping {input}");
    }
}

#[test]
fn braces_strip_and_suppress_function_checks() {
    let w = world();
    let flags = EvalFlags::standard() | EvalFlags::STRIP_BRACES;
    assert_eq!(
        eval_with(&w, Limits::default(), "{literal text}", flags),
        "literal text"
    );
    // A call-shaped name inside braces stays literal text.
    assert_eq!(eval(&w, "{add(2,3)}"), "add(2,3)");
    // Nested brackets re-enable dispatch.
    assert_eq!(eval(&w, "{x [add(2,3)] y}"), "x 5 y");
}

#[test]
fn markup_and_ansi_spans_pass_through() {
    let w = world();
    let input = "a\x02raw(,;)%q\x03b \x1b[1mbold\x1b[0m";
    assert_eq!(eval(&w, input), input);
}

// ── Dispatch ─────────────────────────────────────────────────────────

#[test]
fn builtin_dispatch_end_to_end() {
    let w = world();
    assert_eq!(eval(&w, "add(2,3)"), "5");
    assert_eq!(eval(&w, "add(1,[add(2,3)])"), "6");
}

#[test]
fn arity_boundaries() {
    let w = world();
    assert_eq!(eval(&w, "mid(1,2)"), "3");
    assert_eq!(eval(&w, "mid(1,2,3)"), "6");
    assert_eq!(eval(&w, "mid(1,2,3,4)"), "10");
    // A bare call still delivers one empty argument to a min>0 function.
    assert_eq!(eval(&w, "mid()"), e_arity("MID", 2, Some(4), 1));
    assert_eq!(eval(&w, "mid(1)"), e_arity("MID", 2, Some(4), 1));
    assert_eq!(eval(&w, "mid(1,2,3,4,5)"), e_arity("MID", 2, Some(4), 5));
}

#[test]
fn zero_argument_collapse() {
    let w = world();
    assert_eq!(eval(&w, "ok()"), "ok");
}

#[test]
fn comma_tail_swallows_separators() {
    let w = world();
    // `last` caps at two arguments; the tail keeps its commas.
    assert_eq!(eval(&w, "last(a,b,c,d)"), "b,c,d");
}

#[test]
fn unknown_function_outside_brackets_is_literal() {
    let w = world();
    assert_eq!(eval(&w, "unknownfn(1,2)"), "unknownfn(1,2)");
}

#[test]
fn unknown_function_in_brackets_errors_without_evaluating_args() {
    let w = world();
    assert_eq!(
        eval(&w, "[unknownfn(emit(boo),2)]"),
        e_not_found("UNKNOWNFN")
    );
    assert!(
        w.notices_for(ONE).is_empty(),
        "skipped arguments must not run"
    );
}

// ── Permissions ──────────────────────────────────────────────────────

#[test]
fn permission_check_runs_after_arguments() {
    let w = world();
    assert_eq!(eval(&w, "wiz(emit(ping))"), E_PERM_DENIED);
    // The argument's side effect already happened.
    assert_eq!(w.notices_for(ONE), vec!["ping".to_string()]);
}

#[test]
fn wizards_pass_the_privilege_gate() {
    let w = world();
    w.make_wizard(ONE);
    assert_eq!(eval(&w, "wiz()"), "ok");
}

#[test]
fn disabled_functions_report_it() {
    let w = world();
    let got = eval(&w, "off()");
    assert!(got.contains("DISABLED"), "got {got:?}");
}

#[test]
fn side_effect_functions_honor_the_host_switch() {
    let w = world();
    w.set_side_effects(false);
    let got = eval(&w, "sfx(ping)");
    assert!(got.contains("DISABLED"), "got {got:?}");
    assert!(w.notices_for(ONE).is_empty(), "gated call must not fire");

    w.set_side_effects(true);
    assert_eq!(eval(&w, "sfx(ping)"), "");
    assert_eq!(w.notices_for(ONE), vec!["ping".to_string()]);
}

// ── Limits ───────────────────────────────────────────────────────────

#[test]
fn call_depth_trip_is_sticky() {
    let w = world();
    let limits = Limits {
        max_call_depth: 3,
        ..Limits::default()
    };
    let got = eval_with(&w, limits, "a{b{c{d{e}}}}f", EvalFlags::standard());
    assert!(got.contains(E_CALL_LIMIT), "got {got:?}");
}

#[test]
fn invocation_ceiling_is_sticky() {
    let w = world();
    let limits = Limits {
        max_function_invocations: 3,
        ..Limits::default()
    };
    // Brackets re-arm dispatch for each call; a bare name only arms
    // the first paren in its span.
    let got = eval_with(
        &w,
        limits,
        "[add(1,1)][add(1,1)][add(1,1)][add(1,1)][add(1,1)]",
        EvalFlags::standard(),
    );
    assert!(got.contains(E_INVOKE_LIMIT), "got {got:?}");
    // Once tripped, no later call in the same evaluation succeeds.
    assert_eq!(got.matches('2').count(), 3, "got {got:?}");
}

#[test]
fn recursion_ceiling_stops_self_calling_user_functions() {
    let w = world();
    w.set_attr(BOX, "REC", "x[rec()]");
    let limits = Limits {
        max_function_recursion: 5,
        ..Limits::default()
    };
    let mut interp = Interpreter::new(&w, limits);
    interp.funcs = table();
    interp.funcs.register_user("rec", BOX, "REC");
    let mut ctx = EvalContext::new("test");
    let got = interp
        .evaluate(&mut ctx, "rec()", Identities::solo(ONE), EvalFlags::standard())
        .expect("no cpu budget in play");
    assert!(got.contains(E_RECURSE_LIMIT), "got {got:?}");
}

#[test]
fn register_ceiling_surfaces_too_many_registers() {
    let w = world();
    // The `setq` builtin reads the ceiling off its call frame.
    let limits = Limits {
        max_named_registers: 1,
        ..Limits::default()
    };
    let got = eval_with(
        &w,
        limits,
        "[setq(aa,1)][setq(bb,2)]",
        EvalFlags::standard(),
    );
    assert_eq!(got, E_TOO_MANY_REGS);
}

#[test]
fn cpu_budget_exhaustion_notifies_once_and_unwinds() {
    let w = world();
    w.set_cpu_over(true);
    let mut interp = Interpreter::new(&w, Limits::default());
    interp.funcs = table();
    let mut ctx = EvalContext::new("test");
    let res = interp.evaluate(&mut ctx, "add(2,3)", Identities::solo(ONE), EvalFlags::standard());
    assert!(res.is_err());
    assert_eq!(w.notices_for(ONE), vec![CPU_NOTICE.to_string()]);
}

// ── Substitutions ────────────────────────────────────────────────────

#[test]
fn identity_and_name_substitutions() {
    let w = world();
    assert_eq!(eval(&w, "%!"), "#1");
    assert_eq!(eval(&w, "%#"), "#1");
    assert_eq!(eval(&w, "%@"), "#1");
    assert_eq!(eval(&w, "%n"), "One");
    assert_eq!(eval(&w, "%%"), "%");
    assert_eq!(eval(&w, "a%bb"), "a b");
}

#[test]
fn pronoun_substitution_mirrors_case() {
    let w = world();
    assert_eq!(eval(&w, "%s"), "it");
    assert_eq!(eval(&w, "%S"), "It");
    assert_eq!(eval(&w, "%p"), "its");
}

#[test]
fn command_text_substitutions_read_the_context() {
    let w = world();
    let mut interp = Interpreter::new(&w, Limits::default());
    interp.funcs = table();
    let mut ctx = EvalContext::new("test");
    ctx.cmd_raw = "say add(2,3)".to_string();
    ctx.cmd_evaled = "say 5".to_string();
    let got = interp
        .evaluate(&mut ctx, "%c/%u", Identities::solo(ONE), EvalFlags::standard())
        .expect("no cpu budget in play");
    assert_eq!(got, "say add(2,3)/say 5");
}

#[test]
fn q_registers_set_and_read_back() {
    let w = world();
    assert_eq!(eval(&w, "[setq(a,one)]%qa"), "one");
    assert_eq!(eval(&w, "[setq(name,two)]%q<name>"), "two");
    // Unset registers substitute as empty.
    assert_eq!(eval(&w, "<%qz>"), "<>");
}

#[test]
fn user_function_binds_positional_arguments() {
    let w = world();
    w.set_attr(BOX, "GREET", "hi %0 and %1");
    let mut interp = Interpreter::new(&w, Limits::default());
    interp.funcs = table();
    interp.funcs.register_user("greet", BOX, "GREET");
    let mut ctx = EvalContext::new("test");
    let got = interp
        .evaluate(
            &mut ctx,
            "greet(sun,moon)",
            Identities::solo(ONE),
            EvalFlags::standard(),
        )
        .expect("no cpu budget in play");
    assert_eq!(got, "hi sun and moon");
}
