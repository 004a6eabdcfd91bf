//! Function dispatch table consumed by the evaluator.
//!
//! The table maps canonical (uppercase) names to descriptors: arity,
//! argument-parsing mode, capability flags, and either a native handler
//! or a stored-attribute user function. Only the registry is defined
//! here — the hundreds of built-in implementations live with the host.

use crate::buffer::OutBuf;
use crate::context::EvalContext;
use moss_types::{Dbref, Limits, PrivLevel, World};
use rustc_hash::FxHashMap;
use std::rc::Rc;

/// How a function's arguments are parsed before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArgParse {
    /// Fully evaluated (the default).
    #[default]
    Eval,
    /// Not parsed at all — raw text, balanced; control-flow functions
    /// that need unevaluated branches use this.
    Raw,
    /// Evaluated with escape sequences suppressed.
    Literal,
}

/// Capability flags on a function descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FnFlags(u32);

impl FnFlags {
    pub const NONE: Self = Self(0);
    /// Administratively disabled; calls produce an in-band error.
    pub const DISABLED: Self = Self(1 << 0);
    /// Requires admin privilege.
    pub const ADMIN: Self = Self(1 << 1);
    /// Requires wizard privilege.
    pub const WIZARD: Self = Self(1 << 2);
    /// Strip markup from arguments before the handler sees them.
    pub const STRIP_ANSI: Self = Self(1 << 3);
    /// Snapshot and restore Q-registers around the call.
    pub const LOCALIZE: Self = Self(1 << 4);
    /// Only callable from inside a user-defined function body.
    pub const UDF_ONLY: Self = Self(1 << 5);
    /// Log the function name on each call.
    pub const LOG_NAME: Self = Self(1 << 6);
    /// Log the arguments too.
    pub const LOG_ARGS: Self = Self(1 << 7);
    /// Deprecated; logged once per call site.
    pub const DEPRECATED: Self = Self(1 << 8);
    /// Refuses to run where side effects are restricted.
    pub const NO_SIDEFX: Self = Self(1 << 9);

    pub fn has(self, flag: Self) -> bool {
        self.0 & flag.0 != 0
    }

    /// The privilege tier the executor must hold.
    pub fn required_privilege(self) -> PrivLevel {
        if self.has(Self::WIZARD) {
            PrivLevel::Wizard
        } else if self.has(Self::ADMIN) {
            PrivLevel::Admin
        } else {
            PrivLevel::Player
        }
    }
}

impl std::ops::BitOr for FnFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Everything a native handler gets: parsed arguments, the output sink,
/// the three acting identities, the evaluation context, the configured
/// limits, and the world.
pub struct CallFrame<'a> {
    pub args: &'a [String],
    pub out: &'a mut OutBuf,
    pub executor: Dbref,
    pub caller: Dbref,
    pub enactor: Dbref,
    pub ctx: &'a mut EvalContext,
    pub limits: &'a Limits,
    pub world: &'a dyn World,
}

/// A native built-in handler.
pub type BuiltinFn = fn(&mut CallFrame<'_>);

/// The implementation behind a function name.
#[derive(Clone)]
pub enum FunImpl {
    Builtin(BuiltinFn),
    /// A user function: evaluate `obj`'s attribute with the call's
    /// arguments bound as `%0`–`%9`.
    User { obj: Dbref, attr: String },
}

/// One registered function.
pub struct FunDef {
    /// Canonical name, uppercase.
    pub name: String,
    /// Minimum argument count.
    pub min_args: usize,
    /// Maximum argument count. `None` is unbounded; a negative source
    /// arity is encoded as `max_args` = |max| with `comma_tail` set.
    pub max_args: Option<usize>,
    /// The last argument swallows literal commas once reached.
    pub comma_tail: bool,
    pub parse: ArgParse,
    pub flags: FnFlags,
    pub imp: FunImpl,
}

impl FunDef {
    /// A plain built-in with evaluated arguments and no flags.
    pub fn builtin(name: &str, min_args: usize, max_args: Option<usize>, f: BuiltinFn) -> Self {
        Self {
            name: name.to_ascii_uppercase(),
            min_args,
            max_args,
            comma_tail: false,
            parse: ArgParse::Eval,
            flags: FnFlags::NONE,
            imp: FunImpl::Builtin(f),
        }
    }

    pub fn with_flags(mut self, flags: FnFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_parse(mut self, parse: ArgParse) -> Self {
        self.parse = parse;
        self
    }

    /// Declare the variadic-comma tail: `|max|` is the true ceiling and
    /// the final argument keeps literal commas.
    pub fn with_comma_tail(mut self, max: usize) -> Self {
        self.max_args = Some(max);
        self.comma_tail = true;
        self
    }
}

/// Name → descriptor registry, built-ins and user functions separate so
/// a builtin-only lookup can't be intercepted by a user redefinition.
#[derive(Default)]
pub struct FunctionTable {
    builtins: FxHashMap<String, Rc<FunDef>>,
    user: FxHashMap<String, Rc<FunDef>>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, def: FunDef) {
        self.builtins.insert(def.name.clone(), Rc::new(def));
    }

    /// Register (or replace) a user function backed by an attribute.
    pub fn register_user(&mut self, name: &str, obj: Dbref, attr: &str) {
        let name = name.to_ascii_uppercase();
        let def = FunDef {
            name: name.clone(),
            min_args: 0,
            max_args: Some(10),
            comma_tail: false,
            parse: ArgParse::Eval,
            flags: FnFlags::NONE,
            imp: FunImpl::User {
                obj,
                attr: attr.to_ascii_uppercase(),
            },
        };
        self.user.insert(name, Rc::new(def));
    }

    pub fn unregister_user(&mut self, name: &str) {
        self.user.remove(&name.to_ascii_uppercase());
    }

    /// Look up a name. With `builtin_only`, user functions are invisible
    /// (the outermost call in a restricted chain uses this). Otherwise
    /// built-ins shadow user functions of the same name.
    pub fn lookup(&self, name: &str, builtin_only: bool) -> Option<Rc<FunDef>> {
        let name = name.to_ascii_uppercase();
        if let Some(def) = self.builtins.get(&name) {
            return Some(Rc::clone(def));
        }
        if builtin_only {
            return None;
        }
        self.user.get(&name).map(Rc::clone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_f: &mut CallFrame<'_>) {}

    #[test]
    fn builtin_shadows_user_and_builtin_only_hides_user() {
        let mut t = FunctionTable::new();
        t.register(FunDef::builtin("add", 2, None, noop));
        t.register_user("myfn", Dbref(3), "FN_BODY");
        t.register_user("add", Dbref(3), "FAKE_ADD");

        let add = t.lookup("ADD", false).unwrap();
        assert!(matches!(add.imp, FunImpl::Builtin(_)));
        assert!(t.lookup("myfn", false).is_some());
        assert!(t.lookup("myfn", true).is_none());
    }

    #[test]
    fn privilege_tiers() {
        assert_eq!(FnFlags::NONE.required_privilege(), PrivLevel::Player);
        assert_eq!(FnFlags::ADMIN.required_privilege(), PrivLevel::Admin);
        assert_eq!(
            (FnFlags::ADMIN | FnFlags::WIZARD).required_privilege(),
            PrivLevel::Wizard
        );
    }
}
