//! Scoped register store for the evaluator.
//!
//! A [`RegStack`] is a stack of typed scopes layered per evaluation
//! region: Q-registers, positional arguments, iteration/switch context,
//! and regex captures each live in scopes flagged for that class.
//! Lookup walks from the innermost scope outward, skipping scopes that
//! don't serve the class, and halts at a class-specific stop boundary:
//! Q-registers stop at `QSTOP`, every other class stops at `NEWATTR`.
//! The per-class distinction is load-bearing — existing softcode depends
//! on it — so the two rules are kept separate rather than unified.

use std::fmt;
use std::rc::Rc;

/// Register classes a value can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegClass {
    /// Named Q-registers (`%q<x>`).
    Q,
    /// Positional arguments `%0`–`%9`.
    Arg,
    /// Iteration text/counter at a nesting level (`%i<n>`).
    Iter,
    /// Switch text at a nesting level (`%$<n>`).
    Switch,
    /// Regex captures (`$0`–`$9`, `$<name>`).
    Regexp,
}

/// What a scope may hold, plus stop-boundary markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeKind(u32);

impl ScopeKind {
    pub const Q: Self = Self(1 << 0);
    pub const ARG: Self = Self(1 << 1);
    pub const ITER: Self = Self(1 << 2);
    pub const SWITCH: Self = Self(1 << 3);
    pub const REGEXP: Self = Self(1 << 4);
    /// Halts upward Q-register lookup (localized call boundary).
    pub const QSTOP: Self = Self(1 << 5);
    /// Halts upward lookup for args/iter/switch/regexp (new attribute).
    pub const NEWATTR: Self = Self(1 << 6);
    /// LETQ-style scope: Q writes land here instead of falling through.
    pub const LET: Self = Self(1 << 7);

    /// The scope kind for a queue-entry environment snapshot.
    pub fn queue_snapshot() -> Self {
        Self::Q | Self::ARG | Self::ITER | Self::SWITCH | Self::NEWATTR
    }

    pub fn has(self, flag: Self) -> bool {
        self.0 & flag.0 != 0
    }

    fn serves(self, class: RegClass) -> bool {
        match class {
            RegClass::Q => self.has(Self::Q),
            RegClass::Arg => self.has(Self::ARG),
            RegClass::Iter => self.has(Self::ITER),
            RegClass::Switch => self.has(Self::SWITCH),
            RegClass::Regexp => self.has(Self::REGEXP),
        }
    }

    fn stops(self, class: RegClass) -> bool {
        match class {
            RegClass::Q => self.has(Self::QSTOP),
            _ => self.has(Self::NEWATTR),
        }
    }
}

impl std::ops::BitOr for ScopeKind {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// A stored register value.
///
/// Ownership is explicit in the type: `Owned` strings are freed with the
/// scope, `Shared` values are reference-counted views whose backing store
/// outlives the scope. This replaces the original's runtime "no-copy"
/// flag, which made freeing a borrowed value a silent contract violation.
#[derive(Debug, Clone)]
pub enum RegValue {
    Int(i64),
    Owned(String),
    Shared(Rc<str>),
}

impl RegValue {
    pub fn render(&self) -> String {
        match self {
            RegValue::Int(i) => i.to_string(),
            RegValue::Owned(s) => s.clone(),
            RegValue::Shared(s) => s.to_string(),
        }
    }
}

impl fmt::Display for RegValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegValue::Int(i) => write!(f, "{i}"),
            RegValue::Owned(s) => f.write_str(s),
            RegValue::Shared(s) => f.write_str(s),
        }
    }
}

/// Error sentinel: the named-register ceiling was hit.
///
/// Reported, non-fatal; the evaluator surfaces it as the in-band
/// `#-1 TOO MANY REGISTERS` text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegsFull;

#[derive(Debug, Clone)]
struct RegEntry {
    class: RegClass,
    name: String,
    value: RegValue,
}

/// One register scope: a kind and its typed values.
///
/// Names are case-insensitive (stored uppercase) and unique per class
/// within one scope.
#[derive(Debug, Clone)]
pub struct RegScope {
    kind: ScopeKind,
    vals: Vec<RegEntry>,
}

impl RegScope {
    pub fn new(kind: ScopeKind) -> Self {
        Self {
            kind,
            vals: Vec::new(),
        }
    }

    pub fn kind(&self) -> ScopeKind {
        self.kind
    }

    /// Insert or update a value. `max_named` caps the number of
    /// multi-character Q-register names in this scope; single-character
    /// registers are exempt. On overflow nothing is mutated.
    pub fn set(
        &mut self,
        class: RegClass,
        name: &str,
        value: RegValue,
        max_named: usize,
    ) -> Result<(), RegsFull> {
        let name = name.to_ascii_uppercase();
        if let Some(entry) = self
            .vals
            .iter_mut()
            .find(|e| e.class == class && e.name == name)
        {
            entry.value = value;
            return Ok(());
        }
        if class == RegClass::Q && name.len() > 1 && self.named_count() >= max_named {
            return Err(RegsFull);
        }
        self.vals.push(RegEntry { class, name, value });
        Ok(())
    }

    /// Convenience string setter with no ceiling (non-Q classes).
    pub fn set_str(&mut self, class: RegClass, name: &str, value: &str) {
        // Ceiling only applies to named Q-registers; usize::MAX disables it.
        let _ = self.set(class, name, RegValue::Owned(value.to_string()), usize::MAX);
    }

    pub fn set_int(&mut self, class: RegClass, name: &str, value: i64) {
        let _ = self.set(class, name, RegValue::Int(value), usize::MAX);
    }

    pub fn get(&self, class: RegClass, name: &str) -> Option<&RegValue> {
        let name = name.to_ascii_uppercase();
        self.vals
            .iter()
            .find(|e| e.class == class && e.name == name)
            .map(|e| &e.value)
    }

    /// Number of multi-character Q-register names held.
    pub fn named_count(&self) -> usize {
        self.vals
            .iter()
            .filter(|e| e.class == RegClass::Q && e.name.len() > 1)
            .count()
    }

    pub fn clear(&mut self) {
        self.vals.clear();
    }

    pub fn clear_class(&mut self, class: RegClass) {
        self.vals.retain(|e| e.class != class);
    }

    pub fn is_empty(&self) -> bool {
        self.vals.is_empty()
    }

    /// Highest level index used by leveled entries (`Iter`/`Switch`) in
    /// this scope, or `None` if the class is absent.
    fn max_level(&self, class: RegClass) -> Option<u32> {
        self.vals
            .iter()
            .filter(|e| e.class == class)
            .filter_map(|e| level_of(&e.name))
            .max()
    }
}

/// Parse the numeric level suffix off a leveled register name
/// (`T3` → 3, `N0` → 0, `S12` → 12).
fn level_of(name: &str) -> Option<u32> {
    name.get(1..).and_then(|digits| digits.parse().ok())
}

/// Handle returned by [`RegStack::localize`]; pass it back to
/// [`RegStack::restore`] to pop everything pushed since.
#[derive(Debug, Clone, Copy)]
pub struct ScopeHandle(usize);

/// The scope chain for one evaluation context.
#[derive(Debug, Clone)]
pub struct RegStack {
    scopes: Vec<RegScope>,
}

impl RegStack {
    /// A stack with one base scope serving every class.
    pub fn new() -> Self {
        Self {
            scopes: vec![RegScope::new(
                ScopeKind::Q | ScopeKind::ARG | ScopeKind::ITER | ScopeKind::SWITCH,
            )],
        }
    }

    /// Push a fresh scope of the given kind; the handle restores the
    /// chain to its pre-push state.
    pub fn localize(&mut self, kind: ScopeKind) -> ScopeHandle {
        let handle = ScopeHandle(self.scopes.len());
        self.scopes.push(RegScope::new(kind));
        handle
    }

    /// Push an already-populated scope (queue environment restore).
    pub fn push_scope(&mut self, scope: RegScope) -> ScopeHandle {
        let handle = ScopeHandle(self.scopes.len());
        self.scopes.push(scope);
        handle
    }

    /// Pop back to the chain state captured by `handle`.
    pub fn restore(&mut self, handle: ScopeHandle) {
        self.scopes.truncate(handle.0.max(1));
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// The innermost scope.
    pub fn top_mut(&mut self) -> &mut RegScope {
        self.scopes.last_mut().expect("RegStack keeps a base scope")
    }

    /// Chain lookup: innermost outward, skipping scopes that don't serve
    /// the class, halting at the class's stop boundary.
    pub fn get(&self, class: RegClass, name: &str) -> Option<String> {
        for scope in self.scopes.iter().rev() {
            if scope.kind.serves(class) {
                if let Some(v) = scope.get(class, name) {
                    return Some(v.render());
                }
            }
            if scope.kind.stops(class) {
                return None;
            }
        }
        None
    }

    /// Whether any reachable scope serves `class` (e.g. "is a regex
    /// capture context currently available").
    pub fn has_class(&self, class: RegClass) -> bool {
        for scope in self.scopes.iter().rev() {
            if scope.kind.serves(class) {
                return true;
            }
            if scope.kind.stops(class) {
                return false;
            }
        }
        false
    }

    /// Write a Q-register into the innermost scope that serves Q.
    pub fn set_q(&mut self, name: &str, value: RegValue, max_named: usize) -> Result<(), RegsFull> {
        for scope in self.scopes.iter_mut().rev() {
            if scope.kind.serves(RegClass::Q) || scope.kind.has(ScopeKind::LET) {
                return scope.set(RegClass::Q, name, value, max_named);
            }
            if scope.kind.stops(RegClass::Q) {
                break;
            }
        }
        // No Q-capable scope below the stop boundary: the write lands in
        // the base scope.
        self.scopes[0].set(RegClass::Q, name, value, max_named)
    }

    // ── Leveled lookups (iteration / switch) ─────────────────────────────

    /// Total iteration levels visible from the innermost scope.
    pub fn iter_depth(&self) -> u32 {
        self.leveled_depth(RegClass::Iter)
    }

    pub fn switch_depth(&self) -> u32 {
        self.leveled_depth(RegClass::Switch)
    }

    fn leveled_depth(&self, class: RegClass) -> u32 {
        let mut depth = 0;
        for scope in self.scopes.iter().rev() {
            if scope.kind.serves(class) {
                if let Some(max) = scope.max_level(class) {
                    depth += max + 1;
                }
            }
            if scope.kind.stops(class) {
                break;
            }
        }
        depth
    }

    /// Iteration text at `level` (0 = innermost). Nested iteration scopes
    /// each hold their own level 0; the walk renumbers on the fly.
    pub fn iter_text(&self, level: u32) -> Option<String> {
        self.leveled_get(RegClass::Iter, 'T', level)
    }

    /// Iteration position counter at `level`.
    pub fn iter_number(&self, level: u32) -> Option<String> {
        self.leveled_get(RegClass::Iter, 'N', level)
    }

    /// Switch text at `level`.
    pub fn switch_text(&self, level: u32) -> Option<String> {
        self.leveled_get(RegClass::Switch, 'S', level)
    }

    fn leveled_get(&self, class: RegClass, prefix: char, level: u32) -> Option<String> {
        let mut base = 0;
        for scope in self.scopes.iter().rev() {
            if scope.kind.serves(class) {
                if let Some(max) = scope.max_level(class) {
                    let count = max + 1;
                    if level < base + count {
                        let name = format!("{prefix}{}", level - base);
                        return scope.get(class, &name).map(|v| v.render());
                    }
                    base += count;
                }
            }
            if scope.kind.stops(class) {
                return None;
            }
        }
        None
    }

    /// Flatten the chained scopes' values of the given classes into one
    /// destination scope (used to snapshot an environment for the queue).
    ///
    /// Leveled entries are renumbered by an accumulating offset per class
    /// so nested levels don't collide: the innermost scope is processed
    /// first and keeps the smaller level numbers. For flat classes the
    /// innermost value wins unless `overwrite` is set.
    pub fn copy_stack(&self, dest: &mut RegScope, classes: ScopeKind, overwrite: bool) {
        let mut iter_offset = 0;
        let mut switch_offset = 0;
        // Each class stops copying once its own boundary is crossed, the
        // same way lookup does.
        let mut stopped = [false; 5];
        let idx = |c: RegClass| match c {
            RegClass::Q => 0,
            RegClass::Arg => 1,
            RegClass::Iter => 2,
            RegClass::Switch => 3,
            RegClass::Regexp => 4,
        };
        for scope in self.scopes.iter().rev() {
            let mut scope_iter_max: Option<u32> = None;
            let mut scope_switch_max: Option<u32> = None;
            for entry in &scope.vals {
                if !classes.serves(entry.class)
                    || !scope.kind.serves(entry.class)
                    || stopped[idx(entry.class)]
                {
                    continue;
                }
                match entry.class {
                    RegClass::Iter | RegClass::Switch => {
                        let offset = if entry.class == RegClass::Iter {
                            iter_offset
                        } else {
                            switch_offset
                        };
                        if let Some(level) = level_of(&entry.name) {
                            let name = format!("{}{}", &entry.name[..1], level + offset);
                            let max = if entry.class == RegClass::Iter {
                                &mut scope_iter_max
                            } else {
                                &mut scope_switch_max
                            };
                            *max = Some(max.map_or(level, |m: u32| m.max(level)));
                            let _ = dest.set(entry.class, &name, entry.value.clone(), usize::MAX);
                        }
                    }
                    _ => {
                        if overwrite || dest.get(entry.class, &entry.name).is_none() {
                            let _ =
                                dest.set(entry.class, &entry.name, entry.value.clone(), usize::MAX);
                        }
                    }
                }
            }
            if let Some(max) = scope_iter_max {
                iter_offset += max + 1;
            }
            if let Some(max) = scope_switch_max {
                switch_offset += max + 1;
            }
            for class in [
                RegClass::Q,
                RegClass::Arg,
                RegClass::Iter,
                RegClass::Switch,
                RegClass::Regexp,
            ] {
                if scope.kind.stops(class) {
                    stopped[idx(class)] = true;
                }
            }
        }
    }
}

impl Default for RegStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(stack: &RegStack, name: &str) -> Option<String> {
        stack.get(RegClass::Q, name)
    }

    #[test]
    fn q_lookup_walks_chain() {
        let mut stack = RegStack::new();
        stack.set_q("A", RegValue::Owned("outer".into()), 100).unwrap();
        let h = stack.localize(ScopeKind::Q);
        assert_eq!(q(&stack, "a").as_deref(), Some("outer"));
        stack.top_mut().set_str(RegClass::Q, "A", "inner");
        assert_eq!(q(&stack, "A").as_deref(), Some("inner"));
        stack.restore(h);
        assert_eq!(q(&stack, "A").as_deref(), Some("outer"));
    }

    #[test]
    fn qstop_halts_q_walk_but_not_args() {
        let mut stack = RegStack::new();
        stack.set_q("A", RegValue::Owned("hidden".into()), 100).unwrap();
        stack.scopes[0].set_str(RegClass::Arg, "0", "zero");
        stack.localize(ScopeKind::Q | ScopeKind::QSTOP);
        assert_eq!(q(&stack, "A"), None);
        // Args stop at NEWATTR, not QSTOP.
        assert_eq!(stack.get(RegClass::Arg, "0").as_deref(), Some("zero"));
    }

    #[test]
    fn newattr_halts_args_but_not_q() {
        let mut stack = RegStack::new();
        stack.set_q("A", RegValue::Owned("visible".into()), 100).unwrap();
        stack.scopes[0].set_str(RegClass::Arg, "0", "zero");
        stack.localize(ScopeKind::ARG | ScopeKind::NEWATTR);
        assert_eq!(stack.get(RegClass::Arg, "0"), None);
        assert_eq!(q(&stack, "A").as_deref(), Some("visible"));
    }

    #[test]
    fn named_register_ceiling() {
        let mut scope = RegScope::new(ScopeKind::Q);
        scope
            .set(RegClass::Q, "AA", RegValue::Int(1), 1)
            .unwrap();
        // Second multi-char name exceeds the ceiling.
        assert_eq!(
            scope.set(RegClass::Q, "BB", RegValue::Int(2), 1),
            Err(RegsFull)
        );
        // Single-char names are exempt.
        scope.set(RegClass::Q, "C", RegValue::Int(3), 1).unwrap();
        // Updating an existing name never counts.
        scope.set(RegClass::Q, "AA", RegValue::Int(9), 1).unwrap();
    }

    #[test]
    fn iter_levels_across_scopes() {
        let mut stack = RegStack::new();
        let _outer = stack.localize(ScopeKind::ITER);
        stack.top_mut().set_str(RegClass::Iter, "T0", "apples");
        stack.top_mut().set_int(RegClass::Iter, "N0", 1);
        let _inner = stack.localize(ScopeKind::ITER);
        stack.top_mut().set_str(RegClass::Iter, "T0", "red");
        stack.top_mut().set_int(RegClass::Iter, "N0", 3);

        assert_eq!(stack.iter_text(0).as_deref(), Some("red"));
        assert_eq!(stack.iter_text(1).as_deref(), Some("apples"));
        assert_eq!(stack.iter_number(1).as_deref(), Some("1"));
        assert_eq!(stack.iter_depth(), 2);
        assert_eq!(stack.iter_text(2), None);
    }

    #[test]
    fn copy_stack_renumbers_levels() {
        let mut stack = RegStack::new();
        stack.localize(ScopeKind::ITER);
        stack.top_mut().set_str(RegClass::Iter, "T0", "outer");
        stack.localize(ScopeKind::ITER);
        stack.top_mut().set_str(RegClass::Iter, "T0", "inner");

        let mut flat = RegScope::new(ScopeKind::queue_snapshot());
        stack.copy_stack(&mut flat, ScopeKind::ITER, false);
        assert_eq!(
            flat.get(RegClass::Iter, "T0").map(RegValue::render).as_deref(),
            Some("inner")
        );
        assert_eq!(
            flat.get(RegClass::Iter, "T1").map(RegValue::render).as_deref(),
            Some("outer")
        );

        // And the flattened scope answers leveled lookups when restored.
        let mut restored = RegStack::new();
        restored.push_scope(flat);
        assert_eq!(restored.iter_text(0).as_deref(), Some("inner"));
        assert_eq!(restored.iter_text(1).as_deref(), Some("outer"));
    }

    #[test]
    fn copy_stack_innermost_wins_for_flat_classes() {
        let mut stack = RegStack::new();
        stack.set_q("X", RegValue::Owned("old".into()), 100).unwrap();
        stack.localize(ScopeKind::Q);
        stack.top_mut().set_str(RegClass::Q, "X", "new");

        let mut flat = RegScope::new(ScopeKind::queue_snapshot());
        stack.copy_stack(&mut flat, ScopeKind::Q, false);
        assert_eq!(
            flat.get(RegClass::Q, "X").map(RegValue::render).as_deref(),
            Some("new")
        );
    }

    #[test]
    fn set_q_lands_in_innermost_q_scope() {
        let mut stack = RegStack::new();
        stack.localize(ScopeKind::Q | ScopeKind::QSTOP);
        stack.set_q("R", RegValue::Owned("local".into()), 100).unwrap();
        assert_eq!(q(&stack, "R").as_deref(), Some("local"));
        // The base scope was not touched.
        assert!(stack.scopes[0].get(RegClass::Q, "R").is_none());
    }

    #[test]
    fn clear_class_removes_only_that_class() {
        let mut scope = RegScope::new(ScopeKind::queue_snapshot());
        scope.set_str(RegClass::Q, "A", "1");
        scope.set_str(RegClass::Arg, "0", "2");
        scope.clear_class(RegClass::Arg);
        assert!(scope.get(RegClass::Q, "A").is_some());
        assert!(scope.get(RegClass::Arg, "0").is_none());
    }
}
