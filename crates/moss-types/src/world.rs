//! The `World` collaborator trait.
//!
//! The evaluator and scheduler never touch the database, the network, or
//! the clock directly — everything goes through this narrow trait. All
//! receivers are `&self`: the engine is single-threaded and re-enters the
//! world mid-evaluation (a debug trace fires `notify` while an expression
//! is being scanned), so implementations use interior mutability rather
//! than threading `&mut` through every recursive call.

use crate::{Dbref, NOTHING};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};

/// Privilege tiers a function descriptor can demand of its executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PrivLevel {
    Player,
    Admin,
    Wizard,
}

/// Pronoun set for an object, consulted by the `%s`/`%o`/`%p`/`%a`
/// substitutions. Computed once per evaluator call and cached.
#[derive(Debug, Clone)]
pub struct Pronouns {
    pub subjective: String,
    pub objective: String,
    pub possessive: String,
    pub absolute: String,
}

impl Default for Pronouns {
    fn default() -> Self {
        Self {
            subjective: "it".into(),
            objective: "it".into(),
            possessive: "its".into(),
            absolute: "its".into(),
        }
    }
}

/// Everything the softcode core needs from the surrounding server.
pub trait World {
    /// Whether `who` names a live object.
    fn valid(&self, who: Dbref) -> bool;
    /// Owning player of an object (players own themselves).
    fn owner(&self, who: Dbref) -> Dbref;
    /// Whether the object is a player character.
    fn is_player(&self, who: Dbref) -> bool;
    /// Whether the object is a player with a live connection.
    fn is_connected(&self, who: Dbref) -> bool;
    /// Object name, for `%n`.
    fn name(&self, who: Dbref) -> String;
    /// Pronoun set, for `%s`/`%o`/`%p`/`%a`.
    fn pronouns(&self, who: Dbref) -> Pronouns;

    /// Whether the object has been administratively halted.
    fn halted(&self, who: Dbref) -> bool;
    /// Administratively halt an object (runaway circuit breaker).
    fn halt_object(&self, who: Dbref);

    /// Deliver a line of text to an object.
    fn notify(&self, who: Dbref, msg: &str);

    /// Charge `amount` pennies to `who`'s owner. Returns `false` (and
    /// charges nothing) if they cannot pay.
    fn charge(&self, who: Dbref, amount: i32) -> bool;
    /// Return pennies previously taken by [`World::charge`].
    fn refund(&self, who: Dbref, amount: i32);

    /// Fetch an attribute body, if present and readable.
    fn fetch_attr(&self, obj: Dbref, attr: &str) -> Option<String>;
    /// Whether `who` may evaluate `obj`'s attribute as a user function.
    fn attr_evaluable(&self, who: Dbref, obj: Dbref, attr: &str) -> bool;

    /// Whether `who` holds at least `level` privilege.
    fn has_privilege(&self, who: Dbref, level: PrivLevel) -> bool;

    /// Whether side-effect functions may run right now (host policy).
    fn side_effects_ok(&self) -> bool {
        true
    }

    /// Adjust the semaphore counter on `(obj, attr)` by `delta` and return
    /// the new value. Counters live in attribute storage and may go
    /// negative (over-notification).
    fn semaphore_add(&self, obj: Dbref, attr: &str, delta: i64) -> i64;

    /// Per-owner cap on outstanding queue entries.
    fn queue_limit(&self, owner: Dbref) -> u32;

    /// Wall-clock seconds.
    fn now(&self) -> u64;
    /// Begin a fresh per-entry CPU budget slice.
    fn cpu_budget_start(&self);
    /// Whether the current CPU budget slice is exhausted. This is the
    /// cooperative preemption signal; callers yield, they do not error.
    fn cpu_budget_over(&self) -> bool;
}

/// In-memory world used by the engine's own test suites.
///
/// Deterministic: the clock only moves when told, money and semaphores
/// are plain maps, and every `notify` is recorded for assertion.
#[derive(Default)]
pub struct MemWorld {
    clock: Cell<u64>,
    cpu_over: Cell<bool>,
    pennies: RefCell<BTreeMap<Dbref, i32>>,
    owners: RefCell<BTreeMap<Dbref, Dbref>>,
    names: RefCell<BTreeMap<Dbref, String>>,
    players: RefCell<BTreeSet<Dbref>>,
    connected: RefCell<BTreeSet<Dbref>>,
    halted: RefCell<BTreeSet<Dbref>>,
    wizards: RefCell<BTreeSet<Dbref>>,
    attrs: RefCell<BTreeMap<(Dbref, String), String>>,
    semaphores: RefCell<BTreeMap<(Dbref, String), i64>>,
    notifications: RefCell<Vec<(Dbref, String)>>,
    queue_limit: Cell<u32>,
    side_effects: Cell<bool>,
}

impl MemWorld {
    pub fn new() -> Self {
        let w = Self::default();
        w.queue_limit.set(100);
        w.side_effects.set(true);
        w
    }

    /// Register an object with its owner and name.
    pub fn add_object(&self, obj: Dbref, owner: Dbref, name: &str) {
        self.owners.borrow_mut().insert(obj, owner);
        self.names.borrow_mut().insert(obj, name.to_string());
    }

    /// Register a player (owns itself).
    pub fn add_player(&self, who: Dbref, name: &str) {
        self.add_object(who, who, name);
        self.players.borrow_mut().insert(who);
    }

    pub fn connect(&self, who: Dbref) {
        self.connected.borrow_mut().insert(who);
    }

    pub fn make_wizard(&self, who: Dbref) {
        self.wizards.borrow_mut().insert(who);
    }

    pub fn give_pennies(&self, who: Dbref, amount: i32) {
        *self.pennies.borrow_mut().entry(who).or_insert(0) += amount;
    }

    pub fn pennies(&self, who: Dbref) -> i32 {
        self.pennies.borrow().get(&who).copied().unwrap_or(0)
    }

    pub fn set_attr(&self, obj: Dbref, attr: &str, body: &str) {
        self.attrs
            .borrow_mut()
            .insert((obj, attr.to_ascii_uppercase()), body.to_string());
    }

    pub fn semaphore(&self, obj: Dbref, attr: &str) -> i64 {
        self.semaphores
            .borrow()
            .get(&(obj, attr.to_ascii_uppercase()))
            .copied()
            .unwrap_or(0)
    }

    pub fn set_queue_limit(&self, n: u32) {
        self.queue_limit.set(n);
    }

    /// Allow or forbid side-effect functions.
    pub fn set_side_effects(&self, on: bool) {
        self.side_effects.set(on);
    }

    /// Advance the clock by `secs`.
    pub fn advance(&self, secs: u64) {
        self.clock.set(self.clock.get() + secs);
    }

    /// Force or clear the CPU-budget-over flag.
    pub fn set_cpu_over(&self, over: bool) {
        self.cpu_over.set(over);
    }

    /// Every `(recipient, text)` notification delivered so far.
    pub fn notifications(&self) -> Vec<(Dbref, String)> {
        self.notifications.borrow().clone()
    }

    /// Notifications sent to one recipient.
    pub fn notices_for(&self, who: Dbref) -> Vec<String> {
        self.notifications
            .borrow()
            .iter()
            .filter(|(d, _)| *d == who)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

impl World for MemWorld {
    fn valid(&self, who: Dbref) -> bool {
        who.is_valid() && self.owners.borrow().contains_key(&who)
    }

    fn owner(&self, who: Dbref) -> Dbref {
        self.owners.borrow().get(&who).copied().unwrap_or(NOTHING)
    }

    fn is_player(&self, who: Dbref) -> bool {
        self.players.borrow().contains(&who)
    }

    fn is_connected(&self, who: Dbref) -> bool {
        self.connected.borrow().contains(&who)
    }

    fn name(&self, who: Dbref) -> String {
        self.names
            .borrow()
            .get(&who)
            .cloned()
            .unwrap_or_else(|| "*NOTHING*".to_string())
    }

    fn pronouns(&self, _who: Dbref) -> Pronouns {
        Pronouns::default()
    }

    fn halted(&self, who: Dbref) -> bool {
        self.halted.borrow().contains(&who)
    }

    fn halt_object(&self, who: Dbref) {
        self.halted.borrow_mut().insert(who);
    }

    fn notify(&self, who: Dbref, msg: &str) {
        self.notifications.borrow_mut().push((who, msg.to_string()));
    }

    fn charge(&self, who: Dbref, amount: i32) -> bool {
        let owner = self.owner(who);
        let mut pennies = self.pennies.borrow_mut();
        let balance = pennies.entry(owner).or_insert(0);
        if *balance < amount {
            return false;
        }
        *balance -= amount;
        true
    }

    fn refund(&self, who: Dbref, amount: i32) {
        let owner = self.owner(who);
        *self.pennies.borrow_mut().entry(owner).or_insert(0) += amount;
    }

    fn fetch_attr(&self, obj: Dbref, attr: &str) -> Option<String> {
        self.attrs
            .borrow()
            .get(&(obj, attr.to_ascii_uppercase()))
            .cloned()
    }

    fn attr_evaluable(&self, _who: Dbref, obj: Dbref, attr: &str) -> bool {
        self.attrs
            .borrow()
            .contains_key(&(obj, attr.to_ascii_uppercase()))
    }

    fn has_privilege(&self, who: Dbref, level: PrivLevel) -> bool {
        match level {
            PrivLevel::Player => true,
            PrivLevel::Admin | PrivLevel::Wizard => self.wizards.borrow().contains(&who),
        }
    }

    fn side_effects_ok(&self) -> bool {
        self.side_effects.get()
    }

    fn semaphore_add(&self, obj: Dbref, attr: &str, delta: i64) -> i64 {
        let mut sems = self.semaphores.borrow_mut();
        let counter = sems.entry((obj, attr.to_ascii_uppercase())).or_insert(0);
        *counter += delta;
        let value = *counter;
        if value == 0 {
            sems.remove(&(obj, attr.to_ascii_uppercase()));
        }
        value
    }

    fn queue_limit(&self, _owner: Dbref) -> u32 {
        self.queue_limit.get()
    }

    fn now(&self) -> u64 {
        self.clock.get()
    }

    fn cpu_budget_start(&self) {
        self.cpu_over.set(false);
    }

    fn cpu_budget_over(&self) -> bool {
        self.cpu_over.get()
    }
}
