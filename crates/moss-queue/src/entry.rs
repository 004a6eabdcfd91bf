//! Queue entries and the requests that create them.
//!
//! Each entry owns a flattened register snapshot taken at enqueue time
//! with [`RegStack::copy_stack`], so a queued continuation sees the
//! positional arguments and Q-registers of its enqueueing context no
//! matter how long it sits in a queue. Entries are shared between the
//! queues and the pid index as `Rc<RefCell<..>>`; cancellation marks
//! them [`EntryState::Tombstoned`] in place rather than unlinking.

use std::cell::RefCell;
use std::rc::Rc;

use moss_eval::{EvalContext, RegScope, RegStack, ScopeKind};
use moss_types::Dbref;
use serde::Serialize;

/// Lifecycle of a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Waiting in (or currently taken out of) a queue.
    Active,
    /// Retired: cost refunded, pid released, skipped at dequeue.
    Tombstoned,
}

/// One queued command.
#[derive(Debug)]
pub struct QueueEntry {
    /// Process id, unique among live entries.
    pub pid: u32,
    pub state: EntryState,
    /// Object that will run the command.
    pub executor: Dbref,
    /// Object the enqueue cost was charged through (refund target).
    pub charged: Dbref,
    /// Owner at enqueue time; quota bookkeeping key.
    pub owner: Dbref,
    pub caller: Dbref,
    /// The actor that set the whole chain in motion; its connectedness
    /// decides player-queue vs object-queue routing.
    pub enactor: Dbref,
    /// Semaphore this entry blocks on, if any.
    pub semaphore: Option<(Dbref, String)>,
    /// Absolute wall-clock deadline (wait queue) or semaphore timeout.
    pub due: Option<u64>,
    /// Flattened environment snapshot restored before execution.
    pub snapshot: RegScope,
    /// Raw command text, possibly several `;`-separated statements.
    pub command: String,
    /// Pennies charged at enqueue, refunded exactly once at retirement.
    pub cost: i32,
}

/// Shared handle to an entry; queues and the pid index alias it.
pub type EntryRef = Rc<RefCell<QueueEntry>>;

impl QueueEntry {
    pub fn into_ref(self) -> EntryRef {
        Rc::new(RefCell::new(self))
    }
}

/// What a caller hands the scheduler to get something queued.
#[derive(Debug)]
pub struct QueueRequest {
    pub executor: Dbref,
    pub enactor: Dbref,
    pub caller: Dbref,
    pub command: String,
    /// Environment snapshot carried into the entry.
    pub snapshot: RegScope,
}

impl QueueRequest {
    /// Request with no inherited environment (fresh top-level command).
    pub fn new(executor: Dbref, command: &str) -> Self {
        Self {
            executor,
            enactor: executor,
            caller: executor,
            command: command.to_string(),
            snapshot: RegScope::new(ScopeKind::queue_snapshot()),
        }
    }

    /// Request that carries the enqueueing evaluation's argument and
    /// Q-register environment, flattened through the stop barriers.
    pub fn from_context(
        executor: Dbref,
        enactor: Dbref,
        caller: Dbref,
        command: &str,
        ctx: &EvalContext,
    ) -> Self {
        Self {
            executor,
            enactor,
            caller,
            command: command.to_string(),
            snapshot: flatten(&ctx.regs),
        }
    }
}

/// Flatten a register stack into a single queue-snapshot scope.
pub fn flatten(regs: &RegStack) -> RegScope {
    let mut snap = RegScope::new(ScopeKind::queue_snapshot());
    regs.copy_stack(&mut snap, ScopeKind::queue_snapshot(), true);
    snap
}

/// How an [`enqueue_wait`](crate::Scheduler::enqueue_wait) entry blocks.
#[derive(Debug, Clone)]
pub enum WaitSpec {
    /// Run after this many seconds. Zero queues immediately.
    Delay(u64),
    /// Run at this absolute wall-clock second. A past deadline queues
    /// immediately.
    Until(u64),
    /// Block on a semaphore attribute; `attr` defaults to the
    /// configured semaphore name and `timeout` is relative seconds.
    Semaphore {
        obj: Dbref,
        attr: Option<String>,
        timeout: Option<u64>,
    },
}

/// Where an entry currently sits, for introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    Player,
    Object,
    Wait,
    Semaphore,
}

/// One row of [`Scheduler::ps`](crate::Scheduler::ps) output.
#[derive(Debug, Clone, Serialize)]
pub struct PsEntry {
    pub pid: u32,
    pub queue: QueueKind,
    pub executor: Dbref,
    pub owner: Dbref,
    /// Seconds until due, for wait entries and timed semaphores.
    pub remaining: Option<u64>,
    /// `object/attribute` the entry blocks on, if a semaphore wait.
    pub semaphore: Option<String>,
    pub command: String,
}
