//! The four command queues and the tick-driven scheduler.
//!
//! Single-threaded and cooperative: `tick` promotes and wakes entries
//! once per heartbeat, `run_batch` executes a bounded chunk from the
//! player queue, and everything a running command does (including
//! enqueueing more work) re-enters the same scheduler on the same
//! thread. Cancellation tombstones entries in place; only semaphore
//! entries are ever physically unlinked early, because a tombstoned
//! entry left on the semaphore queue would hold its counter forever.

use std::collections::VecDeque;
use std::rc::Rc;

use moss_eval::{Cursor, EvalContext, EvalFlags, Identities, Interpreter, OutBuf, TermFlags};
use moss_types::{Dbref, World};
use rand::Rng;
use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};

use crate::config::QueueConfig;
use crate::entry::{EntryRef, EntryState, PsEntry, QueueEntry, QueueKind, QueueRequest, WaitSpec};
use crate::error::{QueueError, QueueResult};
use crate::pids::PidTable;

/// What one executed statement asks the batch loop to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Continue with the next statement.
    Done,
    /// Stop this entry; with `Some`, run the replacement text first
    /// (bounded by `max_break_depth`).
    Break(Option<String>),
    /// Splice this text in front of the remaining statements (bounded
    /// by the include-depth limit).
    Include(String),
}

/// Host-provided command dispatcher invoked for each statement of a
/// dequeued entry. It may re-enter the scheduler (a running command can
/// enqueue, wait, notify semaphores, or halt). The raw statement is in
/// `ctx.cmd_raw` on entry; the runner stores the evaluated form in
/// `ctx.cmd_evaled` so `%u` resolves in anything the command triggers.
pub trait CommandRunner {
    fn run(
        &mut self,
        sched: &mut Scheduler,
        interp: &mut Interpreter<'_>,
        ctx: &mut EvalContext,
        ids: Identities,
        cmd: &str,
    ) -> RunOutcome;
}

/// Player/object/wait/semaphore queues plus pid and quota bookkeeping.
#[derive(Debug)]
pub struct Scheduler {
    config: QueueConfig,
    /// Normal-priority entries from connected actors; FIFO.
    player: VecDeque<EntryRef>,
    /// Entries triggered by other objects; promoted once per tick.
    object: VecDeque<EntryRef>,
    /// Deadline-sorted, soonest first.
    wait: Vec<EntryRef>,
    /// FIFO per semaphore pair; scanned linearly.
    semaphore: VecDeque<EntryRef>,
    pids: PidTable,
    /// Live entries per owner, for the quota check.
    quota: FxHashMap<Dbref, u32>,
}

impl Scheduler {
    pub fn new(config: QueueConfig) -> Self {
        let pids = PidTable::new(config.max_pid);
        Self {
            config,
            player: VecDeque::new(),
            object: VecDeque::new(),
            wait: Vec::new(),
            semaphore: VecDeque::new(),
            pids,
            quota: FxHashMap::default(),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Live (non-tombstoned) entries across all four queues.
    pub fn len(&self) -> usize {
        self.all_entries().filter(|e| e.borrow().state == EntryState::Active).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ── Enqueue paths ────────────────────────────────────────────────

    /// Queue a command for normal execution. Routes to the player queue
    /// when the enactor is a connected player, the object queue
    /// otherwise.
    pub fn enqueue_command(&mut self, world: &dyn World, req: QueueRequest) -> QueueResult<u32> {
        let entry = self.admit(world, req)?;
        let pid = entry.borrow().pid;
        self.push_back(world, entry);
        Ok(pid)
    }

    /// Queue a command behind a deadline or a semaphore.
    pub fn enqueue_wait(
        &mut self,
        world: &dyn World,
        req: QueueRequest,
        spec: WaitSpec,
    ) -> QueueResult<u32> {
        let entry = self.admit(world, req)?;
        let pid = entry.borrow().pid;
        let now = world.now();
        match spec {
            WaitSpec::Delay(0) => self.push_back(world, entry),
            WaitSpec::Delay(secs) => {
                entry.borrow_mut().due = Some(now + secs);
                self.insert_wait(entry);
            }
            WaitSpec::Until(t) if t <= now => self.push_back(world, entry),
            WaitSpec::Until(t) => {
                entry.borrow_mut().due = Some(t);
                self.insert_wait(entry);
            }
            WaitSpec::Semaphore { obj, attr, timeout } => {
                let aname = attr.unwrap_or_else(|| self.config.sem_attr.clone());
                let count = world.semaphore_add(obj, &aname, 1);
                trace!(pid, obj = ?obj, attr = %aname, count, "semaphore wait");
                if count <= 0 {
                    // A prior over-notify banked this release.
                    self.push_back(world, entry);
                } else {
                    let mut b = entry.borrow_mut();
                    b.semaphore = Some((obj, aname));
                    b.due = timeout.map(|t| now + t);
                    drop(b);
                    self.semaphore.push_back(entry);
                }
            }
        }
        Ok(pid)
    }

    /// Cost, quota, and pid admission shared by every enqueue path.
    fn admit(&mut self, world: &dyn World, req: QueueRequest) -> QueueResult<EntryRef> {
        let owner = world.owner(req.executor);
        let cost = self.config.queue_cost;

        // The occasional loss penny rides on the base cost as a single
        // payment: a refusal charges nothing, and only the base cost is
        // ever refunded.
        let loss = if self.config.queue_loss > 0
            && rand::thread_rng().gen_range(0..self.config.queue_loss) == 0
        {
            1
        } else {
            0
        };
        if !world.charge(req.executor, cost + loss) {
            world.notify(owner, "Not enough pennies to queue that command.");
            return Err(QueueError::CannotPay { owner });
        }

        let used = self.quota.get(&owner).copied().unwrap_or(0);
        if used >= world.queue_limit(owner) {
            world.refund(req.executor, cost);
            self.breaker(world, owner, req.executor);
            return Err(QueueError::QuotaExceeded { owner });
        }

        let Some(pid) = self.pids.allocate() else {
            world.refund(req.executor, cost);
            warn!(executor = ?req.executor, "pid space exhausted");
            return Err(QueueError::PidExhausted);
        };
        *self.quota.entry(owner).or_insert(0) += 1;

        let entry = QueueEntry {
            pid,
            state: EntryState::Active,
            executor: req.executor,
            charged: req.executor,
            owner,
            caller: req.caller,
            enactor: req.enactor,
            semaphore: None,
            due: None,
            snapshot: req.snapshot,
            command: req.command,
            cost,
        }
        .into_ref();
        self.pids.bind(pid, &entry);
        trace!(pid, executor = ?entry.borrow().executor, "entry admitted");
        Ok(entry)
    }

    /// The runaway circuit breaker: drain the owner's queue, halt the
    /// offending object, and tell the owner what happened.
    fn breaker(&mut self, world: &dyn World, owner: Dbref, culprit: Dbref) {
        warn!(owner = ?owner, culprit = ?culprit, "queue quota exceeded, halting runaway object");
        world.notify(
            owner,
            &format!(
                "Runaway object: {}({}). Commands halted.",
                world.name(culprit),
                culprit
            ),
        );
        self.halt(world, owner, None);
        world.halt_object(culprit);
    }

    // ── Placement helpers ────────────────────────────────────────────

    fn push_back(&mut self, world: &dyn World, entry: EntryRef) {
        if world.is_connected(entry.borrow().enactor) {
            self.player.push_back(entry);
        } else {
            self.object.push_back(entry);
        }
    }

    fn push_front(&mut self, world: &dyn World, entry: EntryRef) {
        if world.is_connected(entry.borrow().enactor) {
            self.player.push_front(entry);
        } else {
            self.object.push_front(entry);
        }
    }

    /// Sorted insert; `<=` keeps FIFO order among equal deadlines.
    fn insert_wait(&mut self, entry: EntryRef) {
        let due = entry.borrow().due.unwrap_or(0);
        let at = self
            .wait
            .partition_point(|e| e.borrow().due.unwrap_or(0) <= due);
        self.wait.insert(at, entry);
    }

    // ── The heartbeat ────────────────────────────────────────────────

    /// One scheduler heartbeat: promote the object queue, wake due wait
    /// entries, and time out semaphore waits.
    pub fn tick(&mut self, world: &dyn World) {
        let now = world.now();

        // Object entries join behind everything already player-queued,
        // so object-triggered work runs at least one tick later.
        while let Some(e) = self.object.pop_front() {
            self.player.push_back(e);
        }

        // Wake entries whose deadline has passed. Reverse push_front
        // keeps deadline order at the head of the target queue.
        let due_count = self
            .wait
            .partition_point(|e| e.borrow().due.unwrap_or(0) <= now);
        let woken: Vec<EntryRef> = self.wait.drain(..due_count).collect();
        for e in woken.into_iter().rev() {
            if e.borrow().state == EntryState::Tombstoned {
                continue;
            }
            e.borrow_mut().due = None;
            self.push_front(world, e);
        }

        // Timed-out semaphore waits release with a counter decrement.
        // Tombstoned entries are dropped lazily here.
        let mut expired: Vec<EntryRef> = Vec::new();
        self.semaphore.retain(|e| {
            let b = e.borrow();
            if b.state == EntryState::Tombstoned {
                return false;
            }
            match b.due {
                Some(t) if t <= now => {
                    expired.push(Rc::clone(e));
                    false
                }
                _ => true,
            }
        });
        for e in expired.into_iter().rev() {
            let pair = {
                let mut b = e.borrow_mut();
                b.due = None;
                b.semaphore.take()
            };
            if let Some((obj, attr)) = pair {
                world.semaphore_add(obj, &attr, -1);
            }
            self.push_front(world, e);
        }
    }

    // ── Execution ────────────────────────────────────────────────────

    /// Execute the configured per-tick chunk of entries.
    pub fn run_chunk(
        &mut self,
        interp: &mut Interpreter<'_>,
        runner: &mut dyn CommandRunner,
    ) -> usize {
        let n = self.config.queue_chunk;
        self.run_batch(interp, runner, n)
    }

    /// Execute up to `n` entries from the front of the player queue.
    /// Returns how many actually ran.
    pub fn run_batch(
        &mut self,
        interp: &mut Interpreter<'_>,
        runner: &mut dyn CommandRunner,
        n: usize,
    ) -> usize {
        let mut ran = 0;
        for _ in 0..n {
            let Some(entry) = self.player.pop_front() else {
                break;
            };
            if entry.borrow().state == EntryState::Tombstoned {
                continue;
            }
            let world = interp.world();
            let stale = {
                let b = entry.borrow();
                !world.valid(b.executor) || world.halted(b.executor)
            };
            if stale {
                // Halted after enqueue: release and refund, don't run.
                self.retire(world, &entry);
                continue;
            }
            self.execute_entry(interp, runner, &entry);
            self.retire(interp.world(), &entry);
            ran += 1;
        }
        ran
    }

    /// Run one entry's statements to completion, break, or CPU yield.
    fn execute_entry(
        &mut self,
        interp: &mut Interpreter<'_>,
        runner: &mut dyn CommandRunner,
        entry: &EntryRef,
    ) {
        let (ids, mut text, snapshot, pid) = {
            let b = entry.borrow();
            (
                Identities {
                    executor: b.executor,
                    caller: b.caller,
                    enactor: b.enactor,
                },
                b.command.clone(),
                b.snapshot.clone(),
                b.pid,
            )
        };
        debug!(pid, executor = ?ids.executor, "running queue entry");

        let mut ctx = EvalContext::with_snapshot("", snapshot);
        interp.begin_slice();
        let mut breaks = 0u32;
        let mut includes = 0u32;

        'entry: loop {
            let source = text;
            let mut cursor = Cursor::new(&source);
            let mut replacement: Option<String> = None;

            while !cursor.at_end() {
                if interp.world().cpu_budget_over() {
                    // Cooperative yield: abandon remaining statements.
                    break 'entry;
                }
                // Statement splitting reuses the scanner in parse-off
                // mode so `;` inside braces/brackets doesn't split.
                let mut stmt_buf = OutBuf::new(interp.limits.buffer_len);
                if interp
                    .process_expression(
                        &mut ctx,
                        &mut cursor,
                        &mut stmt_buf,
                        ids,
                        EvalFlags::NOTHING,
                        TermFlags::SEMI,
                    )
                    .is_err()
                {
                    break 'entry;
                }
                if cursor.peek() == Some(b';') {
                    cursor.bump();
                }
                let stmt_owned = stmt_buf.into_string();
                let stmt = stmt_owned.trim();
                if stmt.is_empty() {
                    continue;
                }
                ctx.cmd_raw = stmt.to_string();
                // Each statement starts with a blank evaluated-command
                // slot; the runner fills it in once it has parsed the
                // statement, and `%u` reads it from then on.
                ctx.cmd_evaled.clear();

                match runner.run(self, interp, &mut ctx, ids, stmt) {
                    RunOutcome::Done => {}
                    RunOutcome::Break(None) => break 'entry,
                    RunOutcome::Break(Some(t)) => {
                        breaks += 1;
                        if breaks > self.config.max_break_depth {
                            break 'entry;
                        }
                        replacement = Some(t);
                        break;
                    }
                    RunOutcome::Include(t) => {
                        includes += 1;
                        if includes > interp.limits.max_include_depth {
                            continue;
                        }
                        let rest = cursor.rest();
                        replacement = Some(if rest.is_empty() {
                            t
                        } else {
                            format!("{t};{rest}")
                        });
                        break;
                    }
                }
            }

            match replacement {
                Some(t) => text = t,
                None => break,
            }
        }
    }

    // ── Retirement and cancellation ──────────────────────────────────

    /// Refund, release the pid, drop the quota slot, and tombstone.
    /// Idempotent: a second retirement of the same entry is a no-op.
    fn retire(&mut self, world: &dyn World, entry: &EntryRef) {
        let mut b = entry.borrow_mut();
        if b.state == EntryState::Tombstoned {
            return;
        }
        b.state = EntryState::Tombstoned;
        world.refund(b.charged, b.cost);
        if let Some(used) = self.quota.get_mut(&b.owner) {
            *used = used.saturating_sub(1);
        }
        self.pids.release(b.pid);
        trace!(pid = b.pid, "entry retired");
    }

    /// Release semaphore-queue entries on `obj`.
    ///
    /// `attr` of `None` matches any attribute. `count` of `None`
    /// releases every match. Drained entries are discarded with a
    /// refund; notified entries re-queue for execution. When a notify
    /// asks for more releases than exist, the counter on the named
    /// attribute is driven negative so that many future waits pass
    /// straight through. Returns how many entries were released.
    pub fn dequeue_semaphore(
        &mut self,
        world: &dyn World,
        obj: Dbref,
        attr: Option<&str>,
        count: Option<u32>,
        drain: bool,
    ) -> u32 {
        let mut released = 0u32;
        let mut hit: Vec<EntryRef> = Vec::new();
        self.semaphore.retain(|e| {
            let b = e.borrow();
            if b.state == EntryState::Tombstoned {
                return false;
            }
            if count.is_some_and(|n| released >= n) {
                return true;
            }
            let matches = match &b.semaphore {
                Some((o, a)) => {
                    *o == obj && attr.map_or(true, |want| a.eq_ignore_ascii_case(want))
                }
                None => false,
            };
            if matches {
                released += 1;
                hit.push(Rc::clone(e));
                false
            } else {
                true
            }
        });

        for e in hit {
            let pair = {
                let mut b = e.borrow_mut();
                b.due = None;
                b.semaphore.take()
            };
            if let Some((o, a)) = pair {
                world.semaphore_add(o, &a, -1);
            }
            if drain {
                self.retire(world, &e);
            } else {
                self.push_back(world, e);
            }
        }

        // Over-notify banks the shortfall as a negative counter.
        if !drain {
            if let Some(want) = count {
                if want > released {
                    let aname = attr.unwrap_or(&self.config.sem_attr);
                    let left = world.semaphore_add(obj, aname, -i64::from(want - released));
                    trace!(obj = ?obj, attr = %aname, count = left, "semaphore over-notify");
                }
            }
        }
        released
    }

    /// Halt every live entry belonging to `target`: entries the object
    /// itself executes, or, for a player, every entry their objects own.
    /// Entries are tombstoned in place; semaphore counters are given
    /// back. An optional replacement command is enqueued fresh as the
    /// target. Returns how many entries were halted.
    pub fn halt(&mut self, world: &dyn World, target: Dbref, replacement: Option<&str>) -> u32 {
        let by_owner = world.is_player(target);
        let hit: Vec<EntryRef> = self
            .all_entries()
            .filter(|e| {
                let b = e.borrow();
                b.state == EntryState::Active
                    && if by_owner {
                        b.owner == target
                    } else {
                        b.executor == target
                    }
            })
            .map(Rc::clone)
            .collect();

        let halted = hit.len() as u32;
        for e in hit {
            let pair = e.borrow_mut().semaphore.take();
            if let Some((o, a)) = pair {
                world.semaphore_add(o, &a, -1);
            }
            self.retire(world, &e);
        }
        debug!(target = ?target, halted, "halt");

        if let Some(cmd) = replacement {
            let _ = self.enqueue_command(world, QueueRequest::new(target, cmd));
        }
        halted
    }

    /// Halt one entry by pid. Semaphore entries are unlinked physically
    /// as well, since a tombstone on the semaphore queue would block its
    /// counter until the next notify.
    pub fn halt_by_pid(&mut self, world: &dyn World, pid: u32) -> QueueResult<()> {
        let Some(entry) = self.pids.lookup(pid) else {
            return Err(QueueError::NoSuchPid(pid));
        };
        if entry.borrow().state == EntryState::Tombstoned {
            return Err(QueueError::NoSuchPid(pid));
        }
        let pair = entry.borrow_mut().semaphore.take();
        if let Some((o, a)) = pair {
            world.semaphore_add(o, &a, -1);
            self.semaphore.retain(|e| !Rc::ptr_eq(e, &entry));
        }
        self.retire(world, &entry);
        Ok(())
    }

    /// Move a waiting entry's deadline. `offset` is an absolute time
    /// when `absolute`, otherwise a signed adjustment; either way the
    /// result is floored at the current time. Entries without a
    /// deadline (runnable, or indefinite semaphore waits) are rejected.
    /// Returns the new deadline.
    pub fn adjust_wait(
        &mut self,
        world: &dyn World,
        pid: u32,
        offset: i64,
        absolute: bool,
    ) -> QueueResult<u64> {
        let Some(entry) = self.pids.lookup(pid) else {
            return Err(QueueError::NoSuchPid(pid));
        };
        let (state, is_sem, due) = {
            let b = entry.borrow();
            (b.state, b.semaphore.is_some(), b.due)
        };
        if state == EntryState::Tombstoned {
            return Err(QueueError::NoSuchPid(pid));
        }
        let Some(due) = due else {
            return Err(QueueError::NotWaiting(pid));
        };

        let now = world.now() as i64;
        let new = if absolute {
            offset.max(now)
        } else {
            (due as i64 + offset).max(now)
        } as u64;
        entry.borrow_mut().due = Some(new);
        if !is_sem {
            // Relocate within the sorted wait queue.
            self.wait.retain(|e| !Rc::ptr_eq(e, &entry));
            self.insert_wait(entry);
        }
        Ok(new)
    }

    /// How long the host may sleep before the next scheduler event, in
    /// seconds. Zero when the player queue is runnable, one when only
    /// the object queue has work (next-tick promotion), otherwise the
    /// soonest deadline minus the lead time, capped at the ceiling.
    pub fn next_wakeup_estimate(&self, world: &dyn World) -> u64 {
        let active = |e: &&EntryRef| e.borrow().state == EntryState::Active;
        if self.player.iter().any(|e| active(&e)) {
            return 0;
        }
        if self.object.iter().any(|e| active(&e)) {
            return 1;
        }
        let soonest = self
            .wait
            .iter()
            .chain(self.semaphore.iter())
            .filter(active)
            .filter_map(|e| e.borrow().due)
            .min();
        match soonest {
            Some(t) => t
                .saturating_sub(world.now())
                .saturating_sub(self.config.wakeup_lead_secs)
                .min(self.config.wakeup_ceiling_secs),
            None => self.config.wakeup_ceiling_secs,
        }
    }

    /// Empty every queue without executing anything, refunding each
    /// live entry. Used at process shutdown.
    pub fn shutdown_drain(&mut self, world: &dyn World) {
        let all: Vec<EntryRef> = self.all_entries().map(Rc::clone).collect();
        self.player.clear();
        self.object.clear();
        self.wait.clear();
        self.semaphore.clear();
        for e in all {
            self.retire(world, &e);
        }
        self.quota.clear();
    }

    // ── Introspection ────────────────────────────────────────────────

    /// Snapshot of every live entry, for `@ps`-style listings.
    pub fn ps(&self, world: &dyn World) -> Vec<PsEntry> {
        let now = world.now();
        let mut rows = Vec::new();
        let queues = [
            (QueueKind::Player, self.player.iter().collect::<Vec<_>>()),
            (QueueKind::Object, self.object.iter().collect()),
            (QueueKind::Wait, self.wait.iter().collect()),
            (QueueKind::Semaphore, self.semaphore.iter().collect()),
        ];
        for (kind, entries) in queues {
            for e in entries {
                let b = e.borrow();
                if b.state != EntryState::Active {
                    continue;
                }
                rows.push(PsEntry {
                    pid: b.pid,
                    queue: kind,
                    executor: b.executor,
                    owner: b.owner,
                    remaining: b.due.map(|t| t.saturating_sub(now)),
                    semaphore: b.semaphore.as_ref().map(|(o, a)| format!("{o}/{a}")),
                    command: b.command.clone(),
                });
            }
        }
        rows
    }

    fn all_entries(&self) -> impl Iterator<Item = &EntryRef> {
        self.player
            .iter()
            .chain(self.object.iter())
            .chain(self.wait.iter())
            .chain(self.semaphore.iter())
    }
}
