//! Bounded pid allocation and the pid → entry index.
//!
//! Pids are small wrapping integers capped by `max_pid`. Allocation
//! skips ids still bound to a live entry, so a pid is never reused
//! while something can still name the old entry by it. The index holds
//! weak handles; a dropped entry vacates its slot lazily.

use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use crate::entry::{EntryRef, QueueEntry};
use std::cell::RefCell;

#[derive(Debug)]
pub struct PidTable {
    next: u32,
    max_pid: u32,
    live: BTreeMap<u32, Weak<RefCell<QueueEntry>>>,
}

impl PidTable {
    pub fn new(max_pid: u32) -> Self {
        Self {
            next: 1,
            max_pid: max_pid.max(1),
            live: BTreeMap::new(),
        }
    }

    /// Number of pids currently bound.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Claim the next free pid, or `None` when every id below the cap
    /// is live.
    pub fn allocate(&mut self) -> Option<u32> {
        if self.live.len() as u32 >= self.max_pid {
            return None;
        }
        loop {
            let pid = self.next;
            self.next = if pid >= self.max_pid { 1 } else { pid + 1 };
            match self.live.get(&pid) {
                Some(weak) if weak.upgrade().is_some() => continue,
                Some(_) => {
                    // Stale weak slot; the entry is gone.
                    self.live.remove(&pid);
                    return Some(pid);
                }
                None => return Some(pid),
            }
        }
    }

    /// Bind an allocated pid to its entry.
    pub fn bind(&mut self, pid: u32, entry: &EntryRef) {
        self.live.insert(pid, Rc::downgrade(entry));
    }

    /// Release a pid at entry retirement.
    pub fn release(&mut self, pid: u32) {
        self.live.remove(&pid);
    }

    /// Find the live entry bound to `pid`.
    pub fn lookup(&self, pid: u32) -> Option<EntryRef> {
        self.live.get(&pid).and_then(Weak::upgrade)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{EntryState, QueueEntry};
    use moss_eval::{RegScope, ScopeKind};
    use moss_types::Dbref;

    fn dummy(pid: u32) -> EntryRef {
        QueueEntry {
            pid,
            state: EntryState::Active,
            executor: Dbref(1),
            charged: Dbref(1),
            owner: Dbref(1),
            caller: Dbref(1),
            enactor: Dbref(1),
            semaphore: None,
            due: None,
            snapshot: RegScope::new(ScopeKind::queue_snapshot()),
            command: String::new(),
            cost: 0,
        }
        .into_ref()
    }

    #[test]
    fn pids_are_sequential_and_wrap() {
        let mut table = PidTable::new(3);
        assert_eq!(table.allocate(), Some(1));
        assert_eq!(table.allocate(), Some(2));
        // Nothing bound yet, so the wrap revisits 3 then 1.
        assert_eq!(table.allocate(), Some(3));
        assert_eq!(table.allocate(), Some(1));
    }

    #[test]
    fn live_pids_are_skipped() {
        let mut table = PidTable::new(3);
        let pid = table.allocate().unwrap();
        let e = dummy(pid);
        table.bind(pid, &e);
        assert_eq!(table.allocate(), Some(2));
        assert_eq!(table.allocate(), Some(3));
        // Only pid 1 is bound; wrapping skips it.
        assert_eq!(table.allocate(), Some(2));
        table.release(pid);
        assert_eq!(table.allocate(), Some(3));
    }

    #[test]
    fn exhaustion_returns_none() {
        let mut table = PidTable::new(2);
        let a = dummy(1);
        let b = dummy(2);
        table.bind(1, &a);
        table.bind(2, &b);
        assert_eq!(table.allocate(), None);
    }

    #[test]
    fn lookup_follows_liveness() {
        let mut table = PidTable::new(8);
        let pid = table.allocate().unwrap();
        let e = dummy(pid);
        table.bind(pid, &e);
        assert!(table.lookup(pid).is_some());
        drop(e);
        assert!(table.lookup(pid).is_none());
        // The stale slot is reclaimed on a later allocation pass.
        for _ in 0..8 {
            table.allocate();
        }
        assert!(table.lookup(pid).is_none());
    }
}
