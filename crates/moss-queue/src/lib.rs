//! MOSS command queue and scheduler.
//!
//! Queued commands sit in four tiers: the player queue (normal
//! priority, connected actors), the object queue (promoted to the
//! player queue once per tick), the deadline-sorted wait queue, and the
//! semaphore queue. A tick-driven, single-threaded scheduler charges
//! and refunds pennies per entry, tracks pids for introspection and
//! cancellation, snapshots register environments at enqueue time, and
//! runs dequeued entries statement-by-statement through the evaluator
//! in `moss-eval`.

mod config;
mod entry;
mod error;
mod pids;
mod scheduler;

pub use config::QueueConfig;
pub use entry::{EntryRef, EntryState, PsEntry, QueueEntry, QueueKind, QueueRequest, WaitSpec};
pub use error::{QueueError, QueueResult};
pub use pids::PidTable;
pub use scheduler::{CommandRunner, RunOutcome, Scheduler};
