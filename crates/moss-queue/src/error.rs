use moss_types::Dbref;
use thiserror::Error;

/// Errors reported by scheduler operations.
///
/// These are host-facing: softcode never sees them directly. The
/// runaway circuit breaker notifies the owner before the error is
/// returned, so callers only need to abandon the one operation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The owner's outstanding-entry quota was hit; the offending
    /// object has been halted and its owner's entries drained.
    #[error("queue quota exceeded for {owner}")]
    QuotaExceeded { owner: Dbref },

    /// The owner could not pay the enqueue cost.
    #[error("{owner} cannot pay the queue cost")]
    CannotPay { owner: Dbref },

    /// Every pid below the cap is bound to a live entry.
    #[error("no free process ids")]
    PidExhausted,

    /// No live entry is bound to the pid.
    #[error("no queue entry with pid {0}")]
    NoSuchPid(u32),

    /// The entry is not in a state whose deadline can be adjusted
    /// (already runnable, or an indefinite semaphore wait).
    #[error("queue entry {0} is not waiting on a deadline")]
    NotWaiting(u32),
}

pub type QueueResult<T> = Result<T, QueueError>;
