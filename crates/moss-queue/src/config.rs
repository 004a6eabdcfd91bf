use serde::{Deserialize, Serialize};

/// Tunable queue parameters, deserializable from the host's config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Pennies charged per enqueue, refunded at dequeue.
    pub queue_cost: i32,
    /// One-in-N chance an enqueue costs an extra penny that is kept.
    /// Zero disables the loss.
    pub queue_loss: u32,
    /// Entries executed per `run_batch` call by default.
    pub queue_chunk: usize,
    /// Process-id ceiling; pids wrap below this, skipping live ids.
    pub max_pid: u32,
    /// Default semaphore attribute name.
    pub sem_attr: String,
    /// Ceiling on the idle-sleep estimate, in seconds.
    pub wakeup_ceiling_secs: u64,
    /// Lead time subtracted from the idle-sleep estimate.
    pub wakeup_lead_secs: u64,
    /// Bound on repeated break-replacement commands in one entry.
    pub max_break_depth: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_cost: 10,
            queue_loss: 63,
            queue_chunk: 3,
            max_pid: 32767,
            sem_attr: "SEMAPHORE".to_string(),
            wakeup_ceiling_secs: 5,
            wakeup_lead_secs: 1,
            max_break_depth: 10,
        }
    }
}
