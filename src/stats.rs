//! Event counters and queue-depth gauges.
//!
//! All relaxed: these exist for reply telemetry, tests, and operator
//! eyeballs, not for synchronization. Every cross-thread hand-off has
//! its own flag protocol.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::config::MAX_PORTS;

#[derive(Debug, Default)]
pub struct Counters {
    /// Requests whose FINISHED response the dispatcher absorbed.
    pub completed: AtomicU64,
    /// Replies handed to the transmit path.
    pub replies_sent: AtomicU64,
    /// Preempt signals raised by the dispatcher.
    pub preempts_sent: AtomicU64,
    /// Preempted tasks re-enqueued into their type queue.
    pub preempt_requeues: AtomicU64,
    /// Requests dropped because the context pool was empty.
    pub ctx_alloc_drops: AtomicU64,
    /// Packets dropped for failing header parse or sanity checks.
    pub malformed_drops: AtomicU64,
    /// Packets or requests dropped on pool exhaustion in the networker.
    pub alloc_drops: AtomicU64,
    /// Replies dropped because the transmit path refused them.
    pub tx_failures: AtomicU64,
    /// Protocol states that should not happen; logged and degraded.
    pub invariant_violations: AtomicU64,
    /// Freed requests handed back to the networker's free list.
    pub recycled: AtomicU64,
}

impl Counters {
    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Snapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        Snapshot {
            completed: get(&self.completed),
            replies_sent: get(&self.replies_sent),
            preempts_sent: get(&self.preempts_sent),
            preempt_requeues: get(&self.preempt_requeues),
            ctx_alloc_drops: get(&self.ctx_alloc_drops),
            malformed_drops: get(&self.malformed_drops),
            alloc_drops: get(&self.alloc_drops),
            tx_failures: get(&self.tx_failures),
            invariant_violations: get(&self.invariant_violations),
            recycled: get(&self.recycled),
        }
    }
}

/// Point-in-time copy of [`Counters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub completed: u64,
    pub replies_sent: u64,
    pub preempts_sent: u64,
    pub preempt_requeues: u64,
    pub ctx_alloc_drops: u64,
    pub malformed_drops: u64,
    pub alloc_drops: u64,
    pub tx_failures: u64,
    pub invariant_violations: u64,
    pub recycled: u64,
}

/// Per-port task-queue depths, written by the dispatcher, read by
/// workers for the reply telemetry words.
#[derive(Debug)]
pub struct DepthGauges {
    depths: [AtomicU32; MAX_PORTS],
}

impl DepthGauges {
    pub fn new() -> DepthGauges {
        DepthGauges {
            depths: std::array::from_fn(|_| AtomicU32::new(0)),
        }
    }

    #[inline]
    pub fn set(&self, port: usize, depth: u32) {
        self.depths[port].store(depth, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self, port: usize) -> u32 {
        self.depths[port].load(Ordering::Relaxed)
    }

    /// The three gauges that fit in a reply header.
    pub fn telemetry(&self) -> [u32; 3] {
        [self.get(0), self.get(1), self.get(2)]
    }
}

impl Default for DepthGauges {
    fn default() -> Self {
        Self::new()
    }
}
