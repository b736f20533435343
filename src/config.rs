//! Engine configuration.
//!
//! Plain data, filled in by the embedder and validated once at
//! bring-up. Parsing a config file into this struct is the embedder's
//! problem; everything here is already in canonical units
//! (nanoseconds, CPU indices, cell counts).

use std::net::Ipv4Addr;

use crate::error::InitError;

/// Upper bound on distinct request types (and therefore task queues).
pub const MAX_PORTS: usize = 32;

/// Upper bound on worker cores.
pub const MAX_WORKERS: usize = 18;

/// Batch size of the networker→dispatcher board, and of one NIC poll.
pub const MAX_BATCH: usize = 32;

/// Maximum packet fragments per request.
pub const MAX_FRAGS: usize = 8;

#[derive(Debug, Clone)]
pub struct Config {
    /// Ordered CPU list: index 0 runs the dispatcher, index 1 the
    /// networker, the rest run one worker each.
    pub cpus: Vec<usize>,

    /// Number of distinct request types. Types double as priority
    /// classes and index the task queues.
    pub num_ports: usize,

    /// Per-type service-level objective in nanoseconds. The SLO-aware
    /// dequeue prefers the queue whose head has overshot its SLO by
    /// the largest relative margin.
    pub slos: Vec<u64>,

    /// Per-type resume placement: `true` re-enqueues a preempted task
    /// at the head of its queue, `false` at the tail.
    pub queue_settings: Vec<bool>,

    /// Nanoseconds a worker may hold a task before it becomes eligible
    /// for preemption.
    pub preemption_delay: u64,

    /// Local address the external NIC driver is bound to. Carried for
    /// the embedder; the core never parses L2/L3 headers itself.
    pub host_addr: Ipv4Addr,

    /// Local MAC, same story as `host_addr`.
    pub mac: [u8; 6],

    /// Whether to pin role threads to `cpus`. Disable in environments
    /// (CI, containers) where the configured CPUs may not exist.
    pub pin_threads: bool,

    /// Capacity of the request pool: bounds requests in flight.
    pub request_capacity: usize,

    /// Capacity of the context pool: bounds tasks admitted to workers.
    pub context_capacity: usize,

    /// Slots in the reassembly table: bounds concurrent partial
    /// requests.
    pub reassembly_capacity: usize,
}

impl Config {
    /// A workable starting point: `num_workers` workers, one port with
    /// a 1ms SLO, tail re-enqueue, 100us preemption delay, no pinning.
    pub fn new(num_workers: usize) -> Config {
        Config {
            cpus: (0..num_workers + 2).collect(),
            num_ports: 1,
            slos: vec![1_000_000],
            queue_settings: vec![false],
            preemption_delay: 100_000,
            host_addr: Ipv4Addr::UNSPECIFIED,
            mac: [0; 6],
            pin_threads: false,
            request_capacity: 1024,
            context_capacity: 1024,
            reassembly_capacity: 256,
        }
    }

    /// Workers are every configured CPU past the dispatcher and
    /// networker.
    pub fn num_workers(&self) -> usize {
        self.cpus.len().saturating_sub(2)
    }

    pub fn validate(&self) -> Result<(), InitError> {
        let fail = |msg: String| Err(InitError::Config(msg));
        if self.cpus.len() < 3 {
            return fail(format!(
                "need at least 3 cpus (dispatcher, networker, 1 worker), got {}",
                self.cpus.len()
            ));
        }
        if self.num_workers() > MAX_WORKERS {
            return fail(format!(
                "{} workers exceeds the supported maximum of {MAX_WORKERS}",
                self.num_workers()
            ));
        }
        if self.num_ports == 0 || self.num_ports > MAX_PORTS {
            return fail(format!(
                "num_ports must be in 1..={MAX_PORTS}, got {}",
                self.num_ports
            ));
        }
        if self.slos.len() != self.num_ports {
            return fail(format!(
                "slos has {} entries for {} ports",
                self.slos.len(),
                self.num_ports
            ));
        }
        if self.queue_settings.len() != self.num_ports {
            return fail(format!(
                "queue_settings has {} entries for {} ports",
                self.queue_settings.len(),
                self.num_ports
            ));
        }
        if self.slos.iter().any(|&slo| slo == 0) {
            return fail("slos must be nonzero".to_string());
        }
        if self.request_capacity == 0 || self.context_capacity == 0 {
            return fail("request and context pools need nonzero capacity".to_string());
        }
        Ok(())
    }
}
