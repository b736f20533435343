//! Per-type task queues and the dequeue policies.
//!
//! One FIFO per request type; the type doubles as the priority class.
//! `smart_dequeue` is the scheduling policy that matters: it drains
//! the queue whose head has overshot its SLO by the largest relative
//! margin. `naive_dequeue` scans types in order and exists for
//! debugging comparisons.

use crate::context::Context;
use crate::request::Request;

/// How a task should be started by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskKind {
    /// Never started: the context must be prepared from the request.
    Fresh = 0x01,
    /// Preempted earlier: the context resumes where it yielded.
    Resumed = 0x02,
}

impl TaskKind {
    pub(crate) fn from_u8(v: u8) -> TaskKind {
        match v {
            0x01 => TaskKind::Fresh,
            _ => TaskKind::Resumed,
        }
    }
}

/// One scheduling unit: a runnable context plus its originating
/// request.
#[derive(Debug)]
pub struct Task {
    pub kind: TaskKind,
    pub ctx: Box<Context>,
    pub req: Box<Request>,
    pub port: u16,
    /// First enqueue time, in cycles. Preserved across preemption so a
    /// starved task keeps its age.
    pub stamp: u64,
}

/// The queue set. Owned exclusively by the dispatcher thread.
pub struct TaskQueues {
    queues: Vec<std::collections::VecDeque<Task>>,
    slos_cycles: Vec<u64>,
    capacity: usize,
}

impl TaskQueues {
    /// `capacity` bounds each queue; it should cover every context the
    /// pool can hand out, so hitting it means an accounting bug
    /// upstream, not load.
    pub fn new(num_ports: usize, capacity: usize, slos_cycles: Vec<u64>) -> TaskQueues {
        assert_eq!(slos_cycles.len(), num_ports);
        TaskQueues {
            queues: (0..num_ports)
                .map(|_| std::collections::VecDeque::with_capacity(capacity))
                .collect(),
            slos_cycles,
            capacity,
        }
    }

    pub fn num_ports(&self) -> usize {
        self.queues.len()
    }

    pub fn depth(&self, port: usize) -> usize {
        self.queues[port].len()
    }

    /// Append at the tail (the normal path). On a full queue the task
    /// is handed back so the caller can free its parts.
    pub fn enqueue_tail(&mut self, task: Task) -> Result<(), Task> {
        let q = &mut self.queues[task.port as usize];
        if q.len() >= self.capacity {
            return Err(task);
        }
        q.push_back(task);
        Ok(())
    }

    /// Push at the head (LIFO-on-resume types).
    pub fn enqueue_head(&mut self, task: Task) -> Result<(), Task> {
        let q = &mut self.queues[task.port as usize];
        if q.len() >= self.capacity {
            return Err(task);
        }
        q.push_front(task);
        Ok(())
    }

    pub fn dequeue(&mut self, port: usize) -> Option<Task> {
        self.queues[port].pop_front()
    }

    /// Enqueue time of the oldest task of `port`, if any.
    pub fn head_stamp(&self, port: usize) -> Option<u64> {
        self.queues[port].front().map(|t| t.stamp)
    }

    /// Drain the most starved queue: the one whose head has the
    /// largest `(cur_time - head_stamp) / slo`. Ties break to the
    /// lowest port; queues whose head is not yet older than zero
    /// cycles are skipped along with empty ones.
    pub fn smart_dequeue(&mut self, cur_time: u64) -> Option<Task> {
        let mut best: Option<usize> = None;
        let mut best_score = 0f64;
        for port in 0..self.queues.len() {
            let Some(stamp) = self.head_stamp(port) else {
                continue;
            };
            let age = cur_time.saturating_sub(stamp);
            let score = age as f64 / self.slos_cycles[port] as f64;
            if score > best_score {
                best_score = score;
                best = Some(port);
            }
        }
        self.dequeue(best?)
    }

    /// Scan types in order and take the first nonempty head. Debug
    /// aid; not SLO-aware.
    pub fn naive_dequeue(&mut self) -> Option<Task> {
        for port in 0..self.queues.len() {
            if let Some(task) = self.dequeue(port) {
                return Some(task);
            }
        }
        None
    }

    /// Total queued tasks across all types.
    pub fn len(&self) -> usize {
        self.queues.iter().map(|q| q.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.iter().all(|q| q.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(port: u16, stamp: u64) -> Task {
        Task {
            kind: TaskKind::Fresh,
            ctx: Box::new(Context::idle()),
            req: Box::new(Request::empty()),
            port,
            stamp,
        }
    }

    #[test]
    fn fifo_within_a_type() {
        let mut q = TaskQueues::new(1, 16, vec![1_000]);
        for stamp in [10, 20, 30] {
            q.enqueue_tail(task(0, stamp)).unwrap();
        }
        let stamps: Vec<u64> = std::iter::from_fn(|| q.dequeue(0)).map(|t| t.stamp).collect();
        assert_eq!(stamps, [10, 20, 30]);
    }

    #[test]
    fn head_enqueue_jumps_the_line() {
        let mut q = TaskQueues::new(1, 16, vec![1_000]);
        q.enqueue_tail(task(0, 10)).unwrap();
        q.enqueue_tail(task(0, 20)).unwrap();
        q.enqueue_head(task(0, 5)).unwrap();
        assert_eq!(q.head_stamp(0), Some(5));
        assert_eq!(q.dequeue(0).unwrap().stamp, 5);
    }

    #[test]
    fn smart_dequeue_prefers_largest_relative_overshoot() {
        // Two types: slo[0] = 1ms, slo[1] = 10ms. Type 1 enqueued at
        // t=0, type 0 at t=0.5ms. At t=0.6ms, type 0 scores 0.6
        // against type 1's 0.06 and must win.
        let ms = 1_000_000;
        let mut q = TaskQueues::new(2, 16, vec![ms, 10 * ms]);
        q.enqueue_tail(task(1, 0)).unwrap();
        q.enqueue_tail(task(0, ms / 2)).unwrap();
        let picked = q.smart_dequeue(ms * 6 / 10).unwrap();
        assert_eq!(picked.port, 0);
        let next = q.smart_dequeue(ms * 6 / 10).unwrap();
        assert_eq!(next.port, 1);
    }

    #[test]
    fn smart_dequeue_picks_the_maximum_score() {
        // Among nonempty queues the chosen head always has the largest
        // (cur - stamp)/slo.
        let slos = vec![100, 200, 400, 800];
        let mut q = TaskQueues::new(4, 16, slos.clone());
        let stamps = [40, 10, 70, 0];
        for (port, stamp) in stamps.iter().enumerate() {
            q.enqueue_tail(task(port as u16, *stamp)).unwrap();
        }
        let cur = 100;
        let expect = (0..4)
            .max_by(|&a, &b| {
                let score = |i: usize| (cur - stamps[i]) as f64 / slos[i] as f64;
                score(a).partial_cmp(&score(b)).unwrap()
            })
            .unwrap();
        assert_eq!(q.smart_dequeue(cur).unwrap().port as usize, expect);
    }

    #[test]
    fn smart_dequeue_ties_break_to_lowest_port() {
        let mut q = TaskQueues::new(2, 16, vec![100, 100]);
        q.enqueue_tail(task(0, 50)).unwrap();
        q.enqueue_tail(task(1, 50)).unwrap();
        assert_eq!(q.smart_dequeue(60).unwrap().port, 0);
    }

    #[test]
    fn smart_dequeue_skips_empty_and_zero_age() {
        let mut q = TaskQueues::new(2, 16, vec![100, 100]);
        assert!(q.smart_dequeue(1_000).is_none());
        q.enqueue_tail(task(1, 500)).unwrap();
        // Head not older than cur_time: nothing eligible yet.
        assert!(q.smart_dequeue(500).is_none());
        assert_eq!(q.smart_dequeue(501).unwrap().port, 1);
    }

    #[test]
    fn naive_dequeue_scans_in_order() {
        let mut q = TaskQueues::new(3, 16, vec![1, 1, 1]);
        q.enqueue_tail(task(2, 1)).unwrap();
        q.enqueue_tail(task(1, 2)).unwrap();
        assert_eq!(q.naive_dequeue().unwrap().port, 1);
        assert_eq!(q.naive_dequeue().unwrap().port, 2);
        assert!(q.naive_dequeue().is_none());
    }

    #[test]
    fn full_queue_hands_the_task_back() {
        let mut q = TaskQueues::new(1, 1, vec![1]);
        q.enqueue_tail(task(0, 1)).unwrap();
        assert!(q.enqueue_tail(task(0, 2)).is_err());
        assert!(q.enqueue_head(task(0, 3)).is_err());
    }
}
