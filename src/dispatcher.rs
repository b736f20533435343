//! The dispatcher loop: the scheduling brain.
//!
//! One pinned thread owns the task queues, the context pool, and the
//! freed-request stash. Each iteration it sweeps every worker's
//! response slot: absorbing results, re-enqueueing preempted tasks,
//! raising preempt lines on overrunners, handing out new work, and
//! then drains the networker board into the task queues.

use std::sync::Arc;

use log::{error, warn};

use crate::config::Config;
use crate::context::Context;
use crate::cycles::{self, Calibration};
use crate::mailbox::{self, Shared};
use crate::mempool::Pool;
use crate::request::{FiniQueue, Request};
use crate::stats::Counters;
use crate::tskq::{Task, TaskKind, TaskQueues};

/// `timestamps` value for a worker with nothing dispatched.
const IDLE: u64 = u64::MAX;

pub(crate) struct Dispatcher {
    shared: Arc<Shared>,
    tskq: TaskQueues,
    ctx_pool: Pool<Context>,
    fini: FiniQueue,
    /// Last dispatch time per worker, IDLE when nothing is out.
    timestamps: Vec<u64>,
    /// Whether the worker is still eligible for a preempt this
    /// dispatch. Cleared on raise: at most one signal per dispatch.
    preempt_check: Vec<bool>,
    delay_cycles: u64,
    lifo_on_resume: Vec<bool>,
    num_workers: usize,
}

impl Dispatcher {
    pub fn new(shared: Arc<Shared>, ctx_pool: Pool<Context>, cfg: &Config, cal: Calibration) -> Dispatcher {
        let slos_cycles = cfg.slos.iter().map(|&ns| cal.ns_to_cycles(ns).max(1)).collect();
        let num_workers = cfg.num_workers();
        Dispatcher {
            shared,
            tskq: TaskQueues::new(cfg.num_ports, cfg.context_capacity, slos_cycles),
            ctx_pool,
            fini: FiniQueue::with_capacity(cfg.request_capacity),
            timestamps: vec![IDLE; num_workers],
            preempt_check: vec![false; num_workers],
            delay_cycles: cal.ns_to_cycles(cfg.preemption_delay).max(1),
            lifo_on_resume: cfg.queue_settings.clone(),
            num_workers,
        }
    }

    pub fn run(mut self) {
        while !self.shared.shutting_down() {
            let cur = cycles::now();
            for i in 0..self.num_workers {
                self.handle_worker(i, cur);
            }
            self.handle_networker(cur);
        }
    }

    fn handle_worker(&mut self, i: usize, cur: u64) {
        match self.shared.responses[i].flag() {
            mailbox::RUNNING => self.maybe_preempt(i, cur),
            mailbox::FINISHED => {
                self.absorb_finished(i);
                self.dispatch(i, cur);
            }
            mailbox::PREEMPTED => {
                self.absorb_preempted(i);
                self.dispatch(i, cur);
            }
            // PROCESSED: the worker is idle and polling.
            _ => self.dispatch(i, cur),
        }
    }

    fn maybe_preempt(&mut self, i: usize, cur: u64) {
        if self.preempt_check[i] && cur.wrapping_sub(self.timestamps[i]) > self.delay_cycles {
            // One signal per dispatch; the gate stays down until the
            // worker's next task goes out.
            self.preempt_check[i] = false;
            self.shared.preempt[i].raise();
            Counters::bump(&self.shared.counters.preempts_sent);
        }
    }

    fn absorb_finished(&mut self, i: usize) {
        let d = self.shared.responses[i].take();
        if d.ctx.is_none() || d.req.is_none() {
            error!("worker {i} reported FINISHED without a context/request; dropping");
            Counters::bump(&self.shared.counters.invariant_violations);
        }
        if let Some(ctx) = d.ctx {
            self.ctx_pool.free(ctx);
        }
        if let Some(req) = d.req {
            self.fini.push(req);
            Counters::bump(&self.shared.counters.completed);
        }
        self.preempt_check[i] = false;
        self.shared.responses[i].mark_processed();
    }

    fn absorb_preempted(&mut self, i: usize) {
        let d = self.shared.responses[i].take();
        match (d.ctx, d.req) {
            (Some(ctx), Some(req)) if (d.port as usize) < self.tskq.num_ports() => {
                let task = Task {
                    kind: TaskKind::Resumed,
                    ctx,
                    req,
                    port: d.port,
                    stamp: d.stamp,
                };
                let placed = if self.lifo_on_resume[d.port as usize] {
                    self.tskq.enqueue_head(task)
                } else {
                    self.tskq.enqueue_tail(task)
                };
                match placed {
                    Ok(()) => {
                        Counters::bump(&self.shared.counters.preempt_requeues);
                        self.sync_gauge(d.port);
                    }
                    Err(task) => {
                        error!("task queue {} full on preempted re-enqueue; dropping", d.port);
                        Counters::bump(&self.shared.counters.invariant_violations);
                        self.retire(task.ctx, task.req);
                    }
                }
            }
            (ctx, req) => {
                error!("worker {i} reported PREEMPTED with a broken task (port {}); dropping", d.port);
                Counters::bump(&self.shared.counters.invariant_violations);
                if let Some(ctx) = ctx {
                    self.ctx_pool.free(ctx);
                }
                if let Some(req) = req {
                    self.fini.push(req);
                }
            }
        }
        self.preempt_check[i] = false;
        self.shared.responses[i].mark_processed();
    }

    fn dispatch(&mut self, i: usize, cur: u64) {
        let Some(task) = self.tskq.smart_dequeue(cur) else {
            self.timestamps[i] = IDLE;
            return;
        };
        self.sync_gauge(task.port);
        // The worker owes a response from the moment the task is
        // visible, so RUNNING goes in before ACTIVE.
        self.shared.responses[i].mark_running();
        self.timestamps[i] = cur;
        self.preempt_check[i] = true;
        self.shared.dispatch[i].publish(task.ctx, task.req, task.port, task.kind, task.stamp);
    }

    fn handle_networker(&mut self, cur: u64) {
        let pending = self.shared.board.pending();
        if pending == 0 {
            return;
        }
        for slot in 0..pending {
            let (req, port) = self.shared.board.take(slot);
            let Some(req) = req else {
                error!("networker board slot {slot} was empty");
                Counters::bump(&self.shared.counters.invariant_violations);
                continue;
            };
            if port as usize >= self.tskq.num_ports() {
                error!("networker delivered request for unknown port {port}; dropping");
                Counters::bump(&self.shared.counters.invariant_violations);
                self.fini.push(req);
                continue;
            }
            let Some(ctx) = self.ctx_pool.alloc() else {
                warn!("context pool empty; dropping request {} from client {}", req.req_id, req.client_id);
                Counters::bump(&self.shared.counters.ctx_alloc_drops);
                self.fini.push(req);
                continue;
            };
            let task = Task {
                kind: TaskKind::Fresh,
                ctx,
                req,
                port,
                stamp: cur,
            };
            match self.tskq.enqueue_tail(task) {
                Ok(()) => self.sync_gauge(port),
                Err(task) => {
                    error!("task queue {port} full on admission; dropping");
                    Counters::bump(&self.shared.counters.invariant_violations);
                    self.retire(task.ctx, task.req);
                }
            }
        }

        // Ride freed requests back on the same board.
        let fini = &mut self.fini;
        let counters = &self.shared.counters;
        self.shared.board.refill(|| {
            let req = fini.pop();
            if req.is_some() {
                Counters::bump(&counters.recycled);
            }
            req
        });
    }

    fn retire(&mut self, ctx: Box<Context>, req: Box<Request>) {
        self.ctx_pool.free(ctx);
        self.fini.push(req);
    }

    fn sync_gauge(&self, port: u16) {
        self.shared
            .gauges
            .set(port as usize, self.tskq.depth(port as usize) as u32);
    }
}
