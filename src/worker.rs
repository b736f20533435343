//! The worker loop.
//!
//! One pinned thread per worker. It polls its dispatch slot, runs the
//! task's context until it returns or yields, transmits the reply on
//! completion, and publishes the outcome in its response slot. All
//! mailbox traffic happens outside `resume`, which is the only place
//! preemption can land. This is the portable equivalent of keeping interrupts
//! disabled everywhere except the request body.

use std::sync::Arc;

use log::{error, warn};

use crate::context::Step;
use crate::cycles::Calibration;
use crate::mailbox::{self, Delivery, Shared};
use crate::nic::{PacketBuf, PacketTx};
use crate::request::Request;
use crate::stats::Counters;
use crate::tskq::TaskKind;
use crate::wire;
use crate::work;

pub(crate) struct Worker<T: PacketTx> {
    index: usize,
    shared: Arc<Shared>,
    tx: T,
    cycles_per_iter: f64,
    cal: Calibration,
}

impl<T: PacketTx> Worker<T> {
    pub fn new(shared: Arc<Shared>, index: usize, tx: T, cycles_per_iter: f64, cal: Calibration) -> Worker<T> {
        Worker {
            index,
            shared,
            tx,
            cycles_per_iter,
            cal,
        }
    }

    pub fn run(mut self) {
        // Tell the dispatcher we're ready for a first task.
        self.shared.responses[self.index].mark_ready();
        loop {
            let delivery = loop {
                if let Some(d) = self.shared.dispatch[self.index].try_take() {
                    break d;
                }
                if self.shared.shutting_down() {
                    return;
                }
                std::hint::spin_loop();
            };
            self.execute(delivery);
        }
    }

    fn execute(&mut self, delivery: Delivery) {
        let Delivery {
            ctx,
            req,
            port,
            kind,
            stamp,
        } = delivery;
        let (mut ctx, req) = match (ctx, req) {
            (Some(ctx), Some(req)) => (ctx, req),
            (ctx, req) => {
                error!("worker {}: dispatched task arrived without context or request", self.index);
                Counters::bump(&self.shared.counters.invariant_violations);
                // Hand back whatever did arrive so nothing leaks.
                self.shared.responses[self.index].publish(mailbox::FINISHED, ctx, req, port, stamp);
                return;
            }
        };

        if kind == TaskKind::Fresh {
            let iters = work::iters_for(req.run_ns, self.cycles_per_iter, &self.cal);
            ctx.prepare(iters);
        }

        // Preemption is only live inside this call.
        let step = ctx.resume(&self.shared.preempt[self.index]);

        let flag = match step {
            Step::Returned => {
                self.send_reply(&req);
                mailbox::FINISHED
            }
            Step::Yielded => mailbox::PREEMPTED,
        };
        self.shared.responses[self.index].publish(flag, Some(ctx), Some(req), port, stamp);
    }

    /// Build and transmit the reply. The buffer is the one hot-path
    /// allocation; on success it belongs to the driver.
    fn send_reply(&mut self, req: &Request) {
        let mut buf = PacketBuf::new(wire::REPLY_LEN);
        let telemetry = self.shared.gauges.telemetry();
        wire::write_reply(
            buf.bytes_mut(),
            req.port,
            req.client_id,
            req.req_id,
            req.run_ns,
            req.gen_ns,
            telemetry,
        );
        match self.tx.send(buf) {
            Ok(()) => Counters::bump(&self.shared.counters.replies_sent),
            Err(err) => {
                warn!("worker {}: transmit failed ({err}); request treated as complete", self.index);
                Counters::bump(&self.shared.counters.tx_failures);
            }
        }
    }
}
