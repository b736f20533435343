//! Cache-line mailboxes.
//!
//! Every cross-core hand-off in the system goes through one of three
//! single-writer/single-reader records defined here:
//!
//! * `DispatchSlot`: dispatcher → worker i. Flag is WAITING or ACTIVE.
//! * `ResponseSlot`: worker i → dispatcher. Flag cycles RUNNING →
//!   {FINISHED, PREEMPTED} → PROCESSED → RUNNING.
//! * `NetworkerBoard`: networker ↔ dispatcher. `cnt` counts requests
//!   ready for the dispatcher, `free_cnt` counts freed requests riding
//!   back.
//!
//! The flag is the synchronization point: the writer fills every other
//! field first and stores the flag with release ordering; the reader
//! loads the flag with acquire ordering and only then looks at the
//! fields. Contexts and requests cross as raw pointers; ownership
//! follows the flag, and every read swaps the pointer out so a cell
//! can never be seen twice.

use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU16, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use crate::config::MAX_BATCH;
use crate::context::Context;
use crate::request::Request;
use crate::stats::{Counters, DepthGauges};
use crate::tskq::TaskKind;

// Dispatch-slot states
pub const WAITING: u8 = 0x00; // slot is free; worker is polling
pub const ACTIVE: u8 = 0x01; // slot holds a task for the worker

// Response-slot states
pub const RUNNING: u8 = 0x00; // worker is executing; response pending
pub const FINISHED: u8 = 0x01; // body returned; context and request attached
pub const PREEMPTED: u8 = 0x02; // body yielded; context and request attached
pub const PROCESSED: u8 = 0x03; // dispatcher absorbed the response

/// A task as it crosses a mailbox.
pub(crate) struct Delivery {
    pub ctx: Option<Box<Context>>,
    pub req: Option<Box<Request>>,
    pub port: u16,
    pub kind: TaskKind,
    pub stamp: u64,
}

/// Dispatcher → worker slot.
#[repr(align(64))]
pub(crate) struct DispatchSlot {
    flag: AtomicU8,
    kind: AtomicU8,
    port: AtomicU16,
    stamp: AtomicU64,
    rnbl: AtomicPtr<Context>,
    req: AtomicPtr<Request>,
}

impl DispatchSlot {
    fn new() -> DispatchSlot {
        DispatchSlot {
            flag: AtomicU8::new(WAITING),
            kind: AtomicU8::new(TaskKind::Fresh as u8),
            port: AtomicU16::new(0),
            stamp: AtomicU64::new(0),
            rnbl: AtomicPtr::new(ptr::null_mut()),
            req: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Dispatcher side: hand a task to the worker. The slot must be
    /// WAITING (the worker owes no response, see `ResponseSlot`).
    pub fn publish(&self, ctx: Box<Context>, req: Box<Request>, port: u16, kind: TaskKind, stamp: u64) {
        let old = self.rnbl.swap(Box::into_raw(ctx), Ordering::Relaxed);
        debug_assert!(old.is_null(), "publish over a live slot; please report this");
        self.req.store(Box::into_raw(req), Ordering::Relaxed);
        self.port.store(port, Ordering::Relaxed);
        self.kind.store(kind as u8, Ordering::Relaxed);
        self.stamp.store(stamp, Ordering::Relaxed);
        self.flag.store(ACTIVE, Ordering::Release);
    }

    /// Worker side: claim the task if one is there, clearing the slot
    /// back to WAITING.
    pub fn try_take(&self) -> Option<Delivery> {
        if self.flag.load(Ordering::Acquire) != ACTIVE {
            return None;
        }
        self.flag.store(WAITING, Ordering::Relaxed);
        let ctx = self.rnbl.swap(ptr::null_mut(), Ordering::Relaxed);
        let req = self.req.swap(ptr::null_mut(), Ordering::Relaxed);
        Some(Delivery {
            ctx: unsafe { boxed(ctx) },
            req: unsafe { boxed(req) },
            port: self.port.load(Ordering::Relaxed),
            kind: TaskKind::from_u8(self.kind.load(Ordering::Relaxed)),
            stamp: self.stamp.load(Ordering::Relaxed),
        })
    }

    fn drain(&self) {
        unsafe {
            drop(boxed(self.rnbl.swap(ptr::null_mut(), Ordering::Relaxed)));
            drop(boxed(self.req.swap(ptr::null_mut(), Ordering::Relaxed)));
        }
    }
}

/// Worker → dispatcher slot.
#[repr(align(64))]
pub(crate) struct ResponseSlot {
    flag: AtomicU8,
    kind: AtomicU8,
    port: AtomicU16,
    stamp: AtomicU64,
    rnbl: AtomicPtr<Context>,
    req: AtomicPtr<Request>,
}

impl ResponseSlot {
    fn new() -> ResponseSlot {
        ResponseSlot {
            flag: AtomicU8::new(RUNNING),
            kind: AtomicU8::new(TaskKind::Resumed as u8),
            port: AtomicU16::new(0),
            stamp: AtomicU64::new(0),
            rnbl: AtomicPtr::new(ptr::null_mut()),
            req: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Worker side: publish the outcome of the current task. `flag` is
    /// FINISHED, PREEMPTED, or (at bring-up) PROCESSED.
    pub fn publish(
        &self,
        flag: u8,
        ctx: Option<Box<Context>>,
        req: Option<Box<Request>>,
        port: u16,
        stamp: u64,
    ) {
        let ctx = ctx.map_or(ptr::null_mut(), Box::into_raw);
        let req = req.map_or(ptr::null_mut(), Box::into_raw);
        let old = self.rnbl.swap(ctx, Ordering::Relaxed);
        debug_assert!(old.is_null(), "response over a live slot; please report this");
        self.req.store(req, Ordering::Relaxed);
        self.port.store(port, Ordering::Relaxed);
        self.kind.store(TaskKind::Resumed as u8, Ordering::Relaxed);
        self.stamp.store(stamp, Ordering::Relaxed);
        self.flag.store(flag, Ordering::Release);
    }

    /// Dispatcher side: current state of the worker.
    pub fn flag(&self) -> u8 {
        self.flag.load(Ordering::Acquire)
    }

    /// Dispatcher side: take the context/request out of a FINISHED or
    /// PREEMPTED response.
    pub fn take(&self) -> Delivery {
        let ctx = self.rnbl.swap(ptr::null_mut(), Ordering::Relaxed);
        let req = self.req.swap(ptr::null_mut(), Ordering::Relaxed);
        Delivery {
            ctx: unsafe { boxed(ctx) },
            req: unsafe { boxed(req) },
            port: self.port.load(Ordering::Relaxed),
            kind: TaskKind::from_u8(self.kind.load(Ordering::Relaxed)),
            stamp: self.stamp.load(Ordering::Relaxed),
        }
    }

    /// Dispatcher side: the response has been absorbed.
    pub fn mark_processed(&self) {
        self.flag.store(PROCESSED, Ordering::Release);
    }

    /// Dispatcher side: a task is about to be published; the worker
    /// owes a response. Ordered before the dispatch slot's ACTIVE.
    pub fn mark_running(&self) {
        self.flag.store(RUNNING, Ordering::Relaxed);
    }

    /// Worker side: announce readiness at bring-up.
    pub fn mark_ready(&self) {
        self.flag.store(PROCESSED, Ordering::Release);
    }

    fn drain(&self) {
        unsafe {
            drop(boxed(self.rnbl.swap(ptr::null_mut(), Ordering::Relaxed)));
            drop(boxed(self.req.swap(ptr::null_mut(), Ordering::Relaxed)));
        }
    }
}

/// The preempt signal, one per worker. The dispatcher raises it; the
/// running context consumes it at its next safe point and yields. A
/// raise that lands while no body is running stays pending and fires
/// on the next resume, like a posted interrupt against a masked core.
#[repr(align(64))]
pub struct PreemptLine {
    raised: AtomicBool,
}

impl PreemptLine {
    pub fn new() -> PreemptLine {
        PreemptLine {
            raised: AtomicBool::new(false),
        }
    }

    /// Dispatcher side. At most one raise is outstanding per dispatch;
    /// the dispatcher's `preempt_check` gate guarantees it.
    pub fn raise(&self) {
        self.raised.store(true, Ordering::Release);
    }

    /// Worker side, called at safe points. The relaxed fast path keeps
    /// the common (not preempted) case to one load.
    #[inline]
    pub fn consume(&self) -> bool {
        if !self.raised.load(Ordering::Relaxed) {
            return false;
        }
        self.raised.swap(false, Ordering::AcqRel)
    }
}

impl Default for PreemptLine {
    fn default() -> Self {
        Self::new()
    }
}

/// Networker ↔ dispatcher board.
///
/// The networker fills `reqs`/`ports` and release-stores `cnt`; it
/// then spins until the dispatcher has consumed the batch, refilled
/// the slots with up to `MAX_BATCH` freed requests (`free_cnt`), and
/// release-stored `cnt = 0`. Only the networker writes `cnt` nonzero;
/// only the dispatcher writes it zero.
#[repr(align(64))]
pub(crate) struct NetworkerBoard {
    cnt: AtomicU8,
    free_cnt: AtomicU8,
    ports: [AtomicU16; MAX_BATCH],
    reqs: [AtomicPtr<Request>; MAX_BATCH],
}

impl NetworkerBoard {
    fn new() -> NetworkerBoard {
        NetworkerBoard {
            cnt: AtomicU8::new(0),
            free_cnt: AtomicU8::new(0),
            ports: std::array::from_fn(|_| AtomicU16::new(0)),
            reqs: std::array::from_fn(|_| AtomicPtr::new(ptr::null_mut())),
        }
    }

    /// Networker side: has the dispatcher taken the last batch?
    pub fn consumed(&self) -> bool {
        self.cnt.load(Ordering::Acquire) == 0
    }

    /// Networker side: collect the freed requests the dispatcher left
    /// in the slots. Valid only after `consumed()` returned true.
    pub fn reclaim(&self, mut sink: impl FnMut(Box<Request>)) {
        let n = self.free_cnt.load(Ordering::Relaxed) as usize;
        for slot in &self.reqs[..n] {
            let req = slot.swap(ptr::null_mut(), Ordering::Relaxed);
            if let Some(req) = unsafe { boxed(req) } {
                sink(req);
            }
        }
        self.free_cnt.store(0, Ordering::Relaxed);
    }

    /// Networker side: publish a batch of completed requests.
    pub fn publish(&self, batch: &mut Vec<(Box<Request>, u16)>) {
        let n = batch.len().min(MAX_BATCH);
        for (i, (req, port)) in batch.drain(..n).enumerate() {
            self.reqs[i].store(Box::into_raw(req), Ordering::Relaxed);
            self.ports[i].store(port, Ordering::Relaxed);
        }
        self.cnt.store(n as u8, Ordering::Release);
    }

    /// Dispatcher side: size of the waiting batch, 0 if none.
    pub fn pending(&self) -> usize {
        self.cnt.load(Ordering::Acquire) as usize
    }

    /// Dispatcher side: take one request out of the batch.
    pub fn take(&self, i: usize) -> (Option<Box<Request>>, u16) {
        let req = self.reqs[i].swap(ptr::null_mut(), Ordering::Relaxed);
        (unsafe { boxed(req) }, self.ports[i].load(Ordering::Relaxed))
    }

    /// Dispatcher side: park freed requests in the slots and hand the
    /// board back to the networker.
    pub fn refill(&self, mut source: impl FnMut() -> Option<Box<Request>>) {
        let mut n = 0u8;
        for slot in &self.reqs {
            match source() {
                Some(req) => {
                    slot.store(Box::into_raw(req), Ordering::Relaxed);
                    n += 1;
                }
                None => break,
            }
        }
        self.free_cnt.store(n, Ordering::Relaxed);
        self.cnt.store(0, Ordering::Release);
    }

    fn drain(&self) {
        for slot in &self.reqs {
            unsafe {
                drop(boxed(slot.swap(ptr::null_mut(), Ordering::Relaxed)));
            }
        }
        self.cnt.store(0, Ordering::Relaxed);
        self.free_cnt.store(0, Ordering::Relaxed);
    }
}

/// # Safety
/// `ptr` must be null or a pointer produced by `Box::into_raw` whose
/// ownership the mailbox protocol has handed to this thread.
unsafe fn boxed<T>(ptr: *mut T) -> Option<Box<T>> {
    if ptr.is_null() {
        None
    } else {
        Some(Box::from_raw(ptr))
    }
}

/// Everything the three roles share, behind one `Arc`.
pub(crate) struct Shared {
    pub dispatch: Box<[DispatchSlot]>,
    pub responses: Box<[ResponseSlot]>,
    pub preempt: Box<[PreemptLine]>,
    pub board: NetworkerBoard,
    pub gauges: DepthGauges,
    pub counters: Counters,
    shutdown: AtomicBool,
}

impl Shared {
    pub fn new(num_workers: usize) -> Arc<Shared> {
        Arc::new(Shared {
            dispatch: (0..num_workers).map(|_| DispatchSlot::new()).collect(),
            responses: (0..num_workers).map(|_| ResponseSlot::new()).collect(),
            preempt: (0..num_workers).map(|_| PreemptLine::new()).collect(),
            board: NetworkerBoard::new(),
            gauges: DepthGauges::new(),
            counters: Counters::default(),
            shutdown: AtomicBool::new(false),
        })
    }

    pub fn raise_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    #[inline]
    pub fn shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Drop any contexts/requests still parked in mailbox slots. Only
    /// sound once every role thread has been joined.
    pub fn drain_in_flight(&self) {
        for slot in self.dispatch.iter() {
            slot.drain();
        }
        for slot in self.responses.iter() {
            slot.drain();
        }
        self.board.drain();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::request::Request;

    #[test]
    fn dispatch_slot_round_trips_a_task() {
        let slot = DispatchSlot::new();
        assert!(slot.try_take().is_none());
        slot.publish(
            Box::new(Context::idle()),
            Box::new(Request::empty()),
            3,
            TaskKind::Fresh,
            99,
        );
        let d = slot.try_take().expect("task should be there");
        assert_eq!(d.port, 3);
        assert_eq!(d.stamp, 99);
        assert_eq!(d.kind, TaskKind::Fresh);
        assert!(d.ctx.is_some() && d.req.is_some());
        // Slot is WAITING again and empty.
        assert!(slot.try_take().is_none());
    }

    #[test]
    fn response_slot_flag_cycle() {
        let slot = ResponseSlot::new();
        assert_eq!(slot.flag(), RUNNING);
        slot.publish(
            FINISHED,
            Some(Box::new(Context::idle())),
            Some(Box::new(Request::empty())),
            1,
            7,
        );
        assert_eq!(slot.flag(), FINISHED);
        let d = slot.take();
        assert!(d.ctx.is_some() && d.req.is_some());
        slot.mark_processed();
        assert_eq!(slot.flag(), PROCESSED);
        slot.mark_running();
        assert_eq!(slot.flag(), RUNNING);
    }

    #[test]
    fn board_round_trips_batches() {
        let board = NetworkerBoard::new();
        assert!(board.consumed());
        let mut batch = vec![
            (Box::new(Request::empty()), 0u16),
            (Box::new(Request::empty()), 1u16),
        ];
        board.publish(&mut batch);
        assert!(!board.consumed());
        assert_eq!(board.pending(), 2);
        let (a, pa) = board.take(0);
        let (b, pb) = board.take(1);
        assert!(a.is_some() && b.is_some());
        assert_eq!((pa, pb), (0, 1));

        let mut freed = vec![a.unwrap(), b.unwrap()];
        board.refill(|| freed.pop());
        assert!(board.consumed());
        let mut got = 0;
        board.reclaim(|_req| got += 1);
        assert_eq!(got, 2);
    }

    #[test]
    fn preempt_line_is_one_shot() {
        let line = PreemptLine::new();
        assert!(!line.consume());
        line.raise();
        assert!(line.consume());
        assert!(!line.consume());
    }
}
