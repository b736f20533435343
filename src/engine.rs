//! Engine bring-up and teardown.
//!
//! `Engine::start` validates the configuration, calibrates the cycle
//! counter and the work kernel, builds the shared mailboxes and the
//! datastores, and spawns one pinned thread per role. Threads report
//! their bring-up result over a channel before entering their loops;
//! any failure tears the whole engine down and surfaces as an
//! `InitError`, which the embedder maps to a nonzero exit. After
//! bring-up there is no in-band shutdown: the engine runs until
//! `shutdown` (or drop) raises the shutdown line, typically from a
//! signal handler.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::info;

use crate::config::Config;
use crate::context::Context;
use crate::cpu;
use crate::cycles::Calibration;
use crate::dispatcher::Dispatcher;
use crate::error::InitError;
use crate::mailbox::Shared;
use crate::mempool::{Datastore, Pool, Scope};
use crate::networker::Networker;
use crate::nic::{PacketRx, PacketTx};
use crate::request::Request;
use crate::stats::Snapshot;
use crate::worker::Worker;
use crate::work;

pub struct Engine {
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Bring the engine up: dispatcher on `cfg.cpus[0]`, networker on
    /// `cfg.cpus[1]`, one worker per remaining CPU. `rx` feeds the
    /// networker; each worker transmits replies through its own clone
    /// of `tx`.
    pub fn start<R, T>(cfg: Config, rx: R, tx: T) -> Result<Engine, InitError>
    where
        R: PacketRx + 'static,
        T: PacketTx + Clone + 'static,
    {
        cfg.validate()?;
        let cal = Calibration::measure();
        let cycles_per_iter = work::calibrate_cycles_per_iter();
        let num_workers = cfg.num_workers();
        info!(
            "starting: {} workers, {} ports, {:.2} cycles/ns, {:.0} cycles/iter, nic {}/{:02x?}",
            num_workers,
            cfg.num_ports,
            cal.cycles_per_ns(),
            cycles_per_iter,
            cfg.host_addr,
            cfg.mac
        );

        let shared = Shared::new(num_workers);
        let request_store = Datastore::new("request", cfg.request_capacity, 64, Request::empty);
        let context_store = Datastore::new("context", cfg.context_capacity, 64, Context::idle);

        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), InitError>>();
        let mut handles = Vec::with_capacity(num_workers + 2);

        {
            let shared = Arc::clone(&shared);
            let store = Arc::clone(&context_store);
            let cfg = cfg.clone();
            let ready = ready_tx.clone();
            let handle = thread::Builder::new()
                .name("dispatcher".into())
                .spawn(move || {
                    let built = (|| {
                        cpu::pin_current("dispatcher", cfg.cpus[0], cfg.pin_threads)?;
                        let mut pool = Pool::attach(&store, Scope::PerCpu);
                        pool.prefill(cfg.context_capacity)?;
                        Ok(Dispatcher::new(shared, pool, &cfg, cal))
                    })();
                    match built {
                        Ok(dispatcher) => {
                            let _ = ready.send(Ok(()));
                            dispatcher.run();
                        }
                        Err(err) => {
                            let _ = ready.send(Err(err));
                        }
                    }
                })
                .map_err(|source| InitError::Spawn {
                    role: "dispatcher",
                    source,
                })?;
            handles.push(handle);
        }

        {
            let shared = Arc::clone(&shared);
            let store = Arc::clone(&request_store);
            let cfg = cfg.clone();
            let ready = ready_tx.clone();
            let handle = thread::Builder::new()
                .name("networker".into())
                .spawn(move || {
                    let built = (|| {
                        cpu::pin_current("networker", cfg.cpus[1], cfg.pin_threads)?;
                        let mut pool = Pool::attach(&store, Scope::PerCpu);
                        pool.prefill(cfg.request_capacity)?;
                        Ok(Networker::new(
                            shared,
                            rx,
                            pool,
                            cfg.num_ports,
                            cfg.reassembly_capacity,
                        ))
                    })();
                    match built {
                        Ok(networker) => {
                            let _ = ready.send(Ok(()));
                            networker.run();
                        }
                        Err(err) => {
                            let _ = ready.send(Err(err));
                        }
                    }
                })
                .map_err(|source| InitError::Spawn {
                    role: "networker",
                    source,
                })?;
            handles.push(handle);
        }

        for i in 0..num_workers {
            let shared = Arc::clone(&shared);
            let tx = tx.clone();
            let cpu_index = cfg.cpus[i + 2];
            let pin = cfg.pin_threads;
            let ready = ready_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("worker-{i}"))
                .spawn(move || {
                    match cpu::pin_current("worker", cpu_index, pin) {
                        Ok(()) => {
                            let _ = ready.send(Ok(()));
                            Worker::new(shared, i, tx, cycles_per_iter, cal).run();
                        }
                        Err(err) => {
                            let _ = ready.send(Err(err));
                        }
                    }
                })
                .map_err(|source| InitError::Spawn {
                    role: "worker",
                    source,
                })?;
            handles.push(handle);
        }
        drop(ready_tx);

        let mut engine = Engine { shared, handles };
        for _ in 0..num_workers + 2 {
            match ready_rx.recv() {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    engine.stop();
                    return Err(err);
                }
                Err(_) => {
                    engine.stop();
                    return Err(InitError::BringUp { role: "engine" });
                }
            }
        }
        Ok(engine)
    }

    /// Point-in-time event counters.
    pub fn counters(&self) -> Snapshot {
        self.shared.counters.snapshot()
    }

    /// Current depth gauge of one task queue.
    pub fn queue_depth(&self, port: usize) -> u32 {
        self.shared.gauges.get(port)
    }

    /// Raise the shutdown line and wait for every role thread to park.
    /// Requests still in flight are dropped, not completed.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shared.raise_shutdown();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        // Threads are gone; reclaim anything still parked in a slot.
        self.shared.drain_in_flight();
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            self.stop();
        }
    }
}
