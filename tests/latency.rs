//! Round-trip latency smoke test: drive a small engine hard and print
//! the spread. The histogram is shared so the numbers survive into the
//! test output.

#[macro_use]
extern crate lazy_static;

use std::sync::Mutex;
use std::time::{Duration, Instant};

use preempt_dispatch::{loopback, wire, Config, Engine, PacketBuf, PacketRx, PacketTx};

mod histogram;
use histogram::Histogram;

lazy_static! {
    static ref HIST: Mutex<Histogram> = Mutex::new(Histogram::new());
}

#[test]
fn round_trip_latency() {
    const TOTAL: u32 = 500;
    HIST.lock().unwrap().clear();

    let mut cfg = Config::new(2);
    cfg.preemption_delay = 1_000_000;
    let (mut tx, ingress) = loopback(1024);
    let (egress, mut rx) = loopback(1024);
    let engine = Engine::start(cfg, ingress, egress).expect("engine bring-up failed");

    let mut sent_at = vec![Instant::now(); TOTAL as usize];
    let deadline = Instant::now() + Duration::from_secs(30);
    let mut sent = 0u32;
    let mut received = 0u32;
    while received < TOTAL && Instant::now() < deadline {
        if sent < TOTAL {
            let mut pkt = PacketBuf::new(wire::HEADER_LEN);
            wire::Header {
                port: 0,
                seq_num: 0,
                queue_length: [0; 3],
                client_id: 1,
                req_id: sent,
                pkts_length: 1,
                run_ns: 1_000,
                gen_ns: u64::from(sent),
            }
            .write(pkt.bytes_mut());
            sent_at[sent as usize] = Instant::now();
            tx.send(pkt).expect("ingress link full");
            sent += 1;
        }
        while let Some(reply) = rx.recv() {
            let hdr = wire::Header::parse(reply.bytes()).expect("truncated reply");
            let micros = sent_at[hdr.req_id as usize].elapsed().as_nanos() as f64 / 1_000.0;
            HIST.lock().unwrap().add(micros);
            received += 1;
        }
    }

    engine.shutdown();
    let hist = HIST.lock().unwrap();
    println!("{}", *hist);
    assert_eq!(hist.count(), TOTAL as usize);
}
