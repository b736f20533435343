//! Burst latency benchmark: fire batches of requests at an idle engine
//! and measure send-to-reply time per request.
//!
//! Run with `cargo bench`. Expect the numbers to fall apart when the
//! engine's spinning threads outnumber your free cores.

use std::time::{Duration, Instant};

use preempt_dispatch::{loopback, wire, Config, Engine, PacketBuf, PacketRx, PacketTx};

#[derive(Debug, Clone, Copy)]
struct BenchSpec {
    num_workers: usize,
    burst: u32,
    iters: u32,
    run_ns: u64,
}

const BENCH_SPECS: &[BenchSpec] = &[
    BenchSpec { num_workers: 1, burst: 1, iters: 500, run_ns: 1_000 },
    BenchSpec { num_workers: 2, burst: 2, iters: 500, run_ns: 1_000 },
    BenchSpec { num_workers: 2, burst: 8, iters: 250, run_ns: 1_000 },
    BenchSpec { num_workers: 2, burst: 8, iters: 250, run_ns: 10_000 },
];

fn main() {
    env_logger::init();
    for spec in BENCH_SPECS {
        run_spec(*spec);
    }
}

fn run_spec(spec: BenchSpec) {
    let mut cfg = Config::new(spec.num_workers);
    cfg.preemption_delay = 1_000_000;
    let (mut tx, ingress) = loopback(4096);
    let (egress, mut rx) = loopback(4096);
    let engine = Engine::start(cfg, ingress, egress).expect("engine bring-up failed");

    let mut times: Vec<Duration> = Vec::with_capacity((spec.burst * spec.iters) as usize);
    let deadline = Instant::now() + Duration::from_secs(60);
    let mut req_id = 0u32;
    for _ in 0..spec.iters {
        let burst_start = Instant::now();
        for _ in 0..spec.burst {
            let mut pkt = PacketBuf::new(wire::HEADER_LEN);
            wire::Header {
                port: 0,
                seq_num: 0,
                queue_length: [0; 3],
                client_id: 1,
                req_id,
                pkts_length: 1,
                run_ns: spec.run_ns,
                gen_ns: 0,
            }
            .write(pkt.bytes_mut());
            tx.send(pkt).expect("ingress link full");
            req_id += 1;
        }
        let mut got = 0;
        while got < spec.burst {
            if rx.recv().is_some() {
                times.push(burst_start.elapsed());
                got += 1;
            }
            if Instant::now() > deadline {
                eprintln!("bench timed out at {req_id} requests");
                return;
            }
        }
    }

    times.sort();
    let avg = times.iter().map(Duration::as_nanos).sum::<u128>() / times.len() as u128;
    let med = times[times.len() / 2].as_nanos();
    let best = times[0].as_nanos();
    let worst = times[times.len() - 1].as_nanos();
    println!(
        "{}w {:>2}/burst run={:>6}ns => avg {:>6} ns, med {:>6} ns, range {}..{:<8}",
        spec.num_workers, spec.burst, spec.run_ns, avg, med, best, worst
    );
    engine.shutdown();
}
