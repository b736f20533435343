//! Loopback demo: run the engine against an in-process NIC, push a
//! stream of synthetic requests through it, and print the latency
//! spread. Exits 0 on clean shutdown, 1 if bring-up fails.

use std::time::{Duration, Instant};

use preempt_dispatch::{loopback, wire, Config, Engine, InitError, PacketBuf, PacketRx, PacketTx};

const NUM_REQUESTS: u32 = 2_000;
const RUN_NS: u64 = 2_000;

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("bring-up failed: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), InitError> {
    let mut cfg = Config::new(2);
    cfg.num_ports = 2;
    cfg.slos = vec![1_000_000, 10_000_000];
    cfg.queue_settings = vec![false, false];

    let (mut client_tx, ingress) = loopback(1024);
    let (egress, mut client_rx) = loopback(1024);
    let engine = Engine::start(cfg, ingress, egress)?;

    let mut sent_at = vec![Instant::now(); NUM_REQUESTS as usize];
    let mut latencies = Vec::with_capacity(NUM_REQUESTS as usize);
    let started = Instant::now();
    let deadline = started + Duration::from_secs(30);
    let mut sent = 0u32;

    while latencies.len() < NUM_REQUESTS as usize && Instant::now() < deadline {
        if sent < NUM_REQUESTS {
            let mut pkt = PacketBuf::new(wire::HEADER_LEN);
            wire::Header {
                port: (sent % 2) as u16,
                seq_num: 0,
                queue_length: [0; 3],
                client_id: 1,
                req_id: sent,
                pkts_length: 1,
                run_ns: RUN_NS,
                gen_ns: u64::from(sent),
            }
            .write(pkt.bytes_mut());
            sent_at[sent as usize] = Instant::now();
            if client_tx.send(pkt).is_ok() {
                sent += 1;
            }
        }
        while let Some(reply) = client_rx.recv() {
            let hdr = wire::Header::parse(reply.bytes()).expect("short reply");
            latencies.push(sent_at[hdr.req_id as usize].elapsed());
        }
    }

    latencies.sort();
    if latencies.is_empty() {
        eprintln!("no replies received");
    } else {
        let avg = latencies.iter().map(Duration::as_nanos).sum::<u128>() / latencies.len() as u128;
        let med = latencies[latencies.len() / 2].as_nanos();
        let p99 = latencies[latencies.len() * 99 / 100].as_nanos();
        let worst = latencies[latencies.len() - 1].as_nanos();
        println!(
            "{} replies => avg {:>6} ns, med {:>6} ns, p99 {:>7} ns, worst {:>8} ns",
            latencies.len(),
            avg,
            med,
            p99,
            worst
        );
    }
    println!("{:?} counters: {:?}", started.elapsed(), engine.counters());

    engine.shutdown();
    Ok(())
}
