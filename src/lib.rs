/*!
A preemptive, SLO-aware request dispatcher for microsecond-scale RPC
workloads.

The intended use-case for this library is pretty specific:

* Requests are short (microseconds, not milliseconds) and arrive as
  one or more packets from something NIC-shaped.
* A stray slow request must not block the queue behind it: workers are
  forcibly preempted when they overrun their budget, and the interrupted
  work resumes later.
* Request types have different latency objectives, and the scheduler
  should spend its attention on whichever queue is furthest past its
  objective.
* Cores are dedicated: every role thread busy-polls and owns its CPU.

If the above does not apply to you, then the trade-offs made by this
library are not good ones: a work-stealing pool with blocking workers
will serve you better and burn far less power.

## Usage

```
use preempt_dispatch::{loopback, wire, Config, Engine, PacketBuf, PacketRx, PacketTx};
use std::time::{Duration, Instant};

// Two in-process links stand in for the NIC: one ingress (client to
// networker), one egress (workers back to the client).
let (mut client_tx, ingress_rx) = loopback(64);
let (egress_tx, mut client_rx) = loopback(64);

let engine = Engine::start(Config::new(1), ingress_rx, egress_tx).unwrap();

// One single-fragment request with a 100ns service-time hint.
let mut pkt = PacketBuf::new(wire::HEADER_LEN);
wire::Header {
    port: 0,
    seq_num: 0,
    queue_length: [0; 3],
    client_id: 1,
    req_id: 1,
    pkts_length: 1,
    run_ns: 100,
    gen_ns: 7,
}
.write(pkt.bytes_mut());
client_tx.send(pkt).unwrap();

// The reply echoes the generation timestamp.
let deadline = Instant::now() + Duration::from_secs(5);
let reply = loop {
    if let Some(pkt) = client_rx.recv() {
        break pkt;
    }
    assert!(Instant::now() < deadline, "no reply in time");
};
assert_eq!(wire::Header::parse(reply.bytes()).unwrap().gen_ns, 7);

engine.shutdown();
```

## Design

Three roles, one pinned thread each, sharing nothing but cache-line
mailboxes:

* The **networker** drains the NIC, reassembles multi-fragment
  requests by `(client_id, req_id)`, and publishes completed requests
  to the dispatcher a batch at a time.
* The **dispatcher** owns the per-type task queues. Each loop it
  absorbs worker responses, re-enqueues preempted tasks, raises the
  preempt line of any worker past its budget, hands out new tasks
  chosen by relative SLO overshoot, and recycles freed requests back
  to the networker.
* Each **worker** polls its dispatch slot, runs the task's resumable
  context until it returns or yields, transmits the reply, and
  publishes the outcome.

Every hand-off is a single-writer record whose flag is stored with
release ordering and read with acquire ordering; payload pointers swap
through the slot so a cell is never seen twice. Requests, contexts and
tasks come from pools sized at bring-up; exhaustion is a data-plane
drop, never a malloc.

## Portability

Core scheduling is portable Rust. CPU pinning uses `sched_setaffinity`
and is Linux-only; on other platforms the engine runs unpinned. On
x86_64 timestamps come straight from the TSC, elsewhere from the
monotonic clock.
*/

pub mod config;
pub mod context;
pub mod cycles;
pub mod engine;
pub mod error;
pub mod mempool;
pub mod nic;
pub mod reassembly;
pub mod request;
pub mod stats;
pub mod tskq;
pub mod wire;
pub mod work;

mod cpu;
mod dispatcher;
mod mailbox;
mod networker;
mod worker;

pub use config::Config;
pub use context::{Context, Step};
pub use engine::Engine;
pub use error::InitError;
pub use mailbox::PreemptLine;
pub use nic::{loopback, PacketBuf, PacketRx, PacketTx, TxError};
pub use request::Request;
pub use stats::Snapshot;
