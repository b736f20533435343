//! The networker loop.
//!
//! One pinned thread drains the NIC, runs reassembly, and publishes
//! completed requests to the dispatcher through the board. It never
//! blocks on the dispatcher beyond waiting for the previous batch to
//! be consumed, and it is the only thread that allocates or frees
//! request cells.

use std::sync::Arc;

use log::warn;

use crate::config::{MAX_BATCH, MAX_FRAGS};
use crate::mailbox::Shared;
use crate::mempool::Pool;
use crate::nic::{PacketBuf, PacketRx};
use crate::reassembly::{ReassemblyTable, Update};
use crate::request::Request;
use crate::stats::Counters;
use crate::wire::Header;

pub(crate) struct Networker<R: PacketRx> {
    shared: Arc<Shared>,
    rx: R,
    rq: ReassemblyTable,
    req_pool: Pool<Request>,
    num_ports: u16,
    staged: Vec<(Box<Request>, u16)>,
}

impl<R: PacketRx> Networker<R> {
    pub fn new(
        shared: Arc<Shared>,
        rx: R,
        req_pool: Pool<Request>,
        num_ports: usize,
        reassembly_capacity: usize,
    ) -> Networker<R> {
        Networker {
            shared,
            rx,
            rq: ReassemblyTable::new(reassembly_capacity),
            req_pool,
            num_ports: num_ports as u16,
            staged: Vec::with_capacity(MAX_BATCH),
        }
    }

    pub fn run(mut self) {
        loop {
            // Wait until the dispatcher has taken the previous batch.
            // Busy-wait; this thread owns its core.
            while !self.shared.board.consumed() {
                if self.shared.shutting_down() {
                    return;
                }
                std::hint::spin_loop();
            }
            if self.shared.shutting_down() {
                return;
            }

            // Recycle the requests the dispatcher freed this round.
            let pool = &mut self.req_pool;
            self.shared.board.reclaim(|mut req| {
                req.release_frags();
                pool.free(req);
            });

            for _ in 0..MAX_BATCH {
                let Some(pkt) = self.rx.recv() else { break };
                self.take_packet(pkt);
            }

            if !self.staged.is_empty() {
                self.shared.board.publish(&mut self.staged);
            }
        }
    }

    /// Parse, sanity-check, and feed one packet into reassembly.
    /// Dropping the packet just means letting the buffer go.
    fn take_packet(&mut self, pkt: PacketBuf) {
        let counters = &self.shared.counters;
        let Some(hdr) = Header::parse(pkt.bytes()) else {
            warn!("dropping runt packet ({} bytes)", pkt.len());
            Counters::bump(&counters.malformed_drops);
            return;
        };
        if hdr.port >= self.num_ports
            || hdr.pkts_length == 0
            || hdr.pkts_length as usize > MAX_FRAGS
            || u32::from(hdr.seq_num) >= hdr.pkts_length
        {
            warn!(
                "dropping malformed packet: port {} seq {} of {} (client {})",
                hdr.port, hdr.seq_num, hdr.pkts_length, hdr.client_id
            );
            Counters::bump(&counters.malformed_drops);
            return;
        }
        match self.rq.update(&hdr, pkt, &mut self.req_pool) {
            Update::Complete(req) => self.staged.push((req, hdr.port)),
            Update::Pending => {}
            Update::Dropped => Counters::bump(&counters.alloc_drops),
        }
    }
}
