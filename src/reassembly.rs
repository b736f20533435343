//! Request reassembly.
//!
//! Multi-fragment requests park here, keyed by `(client_id, req_id)`,
//! until their last fragment lands. The table is fixed-size open
//! addressing (linear probing, backward-shift deletion): same
//! asymptotics as a linked list scan on the sizes involved, but cells
//! are owned by the table itself and removal can't dangle.
//!
//! Partial requests that never complete are not timed out; when the
//! table fills, new partial requests are dropped at warn level. See
//! DESIGN.md for the open question this parks.

use log::warn;

use crate::mempool::Pool;
use crate::nic::PacketBuf;
use crate::request::Request;
use crate::wire::Header;

/// Outcome of feeding one fragment in.
#[derive(Debug)]
pub enum Update {
    /// All fragments arrived; the request is ready to schedule.
    Complete(Box<Request>),
    /// Stored; more fragments outstanding.
    Pending,
    /// The fragment (and possibly its partial request) was dropped.
    Dropped,
}

struct Cell {
    client_id: u16,
    req_id: u32,
    remaining: u32,
    req: Box<Request>,
}

pub struct ReassemblyTable {
    slots: Vec<Option<Cell>>,
    mask: usize,
    len: usize,
    max_load: usize,
}

impl ReassemblyTable {
    /// `capacity` is rounded up to a power of two, minimum 8. The
    /// table refuses inserts past 7/8 load so probe chains stay short
    /// and deletion always terminates.
    pub fn new(capacity: usize) -> ReassemblyTable {
        let cap = capacity.next_power_of_two().max(8);
        ReassemblyTable {
            slots: (0..cap).map(|_| None).collect(),
            mask: cap - 1,
            len: 0,
            max_load: cap / 8 * 7,
        }
    }

    /// Partial requests currently parked.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn key(client_id: u16, req_id: u32) -> u64 {
        (u64::from(req_id) << 16) | u64::from(client_id)
    }

    fn home(&self, key: u64) -> usize {
        (key.wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 32) as usize & self.mask
    }

    fn find(&self, client_id: u16, req_id: u32) -> Option<usize> {
        let mut i = self.home(Self::key(client_id, req_id));
        loop {
            let cell = self.slots[i].as_ref()?;
            if cell.client_id == client_id && cell.req_id == req_id {
                return Some(i);
            }
            i = (i + 1) & self.mask;
        }
    }

    fn insert(&mut self, cell: Cell) {
        let mut i = self.home(Self::key(cell.client_id, cell.req_id));
        while self.slots[i].is_some() {
            i = (i + 1) & self.mask;
        }
        self.slots[i] = Some(cell);
        self.len += 1;
    }

    /// Backward-shift removal: pull later entries of the probe chain
    /// down so lookups never cross a hole they shouldn't.
    fn remove_at(&mut self, mut i: usize) -> Cell {
        let cell = self.slots[i].take().expect("remove_at on empty slot");
        self.len -= 1;
        let mut j = i;
        loop {
            j = (j + 1) & self.mask;
            let Some(c) = &self.slots[j] else { break };
            let home = self.home(Self::key(c.client_id, c.req_id));
            let home_in_gap = if i <= j {
                i < home && home <= j
            } else {
                i < home || home <= j
            };
            if !home_in_gap {
                self.slots.swap(i, j);
                i = j;
            }
        }
        cell
    }

    /// Feed one parsed fragment in. The header has already passed the
    /// networker's sanity checks (port range, fragment bounds).
    pub fn update(&mut self, hdr: &Header, pkt: PacketBuf, pool: &mut Pool<Request>) -> Update {
        // Single-fragment fast path: no table state at all.
        if hdr.pkts_length == 1 {
            let Some(mut req) = pool.alloc() else {
                warn!("request pool empty; dropping single-fragment request");
                return Update::Dropped;
            };
            req.reset(hdr.port, 1, hdr.client_id, hdr.req_id);
            req.run_ns = hdr.run_ns;
            req.gen_ns = hdr.gen_ns;
            req.put_frag(hdr.seq_num, pkt);
            return Update::Complete(req);
        }

        if let Some(i) = self.find(hdr.client_id, hdr.req_id) {
            let cell = self.slots[i].as_mut().expect("find returned empty slot");
            // Duplicate seq_num overwrites; clients must not reuse
            // sequence numbers within a request.
            cell.req.put_frag(hdr.seq_num, pkt);
            cell.remaining -= 1;
            if cell.remaining == 0 {
                return Update::Complete(self.remove_at(i).req);
            }
            return Update::Pending;
        }

        if self.len >= self.max_load {
            warn!(
                "reassembly table full ({} partial requests); dropping fragment from client {}",
                self.len, hdr.client_id
            );
            return Update::Dropped;
        }
        let Some(mut req) = pool.alloc() else {
            warn!("request pool empty; dropping fragment from client {}", hdr.client_id);
            return Update::Dropped;
        };
        req.reset(hdr.port, hdr.pkts_length, hdr.client_id, hdr.req_id);
        req.run_ns = hdr.run_ns;
        req.gen_ns = hdr.gen_ns;
        req.put_frag(hdr.seq_num, pkt);
        self.insert(Cell {
            client_id: hdr.client_id,
            req_id: hdr.req_id,
            remaining: hdr.pkts_length - 1,
            req,
        });
        Update::Pending
    }
}
