//! Requests and the freed-request stash.

use std::collections::VecDeque;

use crate::config::MAX_FRAGS;
use crate::nic::PacketBuf;

/// One logical RPC, assembled from up to [`MAX_FRAGS`] wire fragments.
///
/// Cells come from the networker's request pool and cycle:
/// reassembly → dispatcher → worker → dispatcher free stash →
/// networker board → back to the pool.
#[derive(Debug)]
pub struct Request {
    pub port: u16,
    pub pkts_length: u32,
    pub frags: [Option<PacketBuf>; MAX_FRAGS],
    pub client_id: u16,
    pub req_id: u32,
    pub run_ns: u64,
    pub gen_ns: u64,
}

impl Request {
    pub fn empty() -> Request {
        Request {
            port: 0,
            pkts_length: 0,
            frags: Default::default(),
            client_id: 0,
            req_id: 0,
            run_ns: 0,
            gen_ns: 0,
        }
    }

    /// Reinitialize a recycled cell for a new request. Fragment slots
    /// are expected to be empty already (the networker frees buffers
    /// before recycling) but are cleared regardless.
    pub fn reset(&mut self, port: u16, pkts_length: u32, client_id: u16, req_id: u32) {
        self.port = port;
        self.pkts_length = pkts_length;
        self.client_id = client_id;
        self.req_id = req_id;
        self.run_ns = 0;
        self.gen_ns = 0;
        for frag in &mut self.frags {
            *frag = None;
        }
    }

    /// Store one fragment. A duplicate seq_num overwrites; clients must
    /// not reuse sequence numbers within a request.
    pub fn put_frag(&mut self, seq_num: u16, pkt: PacketBuf) {
        self.frags[seq_num as usize] = Some(pkt);
    }

    /// Drop every packet buffer held by this request.
    pub fn release_frags(&mut self) {
        for frag in &mut self.frags {
            *frag = None;
        }
    }
}

/// Dispatcher-side stash of finished requests waiting to ride the
/// networker board home.
pub(crate) struct FiniQueue {
    reqs: VecDeque<Box<Request>>,
}

impl FiniQueue {
    pub fn with_capacity(capacity: usize) -> FiniQueue {
        FiniQueue {
            reqs: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, req: Box<Request>) {
        self.reqs.push_back(req);
    }

    pub fn pop(&mut self) -> Option<Box<Request>> {
        self.reqs.pop_front()
    }

    pub fn len(&self) -> usize {
        self.reqs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_clears_fragments() {
        let mut req = Request::empty();
        req.put_frag(0, PacketBuf::new(8));
        req.reset(1, 2, 3, 4);
        assert!(req.frags.iter().all(Option::is_none));
        assert_eq!((req.port, req.pkts_length), (1, 2));
    }

    #[test]
    fn fini_queue_is_fifo() {
        let mut q = FiniQueue::with_capacity(4);
        let mut a = Box::new(Request::empty());
        a.req_id = 1;
        let mut b = Box::new(Request::empty());
        b.req_id = 2;
        q.push(a);
        q.push(b);
        assert_eq!(q.pop().unwrap().req_id, 1);
        assert_eq!(q.pop().unwrap().req_id, 2);
        assert!(q.pop().is_none());
    }
}
