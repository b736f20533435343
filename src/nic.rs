//! Seams to the external NIC driver.
//!
//! The core never talks to hardware. It is handed one `PacketRx` (the
//! networker's receive side) and one cloneable `PacketTx` (each worker
//! transmits replies through its own clone). Both are non-blocking:
//! `recv` returns what is there right now, `send` either takes
//! ownership of the buffer or reports why it couldn't.
//!
//! `loopback` builds an in-process pair used by the tests and the demo
//! binary; a real deployment implements the traits over its driver.

use std::sync::mpsc;

use thiserror::Error;

/// One packet's worth of bytes. Allocation happens when the driver (or
/// a client) produces the buffer; the core only moves it around.
#[derive(Debug)]
pub struct PacketBuf {
    data: Box<[u8]>,
    len: usize,
}

impl PacketBuf {
    /// A zeroed buffer of `capacity` bytes with `len == capacity`.
    pub fn new(capacity: usize) -> PacketBuf {
        PacketBuf {
            data: vec![0; capacity].into_boxed_slice(),
            len: capacity,
        }
    }

    pub fn from_vec(v: Vec<u8>) -> PacketBuf {
        let len = v.len();
        PacketBuf {
            data: v.into_boxed_slice(),
            len,
        }
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    #[inline]
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data[..self.len]
    }

    /// Shrink the visible length (e.g. after writing a reply shorter
    /// than the buffer).
    pub fn truncate(&mut self, len: usize) {
        if len < self.len {
            self.len = len;
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TxError {
    /// The transmit queue is full; the caller keeps the drop decision.
    #[error("transmit queue full")]
    Full,
    /// The peer is gone (loopback) or the link is down (driver).
    #[error("transmit path closed")]
    Closed,
}

/// Receive side of the driver. Single consumer: only the networker
/// polls it.
pub trait PacketRx: Send {
    /// Take one packet if one is ready. Must not block.
    fn recv(&mut self) -> Option<PacketBuf>;
}

/// Transmit side of the driver. Each worker owns a clone.
pub trait PacketTx: Send {
    /// Hand `pkt` to the driver. On `Ok` the buffer belongs to the
    /// driver; on `Err` it was dropped here. Must not block.
    fn send(&mut self, pkt: PacketBuf) -> Result<(), TxError>;
}

/// Receive half of an in-process link.
pub struct LoopRx {
    rx: mpsc::Receiver<PacketBuf>,
}

/// Transmit half of an in-process link.
#[derive(Clone)]
pub struct LoopTx {
    tx: mpsc::SyncSender<PacketBuf>,
}

impl PacketRx for LoopRx {
    fn recv(&mut self) -> Option<PacketBuf> {
        self.rx.try_recv().ok()
    }
}

impl PacketTx for LoopTx {
    fn send(&mut self, pkt: PacketBuf) -> Result<(), TxError> {
        use mpsc::TrySendError::*;
        match self.tx.try_send(pkt) {
            Ok(()) => Ok(()),
            Err(Full(_)) => Err(TxError::Full),
            Err(Disconnected(_)) => Err(TxError::Closed),
        }
    }
}

/// An in-process bounded link: what is sent on the `LoopTx` comes out
/// of the `LoopRx`. Two of these stand in for a NIC in tests: one as
/// the ingress path (client → networker), one as the egress path
/// (workers → client).
pub fn loopback(depth: usize) -> (LoopTx, LoopRx) {
    let (tx, rx) = mpsc::sync_channel(depth);
    (LoopTx { tx }, LoopRx { rx })
}
