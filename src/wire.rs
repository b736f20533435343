//! Wire header codec.
//!
//! Requests and replies share one packed little-endian header; payload
//! follows immediately. Replies always carry `pkts_length == 1` and
//! echo the client's generation timestamp, plus the first three
//! per-port queue-depth gauges as telemetry.
//!
//! Layout (42 bytes):
//!
//! ```text
//!   u16 port          | request type / priority class
//!   u16 seq_num       | fragment index within the request
//!   u32 queue_len[3]  | telemetry, filled in replies
//!   u16 client_id
//!   u32 req_id
//!   u32 pkts_length   | total fragment count for this request
//!   u64 run_ns        | requested service time hint
//!   u64 gen_ns        | client-generation timestamp
//! ```

use byteorder::{ByteOrder, LittleEndian};

pub const HEADER_LEN: usize = 42;

/// Reply = header + echoed `gen_ns` payload.
pub const REPLY_LEN: usize = HEADER_LEN + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub port: u16,
    pub seq_num: u16,
    pub queue_length: [u32; 3],
    pub client_id: u16,
    pub req_id: u32,
    pub pkts_length: u32,
    pub run_ns: u64,
    pub gen_ns: u64,
}

impl Header {
    /// Decode a header from the front of `buf`. Returns `None` when the
    /// buffer is too short to hold one.
    pub fn parse(buf: &[u8]) -> Option<Header> {
        if buf.len() < HEADER_LEN {
            return None;
        }
        Some(Header {
            port: LittleEndian::read_u16(&buf[0..2]),
            seq_num: LittleEndian::read_u16(&buf[2..4]),
            queue_length: [
                LittleEndian::read_u32(&buf[4..8]),
                LittleEndian::read_u32(&buf[8..12]),
                LittleEndian::read_u32(&buf[12..16]),
            ],
            client_id: LittleEndian::read_u16(&buf[16..18]),
            req_id: LittleEndian::read_u32(&buf[18..22]),
            pkts_length: LittleEndian::read_u32(&buf[22..26]),
            run_ns: LittleEndian::read_u64(&buf[26..34]),
            gen_ns: LittleEndian::read_u64(&buf[34..42]),
        })
    }

    /// Encode into the front of `buf`, which must hold `HEADER_LEN`
    /// bytes.
    pub fn write(&self, buf: &mut [u8]) {
        LittleEndian::write_u16(&mut buf[0..2], self.port);
        LittleEndian::write_u16(&mut buf[2..4], self.seq_num);
        LittleEndian::write_u32(&mut buf[4..8], self.queue_length[0]);
        LittleEndian::write_u32(&mut buf[8..12], self.queue_length[1]);
        LittleEndian::write_u32(&mut buf[12..16], self.queue_length[2]);
        LittleEndian::write_u16(&mut buf[16..18], self.client_id);
        LittleEndian::write_u32(&mut buf[18..22], self.req_id);
        LittleEndian::write_u32(&mut buf[22..26], self.pkts_length);
        LittleEndian::write_u64(&mut buf[26..34], self.run_ns);
        LittleEndian::write_u64(&mut buf[34..42], self.gen_ns);
    }
}

/// Build a reply for a completed request into `buf` (at least
/// `REPLY_LEN` bytes). Returns the number of bytes written.
pub fn write_reply(
    buf: &mut [u8],
    port: u16,
    client_id: u16,
    req_id: u32,
    run_ns: u64,
    gen_ns: u64,
    queue_length: [u32; 3],
) -> usize {
    let hdr = Header {
        port,
        seq_num: 0,
        queue_length,
        client_id,
        req_id,
        pkts_length: 1,
        run_ns,
        gen_ns,
    };
    hdr.write(buf);
    LittleEndian::write_u64(&mut buf[HEADER_LEN..REPLY_LEN], gen_ns);
    REPLY_LEN
}
