//! Splits an arbitrarily-chunked byte stream into 188-byte transport stream packets.
//!
//! Reads from a socket or HTTP body rarely line up with packet boundaries, so any trailing
//! partial packet is carried over and completed by the bytes of the next `push()`.

use crate::packet;
use bytes::{Buf, BytesMut};
use log::warn;

/// Produces sync-byte-aligned `Packet` values from the byte chunks given to `push()`.
///
/// Resynchronisation is single-byte only: when the byte at the expected position is not
/// `0x47`, the chunker scans forward to the next `0x47` and assumes a packet starts there.
#[derive(Default)]
pub struct PacketChunker {
    buf: BytesMut,
}

impl PacketChunker {
    pub fn new() -> PacketChunker {
        PacketChunker::default()
    }

    /// Appends `chunk` to any bytes carried over from the previous call, and passes each
    /// complete packet found to `consumer`, in stream order.
    pub fn push<F>(&mut self, chunk: &[u8], mut consumer: F)
    where
        F: FnMut(packet::Packet<'_>),
    {
        self.buf.extend_from_slice(chunk);
        let mut last_position = None;
        let mut i = 0;
        while i < self.buf.len() {
            if !packet::Packet::is_sync_byte(self.buf[i]) {
                i += 1;
                continue;
            }
            if i + packet::Packet::SIZE > self.buf.len() {
                last_position = Some(i);
                break;
            }
            consumer(packet::Packet::new(&self.buf[i..i + packet::Packet::SIZE]));
            i += packet::Packet::SIZE;
            last_position = Some(i);
        }
        match last_position {
            Some(pos) => self.buf.advance(pos),
            None => {
                if !self.buf.is_empty() {
                    warn!("no sync byte within {} bytes, discarding", self.buf.len());
                }
                self.buf.clear()
            }
        }
    }

    /// The number of bytes being held over until more data arrives.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Discard any partial packet carried over, because the bytes which would have completed it
    /// are known to be lost.
    pub fn discontinuity(&mut self) {
        if !self.buf.is_empty() {
            warn!(
                "discontinuity in input, dropping {} carried-over bytes",
                self.buf.len()
            );
        }
        self.buf.clear();
    }

    /// Forget all state, ready to be fed a new stream.
    pub fn reset(&mut self) {
        self.buf.clear();
    }
}
