//! Builds RSP reply payloads and frames them for the wire.

use super::hex::encode_hex_buf;
use super::packet::{checksum, packetify};

/// Accumulates a reply payload; [`ResponseWriter::finish`] wraps it in
/// `$...#cc` framing.
#[derive(Debug, Default)]
pub struct ResponseWriter {
    payload: String,
}

impl ResponseWriter {
    pub fn new() -> ResponseWriter {
        ResponseWriter::default()
    }

    pub fn write_str(&mut self, s: &str) -> &mut Self {
        self.payload.push_str(s);
        self
    }

    /// Append bytes as lowercase hex pairs.
    pub fn write_hex_buf(&mut self, bytes: &[u8]) -> &mut Self {
        self.payload.push_str(&encode_hex_buf(bytes));
        self
    }

    /// Append a 32-bit word in little-endian wire order (the byte-reversed
    /// form standard GDB clients expect from a little-endian target).
    pub fn write_word_le(&mut self, word: u32) -> &mut Self {
        self.write_hex_buf(&word.to_le_bytes())
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// The framed packet, consuming the writer.
    pub fn finish(self) -> String {
        packetify(&self.payload)
    }
}

/// Frame a ready-made payload.
pub fn frame(payload: &str) -> String {
    packetify(payload)
}

/// The checksum suffix alone, for tests asserting exact wire bytes.
pub fn checksum_str(payload: &str) -> String {
    format!("{:02x}", checksum(payload.as_bytes()))
}
