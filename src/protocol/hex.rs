//! Hex codecs shared by the packet and command parsers.

use btoi::btou_radix;
use num_traits::{CheckedAdd, CheckedMul, FromPrimitive, Zero};

/// Decode a big-endian ASCII-hex integer (the RSP's number encoding).
pub fn decode_hex<I>(buf: &[u8]) -> Option<I>
where
    I: FromPrimitive + Zero + CheckedAdd + CheckedMul,
{
    if buf.is_empty() {
        return None;
    }
    btou_radix(buf, 16).ok()
}

fn ascii2nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Decode a hex string into bytes. Fails on odd length or non-hex digits.
pub fn decode_hex_buf(buf: &[u8]) -> Option<Vec<u8>> {
    if buf.len() % 2 != 0 {
        return None;
    }
    buf.chunks_exact(2)
        .map(|pair| Some(ascii2nibble(pair[0])? << 4 | ascii2nibble(pair[1])?))
        .collect()
}

/// Encode bytes as lowercase hex.
pub fn encode_hex_buf(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}
