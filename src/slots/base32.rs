//! RFC 4648 base-32 without padding.
//!
//! Slot tokens are exchanged in this form, so both peers must agree on the
//! exact alphabet: `A-Z2-7`, encoded uppercase. Decoding accepts either case
//! and discards trailing bits that do not fill a whole byte.

use crate::error::SlotError;

const ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// Encode bytes as uppercase base-32 without padding.
pub fn encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().div_ceil(5) * 8);
    let mut buffer: u32 = 0;
    let mut bits = 0u32;

    for &byte in data {
        buffer = (buffer << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }
    out
}

/// Decode a base-32 string. Padding characters are not accepted.
pub fn decode(token: &str) -> Result<Vec<u8>, SlotError> {
    let mut out = Vec::with_capacity(token.len() * 5 / 8);
    let mut buffer: u32 = 0;
    let mut bits = 0u32;

    for c in token.chars() {
        let value = match c {
            'A'..='Z' => c as u32 - 'A' as u32,
            'a'..='z' => c as u32 - 'a' as u32,
            '2'..='7' => c as u32 - '2' as u32 + 26,
            _ => {
                return Err(SlotError::InvalidEncoding {
                    token: token.to_string(),
                    found: c,
                });
            }
        };
        buffer = ((buffer << 5) | value) & 0xffff;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push((buffer >> bits) as u8);
        }
    }
    Ok(out)
}
