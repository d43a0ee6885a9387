//! KRC: Kugou's encrypted syllable lyrics.
//!
//! `krc1` header, then a cyclic XOR over the rest, then zlib.

use super::{DecodeError, decode_base64, inflate, utf8_without_bom};

const HEADER_LEN: usize = 4;
const KEY: [u8; 16] = [
    0x40, 0x47, 0x61, 0x77, 0x5e, 0x32, 0x74, 0x47, 0x51, 0x36, 0x31, 0x2d, 0xce, 0xd2, 0x6e, 0x69,
];

/// Decode the Base64 `content` field of Kugou's download endpoint.
pub fn decode_base64_payload(text: &str) -> Result<String, DecodeError> {
    decode(&decode_base64(text)?)
}

pub fn decode(raw: &[u8]) -> Result<String, DecodeError> {
    if raw.len() <= HEADER_LEN {
        return Err(DecodeError::TooShort(raw.len()));
    }
    let payload: Vec<u8> = raw[HEADER_LEN..]
        .iter()
        .zip(KEY.iter().cycle())
        .map(|(b, k)| b ^ k)
        .collect();
    utf8_without_bom(inflate(&payload)?)
}
