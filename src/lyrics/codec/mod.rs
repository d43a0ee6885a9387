//! Stateless decoders for the platforms' lyric payload formats.
//!
//! Every codec is a pure function from input bytes to plaintext or a
//! [`DecodeError`]; none of them touch the network or shared state.

mod des;
pub mod eapi;
pub mod krc;
pub mod qrc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use flate2::{Decompress, FlushDecompress, Status};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("ciphertext length {0} is not a multiple of the {1}-byte block size")]
    Misaligned(usize, usize),
    #[error("payload too short ({0} bytes)")]
    TooShort(usize),
    #[error("decompression failed: {0}")]
    Decompress(String),
    #[error("plaintext is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid block padding")]
    Padding,
    #[error("invalid JSON after decryption: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unexpected payload format: {0}")]
    Format(String),
}

/// Decode transport-level Base64 used by some platforms' lyric fields.
pub fn decode_base64(input: &str) -> Result<Vec<u8>, DecodeError> {
    Ok(BASE64_STANDARD.decode(input.trim())?)
}

/// Inflate a zlib stream, falling back to a raw deflate stream.
///
/// The stream must reach its end marker; trailing bytes after it (block
/// padding) are ignored.
pub(crate) fn inflate(data: &[u8]) -> Result<Vec<u8>, DecodeError> {
    inflate_with(data, true).or_else(|zlib_err| inflate_with(data, false).map_err(|_| zlib_err))
}

fn inflate_with(data: &[u8], zlib_header: bool) -> Result<Vec<u8>, DecodeError> {
    let mut decoder = Decompress::new(zlib_header);
    let mut out = Vec::with_capacity(data.len() * 4 + 64);
    loop {
        let consumed = decoder.total_in() as usize;
        let produced = decoder.total_out();
        let status = decoder
            .decompress_vec(&data[consumed..], &mut out, FlushDecompress::None)
            .map_err(|e| DecodeError::Decompress(e.to_string()))?;
        match status {
            Status::StreamEnd => return Ok(out),
            _ if out.len() == out.capacity() => out.reserve(out.capacity().max(1024)),
            _ if decoder.total_in() as usize == consumed && decoder.total_out() == produced => {
                return Err(DecodeError::Decompress("truncated deflate stream".into()));
            }
            _ => {}
        }
    }
}

/// UTF-8 decode, dropping a leading byte-order mark.
pub(crate) fn utf8_without_bom(bytes: Vec<u8>) -> Result<String, DecodeError> {
    let text = String::from_utf8(bytes)?;
    Ok(match text.strip_prefix('\u{feff}') {
        Some(rest) => rest.to_string(),
        None => text,
    })
}

/// Heuristic used before decryption: some endpoints hand back plain LRC.
pub fn looks_like_plain_lrc(raw: &[u8]) -> bool {
    let head = &raw[..raw.len().min(50)];
    let trimmed = head.trim_ascii_start();
    trimmed.starts_with(b"[") || head.windows(4).any(|w| w == b"[00:")
}
