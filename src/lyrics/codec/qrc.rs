//! QRC: QQ Music's encrypted syllable lyrics.
//!
//! Hex text -> custom triple-DES (ECB) -> zlib -> UTF-8.

use super::des::{Mode, TripleDes};
use super::{DecodeError, inflate, utf8_without_bom};

const KEY: &[u8; 24] = b"!@#)(*$%123ZXC!@!@#)(NHL";
const BLOCK: usize = 8;

/// Decode the hex-encoded ciphertext QQ Music returns in its CDATA fields.
pub fn decode_hex(hex_text: &str) -> Result<String, DecodeError> {
    let raw = hex::decode(hex_text.trim())?;
    decode(&raw)
}

/// Decrypt and inflate raw QRC ciphertext.
pub fn decode(ciphertext: &[u8]) -> Result<String, DecodeError> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK != 0 {
        return Err(DecodeError::Misaligned(ciphertext.len(), BLOCK));
    }
    let mut data = ciphertext.to_vec();
    TripleDes::new(KEY, Mode::Decrypt).crypt_in_place(&mut data);
    utf8_without_bom(inflate(&data)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VECTOR: &str = "BB1DB48DC814CA52CA0EB52C6A6EE486FA1333625082152699796A96B51B1574C17426906DB6125F";

    #[test]
    fn decodes_known_vector() {
        assert_eq!(decode_hex(VECTOR).unwrap(), "[0,1000]Hel(0,500)lo(500,500)\n");
    }

    #[test]
    fn lowercase_hex_is_accepted() {
        let lower = VECTOR.to_lowercase();
        assert_eq!(decode_hex(&lower).unwrap(), decode_hex(VECTOR).unwrap());
    }

    #[test]
    fn corrupted_block_fails_to_inflate() {
        let mut raw = hex::decode(VECTOR).unwrap();
        raw[0] ^= 0xff;
        assert!(matches!(decode(&raw), Err(DecodeError::Decompress(_))));
    }

    #[test]
    fn misaligned_ciphertext_is_rejected() {
        let raw = hex::decode(VECTOR).unwrap();
        assert!(matches!(
            decode(&raw[..raw.len() - 3]),
            Err(DecodeError::Misaligned(37, 8))
        ));
        assert!(matches!(decode_hex("zz"), Err(DecodeError::Hex(_))));
    }
}
