//! Netease "EAPI" parameter encryption.
//!
//! Request bodies are sealed as
//! `{path}-36cd479b6b5-{json}-36cd479b6b5-{md5}` under AES-128-ECB with
//! PKCS#7 padding and sent upper-case hex. Some responses come back
//! encrypted the same way.

use aes::Aes128;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use md5::{Digest, Md5};
use serde_json::Value;

use super::DecodeError;

const KEY: &[u8; 16] = b"e82ckenh8dichen8";
const SEPARATOR: &str = "-36cd479b6b5-";
const BLOCK: usize = 16;

/// A decoded request parameter blob.
#[derive(Debug, Clone, PartialEq)]
pub struct EapiParams {
    pub path: String,
    pub body: Value,
}

/// Map a plain API path onto its encrypted endpoint.
pub fn eapi_url(host: &str, path: &str) -> String {
    let eapi_path = path.replacen("/api/", "/eapi/", 1);
    format!("{}{}", host.trim_end_matches('/'), eapi_path)
}

fn digest(path: &str, json: &str) -> String {
    let message = format!("nobody{path}use{json}md5forencrypt");
    hex::encode(Md5::digest(message.as_bytes()))
}

/// Encrypt a request body for `path`, returning the `params` form value.
pub fn encode_params(path: &str, body: &Value) -> String {
    let json = body.to_string();
    let message = format!("{path}{SEPARATOR}{json}{SEPARATOR}{}", digest(path, &json));
    hex::encode_upper(encrypt(message.as_bytes()))
}

/// Recover the path and JSON body from a `params` value.
pub fn decode_params(hex_text: &str) -> Result<EapiParams, DecodeError> {
    let plain = decrypt(&hex::decode(hex_text.trim())?)?;
    let text = String::from_utf8(plain)?;

    let mut parts = text.splitn(3, SEPARATOR);
    let (Some(path), Some(json), Some(sum)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(DecodeError::Format("missing eapi separators".into()));
    };
    if sum != digest(path, json) {
        return Err(DecodeError::Format("eapi digest mismatch".into()));
    }
    Ok(EapiParams {
        path: path.to_string(),
        body: serde_json::from_str(json)?,
    })
}

/// Decrypt an encrypted response body into JSON.
pub fn decrypt_response(raw: &[u8]) -> Result<Value, DecodeError> {
    let plain = decrypt(raw)?;
    Ok(serde_json::from_slice(&plain)?)
}

fn encrypt(plain: &[u8]) -> Vec<u8> {
    let cipher = Aes128::new(GenericArray::from_slice(KEY));
    let pad = BLOCK - plain.len() % BLOCK;
    let mut data = Vec::with_capacity(plain.len() + pad);
    data.extend_from_slice(plain);
    data.resize(plain.len() + pad, pad as u8);
    for chunk in data.chunks_exact_mut(BLOCK) {
        cipher.encrypt_block(GenericArray::from_mut_slice(chunk));
    }
    data
}

fn decrypt(raw: &[u8]) -> Result<Vec<u8>, DecodeError> {
    if raw.is_empty() || raw.len() % BLOCK != 0 {
        return Err(DecodeError::Misaligned(raw.len(), BLOCK));
    }
    let cipher = Aes128::new(GenericArray::from_slice(KEY));
    let mut data = raw.to_vec();
    for chunk in data.chunks_exact_mut(BLOCK) {
        cipher.decrypt_block(GenericArray::from_mut_slice(chunk));
    }

    let pad = *data.last().ok_or(DecodeError::Padding)? as usize;
    if pad == 0 || pad > BLOCK || data[data.len() - pad..].iter().any(|&b| b as usize != pad) {
        return Err(DecodeError::Padding);
    }
    data.truncate(data.len() - pad);
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const LYRIC_PARAMS: &str = "9B1595479B79266065903BA79E9883029338432CD7D98D1A3626E997A2C531210EA3B15E22757550DA037E9D28C45ED81D638DF8193173F2F518B8E605ED00710894248E5055179BAB5762D1CCFA44451B817CBEDBB9829D252802CA87683DA3";

    #[test]
    fn encodes_known_params() {
        let body = json!({"id": "123", "lv": -1});
        assert_eq!(encode_params("/api/song/lyric", &body), LYRIC_PARAMS);
        assert_eq!(
            digest("/api/song/lyric", &body.to_string()),
            "907f98243c2b5e45568b5210a1062bf7"
        );
    }

    #[test]
    fn decodes_known_params() {
        let params = decode_params(LYRIC_PARAMS).unwrap();
        assert_eq!(params.path, "/api/song/lyric");
        assert_eq!(params.body, json!({"id": "123", "lv": -1}));
    }

    #[test]
    fn decrypts_response_json() {
        let raw = hex::decode("51B05E35C69B2F9FF4967735DED68881").unwrap();
        assert_eq!(decrypt_response(&raw).unwrap(), json!({"code": 200}));
    }

    #[test]
    fn malformed_json_after_decryption_is_an_error() {
        let raw = hex::decode("109033F5D98FF35CFC3FF6356E874EDC").unwrap();
        assert!(matches!(decrypt_response(&raw), Err(DecodeError::Json(_))));
    }

    #[test]
    fn corrupted_params_are_rejected() {
        let mut raw = hex::decode(LYRIC_PARAMS).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x55;
        assert!(decode_params(&hex::encode(&raw)).is_err());
        assert!(matches!(decrypt(&raw[..10]), Err(DecodeError::Misaligned(10, 16))));
    }

    #[test]
    fn eapi_url_rewrites_first_api_segment() {
        assert_eq!(
            eapi_url("https://interface3.music.163.com/", "/api/song/lyric"),
            "https://interface3.music.163.com/eapi/song/lyric"
        );
    }
}
