//! Crypto primitives consumed by the rest of the core.
//!
//! This crate does not invent any cryptography: SHA-256 and HMAC-SHA-256 are
//! consumed from RustCrypto's `sha2`/`hmac` crates as-is.

use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use hydrogen_errors::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// SHA-256 over an arbitrary byte string.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// HMAC-SHA-256 over `data`, keyed by `key`.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    // A `Hmac<Sha256>` accepts keys of any length (RFC 2104), so this never fails.
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Verifies `signature` against `HMAC_SHA256(key, data)` in constant time.
pub fn hmac_sha256_verify(key: &[u8], data: &[u8], signature: &[u8]) -> bool {
    let expected = hmac_sha256(key, data);
    constant_time_eq(&expected, signature)
}

/// Constant-time byte-string equality, required for password-hash and
/// token-hash comparisons.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// base64url (RFC 4648 §5) with padding stripped on output. Decoding accepts
/// input with or without padding but rejects standard-alphabet `+`/`/`.
pub fn base64url_encode(data: &[u8]) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(data)
}

pub fn base64url_decode(data: &str) -> Result<Vec<u8>> {
    if data.contains('+') || data.contains('/') {
        return Err(Error::invalid_input("base64url input must not contain '+' or '/'"));
    }
    let trimmed = data.trim_end_matches('=');
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(trimmed)
        .map_err(|e| Error::invalid_input(format!("invalid base64url: {e}")))
}

/// Standard-alphabet base64 (with padding), used for the password hash format
/// `base64_standard(SHA256(account_id || password))`.
pub fn base64_standard_encode(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

pub fn base64_standard_decode(data: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| Error::invalid_input(format!("invalid base64: {e}")))
}

/// `base64_standard(SHA256(utf8(account_id) || utf8(password)))`, the stored
/// stored password hash format. The account id is the sole salt: this is
/// a deliberate, documented weakness (see `DESIGN.md`), not something this
/// function should "fix" on its own.
pub fn hash_password(account_id: i64, password: &str) -> String {
    let mut buf = Vec::with_capacity(20 + password.len());
    buf.extend_from_slice(account_id.to_string().as_bytes());
    buf.extend_from_slice(password.as_bytes());
    base64_standard_encode(&sha256(&buf))
}

/// `base64_standard(SHA256(jwt))`, the revocation-store key so the plaintext
/// token is never persisted.
pub fn hash_token(jwt: &str) -> String {
    base64_standard_encode(&sha256(jwt.as_bytes()))
}

/// CSRNG byte generator for JTIs and nonces. Fails closed: if the OS RNG is
/// unavailable we return an error rather than falling back to a weaker
/// source.
pub fn random_bytes(n: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; n];
    rand::rngs::OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| Error::internal(format!("CSRNG unavailable: {e}")))?;
    Ok(buf)
}

/// 128-bit JTI, base64url-encoded.
pub fn generate_jti() -> Result<String> {
    Ok(base64url_encode(&random_bytes(16)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_known_vector() {
        // HMAC-SHA256("key", "The quick brown fox jumps over the lazy dog")
        let mac = hmac_sha256(b"key", b"The quick brown fox jumps over the lazy dog");
        assert_eq!(
            hex::encode(mac),
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd"
        );
    }

    #[test]
    fn base64url_roundtrip_never_emits_padding_or_unsafe_chars() {
        for len in 0..128usize {
            let data: Vec<u8> = (0..len as u8).collect();
            let encoded = base64url_encode(&data);
            assert!(!encoded.contains('+'));
            assert!(!encoded.contains('/'));
            assert!(!encoded.contains('='));
            let decoded = base64url_decode(&encoded).unwrap();
            assert_eq!(decoded, data);
        }
    }

    #[test]
    fn base64url_decode_rejects_standard_alphabet_chars() {
        assert!(base64url_decode("a+b").is_err());
        assert!(base64url_decode("a/b").is_err());
    }

    #[test]
    fn base64url_decode_accepts_with_or_without_padding() {
        let data = b"hi";
        let encoded_no_pad = base64url_encode(data);
        let encoded_with_pad = format!("{encoded_no_pad}==");
        assert_eq!(base64url_decode(&encoded_no_pad).unwrap(), data);
        assert_eq!(base64url_decode(&encoded_with_pad).unwrap(), data);
    }

    #[test]
    fn constant_time_eq_is_correct() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }

    #[test]
    fn hash_password_is_sha256_of_id_concat_password() {
        // account_id=42, password="Hello" => sha256("42Hello") base64-standard.
        let expected = base64_standard_encode(&sha256(b"42Hello"));
        assert_eq!(hash_password(42, "Hello"), expected);
    }

    #[test]
    fn random_bytes_are_not_all_zero_and_vary() {
        let a = random_bytes(16).unwrap();
        let b = random_bytes(16).unwrap();
        assert_eq!(a.len(), 16);
        assert_ne!(a, vec![0u8; 16]);
        assert_ne!(a, b);
    }
}
