//! HMAC-SHA256 CSRF proof signing/verification.
//!
//! Proof format: `v1.<base36 expiresAt>.<nonce>.<hex hmac>`, where the MAC
//! covers `nonce + ":" + base36(expiresAt)`. Verification uses the `hmac`
//! crate's built-in constant-time tag comparison.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub struct ParsedProof {
    pub nonce: String,
    pub expires_at: i64,
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

const BASE36_DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

pub fn to_base36(n: i64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let neg = n < 0;
    let mut n = n.unsigned_abs();
    let mut buf = Vec::new();
    while n > 0 {
        buf.push(BASE36_DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    if neg {
        buf.push(b'-');
    }
    buf.reverse();
    String::from_utf8(buf).unwrap()
}

pub fn from_base36(s: &str) -> Option<i64> {
    i64::from_str_radix(s, 36).ok()
}

/// Generates a 128-bit random nonce, hex-encoded (32 hex chars).
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex_encode(&bytes)
}

/// Generates a 32-byte ephemeral secret, hex-encoded.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex_encode(&bytes)
}

pub fn sign_proof(secret: &[u8], nonce: &str, expires_at: i64) -> String {
    let exp_b36 = to_base36(expires_at);
    let message = format!("{nonce}:{exp_b36}");
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts a key of any length");
    mac.update(message.as_bytes());
    let sig = mac.finalize().into_bytes();
    format!("v1.{exp_b36}.{nonce}.{}", hex_encode(&sig))
}

/// Constant-time byte comparison, used for the raw CSRF token check
/// alongside the proof's built-in HMAC verification (§4.3: all comparisons
/// of secrets/proofs run in constant time).
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Verifies a proof string in constant time, returning the embedded nonce
/// and expiry on success.
pub fn verify_proof(secret: &[u8], proof: &str) -> Option<ParsedProof> {
    let mut parts = proof.splitn(4, '.');
    if parts.next()? != "v1" {
        return None;
    }
    let exp_b36 = parts.next()?;
    let nonce = parts.next()?;
    let sig_hex = parts.next()?;

    let expires_at = from_base36(exp_b36)?;
    let sig_bytes = hex_decode(sig_hex)?;

    let message = format!("{nonce}:{exp_b36}");
    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(message.as_bytes());
    mac.verify_slice(&sig_bytes).ok()?;

    Some(ParsedProof {
        nonce: nonce.to_string(),
        expires_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let secret = generate_secret();
        let nonce = generate_nonce();
        let exp = 1_800_000_000_123i64;
        let proof = sign_proof(secret.as_bytes(), &nonce, exp);
        let parsed = verify_proof(secret.as_bytes(), &proof).expect("should verify");
        assert_eq!(parsed.nonce, nonce);
        assert_eq!(parsed.expires_at, exp);
    }

    #[test]
    fn tampering_any_byte_is_rejected() {
        let secret = generate_secret();
        let nonce = generate_nonce();
        let proof = sign_proof(secret.as_bytes(), &nonce, 123);
        let mut tampered = proof.clone();
        let last = tampered.pop().unwrap();
        let replacement = if last == 'a' { 'b' } else { 'a' };
        tampered.push(replacement);
        assert!(verify_proof(secret.as_bytes(), &tampered).is_none());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let nonce = generate_nonce();
        let proof = sign_proof(generate_secret().as_bytes(), &nonce, 123);
        assert!(verify_proof(generate_secret().as_bytes(), &proof).is_none());
    }

    #[test]
    fn base36_round_trips() {
        for n in [0i64, 1, 35, 36, 12345, 1_800_000_000_000] {
            assert_eq!(from_base36(&to_base36(n)).unwrap(), n);
        }
    }

    #[test]
    fn nonce_is_32_hex_chars() {
        let nonce = generate_nonce();
        assert_eq!(nonce.len(), 32);
        assert!(nonce.bytes().all(|b| b.is_ascii_hexdigit()));
    }
}
