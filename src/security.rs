//! Shared-secret credentials: Basic header parsing and timing-safe secret checks.
//!
//! The configured secret is either plaintext or an Argon2 PHC string (`$argon2id$...`).
//! Plaintext comparison hashes both sides to fixed-length digests before a constant-time
//! compare, so neither the mismatch position nor the candidate length changes the timing.

use anyhow::{anyhow, Result};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use axum::http::{header, HeaderMap};
use base64::Engine;
use password_hash::{PasswordHash, SaltString};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

/// Extract `Authorization: Basic base64(user:pass)`. Anything malformed yields None.
pub fn parse_basic_auth(headers: &HeaderMap) -> Option<BasicCredentials> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, rest) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") { return None; }
    let decoded = base64::engine::general_purpose::STANDARD.decode(rest.trim()).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (user, pass) = text.split_once(':')?;
    Some(BasicCredentials { username: user.to_string(), password: pass.to_string() })
}

/// Extract `Authorization: Bearer <token>`.
pub fn parse_bearer(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, rest) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") { return None; }
    let token = rest.trim();
    if token.is_empty() { None } else { Some(token.to_string()) }
}

/// Constant-time equality that is also independent of the inputs' lengths.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let da = Sha256::digest(a);
    let db = Sha256::digest(b);
    da.as_slice().ct_eq(db.as_slice()).into()
}

pub fn hash_password(password: &str) -> Result<String> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let argon2 = Argon2::default();
    let phc = argon2.hash_password(password.as_bytes(), &salt).map_err(|e| anyhow!(e.to_string()))?.to_string();
    Ok(phc)
}

pub fn verify_password(hash: &str, password: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        let argon2 = Argon2::default();
        argon2.verify_password(password.as_bytes(), &parsed).is_ok()
    } else { false }
}

/// The configured shared secret.
#[derive(Clone)]
pub enum SharedSecret {
    Plain(Vec<u8>),
    Phc(String),
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SharedSecret::Plain(_) => f.write_str("SharedSecret::Plain(..)"),
            SharedSecret::Phc(_) => f.write_str("SharedSecret::Phc(..)"),
        }
    }
}

impl SharedSecret {
    pub fn parse(raw: &str) -> Self {
        if raw.starts_with("$argon2") && PasswordHash::new(raw).is_ok() {
            SharedSecret::Phc(raw.to_string())
        } else {
            SharedSecret::Plain(raw.as_bytes().to_vec())
        }
    }

    pub fn verify(&self, candidate: &str) -> bool {
        match self {
            SharedSecret::Plain(secret) => constant_time_eq(secret, candidate.as_bytes()),
            SharedSecret::Phc(phc) => verify_password(phc, candidate),
        }
    }
}
