//! PKCE (RFC 7636) verifier, challenge and CSRF state generation

use std::fmt;

use base64::prelude::*;
use rand::Rng;
use sha2::{Digest, Sha256};

/// RFC 3986 unreserved characters, the alphabet allowed for verifiers.
const UNRESERVED: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

pub const VERIFIER_LEN: usize = 64;
const STATE_LEN: usize = 32;

/// Secrets for one authorization attempt. Never reused: a new context is
/// generated for every flow.
pub struct PkceContext {
    pub code_verifier: String,
    pub code_challenge: String,
    pub state: String,
}

impl PkceContext {
    pub fn generate() -> Self {
        let code_verifier = random_string(VERIFIER_LEN);
        let code_challenge = challenge_for(&code_verifier);
        Self {
            code_verifier,
            code_challenge,
            state: random_string(STATE_LEN),
        }
    }

    pub fn matches_state(&self, candidate: &str) -> bool {
        constant_time_eq(self.state.as_bytes(), candidate.as_bytes())
    }
}

impl fmt::Debug for PkceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PkceContext")
            .field("code_challenge", &self.code_challenge)
            .finish_non_exhaustive()
    }
}

pub fn random_string(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| UNRESERVED[rng.gen_range(0..UNRESERVED.len())] as char)
        .collect()
}

/// `BASE64URL(SHA256(verifier))` without padding.
pub fn challenge_for(verifier: &str) -> String {
    BASE64_URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Compares every byte regardless of where the first difference is.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
