//! PKCE (RFC 7636) for the interactive consent exchange.
//!
//! The verifier stays in this process; only the S256 challenge travels in
//! the authorization URL handed to the consent callback.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Characters allowed in the verifier (RFC 7636 unreserved chars).
const VERIFIER_CHARS: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

/// Verifier length in characters (RFC 7636 allows 43..=128).
const VERIFIER_LENGTH: usize = 64;

/// A code verifier and its S256 challenge.
#[derive(Debug, Clone)]
pub struct Pkce {
    /// Sent with the code exchange.
    pub verifier: String,
    /// Sent in the authorization URL.
    pub challenge: String,
}

impl Pkce {
    /// Challenge method sent alongside the challenge.
    pub const METHOD: &'static str = "S256";

    /// Generate a random verifier and derive its challenge.
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let verifier: String = (0..VERIFIER_LENGTH)
            .map(|_| VERIFIER_CHARS[rng.random_range(0..VERIFIER_CHARS.len())] as char)
            .collect();
        Self::from_verifier(verifier)
    }

    /// Derive the challenge for a known verifier.
    pub fn from_verifier(verifier: impl Into<String>) -> Self {
        let verifier = verifier.into();
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }
}
