//! Peer Key Material
//!
//! Generates placeholder public keys for peers registered without one and
//! checks caller-supplied keys for a plausible WireGuard shape.
//!
//! Generated keys are display values only: no private key is derived or
//! stored, so a client must bring its own key pair out of band.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Encoded length of a WireGuard public key (32 bytes, base64)
pub const KEY_LENGTH: usize = 44;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Peer public key
///
/// Always holds a string that passed [`validate`].
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PublicKey(String);

impl PublicKey {
    /// Generate a random placeholder key
    pub fn generate() -> Self {
        Self(generate())
    }

    /// Parse a caller-supplied key
    pub fn parse(s: &str) -> Result<Self, KeyError> {
        if s.is_empty() {
            return Err(KeyError::Empty);
        }
        if s.len() != KEY_LENGTH {
            return Err(KeyError::InvalidLength(s.len()));
        }
        if !validate(s) {
            return Err(KeyError::InvalidEncoding);
        }
        Ok(Self(s.to_string()))
    }

    /// Borrow the encoded key
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PublicKey {
    type Error = KeyError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<PublicKey> for String {
    fn from(key: PublicKey) -> Self {
        key.0
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}...)", &self.0[..8])
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generate a 44-character key drawn uniformly from `[A-Za-z0-9+/]`
pub fn generate() -> String {
    let mut rng = rand::thread_rng();
    (0..KEY_LENGTH)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Check that a candidate looks like a WireGuard public key
///
/// Accepts 44 characters of the base64 alphabet. A trailing `=` is only
/// allowed when the whole string decodes to exactly 32 bytes.
pub fn validate(candidate: &str) -> bool {
    if candidate.len() != KEY_LENGTH {
        return false;
    }

    match candidate.strip_suffix('=') {
        Some(_) => BASE64
            .decode(candidate)
            .map(|bytes| bytes.len() == 32)
            .unwrap_or(false),
        None => candidate.bytes().all(|b| ALPHABET.contains(&b)),
    }
}

/// Key parsing errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("Public key is empty")]
    Empty,

    #[error("Invalid key length {0} (expected 44 characters)")]
    InvalidLength(usize),

    #[error("Public key contains characters outside the base64 alphabet")]
    InvalidEncoding,
}
