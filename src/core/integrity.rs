//! Content signing for sidecar files.
//!
//! `sign` hashes the content with SHA-256 and authenticates the lowercase hex
//! digest with HMAC-SHA256 under the vault secret. The sidecar stores the hex
//! MAC. `verify` recomputes both steps and compares in constant time.

use crate::core::error::VaultError;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_HEX_LEN: usize = 64;

#[derive(Clone)]
pub struct IntegrityManager {
    secret: Vec<u8>,
}

impl fmt::Debug for IntegrityManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntegrityManager")
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Lowercase hex SHA-256 of `content`.
pub fn digest_hex(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

impl IntegrityManager {
    pub fn new(secret: impl Into<Vec<u8>>) -> Result<Self, VaultError> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(VaultError::ConfigError("signing secret is empty".into()));
        }
        Ok(Self { secret })
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length")
    }

    pub fn sign(&self, content: &[u8]) -> String {
        let mut mac = self.mac();
        mac.update(digest_hex(content).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Never errors: malformed or mismatched signatures are simply `false`.
    /// Only the exact form `sign` writes is accepted: 64 lowercase hex
    /// digits, no surrounding whitespace.
    pub fn verify(&self, content: &[u8], signature: &str) -> bool {
        let canonical = signature.len() == SIGNATURE_HEX_LEN
            && signature.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if !canonical {
            return false;
        }
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };
        let mut mac = self.mac();
        mac.update(digest_hex(content).as_bytes());
        mac.verify_slice(&expected).is_ok()
    }
}
