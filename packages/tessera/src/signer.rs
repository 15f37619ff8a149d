//! Keyed hash primitives for token signatures
//!
//! A [`Signer`] turns a secret and a message into a fixed-length tag. Verification
//! recomputes the tag and compares in constant time, so a mismatch never reveals how
//! many leading bytes were correct.

use crate::error::{AuthError, AuthResult};
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

/// Keyed hash used to sign and verify tokens.
///
/// Implementations must be deterministic and free of side effects.
pub trait Signer: Send + Sync {
    /// Compute the authentication tag of `message` under `secret`.
    fn sign(&self, secret: &[u8], message: &[u8]) -> AuthResult<Vec<u8>>;

    /// Length in bytes of every tag this signer produces.
    fn tag_len(&self) -> usize;

    /// Algorithm name, for diagnostics.
    fn name(&self) -> &'static str;

    /// Check `tag` against the tag of `message` under `secret` in constant time.
    fn verify(&self, secret: &[u8], message: &[u8], tag: &[u8]) -> bool {
        match self.sign(secret, message) {
            Ok(expected) => expected.as_slice().ct_eq(tag).into(),
            Err(_) => false,
        }
    }
}

impl<T: Signer + ?Sized> Signer for std::sync::Arc<T> {
    fn sign(&self, secret: &[u8], message: &[u8]) -> AuthResult<Vec<u8>> {
        (**self).sign(secret, message)
    }

    fn tag_len(&self) -> usize {
        (**self).tag_len()
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn verify(&self, secret: &[u8], message: &[u8], tag: &[u8]) -> bool {
        (**self).verify(secret, message, tag)
    }
}

/// HMAC-SHA256 signer, 32-byte tags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HmacSha256Signer;

impl Signer for HmacSha256Signer {
    #[inline]
    fn sign(&self, secret: &[u8], message: &[u8]) -> AuthResult<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(secret)
            .map_err(|_| AuthError::InvalidSecret("Invalid HMAC key".to_string()))?;
        mac.update(message);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    fn tag_len(&self) -> usize {
        32
    }

    fn name(&self) -> &'static str {
        "HMAC-SHA256"
    }
}

/// HMAC-SHA512 signer, 64-byte tags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HmacSha512Signer;

impl Signer for HmacSha512Signer {
    #[inline]
    fn sign(&self, secret: &[u8], message: &[u8]) -> AuthResult<Vec<u8>> {
        let mut mac = HmacSha512::new_from_slice(secret)
            .map_err(|_| AuthError::InvalidSecret("Invalid HMAC key".to_string()))?;
        mac.update(message);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    fn tag_len(&self) -> usize {
        64
    }

    fn name(&self) -> &'static str {
        "HMAC-SHA512"
    }
}
