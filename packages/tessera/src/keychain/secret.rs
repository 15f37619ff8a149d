//! Secret generation for key rotation

use crate::error::{AuthError, AuthResult};
use rand::RngCore;
use zeroize::Zeroizing;

/// Source of fresh key material for [`rotate_generated`](super::Keychain::rotate_generated)
pub trait SecretSource: Send + Sync {
    /// Produce `len` bytes of cryptographically secure secret material.
    fn generate(&self, len: usize) -> AuthResult<Zeroizing<Vec<u8>>>;
}

/// Secrets from the thread-local CSPRNG, seeded by the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRngSecretSource;

impl SecretSource for ThreadRngSecretSource {
    fn generate(&self, len: usize) -> AuthResult<Zeroizing<Vec<u8>>> {
        if len == 0 {
            return Err(AuthError::SecretGeneration(
                "secret length must be non-zero".to_string(),
            ));
        }
        let mut bytes = Zeroizing::new(vec![0u8; len]);
        rand::rng().fill_bytes(&mut bytes);
        Ok(bytes)
    }
}
