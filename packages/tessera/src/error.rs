//! Error taxonomy for token issuance and verification

use crate::keychain::KeyId;
use crate::token::TokenState;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type for authorization operations
pub type AuthResult<T> = Result<T, AuthError>;

/// Authorization errors
///
/// Verification failures (`MalformedToken`, `KeyNotFound`, `InvalidSignature`, `Expired`)
/// are expected on the hot path and must surface as an authentication failure, never as a
/// fault. `InvalidState` is a caller bug. `EmptyKeychain` is an operational misconfiguration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Structural parse failure; nothing read from the input may be trusted
    #[error("Malformed token: {0}")]
    MalformedToken(&'static str),

    /// No retained key carries this id (never issued, or already purged)
    #[error("No key matches key id {0}")]
    KeyNotFound(KeyId),

    /// Signature tag does not match: tampering or the wrong key
    #[error("Invalid token signature")]
    InvalidSignature,

    /// Operation called outside of the token lifecycle
    #[error("Invalid token state: cannot {operation} a token in state {state}")]
    InvalidState {
        /// The rejected operation
        operation: &'static str,
        /// State the token was in
        state: TokenState,
    },

    /// No signing key is available for issuance
    #[error("Keychain has no signing key")]
    EmptyKeychain,

    /// `serialized` called before a successful `encode`
    #[error("Token has not been encoded")]
    NotEncoded,

    /// `encode` called before the named field was set
    #[error("Token is missing its {0}")]
    Incomplete(&'static str),

    /// Secret material rejected by the keychain or the signer
    #[error("Invalid secret: {0}")]
    InvalidSecret(String),

    /// Payload could not be serialized into a token
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Secret source failed to produce key material
    #[error("Secret generation failed: {0}")]
    SecretGeneration(String),

    /// Configuration violates the rotation policy
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Token verified but its expiry has passed
    #[error("Authorization expired at {0}")]
    Expired(DateTime<Utc>),
}

impl AuthError {
    /// True when the error means "this bearer is not authorized" rather than a system fault
    #[must_use]
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            AuthError::MalformedToken(_)
                | AuthError::KeyNotFound(_)
                | AuthError::InvalidSignature
                | AuthError::Expired(_)
        )
    }

    pub(crate) fn invalid_state(operation: &'static str, state: TokenState) -> Self {
        AuthError::InvalidState { operation, state }
    }

    pub(crate) fn serialization(msg: impl Into<String>) -> Self {
        AuthError::Serialization(msg.into())
    }

    pub(crate) fn invalid_config(msg: impl Into<String>) -> Self {
        AuthError::InvalidConfig(msg.into())
    }
}
