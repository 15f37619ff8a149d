//! Stateless signed bearer authorization with a rotating keychain
//!
//! Tokens carry a string-map payload and an expiry, signed with a symmetric key from a
//! [`Keychain`]. Nothing is stored server side: a token is valid when its signature checks
//! out against a retained key and the caller's clock has not passed its expiry.
//!
//! Issuing:
//!
//! ```
//! use chrono::{Duration, Utc};
//! use tessera::{AuthorizationToken, Keychain};
//!
//! # fn main() -> Result<(), tessera::AuthError> {
//! let keychain = Keychain::with_secret(b"s1".to_vec())?;
//! let key = keychain.current_key()?;
//!
//! let mut token = AuthorizationToken::default();
//! token.insert_claim("uid", "42")?;
//! token.set_expiry(Utc::now() + Duration::hours(1))?;
//! token.encode(&key)?;
//! let serialized = token.serialized()?;
//!
//! // Verifying: parse, pick the key by id, decode, then check expiry.
//! let mut received = AuthorizationToken::default();
//! received.read_from(&serialized)?;
//! let key_id = received.key_id().ok_or(tessera::AuthError::MalformedToken("no key id"))?;
//! received.decode(&*keychain.match_key(key_id)?)?;
//! assert!(!received.is_expired_at(Utc::now()));
//! assert_eq!(received.claim("uid")?, Some("42"));
//! # Ok(())
//! # }
//! ```

pub mod authority;
pub mod codec;
pub mod config;
mod error;
pub mod keychain;
pub mod rotation;
pub mod signer;
pub mod token;

pub use authority::{Authority, Authorization, Clock, IssuedAuthorization, SystemClock};
pub use config::AuthorizationConfig;
pub use error::{AuthError, AuthResult};
pub use keychain::{KeyId, Keychain, KeychainKey, SecretSource, ThreadRngSecretSource};
pub use rotation::RotationSchedule;
pub use signer::{HmacSha256Signer, HmacSha512Signer, Signer};
pub use token::{AuthorizationToken, Payload, TokenState};
