//! Issue and authorize bearer tokens against a shared keychain
//!
//! [`Authority`] is the collaborator a transport layer talks to. It walks the token
//! lifecycle step by step (parse, look up the key by id, decode, then check expiry against
//! its clock) and logs verification failures at debug level only.

use crate::config::AuthorizationConfig;
use crate::error::{AuthError, AuthResult};
use crate::keychain::{KeyId, Keychain};
use crate::signer::{HmacSha256Signer, Signer};
use crate::token::{AuthorizationToken, Payload};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error};

/// Time source used for expiry
pub trait Clock: Send + Sync {
    /// Current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl<F> Clock for F
where
    F: Fn() -> DateTime<Utc> + Send + Sync,
{
    fn now(&self) -> DateTime<Utc> {
        self()
    }
}

/// Freshly issued token, ready for a header or cookie
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedAuthorization {
    /// Serialized token
    pub token: String,
    /// When the token stops being accepted
    pub expiry: DateTime<Utc>,
    /// Key that signed it
    pub key_id: KeyId,
}

/// Verified, unexpired claims
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    /// Claims carried by the token
    pub payload: Payload,
    /// Token expiry
    pub expiry: DateTime<Utc>,
    /// Key that signed it
    pub key_id: KeyId,
}

/// Issues and authorizes tokens.
pub struct Authority<C = SystemClock, S = HmacSha256Signer> {
    keychain: Arc<Keychain>,
    config: AuthorizationConfig,
    clock: C,
    signer: S,
}

impl Authority {
    /// Authority with the wall clock and HMAC-SHA256.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` when `config` fails validation.
    pub fn new(keychain: Arc<Keychain>, config: AuthorizationConfig) -> AuthResult<Self> {
        Self::with_parts(keychain, config, SystemClock, HmacSha256Signer)
    }
}

impl<C: Clock> Authority<C> {
    /// Authority with a custom clock and HMAC-SHA256.
    pub fn with_clock(
        keychain: Arc<Keychain>,
        config: AuthorizationConfig,
        clock: C,
    ) -> AuthResult<Self> {
        Self::with_parts(keychain, config, clock, HmacSha256Signer)
    }
}

impl<C, S> Authority<C, S>
where
    C: Clock,
    S: Signer + Clone,
{
    /// Authority with a custom clock and signer.
    pub fn with_parts(
        keychain: Arc<Keychain>,
        config: AuthorizationConfig,
        clock: C,
        signer: S,
    ) -> AuthResult<Self> {
        config.validate()?;
        Ok(Self {
            keychain,
            config,
            clock,
            signer,
        })
    }

    /// Shared keychain
    #[must_use]
    pub fn keychain(&self) -> &Arc<Keychain> {
        &self.keychain
    }

    /// Active policy
    #[must_use]
    pub fn config(&self) -> &AuthorizationConfig {
        &self.config
    }

    /// Sign `payload` with the current key, valid for the configured lifetime.
    ///
    /// # Errors
    ///
    /// `EmptyKeychain` when no signing key exists; serialization errors for oversize payloads.
    pub fn issue(&self, payload: Payload) -> AuthResult<IssuedAuthorization> {
        let key = self.keychain.current_key().inspect_err(|_| {
            error!("cannot issue authorization: keychain has no signing key");
        })?;
        let expiry = self
            .clock
            .now()
            .checked_add_signed(self.config.token_lifetime())
            .ok_or_else(|| AuthError::serialization("expiry out of range"))?;

        let mut token = AuthorizationToken::new(self.signer.clone());
        token.set_payload(payload)?;
        token.set_expiry(expiry)?;
        token.encode(&key)?;
        let serialized = token.serialized()?;

        debug!(key_id = %key.id(), %expiry, "issued authorization");
        Ok(IssuedAuthorization {
            token: serialized,
            expiry,
            key_id: key.id(),
        })
    }

    /// Verify `token` and return its claims if it is authentic and unexpired.
    ///
    /// # Errors
    ///
    /// `MalformedToken`, `KeyNotFound`, `InvalidSignature` or `Expired`; all of them mean the
    /// bearer is not authorized.
    pub fn authorize(&self, token: &str) -> AuthResult<Authorization> {
        let mut parsed = AuthorizationToken::new(self.signer.clone());
        parsed.read_from(token).inspect_err(|err| {
            debug!(error = %err, "rejected unreadable authorization");
        })?;

        let (Some(key_id), Some(expiry)) = (parsed.key_id(), parsed.expiry()) else {
            return Err(AuthError::MalformedToken("missing key id or expiry"));
        };

        let key = self.keychain.match_key(key_id).inspect_err(|err| {
            debug!(
                error = %err,
                key_id = %key_id,
                keys_in_keychain = self.keychain.key_count(),
                "no matching key for authorization"
            );
        })?;

        parsed.decode(&key).inspect_err(|err| {
            debug!(error = %err, key_id = %key_id, "rejected authorization signature");
        })?;

        if parsed.is_expired_at(self.clock.now()) {
            debug!(%expiry, key_id = %key_id, "authorization expired");
            return Err(AuthError::Expired(expiry));
        }

        Ok(Authorization {
            payload: parsed.into_payload()?,
            expiry,
            key_id,
        })
    }
}

impl<C, S: Signer> std::fmt::Debug for Authority<C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authority")
            .field("keychain", &self.keychain)
            .field("config", &self.config)
            .field("signer", &self.signer.name())
            .finish_non_exhaustive()
    }
}
