//! Authorization tokens
//!
//! A token has two disjoint lifecycles:
//!
//! * issue: `Empty -> Building -> Encoded`, then [`AuthorizationToken::serialized`]
//! * verify: `Empty -> Parsed -> Trusted`
//!
//! Parsing and verifying are separate steps so the verifier can look up the signing key by
//! the id carried in the token. That is what keeps in-flight tokens valid across a key
//! rotation. The payload only becomes readable once the token is trusted.
//!
//! Expiry is not enforced here. Callers compare [`AuthorizationToken::expiry`] against their
//! own clock after a successful decode.

use crate::codec;
use crate::error::{AuthError, AuthResult};
use crate::keychain::{KeyId, KeychainKey};
use crate::signer::{HmacSha256Signer, Signer};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

/// Claims carried by a token. Ordered so the encoded form is canonical.
pub type Payload = BTreeMap<String, String>;

/// Lifecycle state of an [`AuthorizationToken`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenState {
    /// Freshly constructed
    Empty,
    /// Payload or expiry set, not yet signed
    Building,
    /// Signed with a keychain key, ready for serialization
    Encoded,
    /// Read from an untrusted string, signature not yet checked
    Parsed,
    /// Signature verified against a matching key
    Trusted,
}

impl fmt::Display for TokenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenState::Empty => "empty",
            TokenState::Building => "building",
            TokenState::Encoded => "encoded",
            TokenState::Parsed => "parsed",
            TokenState::Trusted => "trusted",
        };
        f.write_str(name)
    }
}

/// Signed bearer token carrying a [`Payload`] and an expiry.
pub struct AuthorizationToken<S = HmacSha256Signer> {
    signer: S,
    state: TokenState,
    payload: Option<Payload>,
    raw_payload: Vec<u8>,
    expiry: Option<DateTime<Utc>>,
    key_id: Option<KeyId>,
    signature: Option<Vec<u8>>,
}

impl Default for AuthorizationToken<HmacSha256Signer> {
    fn default() -> Self {
        Self::new(HmacSha256Signer)
    }
}

impl<S: Signer> AuthorizationToken<S> {
    /// Create an empty, untrusted token that signs with `signer`.
    pub fn new(signer: S) -> Self {
        Self {
            signer,
            state: TokenState::Empty,
            payload: None,
            raw_payload: Vec::new(),
            expiry: None,
            key_id: None,
            signature: None,
        }
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> TokenState {
        self.state
    }

    /// True once the token was produced by `encode` or verified by `decode`
    #[must_use]
    pub fn is_trusted(&self) -> bool {
        matches!(self.state, TokenState::Encoded | TokenState::Trusted)
    }

    /// Replace the payload of a token that is still being built.
    pub fn set_payload(&mut self, payload: Payload) -> AuthResult<()> {
        self.ensure_building("set the payload of")?;
        self.payload = Some(payload);
        self.state = TokenState::Building;
        Ok(())
    }

    /// Add a single claim to a token that is still being built.
    pub fn insert_claim(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> AuthResult<()> {
        self.ensure_building("add a claim to")?;
        self.payload
            .get_or_insert_with(Payload::new)
            .insert(key.into(), value.into());
        self.state = TokenState::Building;
        Ok(())
    }

    /// Set the expiry of a token that is still being built.
    pub fn set_expiry(&mut self, expiry: DateTime<Utc>) -> AuthResult<()> {
        self.ensure_building("set the expiry of")?;
        self.expiry = Some(expiry);
        self.state = TokenState::Building;
        Ok(())
    }

    /// Sign payload and expiry with `key`.
    ///
    /// # Errors
    ///
    /// `Incomplete` when payload or expiry is unset, `InvalidState` when the token was
    /// already encoded or came from [`read_from`](Self::read_from). `Serialization` when
    /// the token would be too long or the signer's tag does not fit the wire format.
    pub fn encode(&mut self, key: &KeychainKey) -> AuthResult<()> {
        self.ensure_building("encode")?;
        let payload = self.payload.as_ref().ok_or(AuthError::Incomplete("payload"))?;
        let expiry = self.expiry.ok_or(AuthError::Incomplete("expiry"))?;

        let raw_payload =
            serde_json::to_vec(payload).map_err(|e| AuthError::serialization(e.to_string()))?;
        if codec::serialized_len(raw_payload.len(), self.signer.tag_len()) > codec::MAX_TOKEN_LEN {
            return Err(AuthError::serialization("payload too large for a token"));
        }

        let message = codec::signing_input(key.id(), expiry, &raw_payload)?;
        let signature = self.signer.sign(key.secret(), &message)?;
        if signature.is_empty() || signature.len() > codec::MAX_TAG_LEN {
            return Err(AuthError::serialization(format!(
                "{} produced a {}-byte tag, tokens carry 1 to {} bytes",
                self.signer.name(),
                signature.len(),
                codec::MAX_TAG_LEN
            )));
        }

        self.raw_payload = raw_payload;
        self.key_id = Some(key.id());
        self.signature = Some(signature);
        self.state = TokenState::Encoded;
        Ok(())
    }

    /// Transport form of an encoded token.
    ///
    /// # Errors
    ///
    /// `NotEncoded` unless [`encode`](Self::encode) succeeded on this token.
    pub fn serialized(&self) -> AuthResult<String> {
        match (self.state, self.key_id, self.expiry, &self.signature) {
            (TokenState::Encoded, Some(key_id), Some(expiry), Some(signature)) => {
                codec::serialize(key_id, expiry, &self.raw_payload, signature)
            }
            _ => Err(AuthError::NotEncoded),
        }
    }

    /// Load an untrusted token string. The payload stays unreadable until
    /// [`decode`](Self::decode) succeeds.
    ///
    /// # Errors
    ///
    /// `MalformedToken` on any structural problem, `InvalidState` if the token is not empty.
    pub fn read_from(&mut self, token: &str) -> AuthResult<()> {
        if self.state != TokenState::Empty {
            return Err(AuthError::invalid_state("read into", self.state));
        }
        let parsed = codec::parse(token)?;

        self.key_id = Some(parsed.key_id);
        self.expiry = Some(parsed.expiry);
        self.raw_payload = parsed.payload;
        self.signature = Some(parsed.signature);
        self.state = TokenState::Parsed;
        Ok(())
    }

    /// Verify the signature of a parsed token with `key` and unlock its payload.
    ///
    /// # Errors
    ///
    /// `InvalidSignature` when `key` did not sign this token, `MalformedToken` when a
    /// correctly signed payload is not a string map, `InvalidState` unless the token is parsed.
    pub fn decode(&mut self, key: &KeychainKey) -> AuthResult<()> {
        if self.state != TokenState::Parsed {
            return Err(AuthError::invalid_state("decode", self.state));
        }
        let (Some(key_id), Some(expiry), Some(signature)) =
            (self.key_id, self.expiry, self.signature.as_deref())
        else {
            return Err(AuthError::invalid_state("decode", self.state));
        };
        if key.id() != key_id {
            return Err(AuthError::InvalidSignature);
        }

        let message = codec::signing_input(key_id, expiry, &self.raw_payload)?;
        if !self.signer.verify(key.secret(), &message, signature) {
            return Err(AuthError::InvalidSignature);
        }

        let payload: Payload = serde_json::from_slice(&self.raw_payload)
            .map_err(|_| AuthError::MalformedToken("payload is not a string map"))?;
        self.payload = Some(payload);
        self.state = TokenState::Trusted;
        Ok(())
    }

    /// Expiry, whenever it is known. Readable on untrusted tokens so failures can be logged;
    /// never act on it until the token is trusted.
    #[must_use]
    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.expiry
    }

    /// True when the token has no expiry or it is not after `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry.map_or(true, |expiry| expiry <= now)
    }

    /// Id of the signing key, once encoded or parsed
    #[must_use]
    pub fn key_id(&self) -> Option<KeyId> {
        self.key_id
    }

    /// Claims of a trusted token.
    ///
    /// # Errors
    ///
    /// `InvalidState` while the token is not trusted.
    pub fn payload(&self) -> AuthResult<&Payload> {
        match (self.is_trusted(), &self.payload) {
            (true, Some(payload)) => Ok(payload),
            _ => Err(AuthError::invalid_state("read the payload of", self.state)),
        }
    }

    /// Single claim of a trusted token
    pub fn claim(&self, key: &str) -> AuthResult<Option<&str>> {
        Ok(self.payload()?.get(key).map(String::as_str))
    }

    /// Take the claims out of a trusted token.
    pub fn into_payload(self) -> AuthResult<Payload> {
        if !self.is_trusted() {
            return Err(AuthError::invalid_state("read the payload of", self.state));
        }
        self.payload
            .ok_or(AuthError::invalid_state("read the payload of", self.state))
    }

    fn ensure_building(&self, operation: &'static str) -> AuthResult<()> {
        match self.state {
            TokenState::Empty | TokenState::Building => Ok(()),
            state => Err(AuthError::invalid_state(operation, state)),
        }
    }
}

impl<S: Signer> fmt::Debug for AuthorizationToken<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationToken")
            .field("signer", &self.signer.name())
            .field("state", &self.state)
            .field("key_id", &self.key_id)
            .field("expiry", &self.expiry)
            .finish_non_exhaustive()
    }
}
