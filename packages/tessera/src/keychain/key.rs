//! Keychain key identifiers and key entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use zeroize::Zeroizing;

/// Sequential key identifier, unique for the lifetime of a keychain
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyId(u64);

impl KeyId {
    /// Wrap a raw id
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw id
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for KeyId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Secret material shared between snapshots; wiped when the last holder drops it
pub(crate) type Secret = Arc<Zeroizing<Vec<u8>>>;

/// Signing and verification key held by a [`Keychain`](super::Keychain).
///
/// The secret never leaves the crate. Retired keys still verify until purged.
#[derive(Clone)]
pub struct KeychainKey {
    id: KeyId,
    secret: Secret,
    created_at: DateTime<Utc>,
    retired_at: Option<DateTime<Utc>>,
}

impl KeychainKey {
    pub(crate) fn new(id: KeyId, secret: Secret, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            secret,
            created_at,
            retired_at: None,
        }
    }

    /// Copy of this key superseded at `at`. Shares the secret buffer.
    pub(crate) fn retired(&self, at: DateTime<Utc>) -> Self {
        Self {
            retired_at: Some(self.retired_at.unwrap_or(at)),
            ..self.clone()
        }
    }

    /// Key identifier
    #[must_use]
    pub fn id(&self) -> KeyId {
        self.id
    }

    /// When the key was created
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// True once a newer key took over signing
    #[must_use]
    pub fn is_retired(&self) -> bool {
        self.retired_at.is_some()
    }

    /// When a newer key took over signing, if one has
    #[must_use]
    pub fn retired_at(&self) -> Option<DateTime<Utc>> {
        self.retired_at
    }

    pub(crate) fn secret(&self) -> &[u8] {
        self.secret.as_slice()
    }
}

impl fmt::Debug for KeychainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeychainKey")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("retired_at", &self.retired_at)
            .field("secret", &"<redacted>")
            .finish()
    }
}
