//! Rotating keychain
//!
//! The visible key set is an immutable snapshot behind an [`ArcSwap`]. Readers load the
//! snapshot without locking; `rotate` and `purge` build a new snapshot and swap it in with
//! a compare-and-swap loop, so readers never see a half-updated set and concurrent
//! rotations are never lost.

mod key;
mod secret;

pub use key::{KeyId, KeychainKey};
pub use secret::{SecretSource, ThreadRngSecretSource};

use crate::error::{AuthError, AuthResult};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use key::Secret;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;
use zeroize::Zeroizing;

#[derive(Clone)]
struct KeySet {
    keys: BTreeMap<KeyId, Arc<KeychainKey>>,
    current: Option<KeyId>,
    next_id: u64,
}

/// Which retired keys a purge may drop
#[derive(Debug, Clone, Copy)]
struct PurgeCutoff {
    created_before: DateTime<Utc>,
    retired_before: Option<DateTime<Utc>>,
}

impl PurgeCutoff {
    fn admits(&self, key: &KeychainKey) -> bool {
        let Some(retired_at) = key.retired_at() else {
            return false;
        };
        key.created_at() < self.created_before
            && self.retired_before.map_or(true, |cutoff| retired_at < cutoff)
    }
}

impl KeySet {
    fn empty() -> Self {
        Self {
            keys: BTreeMap::new(),
            current: None,
            next_id: 1,
        }
    }

    /// The previous key counts as retired from `created_at` of its successor.
    fn rotated(&self, secret: &Secret, created_at: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        if let Some(previous) = self.current.and_then(|id| self.keys.get(&id)) {
            next.keys.insert(previous.id(), Arc::new(previous.retired(created_at)));
        }
        let id = KeyId::new(self.next_id);
        next.keys.insert(
            id,
            Arc::new(KeychainKey::new(id, Arc::clone(secret), created_at)),
        );
        next.current = Some(id);
        next.next_id = self.next_id.saturating_add(1);
        next
    }

    fn purged(&self, cutoff: PurgeCutoff) -> Self {
        let mut next = self.clone();
        next.keys.retain(|_, key| !cutoff.admits(key));
        next
    }
}

/// Ordered, thread-safe set of signing and verification keys.
pub struct Keychain {
    snapshot: ArcSwap<KeySet>,
}

impl Default for Keychain {
    fn default() -> Self {
        Self::new()
    }
}

impl Keychain {
    /// Empty keychain. Issuance fails with `EmptyKeychain` until the first rotation.
    #[must_use]
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(KeySet::empty()),
        }
    }

    /// Keychain whose first signing key uses `secret`.
    pub fn with_secret(secret: impl Into<Zeroizing<Vec<u8>>>) -> AuthResult<Self> {
        let keychain = Self::new();
        keychain.rotate(secret)?;
        Ok(keychain)
    }

    /// Active signing key.
    ///
    /// # Errors
    ///
    /// `EmptyKeychain` when no key was ever rotated in.
    pub fn current_key(&self) -> AuthResult<Arc<KeychainKey>> {
        let snapshot = self.snapshot.load();
        match snapshot.current.and_then(|id| snapshot.keys.get(&id)) {
            Some(key) => Ok(Arc::clone(key)),
            None => Err(AuthError::EmptyKeychain),
        }
    }

    /// Current or retired key with the given id.
    ///
    /// # Errors
    ///
    /// `KeyNotFound` for ids that were never issued and for purged keys alike.
    pub fn match_key(&self, id: KeyId) -> AuthResult<Arc<KeychainKey>> {
        self.snapshot
            .load()
            .keys
            .get(&id)
            .cloned()
            .ok_or(AuthError::KeyNotFound(id))
    }

    /// Number of retained keys, current and retired
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.snapshot.load().keys.len()
    }

    /// Retained key ids in ascending order
    #[must_use]
    pub fn key_ids(&self) -> Vec<KeyId> {
        self.snapshot.load().keys.keys().copied().collect()
    }

    /// Make a new key from `secret` the signing key and retire the previous one.
    ///
    /// # Errors
    ///
    /// `InvalidSecret` for an empty secret.
    pub fn rotate(&self, secret: impl Into<Zeroizing<Vec<u8>>>) -> AuthResult<Arc<KeychainKey>> {
        self.rotate_at(secret, Utc::now())
    }

    /// Like [`rotate`](Self::rotate), stamping the key with `created_at`.
    pub fn rotate_at(
        &self,
        secret: impl Into<Zeroizing<Vec<u8>>>,
        created_at: DateTime<Utc>,
    ) -> AuthResult<Arc<KeychainKey>> {
        let secret: Zeroizing<Vec<u8>> = secret.into();
        if secret.is_empty() {
            return Err(AuthError::InvalidSecret("secret must not be empty".to_string()));
        }
        let secret: Secret = Arc::new(secret);

        let previous = self
            .snapshot
            .rcu(|snapshot| snapshot.rotated(&secret, created_at));

        let id = KeyId::new(previous.next_id);
        info!(
            key_id = %id,
            retired_key_id = ?previous.current,
            "rotated keychain signing key"
        );
        Ok(Arc::new(KeychainKey::new(id, secret, created_at)))
    }

    /// Rotate to a fresh secret of `len` bytes drawn from `source`.
    pub fn rotate_generated(
        &self,
        source: &dyn SecretSource,
        len: usize,
    ) -> AuthResult<Arc<KeychainKey>> {
        let secret = source.generate(len)?;
        self.rotate(secret)
    }

    /// Drop retired keys created before `older_than` and return how many were removed.
    ///
    /// Tokens signed by a purged key can never be verified again.
    pub fn purge(&self, older_than: DateTime<Utc>) -> usize {
        self.purge_matching(PurgeCutoff {
            created_before: older_than,
            retired_before: None,
        })
    }

    /// Like [`purge`](Self::purge), but keeps keys retired at or after `retired_before`.
    ///
    /// A key retired at `t` may have signed tokens up to `t`, so passing
    /// `now - token lifetime` keeps every key whose tokens can still be valid, however late
    /// the rotation that retired it ran.
    pub fn purge_settled(&self, older_than: DateTime<Utc>, retired_before: DateTime<Utc>) -> usize {
        self.purge_matching(PurgeCutoff {
            created_before: older_than,
            retired_before: Some(retired_before),
        })
    }

    fn purge_matching(&self, cutoff: PurgeCutoff) -> usize {
        let previous = self.snapshot.rcu(|snapshot| snapshot.purged(cutoff));

        let purged: Vec<KeyId> = previous
            .keys
            .values()
            .filter(|key| cutoff.admits(key))
            .map(|key| key.id())
            .collect();
        if !purged.is_empty() {
            info!(
                purged = purged.len(),
                key_ids = ?purged,
                created_before = %cutoff.created_before,
                retired_before = ?cutoff.retired_before,
                "purged retired keychain keys"
            );
        }
        purged.len()
    }
}

impl std::fmt::Debug for Keychain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot.load();
        f.debug_struct("Keychain")
            .field("current", &snapshot.current)
            .field("key_ids", &snapshot.keys.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn empty_keychain_has_no_current_key() {
        let keychain = Keychain::new();
        assert_eq!(keychain.current_key().unwrap_err(), AuthError::EmptyKeychain);
        assert_eq!(keychain.key_count(), 0);
    }

    #[test]
    fn ids_start_at_one_and_increase() {
        let keychain = Keychain::new();
        let first = keychain.rotate(b"s1".to_vec()).unwrap();
        let second = keychain.rotate(b"s2".to_vec()).unwrap();
        assert_eq!(first.id(), KeyId::new(1));
        assert_eq!(second.id(), KeyId::new(2));
        assert_eq!(keychain.key_ids(), vec![KeyId::new(1), KeyId::new(2)]);
    }

    #[test]
    fn rotation_retires_previous_key() {
        let keychain = Keychain::with_secret(b"s1".to_vec()).unwrap();
        keychain.rotate(b"s2".to_vec()).unwrap();

        let current = keychain.current_key().unwrap();
        assert_eq!(current.id(), KeyId::new(2));
        assert!(!current.is_retired());

        let retired = keychain.match_key(KeyId::new(1)).unwrap();
        assert!(retired.is_retired());
        assert_eq!(retired.secret(), b"s1");
        assert_eq!(keychain.key_count(), 2);
    }

    #[test]
    fn empty_secret_is_rejected() {
        let keychain = Keychain::new();
        assert!(matches!(
            keychain.rotate(Vec::<u8>::new()),
            Err(AuthError::InvalidSecret(_))
        ));
        assert_eq!(keychain.key_count(), 0);
    }

    #[test]
    fn unknown_id_is_not_found() {
        let keychain = Keychain::with_secret(b"s1".to_vec()).unwrap();
        assert_eq!(
            keychain.match_key(KeyId::new(99)).unwrap_err(),
            AuthError::KeyNotFound(KeyId::new(99))
        );
    }

    #[test]
    fn purge_removes_only_old_retired_keys() {
        let now = Utc::now();
        let keychain = Keychain::new();
        keychain.rotate_at(b"s1".to_vec(), now - Duration::days(3)).unwrap();
        keychain.rotate_at(b"s2".to_vec(), now - Duration::days(1)).unwrap();
        keychain.rotate_at(b"s3".to_vec(), now).unwrap();

        assert_eq!(keychain.purge(now - Duration::days(2)), 1);
        assert_eq!(keychain.key_ids(), vec![KeyId::new(2), KeyId::new(3)]);
        assert_eq!(
            keychain.match_key(KeyId::new(1)).unwrap_err(),
            AuthError::KeyNotFound(KeyId::new(1))
        );
    }

    #[test]
    fn purge_never_removes_current_key() {
        let keychain = Keychain::with_secret(b"s1".to_vec()).unwrap();
        assert_eq!(keychain.purge(Utc::now() + Duration::days(365)), 0);
        assert_eq!(keychain.current_key().unwrap().id(), KeyId::new(1));
    }

    #[test]
    fn rotation_stamps_retirement_time() {
        let now = Utc::now();
        let keychain = Keychain::new();
        keychain.rotate_at(b"s1".to_vec(), now - Duration::days(3)).unwrap();
        keychain.rotate_at(b"s2".to_vec(), now).unwrap();

        let retired = keychain.match_key(KeyId::new(1)).unwrap();
        assert_eq!(retired.retired_at(), Some(now));
        assert_eq!(keychain.current_key().unwrap().retired_at(), None);
    }

    #[test]
    fn purge_settled_keeps_recently_retired_keys() {
        let now = Utc::now();
        let keychain = Keychain::new();
        keychain.rotate_at(b"s1".to_vec(), now - Duration::days(3)).unwrap();
        keychain.rotate_at(b"s2".to_vec(), now - Duration::days(2)).unwrap();
        keychain.rotate_at(b"s3".to_vec(), now - Duration::minutes(1)).unwrap();
        keychain.rotate_at(b"s4".to_vec(), now).unwrap();

        // key 1 retired two days ago, key 2 a minute ago, key 3 just now
        let removed = keychain.purge_settled(now - Duration::hours(1), now - Duration::hours(1));
        assert_eq!(removed, 1);
        assert_eq!(
            keychain.key_ids(),
            vec![KeyId::new(2), KeyId::new(3), KeyId::new(4)]
        );
    }

    #[test]
    fn ids_are_not_reused_after_purge() {
        let keychain = Keychain::with_secret(b"s1".to_vec()).unwrap();
        keychain.rotate(b"s2".to_vec()).unwrap();
        keychain.purge(Utc::now() + Duration::seconds(1));
        let next = keychain.rotate(b"s3".to_vec()).unwrap();
        assert_eq!(next.id(), KeyId::new(3));
    }

    #[test]
    fn rotate_generated_uses_source_length() {
        let keychain = Keychain::new();
        let key = keychain
            .rotate_generated(&ThreadRngSecretSource, 48)
            .unwrap();
        assert_eq!(key.secret().len(), 48);
    }

    #[test]
    fn returned_key_matches_stored_key() {
        let keychain = Keychain::new();
        let key = keychain.rotate(b"s1".to_vec()).unwrap();
        let stored = keychain.match_key(key.id()).unwrap();
        assert_eq!(stored.secret(), key.secret());
        assert_eq!(stored.created_at(), key.created_at());
    }
}
