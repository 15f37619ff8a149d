//! Scheduled key rotation.
//!
//! A background task replaces the signing key every rotation interval and purges keys
//! older than the retention window. A retired key is kept for at least one token lifetime
//! after its retirement, so a late or failed tick never strands tokens it signed.
//! Verification never waits on the task: rotation swaps a keychain snapshot and readers keep
//! using whichever snapshot they loaded.

use crate::config::AuthorizationConfig;
use crate::error::AuthResult;
use crate::keychain::{Keychain, SecretSource};
use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Handle to a running rotation task. Dropping it stops the task.
#[derive(Debug)]
pub struct RotationSchedule {
    handle: Option<JoinHandle<()>>,
}

impl RotationSchedule {
    /// Start rotating `keychain` on the interval from `config`.
    ///
    /// An empty keychain gets its first key before this returns, so issuance works
    /// immediately. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for an invalid policy; secret errors from the initial rotation.
    pub fn spawn(
        keychain: Arc<Keychain>,
        config: &AuthorizationConfig,
        source: Arc<dyn SecretSource>,
    ) -> AuthResult<Self> {
        config.validate()?;
        if keychain.key_count() == 0 {
            keychain.rotate_generated(source.as_ref(), config.secret_length)?;
        }

        let period = config.rotation_interval();
        let policy = PurgePolicy {
            retention: config.key_retention(),
            token_lifetime: config.token_lifetime(),
        };
        let secret_length = config.secret_length;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                rotate_once(&keychain, source.as_ref(), secret_length, policy);
            }
        });

        info!(period_secs = period.as_secs(), "started key rotation schedule");
        Ok(Self {
            handle: Some(handle),
        })
    }

    /// Stop the rotation task.
    pub fn stop(mut self) {
        self.abort();
    }

    /// True while the task is running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            info!("stopped key rotation schedule");
        }
    }
}

impl Drop for RotationSchedule {
    fn drop(&mut self) {
        self.abort();
    }
}

#[derive(Debug, Clone, Copy)]
struct PurgePolicy {
    retention: Duration,
    token_lifetime: Duration,
}

fn rotate_once(
    keychain: &Keychain,
    source: &dyn SecretSource,
    secret_length: usize,
    policy: PurgePolicy,
) {
    if let Err(err) = keychain.rotate_generated(source, secret_length) {
        error!(error = %err, "scheduled key rotation failed");
        return;
    }
    let now = Utc::now();
    match (
        now.checked_sub_signed(policy.retention),
        now.checked_sub_signed(policy.token_lifetime),
    ) {
        (Some(older_than), Some(retired_before)) => {
            keychain.purge_settled(older_than, retired_before);
        }
        _ => warn!("key retention reaches before the epoch range, skipping purge"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::Authority;
    use crate::error::AuthError;
    use crate::keychain::{KeyId, ThreadRngSecretSource};
    use crate::token::Payload;
    use std::time::Duration as StdDuration;
    use zeroize::Zeroizing;

    struct FailingSource;

    impl SecretSource for FailingSource {
        fn generate(&self, _len: usize) -> AuthResult<Zeroizing<Vec<u8>>> {
            Err(AuthError::SecretGeneration("entropy unavailable".to_string()))
        }
    }

    fn config() -> AuthorizationConfig {
        AuthorizationConfig {
            token_lifetime_seconds: 60,
            rotation_interval_seconds: 60,
            key_retention_seconds: 120,
            secret_length: 32,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn seeds_empty_keychain_and_rotates_on_interval() {
        let keychain = Arc::new(Keychain::new());
        let schedule = RotationSchedule::spawn(
            Arc::clone(&keychain),
            &config(),
            Arc::new(ThreadRngSecretSource),
        )
        .unwrap();
        assert_eq!(keychain.current_key().unwrap().id(), KeyId::new(1));

        tokio::time::sleep(StdDuration::from_secs(61)).await;
        assert_eq!(keychain.current_key().unwrap().id(), KeyId::new(2));

        tokio::time::sleep(StdDuration::from_secs(60)).await;
        assert_eq!(keychain.current_key().unwrap().id(), KeyId::new(3));
        assert!(schedule.is_running());
        schedule.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_rotation() {
        let keychain = Arc::new(Keychain::with_secret(b"seed".to_vec()).unwrap());
        let schedule = RotationSchedule::spawn(
            Arc::clone(&keychain),
            &config(),
            Arc::new(ThreadRngSecretSource),
        )
        .unwrap();
        schedule.stop();

        tokio::time::sleep(StdDuration::from_secs(600)).await;
        assert_eq!(keychain.current_key().unwrap().id(), KeyId::new(1));
    }

    #[tokio::test]
    async fn rejects_invalid_config() {
        let config = AuthorizationConfig {
            key_retention_seconds: 1,
            ..config()
        };
        let result = RotationSchedule::spawn(
            Arc::new(Keychain::new()),
            &config,
            Arc::new(ThreadRngSecretSource),
        );
        assert!(matches!(result, Err(AuthError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn seeding_failure_is_reported() {
        let result = RotationSchedule::spawn(
            Arc::new(Keychain::new()),
            &config(),
            Arc::new(FailingSource),
        );
        assert!(matches!(result, Err(AuthError::SecretGeneration(_))));
    }

    fn policy() -> PurgePolicy {
        PurgePolicy {
            retention: config().key_retention(),
            token_lifetime: config().token_lifetime(),
        }
    }

    #[test]
    fn failed_rotation_keeps_current_key() {
        let keychain = Keychain::with_secret(b"seed".to_vec()).unwrap();
        rotate_once(&keychain, &FailingSource, 32, policy());
        assert_eq!(keychain.current_key().unwrap().id(), KeyId::new(1));
    }

    #[test]
    fn rotation_purges_keys_past_retention() {
        let now = Utc::now();
        let keychain = Keychain::new();
        keychain
            .rotate_at(b"old".to_vec(), now - Duration::seconds(600))
            .unwrap();
        keychain
            .rotate_at(b"recent".to_vec(), now - Duration::seconds(300))
            .unwrap();

        rotate_once(&keychain, &ThreadRngSecretSource, 32, policy());
        assert_eq!(keychain.key_ids(), vec![KeyId::new(2), KeyId::new(3)]);
    }

    #[test]
    fn overdue_key_outlives_its_tokens_after_a_failed_tick() {
        let keychain = Arc::new(Keychain::new());
        // signing past its interval because the previous tick failed
        keychain
            .rotate_at(b"overdue".to_vec(), Utc::now() - Duration::seconds(121))
            .unwrap();
        rotate_once(&keychain, &FailingSource, 32, policy());

        let authority = Authority::new(Arc::clone(&keychain), config()).unwrap();
        let issued = authority.issue(Payload::new()).unwrap();
        assert_eq!(issued.key_id, KeyId::new(1));

        rotate_once(&keychain, &ThreadRngSecretSource, 32, policy());
        assert_eq!(keychain.key_ids(), vec![KeyId::new(1), KeyId::new(2)]);
        assert_eq!(keychain.current_key().unwrap().id(), KeyId::new(2));

        let authorization = authority.authorize(&issued.token).unwrap();
        assert_eq!(authorization.key_id, KeyId::new(1));
    }
}
