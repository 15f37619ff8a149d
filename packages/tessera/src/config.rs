//! Token lifetime and key rotation policy

use crate::error::{AuthError, AuthResult};
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Shortest secret the rotation schedule will generate
pub const MIN_SECRET_LENGTH: usize = 16;

/// Token lifetime and key rotation policy.
///
/// Every field has a serde default, so a partial document deserializes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationConfig {
    /// How long an issued token stays valid, in seconds
    #[serde(default = "default_token_lifetime")]
    pub token_lifetime_seconds: u64,
    /// How often the signing key is replaced, in seconds
    #[serde(default = "default_rotation_interval")]
    pub rotation_interval_seconds: u64,
    /// How long a key is kept after creation before it may be purged, in seconds
    #[serde(default = "default_key_retention")]
    pub key_retention_seconds: u64,
    /// Length in bytes of generated secrets
    #[serde(default = "default_secret_length")]
    pub secret_length: usize,
}

fn default_token_lifetime() -> u64 {
    3600 // 1 hour
}

fn default_rotation_interval() -> u64 {
    86_400 // 1 day
}

fn default_key_retention() -> u64 {
    172_800 // 2 days
}

fn default_secret_length() -> usize {
    32
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            token_lifetime_seconds: default_token_lifetime(),
            rotation_interval_seconds: default_rotation_interval(),
            key_retention_seconds: default_key_retention(),
            secret_length: default_secret_length(),
        }
    }
}

impl AuthorizationConfig {
    /// Check the policy.
    ///
    /// A key signs for one rotation interval and its last token lives one token lifetime
    /// after that, so retention must cover both.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` naming the violated rule.
    pub fn validate(&self) -> AuthResult<()> {
        if self.token_lifetime_seconds == 0 {
            return Err(AuthError::invalid_config("token lifetime must be non-zero"));
        }
        if self.rotation_interval_seconds == 0 {
            return Err(AuthError::invalid_config("rotation interval must be non-zero"));
        }
        if self.secret_length < MIN_SECRET_LENGTH {
            return Err(AuthError::invalid_config(format!(
                "secret length must be at least {MIN_SECRET_LENGTH} bytes"
            )));
        }
        let required = self
            .rotation_interval_seconds
            .checked_add(self.token_lifetime_seconds)
            .ok_or_else(|| {
                AuthError::invalid_config("rotation interval plus token lifetime overflows")
            })?;
        if self.key_retention_seconds < required {
            return Err(AuthError::invalid_config(format!(
                "key retention ({}s) must cover interval plus token lifetime ({required}s)",
                self.key_retention_seconds
            )));
        }
        for (name, secs) in [
            ("token lifetime", self.token_lifetime_seconds),
            ("key retention", self.key_retention_seconds),
        ] {
            if seconds(secs).is_none() {
                return Err(AuthError::invalid_config(format!("{name} is out of range")));
            }
        }
        Ok(())
    }

    /// Token lifetime
    #[must_use]
    pub fn token_lifetime(&self) -> Duration {
        seconds(self.token_lifetime_seconds).unwrap_or(Duration::MAX)
    }

    /// Key retention window
    #[must_use]
    pub fn key_retention(&self) -> Duration {
        seconds(self.key_retention_seconds).unwrap_or(Duration::MAX)
    }

    /// Rotation interval for timers
    #[must_use]
    pub fn rotation_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.rotation_interval_seconds)
    }
}

fn seconds(secs: u64) -> Option<Duration> {
    i64::try_from(secs).ok().and_then(Duration::try_seconds)
}
