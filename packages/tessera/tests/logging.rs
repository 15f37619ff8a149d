//! Log levels emitted on failure paths

use std::sync::{Arc, Mutex};
use tessera::{AuthError, Authority, AuthorizationConfig, Keychain, Payload};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};

#[derive(Clone, Default)]
struct LevelCollector {
    levels: Arc<Mutex<Vec<Level>>>,
}

impl<S: Subscriber> tracing_subscriber::Layer<S> for LevelCollector {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        self.levels.lock().unwrap().push(*event.metadata().level());
    }
}

impl LevelCollector {
    fn count(&self, level: Level) -> usize {
        self.levels
            .lock()
            .unwrap()
            .iter()
            .filter(|l| **l == level)
            .count()
    }
}

#[test]
fn test_issuing_from_empty_keychain_logs_one_error() {
    let collector = LevelCollector::default();
    let subscriber = tracing_subscriber::registry().with(collector.clone());
    let _guard = tracing::subscriber::set_default(subscriber);

    let authority =
        Authority::new(Arc::new(Keychain::new()), AuthorizationConfig::default()).unwrap();
    assert_eq!(authority.issue(Payload::new()).unwrap_err(), AuthError::EmptyKeychain);
    assert_eq!(collector.count(Level::ERROR), 1);
}

#[test]
fn test_current_key_lookup_does_not_log_errors() {
    let collector = LevelCollector::default();
    let subscriber = tracing_subscriber::registry().with(collector.clone());
    let _guard = tracing::subscriber::set_default(subscriber);

    let keychain = Keychain::new();
    assert_eq!(keychain.current_key().unwrap_err(), AuthError::EmptyKeychain);
    assert_eq!(collector.count(Level::ERROR), 0);
}

#[test]
fn test_rejected_tokens_log_at_debug() {
    let collector = LevelCollector::default();
    let subscriber = tracing_subscriber::registry().with(collector.clone());
    let _guard = tracing::subscriber::set_default(subscriber);

    let authority = Authority::new(
        Arc::new(Keychain::with_secret(b"s1".to_vec()).unwrap()),
        AuthorizationConfig::default(),
    )
    .unwrap();
    assert!(authority.authorize("not-a-token").is_err());
    assert_eq!(collector.count(Level::DEBUG), 1);
    assert_eq!(collector.count(Level::ERROR), 0);
}
