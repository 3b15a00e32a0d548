//! Credential Rotator (C6): on a daily schedule, drives a fresh broker login
//! through the [`LoginCollaborator`], persists the new access token, and
//! restarts the feed/publisher pipeline against it. Also listens on the feed
//! session's escalation bell for an out-of-schedule rotation when reconnects
//! are exhausted.

use crate::core::config::RotatorConfig;
use crate::core::AppError;
use crate::credentials::CredentialStore;
use crate::feed::FeedHandle;
use crate::kite::client::KiteClient;
use crate::login::LoginCollaborator;
use crate::publisher::ViewPublisher;
use crate::sinks::MessageSink;
use crate::snapshot::SnapshotStore;
use chrono::{Duration as ChronoDuration, TimeZone};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Rebuilds the feed session after a rotation completes. The rotator itself
/// never constructs a `FeedHandle` — only whoever owns the pipeline knows how
/// to reconnect with a new access token, so that's injected as a callback.
#[async_trait::async_trait]
pub trait PipelineRestarter: Send + Sync {
    async fn restart(&self, new_access_token: &str) -> Result<FeedHandle, AppError>;
}

/// Confirms a freshly rotated access token actually authenticates against the
/// broker before the pipeline commits to it.
#[async_trait::async_trait]
pub trait CredentialValidator: Send + Sync {
    async fn validate(&self, access_token: &str) -> Result<(), AppError>;
}

/// Calls the broker's profile endpoint — the same validator the `profile`
/// CLI command uses — to confirm the new token before the feed session is
/// stopped and rebuilt around it.
pub struct KiteCredentialValidator {
    api_key: String,
}

impl KiteCredentialValidator {
    pub fn new(api_key: String) -> Self {
        Self { api_key }
    }
}

#[async_trait::async_trait]
impl CredentialValidator for KiteCredentialValidator {
    async fn validate(&self, access_token: &str) -> Result<(), AppError> {
        let kite = KiteClient::new(&self.api_key, access_token)?;
        kite.profile().await?;
        Ok(())
    }
}

pub struct CredentialRotator<L, C, S, R, V> {
    login: Arc<L>,
    credentials: Arc<C>,
    sink: Arc<S>,
    restarter: Arc<R>,
    validator: Arc<V>,
    store: Arc<SnapshotStore>,
    publisher: Arc<ViewPublisher<S>>,
    feed: tokio::sync::Mutex<FeedHandle>,
    audit_channel_id: String,
    config: RotatorConfig,
}

impl<L, C, S, R, V> CredentialRotator<L, C, S, R, V>
where
    L: LoginCollaborator + 'static,
    C: CredentialStore + 'static,
    S: MessageSink + 'static,
    R: PipelineRestarter + 'static,
    V: CredentialValidator + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        login: Arc<L>,
        credentials: Arc<C>,
        sink: Arc<S>,
        restarter: Arc<R>,
        validator: Arc<V>,
        store: Arc<SnapshotStore>,
        publisher: Arc<ViewPublisher<S>>,
        initial_feed: FeedHandle,
        audit_channel_id: String,
        config: RotatorConfig,
    ) -> Self {
        Self {
            login,
            credentials,
            sink,
            restarter,
            validator,
            store,
            publisher,
            feed: tokio::sync::Mutex::new(initial_feed),
            audit_channel_id,
            config,
        }
    }

    /// Spawns the scheduled-trigger task and the escalation listener as a
    /// single task; both paths fall into the same `rotate_once`.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let escalate = self.feed.lock().await.escalate.clone();
                tokio::select! {
                    _ = tokio::time::sleep(self.duration_until_next_fire()) => {
                        info!("credential rotator: scheduled trigger fired");
                    }
                    _ = escalate.notified() => {
                        warn!("credential rotator: triggered by feed session escalation");
                    }
                }
                self.rotate_once().await;
            }
        })
    }

    fn duration_until_next_fire(&self) -> std::time::Duration {
        let now = chrono::Utc::now().with_timezone(&self.config.time_zone);
        let mut next = now
            .date_naive()
            .and_hms_opt(self.config.hour, self.config.minute, 0)
            .and_then(|naive| self.config.time_zone.from_local_datetime(&naive).single())
            .unwrap_or(now);
        if next <= now {
            next += ChronoDuration::days(1);
        }
        (next - now).to_std().unwrap_or(std::time::Duration::from_secs(60))
    }

    async fn rotate_once(&self) {
        self.audit("RotationStarted").await;

        let outcome = self.login.login().await;
        if !outcome.success {
            let reason = outcome.error.unwrap_or_else(|| "unknown login failure".to_string());
            error!(reason = %reason, "credential rotation: login failed");
            self.audit(&format!("RotationFailed: {reason}")).await;
            return;
        }
        let Some(new_token) = outcome.credential else {
            self.audit("RotationFailed: login reported success with no credential").await;
            return;
        };

        if let Err(e) = self.credentials.save_access_token(&new_token).await {
            error!(error = %e, "credential rotation: failed to persist new access token");
            self.audit(&format!("RotationFailed: could not persist token: {e}")).await;
            return;
        }

        if let Err(e) = self.validator.validate(&new_token).await {
            error!(error = %e, "credential rotation: new token failed profile validation");
            self.audit(&format!("RotationFailed: token validation failed: {e}")).await;
            return;
        }

        {
            let feed = self.feed.lock().await;
            if let Err(e) = feed.stop().await {
                warn!(error = %e, "credential rotation: feed session stop failed, proceeding anyway");
            }
        }
        tokio::time::sleep(self.config.post_stop_delay).await;

        self.store.clear();
        self.publisher.clear_handles().await;

        match self.restarter.restart(&new_token).await {
            Ok(new_feed) => {
                *self.feed.lock().await = new_feed;
                info!("credential rotation completed");
                self.audit("RotationCompleted").await;
            }
            Err(e) => {
                error!(error = %e, "credential rotation: pipeline restart failed");
                self.audit(&format!("RotationFailed: restart error: {e}")).await;
            }
        }
    }

    async fn audit(&self, text: &str) {
        if let Err(e) = self.sink.send(&self.audit_channel_id, text).await {
            warn!(error = %e, event = %text, "failed to post rotation audit event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::PublisherConfig;
    use crate::credentials::InMemoryCredentialStore;
    use crate::login::FakeLoginCollaborator;
    use crate::registry::SubscriptionRegistry;
    use crate::sinks::InMemorySink;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SAMPLE_CSV: &str = "instrument_token,tradingsymbol,name,exchange\n738561,RELIANCE,Reliance Industries,NSE\n";

    struct CountingRestarter {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl PipelineRestarter for CountingRestarter {
        async fn restart(&self, _new_access_token: &str) -> Result<FeedHandle, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let store = Arc::new(SnapshotStore::new());
            let catalog = Arc::new(crate::catalog::InstrumentCatalog::from_csv_str(SAMPLE_CSV).unwrap());
            let sink = Arc::new(InMemorySink::new());
            let (handle, _join) = crate::feed::spawn(
                "key".to_string(),
                "token".to_string(),
                crate::core::config::FeedConfig::default(),
                store,
                vec![],
                crate::core::config::AlertConfig::default(),
                catalog,
                sink,
                "audit".to_string(),
            );
            handle.stop().await.ok();
            Ok(handle)
        }
    }

    /// Always reports a successful validation unless constructed with
    /// `failing`, in which case every call reports the canned error.
    struct FakeCredentialValidator {
        error: Option<String>,
    }

    impl FakeCredentialValidator {
        fn succeeding() -> Self {
            Self { error: None }
        }

        fn failing(error: impl Into<String>) -> Self {
            Self { error: Some(error.into()) }
        }
    }

    #[async_trait::async_trait]
    impl CredentialValidator for FakeCredentialValidator {
        async fn validate(&self, _access_token: &str) -> Result<(), AppError> {
            match &self.error {
                Some(e) => Err(AppError::KiteApi(e.clone())),
                None => Ok(()),
            }
        }
    }

    async fn build_harness(
        login: FakeLoginCollaborator,
        validator: FakeCredentialValidator,
    ) -> (
        Arc<CredentialRotator<FakeLoginCollaborator, InMemoryCredentialStore, InMemorySink, CountingRestarter, FakeCredentialValidator>>,
        Arc<InMemorySink>,
        Arc<InMemoryCredentialStore>,
    ) {
        let store = Arc::new(SnapshotStore::new());
        let path = std::env::temp_dir().join(format!("rotator-test-{}", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let registry = Arc::new(SubscriptionRegistry::load(&path).await.unwrap());
        let catalog = Arc::new(crate::catalog::InstrumentCatalog::from_csv_str(SAMPLE_CSV).unwrap());
        let sink = Arc::new(InMemorySink::new());
        let publisher = Arc::new(ViewPublisher::new(
            store.clone(),
            registry,
            catalog,
            sink.clone(),
            "ticker".to_string(),
            PublisherConfig::default(),
            chrono_tz::Asia::Kolkata,
        ));
        let credentials = Arc::new(InMemoryCredentialStore::new());
        let restarter = Arc::new(CountingRestarter { calls: AtomicUsize::new(0) });

        let feed_catalog = Arc::new(crate::catalog::InstrumentCatalog::from_csv_str(SAMPLE_CSV).unwrap());
        let feed_sink = Arc::new(InMemorySink::new());
        let (initial_feed, _join) = crate::feed::spawn(
            "key".to_string(),
            "token".to_string(),
            crate::core::config::FeedConfig::default(),
            store.clone(),
            vec![],
            crate::core::config::AlertConfig::default(),
            feed_catalog,
            feed_sink,
            "audit".to_string(),
        );
        initial_feed.stop().await.ok();

        let rotator = Arc::new(CredentialRotator::new(
            Arc::new(login),
            credentials.clone(),
            sink.clone(),
            restarter,
            Arc::new(validator),
            store,
            publisher,
            initial_feed,
            "audit".to_string(),
            RotatorConfig::default(),
        ));
        (rotator, sink, credentials)
    }

    #[tokio::test]
    async fn successful_rotation_persists_token_and_audits_start_and_completion() {
        let (rotator, sink, credentials) = build_harness(
            FakeLoginCollaborator::succeeding("new-token"),
            FakeCredentialValidator::succeeding(),
        )
        .await;
        rotator.rotate_once().await;

        assert_eq!(*credentials.saved.lock().await, vec!["new-token".to_string()]);
        let events = sink.fetch_recent("audit", 10).await.unwrap();
        let texts: Vec<String> = events.iter().map(|e| e.text.clone()).collect();
        assert!(texts.iter().any(|t| t == "RotationCompleted"));
        assert!(texts.iter().any(|t| t == "RotationStarted"));
    }

    #[tokio::test]
    async fn failed_login_audits_failure_and_never_persists_a_token() {
        let (rotator, sink, credentials) = build_harness(
            FakeLoginCollaborator::failing("bad password"),
            FakeCredentialValidator::succeeding(),
        )
        .await;
        rotator.rotate_once().await;

        assert!(credentials.saved.lock().await.is_empty());
        let events = sink.fetch_recent("audit", 10).await.unwrap();
        assert!(events.iter().any(|e| e.text.starts_with("RotationFailed")));
    }

    #[tokio::test]
    async fn failed_validation_audits_failure_and_keeps_old_feed_handle() {
        let (rotator, sink, credentials) = build_harness(
            FakeLoginCollaborator::succeeding("new-token"),
            FakeCredentialValidator::failing("token rejected"),
        )
        .await;
        rotator.rotate_once().await;

        assert_eq!(*credentials.saved.lock().await, vec!["new-token".to_string()]);
        let events = sink.fetch_recent("audit", 10).await.unwrap();
        let texts: Vec<String> = events.iter().map(|e| e.text.clone()).collect();
        assert!(texts.iter().any(|t| t.starts_with("RotationFailed: token validation failed")));
        assert!(!texts.iter().any(|t| t == "RotationCompleted"));
    }
}
