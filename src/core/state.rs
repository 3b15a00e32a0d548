//! Composition root: builds the pipeline's components in their dependency
//! order (catalog, then snapshot store, then feed session, then the alert
//! engine's consumer, then the view publisher, then the rotator) and exposes
//! the live handles `main` needs to run and to stop the pipeline cleanly.

use super::config::AppConfig;
use super::error::AppError;
use crate::catalog::InstrumentCatalog;
use crate::credentials::{CredentialStore, FileCredentialStore};
use crate::feed::{self, FeedHandle};
use crate::kite::client::KiteClient;
use crate::login::{LoginCollaborator, SeleniumLoginCollaborator};
use crate::publisher::ViewPublisher;
use crate::registry::SubscriptionRegistry;
use crate::rotator::{CredentialRotator, KiteCredentialValidator, PipelineRestarter};
use crate::sinks::{DiscordSink, MessageSink};
use crate::snapshot::SnapshotStore;
use std::sync::Arc;
use tracing::{info, warn};

/// Restarts the feed session against a fresh access token. Built against the
/// same snapshot store and initial subscription set the pipeline started
/// with; only the credential changes.
struct FeedRestarter<S: MessageSink> {
    api_key: String,
    config: crate::core::config::FeedConfig,
    store: Arc<SnapshotStore>,
    initial_tokens: Vec<u32>,
    alerts: crate::core::config::AlertConfig,
    catalog: Arc<InstrumentCatalog>,
    sink: Arc<S>,
    alert_channel_id: String,
}

#[async_trait::async_trait]
impl<S: MessageSink + 'static> PipelineRestarter for FeedRestarter<S> {
    async fn restart(&self, new_access_token: &str) -> Result<FeedHandle, AppError> {
        let (handle, _join) = feed::spawn(
            self.api_key.clone(),
            new_access_token.to_string(),
            self.config,
            self.store.clone(),
            self.initial_tokens.clone(),
            self.alerts,
            self.catalog.clone(),
            self.sink.clone(),
            self.alert_channel_id.clone(),
        );
        Ok(handle)
    }
}

/// Assembles every long-running task and blocks until one of them signals a
/// stop via the feed session's `FeedHandle` (currently: forever, since only
/// `main`'s ctrl-c handler calls `stop`).
pub async fn run(config: AppConfig) -> Result<(), AppError> {
    let config = Arc::new(config);

    let kite = KiteClient::new(&config.api_key, &config.access_token)?;
    let catalog = Arc::new(InstrumentCatalog::fetch(&kite, "NSE").await?);
    info!(instruments = catalog.len(), "instrument catalog loaded");

    let store = Arc::new(SnapshotStore::new());
    let registry = Arc::new(SubscriptionRegistry::load(&config.subscriptions_path).await?);

    let mut initial_tokens = Vec::new();
    for identifier in registry.list().await {
        match catalog.resolve(&identifier) {
            Some((token, _)) => initial_tokens.push(token),
            None => warn!(identifier = %identifier, "subscription registry entry not found in catalog"),
        }
    }

    let sink = Arc::new(DiscordSink::new(config.discord_bot_token.clone())?);

    let (feed_handle, _feed_join) = feed::spawn(
        config.api_key.clone(),
        config.access_token.clone(),
        config.feed,
        store.clone(),
        initial_tokens.clone(),
        config.alerts,
        catalog.clone(),
        sink.clone(),
        config.discord_log_channel_id.clone(),
    );

    let publisher = Arc::new(ViewPublisher::new(
        store.clone(),
        registry.clone(),
        catalog.clone(),
        sink.clone(),
        config.discord_ticker_channel_id.clone(),
        config.publisher,
        config.rotator.time_zone,
    ));
    publisher.clone().adopt_existing_messages().await;
    let _publisher_join = publisher.clone().spawn();

    let login = Arc::new(SeleniumLoginCollaborator::new(&config));
    let credentials = Arc::new(FileCredentialStore::new(config.env_file_path.clone()));
    let restarter = Arc::new(FeedRestarter {
        api_key: config.api_key.clone(),
        config: config.feed,
        store: store.clone(),
        initial_tokens,
        alerts: config.alerts,
        catalog: catalog.clone(),
        sink: sink.clone(),
        alert_channel_id: config.discord_log_channel_id.clone(),
    });

    let validator = Arc::new(KiteCredentialValidator::new(config.api_key.clone()));

    let rotator = Arc::new(CredentialRotator::new(
        login,
        credentials,
        sink,
        restarter,
        validator,
        store.clone(),
        publisher,
        feed_handle,
        config.discord_log_channel_id.clone(),
        config.rotator.clone(),
    ));
    let _rotator_join = rotator.spawn();

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| AppError::KiteWs(format!("signal wait failed: {e}")))?;
    info!("shutdown signal received");
    Ok(())
}

/// One-shot login + rotation, used by the `rotate-now` CLI command without
/// starting the full pipeline.
pub async fn rotate_now(config: &AppConfig) -> Result<(), AppError> {
    let login = SeleniumLoginCollaborator::new(config);
    let outcome = login.login().await;
    if !outcome.success {
        return Err(AppError::Login(outcome.error.unwrap_or_else(|| "login failed".to_string())));
    }
    let credentials = FileCredentialStore::new(config.env_file_path.clone());
    let token = outcome.credential.expect("successful login always carries a credential");
    credentials.save_access_token(&token).await?;
    info!("access token rotated and persisted");
    Ok(())
}
