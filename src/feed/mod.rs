//! Feed Session (C3): owns one broker WebSocket, drives the subscription
//! state machine, feeds decoded frames through the tick decoder, and pushes
//! ticks into the snapshot store.
//!
//! Reconnects on a fixed interval rather than exponential backoff: the
//! broker enforces a per-user rate limit that tolerates a steady retry but
//! penalizes bursts.

use crate::alerts;
use crate::catalog::InstrumentCatalog;
use crate::core::config::{AlertConfig, FeedConfig, SubscriptionMode};
use crate::core::AppError;
use crate::sinks::MessageSink;
use crate::snapshot::SnapshotStore;
use crate::ticks::{decode_frame, FrameKind};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Notify, RwLock};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

const SUBSCRIBE_CHUNK: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Idle,
    Connecting,
    OpenUnsubscribed,
    OpenSubscribed,
    Closing,
    Backoff,
}

enum Command {
    AddToken(u32),
    RemoveToken(u32),
    Stop,
}

/// A cheaply-clonable handle used by other components to observe and drive
/// the feed session without owning the WebSocket themselves.
#[derive(Clone)]
pub struct FeedHandle {
    commands: mpsc::Sender<Command>,
    state: Arc<RwLock<FeedState>>,
    /// Signalled when backoff attempts are exhausted; C6 listens on this to
    /// decide whether an out-of-schedule rotation is warranted. The feed
    /// never holds a reference back to the rotator — only this one-way bell.
    pub escalate: Arc<Notify>,
}

impl FeedHandle {
    pub async fn state(&self) -> FeedState {
        *self.state.read().await
    }

    pub async fn add_token(&self, token: u32) -> Result<(), AppError> {
        self.commands
            .send(Command::AddToken(token))
            .await
            .map_err(|_| AppError::KiteWs("feed session command channel closed".into()))
    }

    pub async fn remove_token(&self, token: u32) -> Result<(), AppError> {
        self.commands
            .send(Command::RemoveToken(token))
            .await
            .map_err(|_| AppError::KiteWs("feed session command channel closed".into()))
    }

    pub async fn stop(&self) -> Result<(), AppError> {
        self.commands
            .send(Command::Stop)
            .await
            .map_err(|_| AppError::KiteWs("feed session command channel closed".into()))
    }
}

struct Inner<S: MessageSink> {
    api_key: String,
    access_token: String,
    config: FeedConfig,
    store: Arc<SnapshotStore>,
    state: Arc<RwLock<FeedState>>,
    escalate: Arc<Notify>,
    alerts: AlertConfig,
    catalog: Arc<InstrumentCatalog>,
    sink: Arc<S>,
    alert_channel_id: String,
}

/// Spawns the feed session's single long-running task and returns a handle
/// to drive it. `initial_tokens` seeds the subscription the first time the
/// socket opens. Every applied tick's delta is run through the alert engine
/// and, when a rule fires, posted to `alert_channel_id` via `sink`.
#[allow(clippy::too_many_arguments)]
pub fn spawn<S: MessageSink + 'static>(
    api_key: String,
    access_token: String,
    config: FeedConfig,
    store: Arc<SnapshotStore>,
    initial_tokens: Vec<u32>,
    alerts: AlertConfig,
    catalog: Arc<InstrumentCatalog>,
    sink: Arc<S>,
    alert_channel_id: String,
) -> (FeedHandle, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(32);
    let state = Arc::new(RwLock::new(FeedState::Idle));
    let escalate = Arc::new(Notify::new());

    let inner = Inner {
        api_key,
        access_token,
        config,
        store,
        state: state.clone(),
        escalate: escalate.clone(),
        alerts,
        catalog,
        sink,
        alert_channel_id,
    };

    let handle = FeedHandle {
        commands: tx,
        state,
        escalate,
    };

    let join = tokio::spawn(run_forever(inner, rx, initial_tokens));
    (handle, join)
}

enum ExitReason {
    TransportClosed,
    Stopped,
    Error(AppError),
}

async fn run_forever<S: MessageSink>(inner: Inner<S>, mut commands: mpsc::Receiver<Command>, initial_tokens: Vec<u32>) {
    let mut tokens: BTreeSet<u32> = initial_tokens.into_iter().collect();
    let attempts = AtomicU32::new(0);

    loop {
        *inner.state.write().await = FeedState::Connecting;
        let connect = tokio::time::timeout(inner.config.connect_timeout, connect_once(&inner));

        let mut stream = match connect.await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!(error = %e, "feed session connect failed");
                if backoff(&inner, &attempts).await {
                    return;
                }
                continue;
            }
            Err(_) => {
                warn!("feed session connect timed out");
                if backoff(&inner, &attempts).await {
                    return;
                }
                continue;
            }
        };

        *inner.state.write().await = FeedState::OpenUnsubscribed;
        attempts.store(0, Ordering::Relaxed);

        if !tokens.is_empty() {
            let all: Vec<u32> = tokens.iter().copied().collect();
            if let Err(e) = subscribe_with_delay(&mut stream, &inner.config.mode, &all, inner.config.mode_set_delay).await {
                warn!(error = %e, "initial subscribe failed");
                if backoff(&inner, &attempts).await {
                    return;
                }
                continue;
            }
        }
        *inner.state.write().await = FeedState::OpenSubscribed;
        info!(token_count = tokens.len(), "feed session open-subscribed");

        match run_open(&inner, &mut stream, &mut tokens, &mut commands).await {
            ExitReason::Stopped => {
                let _ = stream.close(None).await;
                *inner.state.write().await = FeedState::Idle;
                return;
            }
            ExitReason::TransportClosed | ExitReason::Error(_) => {
                if backoff(&inner, &attempts).await {
                    return;
                }
            }
        }
    }
}

/// Sleeps the fixed reconnect interval; returns `true` if the attempt cap
/// was hit and the caller should give up (escalating to C6).
async fn backoff<S: MessageSink>(inner: &Inner<S>, attempts: &AtomicU32) -> bool {
    *inner.state.write().await = FeedState::Backoff;
    let n = attempts.fetch_add(1, Ordering::Relaxed) + 1;
    if n >= inner.config.max_reconnect_attempts {
        warn!(attempts = n, "feed session exhausted reconnect attempts; escalating");
        *inner.state.write().await = FeedState::Idle;
        inner.escalate.notify_one();
        return true;
    }
    tokio::time::sleep(inner.config.reconnect_interval).await;
    false
}

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn connect_once<S: MessageSink>(inner: &Inner<S>) -> Result<WsStream, AppError> {
    let url = format!(
        "wss://ws.kite.trade/?api_key={}&access_token={}",
        urlencoding::encode(&inner.api_key),
        urlencoding::encode(&inner.access_token)
    );

    let mut req = url
        .into_client_request()
        .map_err(|e| AppError::KiteWs(format!("ws request build failed: {e}")))?;

    req.headers_mut()
        .insert("Origin", HeaderValue::from_static("https://kite.zerodha.com"));
    req.headers_mut()
        .insert("User-Agent", HeaderValue::from_static("kite-ticker-bot/0.1"));
    req.headers_mut()
        .insert("X-Kite-Version", HeaderValue::from_static("3"));

    let (stream, resp) = tokio_tungstenite::connect_async(req)
        .await
        .map_err(|e| AppError::KiteWs(format!("ws connect failed: {e}")))?;
    info!(status = %resp.status(), "feed session connected");
    Ok(stream)
}

async fn run_open<S: MessageSink>(
    inner: &Inner<S>,
    stream: &mut WsStream,
    tokens: &mut BTreeSet<u32>,
    commands: &mut mpsc::Receiver<Command>,
) -> ExitReason {
    let mut first_tick_confirmed = false;
    let mut grace_warned = false;
    let grace = tokio::time::sleep(inner.config.first_tick_grace);
    tokio::pin!(grace);

    loop {
        tokio::select! {
            _ = &mut grace, if !first_tick_confirmed && !grace_warned => {
                grace_warned = true;
                warn!(grace_secs = inner.config.first_tick_grace.as_secs(), "no tick observed within grace period after subscribe");
            }

            cmd = commands.recv() => {
                match cmd {
                    Some(Command::Stop) => return ExitReason::Stopped,
                    Some(Command::AddToken(token)) => {
                        if tokens.insert(token) {
                            if let Err(e) = subscribe_with_delay(stream, &inner.config.mode, &[token], inner.config.mode_set_delay).await {
                                warn!(error = %e, token, "add-token subscribe failed");
                                return ExitReason::Error(e);
                            }
                        }
                    }
                    Some(Command::RemoveToken(token)) => {
                        if tokens.remove(&token) {
                            if let Err(e) = unsubscribe(stream, &[token]).await {
                                warn!(error = %e, token, "unsubscribe failed");
                                return ExitReason::Error(e);
                            }
                            inner.store.remove(token);
                        }
                    }
                    None => return ExitReason::Stopped,
                }
            }

            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Binary(bin))) => {
                        let received_at = Instant::now();
                        match decode_frame(&bin) {
                            FrameKind::Data(ticks) => {
                                for tick in &ticks {
                                    if tokens.contains(&tick.token) {
                                        if let Some(delta) = inner.store.apply(tick, received_at) {
                                            deliver_alerts(inner, &delta).await;
                                        }
                                        first_tick_confirmed = true;
                                    }
                                }
                            }
                            FrameKind::Heartbeat => {}
                            FrameKind::TextControl(v) => debug!(message = %v, "feed control frame"),
                            FrameKind::Unknown => debug!("unrecognized feed frame"),
                        }
                    }
                    Some(Ok(Message::Text(txt))) => debug!(message = %txt, "feed text frame"),
                    Some(Ok(Message::Ping(p))) => {
                        if let Err(e) = stream.send(Message::Pong(p)).await {
                            return ExitReason::Error(AppError::KiteWs(format!("pong send failed: {e}")));
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        info!(close = ?frame, "feed transport closed by peer");
                        return ExitReason::TransportClosed;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return ExitReason::Error(AppError::KiteWs(format!("ws read error: {e}"))),
                    None => return ExitReason::TransportClosed,
                }
            }
        }
    }
}

/// Evaluates the alert engine against one delta and posts each fired alert
/// to the sink, in the order the rules produced them. Delivery is
/// best-effort: a failed send is logged, never retried.
async fn deliver_alerts<S: MessageSink>(inner: &Inner<S>, delta: &crate::snapshot::Delta) {
    for alert in alerts::evaluate(delta, &inner.alerts) {
        let display_name = inner
            .catalog
            .instrument(alert.token)
            .map(|i| i.symbol.clone())
            .unwrap_or_else(|| alert.token.to_string());
        let text = alert.render(&display_name);
        if let Err(e) = inner.sink.send(&inner.alert_channel_id, &text).await {
            warn!(error = %e, kind = ?alert.kind, token = alert.token, "alert delivery failed");
        }
    }
}

async fn subscribe_with_delay(
    stream: &mut WsStream,
    mode: &SubscriptionMode,
    tokens: &[u32],
    mode_set_delay: std::time::Duration,
) -> Result<(), AppError> {
    for chunk in tokens.chunks(SUBSCRIBE_CHUNK) {
        let msg = json!({"a": "subscribe", "v": chunk});
        stream
            .send(Message::Text(msg.to_string()))
            .await
            .map_err(|e| AppError::KiteWs(format!("subscribe send failed: {e}")))?;

        tokio::time::sleep(mode_set_delay).await;

        let mode_msg = json!({"a": "mode", "v": [mode.as_wire_str(), chunk]});
        stream
            .send(Message::Text(mode_msg.to_string()))
            .await
            .map_err(|e| AppError::KiteWs(format!("mode send failed: {e}")))?;
    }
    Ok(())
}

async fn unsubscribe(stream: &mut WsStream, tokens: &[u32]) -> Result<(), AppError> {
    for chunk in tokens.chunks(SUBSCRIBE_CHUNK) {
        let msg = json!({"a": "unsubscribe", "v": chunk});
        stream
            .send(Message::Text(msg.to_string()))
            .await
            .map_err(|e| AppError::KiteWs(format!("unsubscribe send failed: {e}")))?;
    }
    Ok(())
}
