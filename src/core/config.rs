use super::error::AppError;
use std::time::Duration;

/// Which fields the broker's websocket sends for each subscribed token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionMode {
    Ltp,
    Quote,
    Full,
}

impl SubscriptionMode {
    pub fn as_wire_str(self) -> &'static str {
        match self {
            Self::Ltp => "ltp",
            Self::Quote => "quote",
            Self::Full => "full",
        }
    }

    fn parse(raw: &str) -> Result<Self, AppError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ltp" => Ok(Self::Ltp),
            "quote" => Ok(Self::Quote),
            "full" => Ok(Self::Full),
            other => Err(AppError::InvalidEnv {
                name: "SUBSCRIPTION_MODE",
                reason: format!("unknown mode '{other}' (expected ltp|quote|full)"),
            }),
        }
    }
}

/// Thresholds and timing knobs for the alert engine (C4).
#[derive(Clone, Copy, Debug)]
pub struct AlertConfig {
    pub window: Duration,
    pub crash_pct: f64,
    pub spike_pct: f64,
    pub volume_ratio: f64,
    /// Whether VOLUME_SPIKE is also gated by `window` (see DESIGN.md).
    pub gate_volume_spike_by_window: bool,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(300),
            crash_pct: 3.0,
            spike_pct: 3.0,
            volume_ratio: 2.0,
            gate_volume_spike_by_window: true,
        }
    }
}

/// Timing/paging knobs for the view publisher (C5).
#[derive(Clone, Copy, Debug)]
pub struct PublisherConfig {
    pub tick_interval: Duration,
    pub initial_delay: Duration,
    pub page_size: usize,
    pub inter_page_delay: Duration,
    pub sink_message_limit: usize,
    pub adopt_existing_messages: bool,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(3),
            initial_delay: Duration::from_secs(2),
            page_size: 50,
            inter_page_delay: Duration::from_millis(200),
            sink_message_limit: 2000,
            adopt_existing_messages: true,
        }
    }
}

/// Reconnect/backoff knobs for the feed session (C3).
#[derive(Clone, Copy, Debug)]
pub struct FeedConfig {
    pub mode: SubscriptionMode,
    pub connect_timeout: Duration,
    pub mode_set_delay: Duration,
    pub reconnect_interval: Duration,
    pub max_reconnect_attempts: u32,
    pub first_tick_grace: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            mode: SubscriptionMode::Full,
            connect_timeout: Duration::from_secs(10),
            mode_set_delay: Duration::from_secs(1),
            reconnect_interval: Duration::from_secs(5),
            max_reconnect_attempts: 10,
            first_tick_grace: Duration::from_secs(60),
        }
    }
}

/// Scheduling knobs for the credential rotator (C6).
#[derive(Clone, Debug)]
pub struct RotatorConfig {
    pub time_zone: chrono_tz::Tz,
    pub hour: u32,
    pub minute: u32,
    pub login_timeout: Duration,
    pub post_stop_delay: Duration,
}

impl Default for RotatorConfig {
    fn default() -> Self {
        Self {
            time_zone: chrono_tz::Asia::Kolkata,
            hour: 5,
            minute: 45,
            login_timeout: Duration::from_secs(120),
            post_stop_delay: Duration::from_secs(2),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub api_key: String,
    pub access_token: String,
    pub api_secret: String,
    pub user_id: String,
    pub password: String,
    pub totp_secret: Option<String>,

    pub discord_bot_token: String,
    pub discord_log_channel_id: String,
    pub discord_ticker_channel_id: String,

    pub subscriptions_path: std::path::PathBuf,
    pub env_file_path: std::path::PathBuf,
    pub trading_mode: Option<String>,
    /// Only consulted when `KITE_INCLUDE_REDIRECT_URL=1`; the broker otherwise
    /// uses the redirect URL registered against the API key.
    pub redirect_url: String,

    pub chromedriver_url: String,
    pub chrome_binary_path: Option<String>,
    pub selenium_headless: bool,

    pub feed: FeedConfig,
    pub alerts: AlertConfig,
    pub publisher: PublisherConfig,
    pub rotator: RotatorConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let api_key = require_env("ZERODHA_API_KEY")?;
        let access_token = require_env("ZERODHA_ACCESS_TOKEN")?;
        let api_secret = require_env("ZERODHA_API_SECRET")?;
        let user_id = require_env("ZERODHA_USER_ID")?;
        let password = require_env("ZERODHA_PASSWORD")?;
        let totp_secret = std::env::var("ZERODHA_TOTP_SECRET")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let discord_bot_token = require_env("DISCORD_BOT_TOKEN")?;
        let discord_log_channel_id = require_env("DISCORD_LOG_CHANNEL_ID")?;
        let discord_ticker_channel_id = require_env("DISCORD_TICKER_CHANNEL_ID")?;

        let subscriptions_path = std::env::var("SUBSCRIPTIONS_PATH")
            .unwrap_or_else(|_| "subscriptions.json".to_string())
            .into();
        let env_file_path = std::env::var("CREDENTIAL_ENV_PATH")
            .unwrap_or_else(|_| ".env".to_string())
            .into();
        let trading_mode = std::env::var("TRADING_MODE").ok().filter(|s| !s.trim().is_empty());
        let redirect_url = std::env::var("ZERODHA_REDIRECT_URL").unwrap_or_default();
        let chromedriver_url = std::env::var("CHROMEDRIVER_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:9515".to_string());
        let chrome_binary_path = std::env::var("CHROME_BINARY_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty());
        let selenium_headless = parse_bool_env("SELENIUM_HEADLESS").unwrap_or(true);

        let mut feed = FeedConfig::default();
        if let Some(raw) = std::env::var("SUBSCRIPTION_MODE").ok().filter(|s| !s.trim().is_empty()) {
            feed.mode = SubscriptionMode::parse(&raw)?;
        }
        if let Some(v) = parse_env_u64("RECONNECT_INTERVAL_SECS") {
            feed.reconnect_interval = Duration::from_secs(v);
        }
        if let Some(v) = parse_env_u64("MAX_RECONNECT_ATTEMPTS") {
            feed.max_reconnect_attempts = v as u32;
        }

        let mut alerts = AlertConfig::default();
        if let Some(v) = parse_env_u64("ALERT_WINDOW_SECS") {
            alerts.window = Duration::from_secs(v);
        }
        if let Some(v) = parse_env_f64("ALERT_CRASH_PCT") {
            alerts.crash_pct = v;
        }
        if let Some(v) = parse_env_f64("ALERT_SPIKE_PCT") {
            alerts.spike_pct = v;
        }
        if let Some(v) = parse_env_f64("ALERT_VOLUME_RATIO") {
            alerts.volume_ratio = v;
        }

        let mut publisher = PublisherConfig::default();
        if let Some(v) = parse_env_u64("PUBLISHER_PAGE_SIZE") {
            publisher.page_size = v as usize;
        }
        if let Some(v) = parse_bool_env("PUBLISHER_ADOPT_EXISTING") {
            publisher.adopt_existing_messages = v;
        }

        let rotator = RotatorConfig::default();

        Ok(Self {
            api_key,
            access_token,
            api_secret,
            user_id,
            password,
            totp_secret,
            discord_bot_token,
            discord_log_channel_id,
            discord_ticker_channel_id,
            subscriptions_path,
            env_file_path,
            trading_mode,
            redirect_url,
            chromedriver_url,
            chrome_binary_path,
            selenium_headless,
            feed,
            alerts,
            publisher,
            rotator,
        })
    }
}

fn require_env(key: &'static str) -> Result<String, AppError> {
    std::env::var(key)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .ok_or(AppError::MissingEnv(key))
}

fn parse_bool_env(key: &str) -> Option<bool> {
    let v = std::env::var(key).ok()?;
    let v = v.trim();
    if v.is_empty() {
        return None;
    }
    Some(matches!(v, "1" | "true" | "TRUE" | "yes" | "YES" | "on" | "ON"))
}

fn parse_env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.trim().parse::<u64>().ok())
}

fn parse_env_f64(key: &str) -> Option<f64> {
    std::env::var(key).ok().and_then(|v| v.trim().parse::<f64>().ok())
}
