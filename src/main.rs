mod alerts;
mod auth;
mod catalog;
mod core;
mod credentials;
mod feed;
mod kite;
mod login;
mod price;
mod publisher;
mod registry;
mod rotator;
mod sinks;
mod snapshot;
mod ticks;

use crate::core::{state, AppConfig, AppError};
use crate::kite::client::KiteClient;

fn usage() -> &'static str {
    r#"Usage:
    cargo run -- run
    cargo run -- profile
    cargo run -- rotate-now

Env:
    ZERODHA_API_KEY, ZERODHA_ACCESS_TOKEN, ZERODHA_API_SECRET
    ZERODHA_USER_ID, ZERODHA_PASSWORD, ZERODHA_TOTP_SECRET (optional)
    DISCORD_BOT_TOKEN, DISCORD_LOG_CHANNEL_ID, DISCORD_TICKER_CHANNEL_ID
    SUBSCRIPTIONS_PATH (default subscriptions.json)
    CREDENTIAL_ENV_PATH (default .env)
    CHROMEDRIVER_URL (default http://127.0.0.1:9515)
    SELENIUM_HEADLESS (default 1)
    CHROME_BINARY_PATH (optional)

See SPEC_FULL.md for the full list of tunables (subscription mode, alert
thresholds, reconnect/backoff, publisher paging, rotation time-of-day).
"#
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();
}

// A single-threaded runtime is sufficient: ingest is I/O-bound, snapshot
// updates are microsecond-scale, and the alert engine's ordering guarantee
// depends on nothing running the snapshot store concurrently.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let mut args = std::env::args().skip(1);
    let cmd = args.next().unwrap_or_else(|| "run".to_string());

    match cmd.as_str() {
        "run" => {
            let config = AppConfig::from_env()?;
            state::run(config).await?;
        }
        "rotate-now" => {
            let config = AppConfig::from_env()?;
            state::rotate_now(&config).await?;
        }
        "profile" => {
            let config = AppConfig::from_env()?;
            let kite = KiteClient::new(&config.api_key, &config.access_token)?;
            let profile = kite.profile().await?;
            println!("{}", serde_json::to_string_pretty(&profile)?);
        }
        _ => {
            eprintln!("Unknown command: {cmd}\n\n{}", usage());
            std::process::exit(2);
        }
    }

    Ok(())
}
