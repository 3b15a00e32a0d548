use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Missing required env var: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid env var {name}: {reason}")]
    InvalidEnv { name: &'static str, reason: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Kite API error: {0}")]
    KiteApi(String),

    #[error("Kite websocket error: {0}")]
    KiteWs(String),

    #[error("chat sink error: {0}")]
    Sink(String),

    #[error("login collaborator error: {0}")]
    Login(String),

    #[error("subscription registry I/O error: {0}")]
    Registry(String),
}
