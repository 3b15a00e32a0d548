//! External login collaborator (out of scope per the streaming pipeline's own
//! design, but the concrete implementation lives here): a black box that
//! returns a fresh broker credential. C6 calls it and never looks inside.

use crate::auth::selenium::{self, WebDriver};
use crate::core::{AppConfig, AppError};
use crate::kite::auth as kite_auth;
use async_trait::async_trait;
use base32::Alphabet;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub success: bool,
    pub credential: Option<String>,
    pub error: Option<String>,
    pub duration: Duration,
}

impl LoginOutcome {
    fn ok(credential: String, duration: Duration) -> Self {
        Self {
            success: true,
            credential: Some(credential),
            error: None,
            duration,
        }
    }

    fn err(error: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: false,
            credential: None,
            error: Some(error.into()),
            duration,
        }
    }
}

/// A headless-login black box. The only implementation shipped here drives
/// a real browser through chromedriver; tests use an in-memory fake.
#[async_trait]
pub trait LoginCollaborator: Send + Sync {
    async fn login(&self) -> LoginOutcome;
}

/// Selenium/chromedriver-driven login, ported from the original autologin
/// flow but operating on the single account in `AppConfig` rather than a
/// multi-tenant profile table.
pub struct SeleniumLoginCollaborator {
    api_key: String,
    api_secret: String,
    user_id: String,
    password: String,
    totp_secret: Option<String>,
    redirect_url: String,
    chromedriver_url: String,
    chrome_binary_path: Option<String>,
    headless: bool,
}

impl SeleniumLoginCollaborator {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            user_id: config.user_id.clone(),
            password: config.password.clone(),
            totp_secret: config.totp_secret.clone(),
            redirect_url: config.redirect_url.clone(),
            chromedriver_url: config.chromedriver_url.clone(),
            chrome_binary_path: config.chrome_binary_path.clone(),
            headless: config.selenium_headless,
        }
    }
}

#[async_trait]
impl LoginCollaborator for SeleniumLoginCollaborator {
    async fn login(&self) -> LoginOutcome {
        let started = Instant::now();
        match self.run().await {
            Ok(request_token) => match kite_auth::exchange_request_token(
                &self.api_key,
                &self.api_secret,
                &request_token,
            )
            .await
            {
                Ok(session) => LoginOutcome::ok(session.access_token, started.elapsed()),
                Err(e) => LoginOutcome::err(e.to_string(), started.elapsed()),
            },
            Err(e) => LoginOutcome::err(e.to_string(), started.elapsed()),
        }
    }
}

impl SeleniumLoginCollaborator {
    async fn run(&self) -> Result<String, AppError> {
        let options = selenium::SeleniumOptions {
            headless: self.headless,
            chrome_binary_path: self.chrome_binary_path.clone(),
        };
        let driver = WebDriver::connect_with_options(&self.chromedriver_url, options).await?;
        info!(user_id = %self.user_id, "login collaborator: chromedriver session opened");

        let result = self.drive_login(&driver).await;
        let _ = driver.quit().await;
        result
    }

    async fn drive_login(&self, driver: &WebDriver) -> Result<String, AppError> {
        let login_url = kite_auth::login_url(&self.api_key, &self.redirect_url);
        driver.goto(&login_url).await?;

        let user_id_input = driver
            .wait_for_any_css(
                &[
                    "#userid",
                    "#user_id",
                    "input[name='user_id']",
                    "input[name='userid']",
                    "input[autocomplete='username']",
                    "input[type='text']",
                ],
                Duration::from_secs(30),
            )
            .await?;
        send_keys(driver, &user_id_input, &self.user_id).await?;

        let password_input = driver
            .wait_for_any_css(
                &["#password", "input[name='password']", "input[type='password']"],
                Duration::from_secs(30),
            )
            .await?;
        send_keys(driver, &password_input, &self.password).await?;

        let login_button = driver.find_xpath("//button[@type='submit']").await?;
        driver.click(&login_button).await?;

        tokio::time::sleep(Duration::from_secs(1)).await;

        if let Some(secret) = &self.totp_secret {
            if let Ok(otp_input) = driver.find_css("input[label='External TOTP']").await {
                let code = generate_totp(secret)?;
                send_keys(driver, &otp_input, &code).await?;
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }

        if let Ok(auth_btn) = driver
            .find_xpath("//button[@type='submit' or contains(text(), 'Continue') or contains(text(), 'Authorize')]")
            .await
        {
            let _ = driver.click(&auth_btn).await;
            tokio::time::sleep(Duration::from_secs(2)).await;
        }

        let final_url = wait_for_request_token(driver, Duration::from_secs(60)).await?;
        extract_query_param(&final_url, "request_token").ok_or_else(|| {
            AppError::Login(format!("request_token not found in redirect URL: {final_url}"))
        })
    }
}

async fn send_keys(driver: &WebDriver, el: &selenium::Element, text: &str) -> Result<(), AppError> {
    let _ = driver.click(el).await;
    let _ = driver.clear(el).await;
    driver.send_keys(el, text).await
}

async fn wait_for_request_token(driver: &WebDriver, timeout: Duration) -> Result<String, AppError> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut last = String::new();
    loop {
        let cur = driver.current_url().await.unwrap_or_default();
        if !cur.is_empty() {
            last = cur.clone();
        }
        if cur.contains("request_token=") {
            return Ok(cur);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(AppError::Login(format!(
                "timed out waiting for request_token; last url: {last}"
            )));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

fn extract_query_param(url: &str, key: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    parsed
        .query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.to_string())
}

/// `pyotp.TOTP(secret).now()` equivalent: HMAC-SHA1, 30s window, 6 digits.
fn generate_totp(secret_b32: &str) -> Result<String, AppError> {
    let cleaned = secret_b32.replace(' ', "").to_uppercase();
    let key = base32::decode(Alphabet::RFC4648 { padding: false }, &cleaned)
        .ok_or_else(|| AppError::Login("invalid base32 TOTP secret".to_string()))?;

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| AppError::Login(e.to_string()))?
        .as_secs();
    let counter = (now / 30).to_be_bytes();

    let mut mac =
        Hmac::<Sha1>::new_from_slice(&key).map_err(|e| AppError::Login(format!("HMAC init failed: {e}")))?;
    mac.update(&counter);
    let hash = mac.finalize().into_bytes();
    let offset = (hash[19] & 0x0f) as usize;
    let bin_code = ((u32::from(hash[offset]) & 0x7f) << 24)
        | (u32::from(hash[offset + 1]) << 16)
        | (u32::from(hash[offset + 2]) << 8)
        | u32::from(hash[offset + 3]);
    Ok(format!("{:06}", bin_code % 1_000_000))
}

/// In-memory double for tests: always returns a canned outcome.
pub struct FakeLoginCollaborator {
    pub outcome: LoginOutcome,
}

impl FakeLoginCollaborator {
    pub fn succeeding(credential: impl Into<String>) -> Self {
        Self {
            outcome: LoginOutcome::ok(credential.into(), Duration::from_millis(1)),
        }
    }

    pub fn failing(error: impl Into<String>) -> Self {
        Self {
            outcome: LoginOutcome::err(error.into(), Duration::from_millis(1)),
        }
    }
}

#[async_trait]
impl LoginCollaborator for FakeLoginCollaborator {
    async fn login(&self) -> LoginOutcome {
        self.outcome.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totp_is_six_digits() {
        // RFC 4648 test vector, base32 "JBSWY3DPEHPK3PXP" (not Kite's real secret).
        let code = generate_totp("JBSWY3DPEHPK3PXP").unwrap();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn rejects_invalid_base32() {
        assert!(generate_totp("not-base32!!!").is_err());
    }

    #[tokio::test]
    async fn fake_collaborator_reports_canned_outcome() {
        let fake = FakeLoginCollaborator::succeeding("token-abc");
        let outcome = fake.login().await;
        assert!(outcome.success);
        assert_eq!(outcome.credential.as_deref(), Some("token-abc"));
    }
}
