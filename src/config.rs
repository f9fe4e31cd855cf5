use std::time::Duration;

use crate::errors::AppError;

const DEFAULT_API_URL: &str = "http://localhost:3000";

/// Credential deposited by the sign-in flow before this subsystem runs.
/// The backend authenticates with a session cookie.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    cookie: String,
}

impl Session {
    pub fn new(cookie: impl Into<String>) -> Result<Self, AppError> {
        let cookie = cookie.into();
        if cookie.trim().is_empty() {
            return Err(AppError::MissingSession);
        }
        Ok(Self { cookie })
    }

    pub fn cookie(&self) -> &str {
        &self.cookie
    }
}

// Keep the cookie out of logs.
impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("cookie", &"<redacted>").finish()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub socket_url: String,
    pub session: Session,
    pub alert_ttl: Duration,
    pub scroll_settle: Duration,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
    pub view_rows: u32,
    pub http_timeout: Duration,
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup, so tests need not touch
    /// the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let api_url = lookup("INBOX_API_URL")
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let socket_url = lookup("INBOX_SOCKET_URL")
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or_else(|| api_url.clone());
        let session = lookup("INBOX_SESSION_COOKIE")
            .ok_or(AppError::MissingSession)
            .and_then(Session::new)?;

        let millis = |key: &str, default: u64| -> Result<Duration, AppError> {
            parse_or(&lookup, key, default).map(Duration::from_millis)
        };

        let reconnect_initial = millis("INBOX_RECONNECT_INITIAL_MS", 1000)?;
        let reconnect_max = millis("INBOX_RECONNECT_MAX_MS", 5000)?;
        if reconnect_max < reconnect_initial {
            return Err(AppError::config(
                "INBOX_RECONNECT_MAX_MS",
                "must not be smaller than INBOX_RECONNECT_INITIAL_MS",
            ));
        }

        Ok(Self {
            api_url,
            socket_url,
            session,
            alert_ttl: millis("INBOX_ALERT_TTL_MS", 5000)?,
            scroll_settle: millis("INBOX_SCROLL_SETTLE_MS", 100)?,
            reconnect_initial,
            reconnect_max,
            view_rows: parse_or(&lookup, "INBOX_VIEW_ROWS", 20u32)?.max(1),
            http_timeout: Duration::from_secs(parse_or(&lookup, "INBOX_HTTP_TIMEOUT_SECS", 30)?),
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| AppError::config(key, format!("'{raw}': {e}"))),
    }
}
