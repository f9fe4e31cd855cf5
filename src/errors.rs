use thiserror::Error;

/// Top-level error for the inbox subsystem.
/// Every failure is handled at the boundary where it occurs; nothing here is fatal.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Transport errors ─────────────────────────────────────────────────────
    #[error("Request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Server returned {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Unexpected payload from {context}: {source}")]
    Decode {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    // ── Push channel errors ──────────────────────────────────────────────────
    #[error("Push socket error: {0}")]
    Socket(#[source] Box<tokio_tungstenite::tungstenite::Error>),

    #[error("Malformed push frame: {message}")]
    Frame { message: String },

    #[error("Push server refused the connection: {message}")]
    ConnectRefused { message: String },

    // ── Validation errors ────────────────────────────────────────────────────
    #[error("Field '{field_name}' cannot be empty")]
    EmptyField { field_name: String },

    #[error("Field '{field_name}' exceeds max length of {max_length} (actual: {actual_length})")]
    FieldTooLong { field_name: String, max_length: usize, actual_length: usize },

    #[error("No conversation is open")]
    NoActiveConversation,

    #[error("Message '{message_id}' cannot be edited or deleted here")]
    NotEditable { message_id: String },

    #[error("No alert with id {id}")]
    UnknownAlert { id: u64 },

    #[error("Invalid command: {message}")]
    InvalidCommand { message: String },

    // ── Configuration errors ─────────────────────────────────────────────────
    #[error("Configuration value '{key}' is invalid: {message}")]
    Config { key: String, message: String },

    #[error("No session credential was provided")]
    MissingSession,
}

impl AppError {
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        AppError::Network { url: url.into(), source }
    }

    pub fn decode(context: impl Into<String>, source: serde_json::Error) -> Self {
        AppError::Decode { context: context.into(), source }
    }

    pub fn frame(message: impl Into<String>) -> Self {
        AppError::Frame { message: message.into() }
    }

    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Config { key: key.into(), message: message.into() }
    }

    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            AppError::Network { .. }
                | AppError::HttpStatus { .. }
                | AppError::Decode { .. }
                | AppError::Socket(_)
                | AppError::Frame { .. }
                | AppError::ConnectRefused { .. }
        )
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AppError::EmptyField { .. }
                | AppError::FieldTooLong { .. }
                | AppError::NoActiveConversation
                | AppError::NotEditable { .. }
                | AppError::UnknownAlert { .. }
                | AppError::InvalidCommand { .. }
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for AppError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        AppError::Socket(Box::new(e))
    }
}
