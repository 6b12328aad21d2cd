//! Passport error types.

use thiserror::Error;

use crate::gateway::GatewayError;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, PassportError>;

/// Errors that can occur during signing and login operations.
#[derive(Error, Debug)]
pub enum PassportError {
    /// Signing key material could not be fetched.
    #[error("Key fetch failed: {0}")]
    KeyFetch(String),

    /// Fetched key material was malformed.
    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    /// Signature computation failed.
    #[error("Signature computation failed: {0}")]
    SignatureCompute(String),

    /// QR code generation failed.
    #[error("QR generate failed: {0}")]
    QrGenerate(String),

    /// A single QR status poll failed.
    #[error("QR poll failed: {0}")]
    QrPoll(String),

    /// The QR code expired - restart login.
    #[error("QR code expired - restart login")]
    QrExpired,

    /// The provider reported a status code outside the documented set.
    #[error("Unknown QR status code: {0}")]
    UnknownStatusCode(i64),

    /// The login deadline elapsed before a terminal status.
    #[error("Login deadline elapsed")]
    LoginTimeout,

    /// The login was cancelled.
    #[error("Login cancelled")]
    Cancelled,

    /// Missing required cookie.
    #[error("Missing required cookie: {0}")]
    MissingCookie(&'static str),

    /// The provider envelope carried a non-zero code.
    #[error("API error {code}: {message}")]
    Api { code: i64, message: String },

    /// No credentials configured.
    #[error("No credentials configured")]
    NoCredentials,

    /// Transport-level failure.
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

impl PassportError {
    /// Create a key fetch error.
    pub fn key_fetch(msg: impl Into<String>) -> Self {
        Self::KeyFetch(msg.into())
    }

    /// Create an invalid key format error.
    pub fn invalid_key_format(msg: impl Into<String>) -> Self {
        Self::InvalidKeyFormat(msg.into())
    }

    /// Create a QR generate error.
    pub fn qr_generate(msg: impl Into<String>) -> Self {
        Self::QrGenerate(msg.into())
    }

    /// Create a QR poll error.
    pub fn qr_poll(msg: impl Into<String>) -> Self {
        Self::QrPoll(msg.into())
    }

    /// Check if this error is transient and may be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::KeyFetch(_) | Self::QrGenerate(_) | Self::QrPoll(_) => true,
            Self::Gateway(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Check if this error requires a fresh login.
    pub fn requires_relogin(&self) -> bool {
        matches!(
            self,
            Self::QrExpired | Self::UnknownStatusCode(_) | Self::LoginTimeout
        )
    }
}
