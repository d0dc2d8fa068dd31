//! Carrier error types
//!
//! Error definitions with transient/permanent classification. A "not located"
//! response is deliberately *not* an error: adapters return a benign empty
//! [`crate::types::TrackingResult`] for it; errors here mean the query itself
//! could not be completed.

use thiserror::Error;

/// Error that can occur while querying a carrier tracking backend.
#[derive(Debug, Error)]
pub enum CarrierError {
    // Transport errors (usually transient)
    /// Failed to reach the carrier endpoint.
    #[error("connection failed: {message}")]
    ConnectionFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Request timed out.
    #[error("request timeout after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// Carrier answered with a non-success HTTP status.
    #[error("carrier returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Rate limited and the retry budget is exhausted.
    #[error("rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },

    // Credential errors
    /// Login or token was rejected by the carrier.
    #[error("authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// Session cookie expired and the single re-login retry also failed.
    #[error("session expired and re-login failed")]
    SessionExpired,

    // Configuration errors (permanent, checked before dispatch where possible)
    /// Adapter configuration is missing or invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    // Browser automation errors
    /// The portal rejected every solved CAPTCHA within the retry budget.
    #[error("captcha rejected after {attempts} attempts")]
    CaptchaRejected { attempts: u32 },

    /// The browser session failed (navigation, script evaluation, form fill).
    #[error("browser automation failed: {message}")]
    BrowserFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    // Payload errors
    /// Response had a recognizable shape but required structure was broken.
    ///
    /// Missing *optional* keys never produce this: adapters degrade those to
    /// `None`. This is for bodies that cannot be decoded at all.
    #[error("malformed carrier response: {message}")]
    MalformedResponse { message: String },

    /// Internal error.
    #[error("internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl CarrierError {
    /// Check if this error is transient and the operation may succeed later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CarrierError::ConnectionFailed { .. }
                | CarrierError::Timeout { .. }
                | CarrierError::RateLimited { .. }
                | CarrierError::SessionExpired
        )
    }

    /// Check if this error is permanent and retry won't help.
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Get an error code for classification and log aggregation.
    pub fn error_code(&self) -> &'static str {
        match self {
            CarrierError::ConnectionFailed { .. } => "CONNECTION_FAILED",
            CarrierError::Timeout { .. } => "TIMEOUT",
            CarrierError::Http { .. } => "HTTP_ERROR",
            CarrierError::RateLimited { .. } => "RATE_LIMITED",
            CarrierError::AuthenticationFailed { .. } => "AUTH_FAILED",
            CarrierError::SessionExpired => "SESSION_EXPIRED",
            CarrierError::InvalidConfiguration { .. } => "INVALID_CONFIG",
            CarrierError::CaptchaRejected { .. } => "CAPTCHA_REJECTED",
            CarrierError::BrowserFailed { .. } => "BROWSER_FAILED",
            CarrierError::MalformedResponse { .. } => "MALFORMED_RESPONSE",
            CarrierError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    // Convenience constructors

    /// Create a connection failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        CarrierError::ConnectionFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection failed error with source.
    pub fn connection_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        CarrierError::ConnectionFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an HTTP status error.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        CarrierError::Http {
            status,
            message: message.into(),
        }
    }

    /// Create an authentication failed error.
    pub fn auth_failed(message: impl Into<String>) -> Self {
        CarrierError::AuthenticationFailed {
            message: message.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        CarrierError::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Create a browser automation error.
    pub fn browser(message: impl Into<String>) -> Self {
        CarrierError::BrowserFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a malformed response error.
    pub fn malformed(message: impl Into<String>) -> Self {
        CarrierError::MalformedResponse {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        CarrierError::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Create an internal error with source.
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        CarrierError::Internal {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Result type for carrier operations.
pub type CarrierResult<T> = Result<T, CarrierError>;
