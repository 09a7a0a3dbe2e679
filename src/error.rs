//! # Error Handling
//!
//! This module defines the custom error types used across the voice session
//! engine and the conversions into them from library errors.
//!
//! ## Error Categories:
//! - **Transport**: websocket-level failures and explicit `{error}` messages
//!   from the peer. Fatal to the session: resources are released and the
//!   error is surfaced to the caller.
//! - **Setup**: capture or playback device acquisition failures. Abort the
//!   setup path and propagate; an already-open session is unaffected.
//! - **Decode**: a malformed or truncated playback container. Recoverable:
//!   the pending queue is dropped and the session continues.
//! - **ConfigError / ValidationError**: configuration loading or validation
//!   problems, reported before anything is connected.

use std::fmt;  // For implementing Display trait

/// Custom error types for the voice session engine.
///
/// Each variant carries a human-readable message. The variant selects the
/// handling policy (fatal / recoverable / setup-time), see module docs.
#[derive(Debug)]
pub enum AppError {
    /// Websocket-level error or an explicit `{error}` message from the peer
    Transport(String),

    /// Capture or playback device could not be acquired or started
    Setup(String),

    /// A concatenated playback container failed to decode
    Decode(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// Configuration values failed validation rules
    ValidationError(String),
}

/// Human-readable formatting, used when errors are logged or surfaced
/// to the caller as the session termination message.
impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Transport(msg) => write!(f, "Transport error: {}", msg),
            AppError::Setup(msg) => write!(f, "Setup error: {}", msg),
            AppError::Decode(msg) => write!(f, "Decode error: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

/// Automatic conversion from configuration errors to AppError.
///
/// ## When this happens:
/// - config.toml file has invalid syntax
/// - Environment variable overrides have the wrong shape
/// - Configuration values fail deserialization
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Automatic conversion from websocket errors to AppError.
///
/// Any tungstenite-level failure (connect refused, protocol violation,
/// broken pipe) is a transport error and is fatal to the session.
impl From<tokio_tungstenite::tungstenite::Error> for AppError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        AppError::Transport(err.to_string())
    }
}

/// Type alias for Results that use our custom error type.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_category_and_message() {
        let err = AppError::Transport("connection refused".to_string());
        assert_eq!(err.to_string(), "Transport error: connection refused");

        let err = AppError::Decode("truncated header".to_string());
        assert_eq!(err.to_string(), "Decode error: truncated header");
    }

    #[test]
    fn test_config_conversion() {
        let source = config::ConfigError::Message("bad key".to_string());
        let err: AppError = source.into();
        assert!(matches!(err, AppError::ConfigError(_)));
    }
}
