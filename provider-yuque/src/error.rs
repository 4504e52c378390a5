//! Error types for the Yuque provider

use bridge_traits::error::BridgeError;
use thiserror::Error;

/// Yuque provider errors
#[derive(Error, Debug)]
pub enum YuqueError {
    /// Session cookie missing, expired or rejected
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// API request returned an error
    #[error("Yuque API error (status {status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    /// Book or document does not exist (or is not visible)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Failed to parse API response
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// Bridge error
    #[error(transparent)]
    BridgeError(#[from] BridgeError),
}

/// Result type for Yuque operations
pub type Result<T> = std::result::Result<T, YuqueError>;

impl From<YuqueError> for BridgeError {
    fn from(error: YuqueError) -> Self {
        match error {
            YuqueError::Unauthorized(msg) => BridgeError::Unauthorized(msg),
            YuqueError::NotFound(msg) => BridgeError::NotFound(msg),
            YuqueError::ApiError {
                status_code,
                message,
            } => BridgeError::OperationFailed(format!(
                "API error (status {}): {}",
                status_code, message
            )),
            YuqueError::ParseError(msg) => {
                BridgeError::OperationFailed(format!("Parse error: {}", msg))
            }
            YuqueError::BridgeError(e) => e,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = YuqueError::ApiError {
            status_code: 500,
            message: "server busy".to_string(),
        };

        assert_eq!(error.to_string(), "Yuque API error (status 500): server busy");
    }

    #[test]
    fn test_error_conversion() {
        let bridge_error: BridgeError = YuqueError::Unauthorized("expired".to_string()).into();
        assert!(bridge_error.is_unauthorized());

        let bridge_error: BridgeError = YuqueError::ParseError("bad json".to_string()).into();
        assert!(matches!(bridge_error, BridgeError::OperationFailed(_)));
    }
}
