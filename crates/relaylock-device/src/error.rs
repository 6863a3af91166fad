//! Error types for device cloud operations.
//!
//! These errors describe why a single vendor call failed. The gateway never
//! hands them to its callers directly: it folds every failure into a
//! fail-safe report (offline / command not acknowledged) and logs the cause.

/// Result type alias for device cloud operations.
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Errors that can occur while talking to a device cloud.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// Call did not complete within the configured timeout.
    #[error("Operation timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Network level failure (DNS, connection refused, reset).
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Cloud answered with a non-2xx status code.
    #[error("Device cloud returned HTTP {status}")]
    HttpStatus { status: u16 },

    /// Cloud answered with a body that could not be understood.
    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    /// Cloud understood the call but refused it (`success: false`).
    #[error("Device cloud rejected request: {code} {message}")]
    Rejected { code: String, message: String },

    /// Access token could not be obtained.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// Backend is misconfigured.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Simulated failure injected by a test or development backend.
    #[error("Injected failure: {message}")]
    Injected { message: String },
}

impl DeviceError {
    /// Create a new timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a new transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a new invalid response error.
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    /// Create a new rejected request error.
    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Create a new authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Create a new configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a new injected failure.
    pub fn injected(message: impl Into<String>) -> Self {
        Self::Injected {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for DeviceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout { duration_ms: 0 };
        }
        if err.is_decode() {
            return Self::invalid_response(err.to_string());
        }
        match err.status() {
            Some(status) => Self::HttpStatus {
                status: status.as_u16(),
            },
            None => Self::transport(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for DeviceError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_response(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_error() {
        let error = DeviceError::timeout(5000);
        assert!(matches!(error, DeviceError::Timeout { .. }));
        assert_eq!(error.to_string(), "Operation timeout after 5000ms");
    }

    #[test]
    fn test_rejected_error() {
        let error = DeviceError::rejected("2008", "command or value not support");
        assert_eq!(
            error.to_string(),
            "Device cloud rejected request: 2008 command or value not support"
        );
    }

    #[test]
    fn test_http_status_error() {
        let error = DeviceError::HttpStatus { status: 502 };
        assert_eq!(error.to_string(), "Device cloud returned HTTP 502");
    }

    #[test]
    fn test_json_error_maps_to_invalid_response() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let error = DeviceError::from(err);
        assert!(matches!(error, DeviceError::InvalidResponse { .. }));
    }
}
