use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Identifier errors
    #[error("Invalid device ID: {message}")]
    InvalidDeviceId { message: String },

    #[error("Invalid lock code: {message}")]
    InvalidLockCode { message: String },

    #[error("Invalid QR token: {message}")]
    InvalidQrToken { message: String },

    // Field decoding errors
    #[error("Invalid {field} value: {value}")]
    InvalidEnumValue { field: &'static str, value: String },

    #[error("Invalid coordinates: lat={lat}, long={long}")]
    InvalidCoordinates { lat: f64, long: f64 },

    #[error("Invalid re-arm delay: {0}ms (must be >= 0)")]
    InvalidRearmDelay(i64),

    // State machine errors
    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing configuration key: {0}")]
    MissingConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;
