//! Error types for the certward core

use thiserror::Error;

/// Result type alias using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur in the certward core
#[derive(Error, Debug)]
pub enum CoreError {
    /// Token could not be parsed as a compact JWS
    #[error("error parsing token: {0}")]
    MalformedToken(String),

    /// Token claims could not be read
    #[error("error reading token claims: {0}")]
    InvalidClaims(String),

    /// Transport encoding of a key or certificate is invalid
    #[error("{0}")]
    Decode(String),

    /// Key or certificate could not be serialized
    #[error("{0}")]
    Encode(String),

    /// Duration or time value could not be parsed
    #[error("invalid duration or time: {0}")]
    InvalidTimeDuration(String),

    /// A signing constraint rejected the certificate request
    #[error("{0}")]
    ConstraintViolation(String),

    /// The certificate could not be signed
    #[error("error signing certificate: {0}")]
    Signing(String),

    /// Cryptographic error
    #[error("cryptographic error: {0}")]
    CryptoError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),
}

impl From<ssh_key::Error> for CoreError {
    fn from(err: ssh_key::Error) -> Self {
        CoreError::CryptoError(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::SerializationError(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for CoreError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        CoreError::CryptoError(err.to_string())
    }
}
