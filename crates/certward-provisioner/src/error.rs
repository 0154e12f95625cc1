//! Error types for provisioners

use certward_core::CoreError;
use thiserror::Error;

/// Result type for provisioner operations
pub type Result<T> = std::result::Result<T, ProvisionerError>;

/// Errors that can occur while authorizing with a provisioner
#[derive(Error, Debug)]
pub enum ProvisionerError {
    /// Token failed signature or claim validation
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// Token is valid but does not grant the request
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Verification key could not be found
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// Identity provider discovery or JWKS fetch failed
    #[error("failed to fetch keys: {0}")]
    JwksFetchError(String),

    /// Provisioner configuration is invalid
    #[error("invalid provisioner configuration: {0}")]
    Config(String),

    /// Core error
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl From<jsonwebtoken::errors::Error> for ProvisionerError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::ExpiredSignature => ProvisionerError::InvalidToken("token is expired".into()),
            ErrorKind::ImmatureSignature => {
                ProvisionerError::InvalidToken("token is not valid yet".into())
            }
            ErrorKind::InvalidIssuer => {
                ProvisionerError::InvalidToken("invalid issuer claim (iss)".into())
            }
            _ => ProvisionerError::InvalidToken(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for ProvisionerError {
    fn from(err: reqwest::Error) -> Self {
        ProvisionerError::JwksFetchError(err.to_string())
    }
}
