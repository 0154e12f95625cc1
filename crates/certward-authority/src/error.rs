//! Authority error taxonomy
//!
//! Every failure of the authority carries an [`ErrorContext`] with the
//! identifiers needed to diagnose it. The raw token is never recorded.

use certward_core::Claims;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Result type for authority operations
pub type Result<T> = std::result::Result<T, AuthorityError>;

/// Diagnostic identifiers attached to an error
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provisioner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<u64>,
}

impl ErrorContext {
    /// Context from unverified token claims
    pub fn from_claims(claims: &Claims) -> Self {
        Self {
            token_id: non_empty(&claims.jti),
            subject: non_empty(&claims.sub),
            ..Default::default()
        }
    }

    pub fn with_provisioner(mut self, id: impl Into<String>) -> Self {
        self.provisioner = Some(id.into());
        self
    }

    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = non_empty(&key_id.into());
        self
    }

    pub fn with_serial(mut self, serial: u64) -> Self {
        self.serial = Some(serial);
        self
    }

    /// True if no identifiers are set
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sep = "";
        let mut field = |f: &mut fmt::Formatter<'_>, name: &str, value: &dyn fmt::Display| {
            let r = write!(f, "{}{}={}", sep, name, value);
            sep = " ";
            r
        };
        if let Some(v) = &self.token_id {
            field(f, "token_id", v)?;
        }
        if let Some(v) = &self.subject {
            field(f, "subject", v)?;
        }
        if let Some(v) = &self.provisioner {
            field(f, "provisioner", v)?;
        }
        if let Some(v) = &self.key_id {
            field(f, "key_id", v)?;
        }
        if let Some(v) = &self.serial {
            field(f, "serial", v)?;
        }
        Ok(())
    }
}

/// Errors produced by the authority
#[derive(Error, Debug)]
pub enum AuthorityError {
    /// Request input could not be understood
    #[error("{reason}")]
    MalformedInput { reason: String, context: ErrorContext },

    /// Token or certificate did not prove identity or authority
    #[error("{reason}")]
    Unauthenticated { reason: String, context: ErrorContext },

    /// Authenticated, but the certificate may not be issued
    #[error("{reason}")]
    Forbidden { reason: String, context: ErrorContext },

    /// Requested resource is not configured
    #[error("{0}")]
    NotFound(String),

    /// Configuration could not be loaded
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Unexpected failure
    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthorityError {
    pub fn unauthenticated(reason: impl Into<String>, context: ErrorContext) -> Self {
        AuthorityError::Unauthenticated {
            reason: reason.into(),
            context,
        }
    }

    pub fn forbidden(reason: impl Into<String>, context: ErrorContext) -> Self {
        AuthorityError::Forbidden {
            reason: reason.into(),
            context,
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        AuthorityError::MalformedInput {
            reason: reason.into(),
            context: ErrorContext::default(),
        }
    }

    /// Diagnostic context, if this kind carries one
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            AuthorityError::MalformedInput { context, .. }
            | AuthorityError::Unauthenticated { context, .. }
            | AuthorityError::Forbidden { context, .. } => Some(context),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_from_claims() {
        let claims = Claims {
            sub: "alice".to_string(),
            jti: "abc".to_string(),
            ..Default::default()
        };
        let ctx = ErrorContext::from_claims(&claims).with_provisioner("admin:kid-1");
        assert_eq!(ctx.to_string(), "token_id=abc subject=alice provisioner=admin:kid-1");
        assert!(ErrorContext::default().is_empty());
    }

    #[test]
    fn test_message_is_reason() {
        let err = AuthorityError::unauthenticated("token already used", ErrorContext::default());
        assert_eq!(err.to_string(), "token already used");
        assert!(err.context().is_some());
        assert!(AuthorityError::NotFound("x".into()).context().is_none());
    }
}
