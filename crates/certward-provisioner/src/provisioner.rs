//! The provisioner interface

use async_trait::async_trait;
use certward_core::{ProvisionerReference, SignOption};
use ssh_key::Certificate;

use crate::error::Result;
use crate::types::ProvisionerType;

/// An authority that vouches for certificate requests
///
/// A provisioner verifies one-time tokens it issued (or that its identity
/// provider issued) and answers with the constraints the signed certificate
/// must satisfy.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Registry id
    fn id(&self) -> &str;

    /// Configured name
    fn name(&self) -> &str;

    /// Provisioner kind
    fn kind(&self) -> ProvisionerType;

    /// Credential id stored in certificate references
    fn credential_id(&self) -> &str;

    /// Audiences accepted in tokens for this provisioner
    fn audiences(&self) -> &[String];

    /// Whether tokens must be recorded so they can only be used once
    fn requires_replay_protection(&self) -> bool {
        self.kind() == ProvisionerType::Jwk
    }

    /// Reference stamped on certificates this provisioner authorizes
    fn reference(&self) -> ProvisionerReference {
        ProvisionerReference {
            kind: self.kind().as_str().to_string(),
            name: self.name().to_string(),
            credential_id: self.credential_id().to_string(),
        }
    }

    /// Verify the encoded token and return the signing constraints
    async fn authorize_ssh_sign(&self, token: &str) -> Result<Vec<SignOption>>;

    /// Decide whether a certificate this provisioner authorized may be renewed
    fn authorize_renewal(&self, cert: &Certificate) -> Result<()>;
}

/// Registry id for a provisioner of `kind` referenced by `name` and `credential_id`
pub fn provisioner_id(kind: &str, name: &str, credential_id: &str) -> String {
    if kind.eq_ignore_ascii_case(ProvisionerType::Jwk.as_str()) {
        format!("{}:{}", name, credential_id)
    } else {
        credential_id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provisioner_id() {
        assert_eq!(provisioner_id("JWK", "admin", "kid-1"), "admin:kid-1");
        assert_eq!(provisioner_id("OIDC", "google", "client-123"), "client-123");
    }
}
