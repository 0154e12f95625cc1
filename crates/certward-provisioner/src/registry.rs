//! Provisioner registry
//!
//! Built once at startup and read concurrently afterwards. Lookups never
//! take a lock.

use certward_core::{matches_audience, Claims, ProvisionerReference, UnverifiedToken};
use ssh_key::Certificate;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{ProvisionerError, Result};
use crate::jwk::JwkProvisioner;
use crate::oidc::OidcProvisioner;
use crate::provisioner::{provisioner_id, Provisioner};
use crate::types::ProvisionerConfig;

/// Immutable lookup of provisioners by id
pub struct ProvisionerRegistry {
    by_id: HashMap<String, Arc<dyn Provisioner>>,
}

impl ProvisionerRegistry {
    /// Build a registry from configuration. JWK provisioners accept tokens
    /// addressed to `sign_audiences`.
    pub fn from_configs(configs: Vec<ProvisionerConfig>, sign_audiences: &[String]) -> Result<Self> {
        let mut builder = ProvisionerRegistryBuilder::new();
        for config in configs {
            builder = match config {
                ProvisionerConfig::Jwk(c) => {
                    builder.with_provisioner(JwkProvisioner::new(c, sign_audiences.to_vec())?)
                }
                ProvisionerConfig::Oidc(c) => builder.with_provisioner(OidcProvisioner::new(c)?),
            };
        }
        builder.build()
    }

    /// Look up a provisioner by id
    pub fn load(&self, id: &str) -> Option<Arc<dyn Provisioner>> {
        self.by_id.get(id).cloned()
    }

    /// Resolve the provisioner for an unverified token.
    ///
    /// Candidate ids are tried in order: `iss:kid`, `azp`, then the first
    /// audience. The first registered candidate must also accept one of the
    /// token's audiences.
    pub fn load_by_token(
        &self,
        token: &UnverifiedToken,
        claims: &Claims,
    ) -> Option<Arc<dyn Provisioner>> {
        let mut candidates = Vec::with_capacity(3);
        if let Some(kid) = token.kid() {
            candidates.push(format!("{}:{}", claims.iss, kid));
        }
        if !claims.azp.is_empty() {
            candidates.push(claims.azp.clone());
        }
        if let Some(aud) = claims.aud.first() {
            candidates.push(aud.clone());
        }

        let provisioner = candidates.iter().find_map(|id| self.load(id))?;
        if !matches_audience(provisioner.audiences(), &claims.aud) {
            warn!(
                provisioner = %provisioner.id(),
                aud = ?claims.aud,
                "Token audience does not match provisioner"
            );
            return None;
        }
        Some(provisioner)
    }

    /// Resolve the provisioner referenced by a certificate's extension
    pub fn load_by_certificate(&self, cert: &Certificate) -> Option<Arc<dyn Provisioner>> {
        let reference = match ProvisionerReference::from_certificate(cert) {
            Ok(Some(reference)) => reference,
            Ok(None) => return None,
            Err(e) => {
                warn!(serial = cert.serial(), error = %e, "Invalid provisioner reference");
                return None;
            }
        };
        self.load(&provisioner_id(
            &reference.kind,
            &reference.name,
            &reference.credential_id,
        ))
    }

    /// Number of registered provisioners
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// True if no provisioners are registered
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Registered ids
    pub fn ids(&self) -> Vec<String> {
        self.by_id.keys().cloned().collect()
    }
}

impl std::fmt::Debug for ProvisionerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisionerRegistry")
            .field("ids", &self.ids())
            .finish()
    }
}

/// Builder for a [`ProvisionerRegistry`]
pub struct ProvisionerRegistryBuilder {
    provisioners: Vec<Arc<dyn Provisioner>>,
}

impl ProvisionerRegistryBuilder {
    pub fn new() -> Self {
        Self {
            provisioners: Vec::new(),
        }
    }

    /// Add a provisioner
    pub fn with_provisioner<P: Provisioner + 'static>(self, provisioner: P) -> Self {
        self.with_shared(Arc::new(provisioner))
    }

    /// Add an already shared provisioner
    pub fn with_shared(mut self, provisioner: Arc<dyn Provisioner>) -> Self {
        self.provisioners.push(provisioner);
        self
    }

    /// Build the registry. Duplicate ids are rejected.
    pub fn build(self) -> Result<ProvisionerRegistry> {
        let mut by_id = HashMap::with_capacity(self.provisioners.len());
        for provisioner in self.provisioners {
            let id = provisioner.id().to_string();
            if by_id.contains_key(&id) {
                return Err(ProvisionerError::Config(format!(
                    "duplicate provisioner id {}",
                    id
                )));
            }
            info!(
                id = %id,
                name = %provisioner.name(),
                kind = %provisioner.kind(),
                "Registered provisioner"
            );
            by_id.insert(id, provisioner);
        }
        Ok(ProvisionerRegistry { by_id })
    }
}

impl Default for ProvisionerRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
