//! Token authorization and renewal authorization

use certward_core::{SignOption, UnverifiedToken};
use ssh_key::Certificate;
use tracing::{debug, info, warn};

use super::Authority;
use crate::error::{AuthorityError, ErrorContext, Result};

impl Authority {
    /// Authorize a signing request by its one-time token.
    ///
    /// The token is read without verification only to find the provisioner
    /// that can verify it. Single-use tokens are recorded before the
    /// provisioner verifies them, so a replayed token fails even while the
    /// first use is still being verified.
    pub async fn authorize(&self, ott: &str) -> Result<Vec<SignOption>> {
        let token = UnverifiedToken::parse(ott).map_err(|e| {
            AuthorityError::unauthenticated(
                format!("authorize: error parsing token: {}", e),
                ErrorContext::default(),
            )
        })?;

        let claims = token.insecure_claims().map_err(|e| {
            AuthorityError::unauthenticated(format!("authorize: {}", e), ErrorContext::default())
        })?;
        let context = ErrorContext::from_claims(&claims);

        if !self.disable_issued_at_check {
            if let Some(iat) = claims.iat {
                if iat > 0 && iat < self.started_at {
                    warn!(iat = iat, started_at = self.started_at, "Token predates authority start");
                    return Err(AuthorityError::unauthenticated(
                        "token issued before the bootstrap of the certificate authority",
                        context,
                    ));
                }
            }
        }

        let provisioner = self.registry.load_by_token(&token, &claims).ok_or_else(|| {
            AuthorityError::unauthenticated("authorize: provisioner not found", context.clone())
        })?;
        let context = context.with_provisioner(provisioner.id());

        if provisioner.requires_replay_protection() && !claims.jti.is_empty() {
            self.replay.record(&claims.jti, &claims.sub).map_err(|e| {
                AuthorityError::unauthenticated(e.to_string(), context.clone())
            })?;
        }

        let options = provisioner
            .authorize_ssh_sign(token.as_str())
            .await
            .map_err(|e| {
                warn!(context = %context, error = %e, "Token verification failed");
                AuthorityError::unauthenticated(format!("authorize: {}", e), context.clone())
            })?;

        debug!(context = %context, options = options.len(), "Token authorized");
        Ok(options)
    }

    /// Check that the provisioner that authorized `cert` still allows renewal.
    ///
    /// Certificates without a provisioner reference are not renewable.
    pub fn authorize_renewal(&self, cert: &Certificate) -> Result<()> {
        let context = ErrorContext::default()
            .with_serial(cert.serial())
            .with_key_id(cert.key_id());

        let provisioner = self.registry.load_by_certificate(cert).ok_or_else(|| {
            AuthorityError::unauthenticated("provisioner not found", context.clone())
        })?;
        let context = context.with_provisioner(provisioner.id());

        provisioner
            .authorize_renewal(cert)
            .map_err(|e| AuthorityError::unauthenticated(e.to_string(), context.clone()))?;

        info!(context = %context, "Renewal authorized");
        Ok(())
    }
}
