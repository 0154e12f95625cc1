//! JWK provisioner
//!
//! Verifies single-use tokens signed by a configured public key. The token
//! issuer must equal the provisioner name and the token must carry the SSH
//! options it was minted for.

use async_trait::async_trait;
use certward_core::{
    matches_audience, CertType, Claims, SignOption, SshDurations, SshOptions,
};
use chrono::Utc;
use jsonwebtoken::jwk::{AlgorithmParameters, EllipticCurve, Jwk, KeyAlgorithm};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use ssh_key::Certificate;
use tracing::debug;

use crate::error::{ProvisionerError, Result};
use crate::provisioner::{provisioner_id, Provisioner};
use crate::types::{JwkProvisionerConfig, ProvisionerType};

/// Clock skew tolerated on `exp` and `nbf`
pub const TOKEN_LEEWAY_SECONDS: u64 = 60;

/// Provisioner backed by a single public JWK
pub struct JwkProvisioner {
    id: String,
    name: String,
    kid: String,
    algorithm: Algorithm,
    key: DecodingKey,
    audiences: Vec<String>,
    claims: SshDurations,
}

impl std::fmt::Debug for JwkProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwkProvisioner")
            .field("id", &self.id)
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

impl JwkProvisioner {
    /// Create a provisioner accepting tokens addressed to `audiences`
    pub fn new(config: JwkProvisionerConfig, audiences: Vec<String>) -> Result<Self> {
        if config.name.is_empty() {
            return Err(ProvisionerError::Config("provisioner name cannot be empty".into()));
        }
        let kid = config
            .key
            .common
            .key_id
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ProvisionerError::Config(format!("key for provisioner {} has no kid", config.name)))?;
        let algorithm = jws_algorithm(&config.key)?;
        let key = DecodingKey::from_jwk(&config.key)
            .map_err(|e| ProvisionerError::Config(format!("invalid key for provisioner {}: {}", config.name, e)))?;

        Ok(Self {
            id: provisioner_id(ProvisionerType::Jwk.as_str(), &config.name, &kid),
            name: config.name,
            kid,
            algorithm,
            key,
            audiences,
            claims: config.claims,
        })
    }

    /// Verify signature, issuer, time bounds, audience and subject
    fn authorize_token(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(self.algorithm);
        validation.set_issuer(&[&self.name]);
        validation.set_required_spec_claims(&["exp"]);
        validation.validate_aud = false;
        validation.validate_nbf = true;
        validation.leeway = TOKEN_LEEWAY_SECONDS;

        let claims = decode::<Claims>(token, &self.key, &validation)?.claims;

        if !matches_audience(&self.audiences, &claims.aud) {
            return Err(ProvisionerError::InvalidToken(format!(
                "invalid audience claim (aud) {:?}",
                claims.aud
            )));
        }
        if claims.sub.is_empty() {
            return Err(ProvisionerError::InvalidToken("subject cannot be empty".into()));
        }
        Ok(claims)
    }
}

/// Signature algorithm for a JWK: its `alg` when present, else inferred from
/// the key type.
fn jws_algorithm(jwk: &Jwk) -> Result<Algorithm> {
    if let Some(alg) = jwk.common.key_algorithm {
        return match alg {
            KeyAlgorithm::EdDSA => Ok(Algorithm::EdDSA),
            KeyAlgorithm::ES256 => Ok(Algorithm::ES256),
            KeyAlgorithm::ES384 => Ok(Algorithm::ES384),
            KeyAlgorithm::RS256 => Ok(Algorithm::RS256),
            KeyAlgorithm::RS384 => Ok(Algorithm::RS384),
            KeyAlgorithm::RS512 => Ok(Algorithm::RS512),
            KeyAlgorithm::PS256 => Ok(Algorithm::PS256),
            KeyAlgorithm::PS384 => Ok(Algorithm::PS384),
            KeyAlgorithm::PS512 => Ok(Algorithm::PS512),
            other => Err(ProvisionerError::Config(format!(
                "unsupported key algorithm {:?}",
                other
            ))),
        };
    }

    match &jwk.algorithm {
        AlgorithmParameters::OctetKeyPair(_) => Ok(Algorithm::EdDSA),
        AlgorithmParameters::EllipticCurve(params) => match params.curve {
            EllipticCurve::P256 => Ok(Algorithm::ES256),
            EllipticCurve::P384 => Ok(Algorithm::ES384),
            ref other => Err(ProvisionerError::Config(format!(
                "unsupported curve {:?}",
                other
            ))),
        },
        AlgorithmParameters::RSA(_) => Ok(Algorithm::RS256),
        AlgorithmParameters::OctetKey(_) => Err(ProvisionerError::Config(
            "symmetric keys are not supported".into(),
        )),
    }
}

#[async_trait]
impl Provisioner for JwkProvisioner {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProvisionerType {
        ProvisionerType::Jwk
    }

    fn credential_id(&self) -> &str {
        &self.kid
    }

    fn audiences(&self) -> &[String] {
        &self.audiences
    }

    async fn authorize_ssh_sign(&self, token: &str) -> Result<Vec<SignOption>> {
        if !self.claims.enable_ssh_ca {
            return Err(ProvisionerError::Unauthorized(format!(
                "ssh ca is disabled for provisioner {}",
                self.name
            )));
        }

        let claims = self.authorize_token(token)?;
        let opts = claims.ssh_options().cloned().ok_or_else(|| {
            ProvisionerError::Unauthorized(
                "authorization token must be an SSH provisioning token".into(),
            )
        })?;

        debug!(provisioner = %self.id, sub = %claims.sub, "Authorized SSH sign token");

        let now = Utc::now();
        let mut options = vec![SignOption::OptionsValidator(opts.clone())];

        if let Some(cert_type) = opts.cert_type {
            options.push(SignOption::CertTypeModifier(cert_type));
        }
        if !opts.principals.is_empty() {
            options.push(SignOption::PrincipalsModifier(opts.principals.clone()));
        }
        if let Some(t) = opts.valid_after.relative_time(now) {
            options.push(SignOption::ValidAfterModifier(t.timestamp().max(0) as u64));
        }
        if let Some(t) = opts.valid_before.relative_time(now) {
            options.push(SignOption::ValidBeforeModifier(t.timestamp().max(0) as u64));
        }
        // Key id is always the subject; KeyIdValidator enforces it below
        options.push(SignOption::KeyIdModifier(claims.sub.clone()));

        options.extend([
            SignOption::DefaultsModifier(SshOptions {
                cert_type: Some(CertType::User),
                ..Default::default()
            }),
            SignOption::DefaultExtensions,
            SignOption::DefaultDuration(self.claims),
            SignOption::ProvisionerExtension(self.reference()),
            SignOption::KeyIdValidator(claims.sub),
            SignOption::PublicKeyValidator,
            SignOption::ValidityValidator(self.claims),
            SignOption::DefaultValidator,
        ]);

        Ok(options)
    }

    fn authorize_renewal(&self, _cert: &Certificate) -> Result<()> {
        if self.claims.disable_renewal {
            return Err(ProvisionerError::Unauthorized(format!(
                "renew is disabled for provisioner {}",
                self.name
            )));
        }
        Ok(())
    }
}
