//! OIDC provisioner
//!
//! Verifies identity provider tokens issued to a configured client id and
//! derives the SSH principals from the verified email address.

use async_trait::async_trait;
use certward_core::{matches_audience, CertType, Claims, SignOption, SshDurations, SshOptions};
use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
use moka::future::Cache;
use serde::Deserialize;
use ssh_key::Certificate;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{ProvisionerError, Result};
use crate::jwk::TOKEN_LEEWAY_SECONDS;
use crate::provisioner::Provisioner;
use crate::types::{OidcProvisionerConfig, ProvisionerType};

// ============================================================================
// Key sources
// ============================================================================

/// Issuer and signing keys of an identity provider
#[derive(Debug, Clone)]
pub struct ProviderKeys {
    pub issuer: String,
    pub jwks: JwkSet,
}

impl ProviderKeys {
    /// Find a key by id. Without an id, a set holding exactly one key is used.
    pub fn find(&self, kid: Option<&str>) -> Result<&Jwk> {
        match kid {
            Some(kid) => self
                .jwks
                .find(kid)
                .ok_or_else(|| ProvisionerError::KeyNotFound(kid.to_string())),
            None => match self.jwks.keys.as_slice() {
                [only] => Ok(only),
                _ => Err(ProvisionerError::KeyNotFound(
                    "token has no kid and the key set is ambiguous".into(),
                )),
            },
        }
    }
}

/// Source of identity provider keys
#[async_trait]
pub trait JwksSource: Send + Sync {
    /// Current issuer and key set
    async fn keys(&self) -> Result<Arc<ProviderKeys>>;
}

/// A fixed key set
pub struct StaticJwks {
    keys: Arc<ProviderKeys>,
}

impl StaticJwks {
    pub fn new(issuer: impl Into<String>, jwks: JwkSet) -> Self {
        Self {
            keys: Arc::new(ProviderKeys {
                issuer: issuer.into(),
                jwks,
            }),
        }
    }
}

#[async_trait]
impl JwksSource for StaticJwks {
    async fn keys(&self) -> Result<Arc<ProviderKeys>> {
        Ok(self.keys.clone())
    }
}

/// OpenID discovery document fields we use
#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    issuer: String,
    jwks_uri: String,
}

/// Keys fetched through OpenID discovery and cached for an hour
pub struct RemoteJwks {
    configuration_endpoint: String,
    cache: Cache<String, Arc<ProviderKeys>>,
    http_client: reqwest::Client,
}

impl RemoteJwks {
    pub fn new(configuration_endpoint: impl Into<String>) -> Self {
        Self {
            configuration_endpoint: configuration_endpoint.into(),
            cache: Cache::builder()
                .time_to_live(Duration::from_secs(3600))
                .max_capacity(100)
                .build(),
            http_client: reqwest::Client::new(),
        }
    }

    async fn fetch(&self) -> Result<Arc<ProviderKeys>> {
        debug!(url = %self.configuration_endpoint, "Fetching OpenID configuration");
        let discovery: DiscoveryDocument = self
            .http_client
            .get(&self.configuration_endpoint)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| ProvisionerError::JwksFetchError(e.to_string()))?
            .json()
            .await
            .map_err(|e| ProvisionerError::JwksFetchError(e.to_string()))?;

        debug!(issuer = %discovery.issuer, url = %discovery.jwks_uri, "Fetching JWKS");
        let jwks: JwkSet = self
            .http_client
            .get(&discovery.jwks_uri)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| ProvisionerError::JwksFetchError(e.to_string()))?
            .json()
            .await
            .map_err(|e| ProvisionerError::JwksFetchError(e.to_string()))?;

        info!(issuer = %discovery.issuer, keys = jwks.keys.len(), "Loaded identity provider keys");
        Ok(Arc::new(ProviderKeys {
            issuer: discovery.issuer,
            jwks,
        }))
    }
}

#[async_trait]
impl JwksSource for RemoteJwks {
    async fn keys(&self) -> Result<Arc<ProviderKeys>> {
        if let Some(cached) = self.cache.get(&self.configuration_endpoint).await {
            return Ok(cached);
        }
        let keys = self.fetch().await?;
        self.cache
            .insert(self.configuration_endpoint.clone(), keys.clone())
            .await;
        Ok(keys)
    }
}

// ============================================================================
// Provisioner
// ============================================================================

/// Provisioner for tokens issued by an OpenID Connect identity provider
pub struct OidcProvisioner {
    name: String,
    client_id: String,
    audiences: Vec<String>,
    admins: Vec<String>,
    domains: Vec<String>,
    claims: SshDurations,
    source: Arc<dyn JwksSource>,
}

impl OidcProvisioner {
    /// Create a provisioner that discovers keys from the configuration endpoint
    pub fn new(config: OidcProvisionerConfig) -> Result<Self> {
        let source = Arc::new(RemoteJwks::new(config.configuration_endpoint.clone()));
        Self::with_source(config, source)
    }

    /// Create a provisioner with an explicit key source
    pub fn with_source(config: OidcProvisionerConfig, source: Arc<dyn JwksSource>) -> Result<Self> {
        if config.name.is_empty() {
            return Err(ProvisionerError::Config("provisioner name cannot be empty".into()));
        }
        if config.client_id.is_empty() {
            return Err(ProvisionerError::Config(format!(
                "provisioner {} has no clientID",
                config.name
            )));
        }
        Ok(Self {
            audiences: vec![config.client_id.clone()],
            name: config.name,
            client_id: config.client_id,
            admins: config.admins,
            domains: config.domains.iter().map(|d| d.to_lowercase()).collect(),
            claims: config.claims,
            source,
        })
    }

    fn is_admin(&self, email: &str) -> bool {
        self.admins.iter().any(|a| a.eq_ignore_ascii_case(email))
    }

    async fn authorize_token(&self, token: &str) -> Result<Claims> {
        let header = decode_header(token)?;
        let keys = self.source.keys().await?;
        let jwk = keys.find(header.kid.as_deref())?;
        let key = DecodingKey::from_jwk(jwk)?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[&keys.issuer]);
        validation.set_required_spec_claims(&["exp"]);
        validation.validate_aud = false;
        validation.validate_nbf = true;
        validation.leeway = TOKEN_LEEWAY_SECONDS;

        let claims = decode::<Claims>(token, &key, &validation)?.claims;

        if !matches_audience(&self.audiences, &claims.aud) {
            return Err(ProvisionerError::InvalidToken(format!(
                "invalid audience claim (aud) {:?}",
                claims.aud
            )));
        }
        if !claims.azp.is_empty() && claims.azp != self.client_id {
            return Err(ProvisionerError::InvalidToken(format!(
                "invalid authorized party claim (azp) {}",
                claims.azp
            )));
        }
        if claims.email.is_empty() {
            return Err(ProvisionerError::Unauthorized("email claim is required".into()));
        }

        if !self.domains.is_empty() && !self.is_admin(&claims.email) {
            let domain = claims
                .email
                .rsplit_once('@')
                .map(|(_, d)| d.to_lowercase())
                .unwrap_or_default();
            if !self.domains.contains(&domain) {
                return Err(ProvisionerError::Unauthorized(format!(
                    "email {} is not allowed",
                    claims.email
                )));
            }
        }

        Ok(claims)
    }
}

/// Principal derived from an email local part: lowercase, with anything
/// outside `[a-z0-9-]` replaced by `_`.
pub fn sanitize_principal(email: &str) -> String {
    let local = email.split('@').next().unwrap_or_default();
    local
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '-' => c,
            _ => '_',
        })
        .collect()
}

#[async_trait]
impl Provisioner for OidcProvisioner {
    fn id(&self) -> &str {
        &self.client_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProvisionerType {
        ProvisionerType::Oidc
    }

    fn credential_id(&self) -> &str {
        &self.client_id
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

        let claims = self.authorize_token(token).await?;
        debug!(provisioner = %self.name, email = %claims.email, "Authorized OIDC token");

        let defaults = SshOptions {
            cert_type: Some(CertType::User),
            principals: vec![sanitize_principal(&claims.email), claims.email.clone()],
            ..Default::default()
        };

        let mut options = vec![SignOption::KeyIdModifier(claims.email.clone())];
        if !self.is_admin(&claims.email) {
            options.push(SignOption::OptionsValidator(defaults.clone()));
        }
        options.extend([
            SignOption::DefaultsModifier(defaults),
            SignOption::DefaultExtensions,
            SignOption::DefaultDuration(self.claims),
            SignOption::ProvisionerExtension(self.reference()),
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

#[cfg(test)]
mod tests {
    use super::*;
    use certward_core::TokenKey;
    use chrono::Utc;

    const ISSUER: &str = "https://idp.example";
    const CLIENT_ID: &str = "client-123";

    fn provisioner(key: &TokenKey, admins: Vec<String>, domains: Vec<String>) -> OidcProvisioner {
        let jwks = JwkSet {
            keys: vec![key.jwk().unwrap()],
        };
        OidcProvisioner::with_source(
            OidcProvisionerConfig {
                name: "idp".to_string(),
                client_id: CLIENT_ID.to_string(),
                configuration_endpoint: format!("{}/.well-known/openid-configuration", ISSUER),
                admins,
                domains,
                claims: SshDurations::default(),
            },
            Arc::new(StaticJwks::new(ISSUER, jwks)),
        )
        .unwrap()
    }

    fn claims(email: &str) -> Claims {
        let now = Utc::now().timestamp();
        Claims {
            iss: ISSUER.to_string(),
            sub: "1234567890".to_string(),
            aud: vec![CLIENT_ID.to_string()],
            azp: CLIENT_ID.to_string(),
            email: email.to_string(),
            iat: Some(now),
            exp: Some(now + 300),
            ..Default::default()
        }
    }

    #[test]
    fn test_sanitize_principal() {
        assert_eq!(sanitize_principal("Jane.Doe@example.com"), "jane_doe");
        assert_eq!(sanitize_principal("bob-smith+ssh@example.com"), "bob-smith_ssh");
        assert_eq!(sanitize_principal("root"), "root");
    }

    #[tokio::test]
    async fn test_authorize_derives_principals() {
        let key = TokenKey::generate("idp-key");
        let p = provisioner(&key, vec![], vec![]);
        assert_eq!(p.id(), CLIENT_ID);
        assert!(!p.requires_replay_protection());

        let token = key.sign(&claims("jane.doe@example.com")).unwrap();
        let options = p.authorize_ssh_sign(&token).await.unwrap();

        assert_eq!(
            options[0],
            SignOption::KeyIdModifier("jane.doe@example.com".to_string())
        );
        let expected = SshOptions {
            cert_type: Some(CertType::User),
            principals: vec!["jane_doe".to_string(), "jane.doe@example.com".to_string()],
            ..Default::default()
        };
        assert_eq!(options[1], SignOption::OptionsValidator(expected));
    }

    #[tokio::test]
    async fn test_admin_skips_options_validator() {
        let key = TokenKey::generate("idp-key");
        let p = provisioner(&key, vec!["root@example.com".to_string()], vec![]);

        let token = key.sign(&claims("root@example.com")).unwrap();
        let options = p.authorize_ssh_sign(&token).await.unwrap();
        assert!(!options
            .iter()
            .any(|o| matches!(o, SignOption::OptionsValidator(_))));
    }

    #[tokio::test]
    async fn test_domain_restriction() {
        let key = TokenKey::generate("idp-key");
        let p = provisioner(
            &key,
            vec!["ops@partner.example".to_string()],
            vec!["Example.com".to_string()],
        );

        let ok = key.sign(&claims("jane@example.com")).unwrap();
        assert!(p.authorize_ssh_sign(&ok).await.is_ok());

        let denied = key.sign(&claims("mallory@evil.example")).unwrap();
        assert!(matches!(
            p.authorize_ssh_sign(&denied).await,
            Err(ProvisionerError::Unauthorized(_))
        ));

        let admin = key.sign(&claims("ops@partner.example")).unwrap();
        assert!(p.authorize_ssh_sign(&admin).await.is_ok());
    }

    #[tokio::test]
    async fn test_claim_checks() {
        let key = TokenKey::generate("idp-key");
        let p = provisioner(&key, vec![], vec![]);

        let mut c = claims("jane@example.com");
        c.azp = "other-client".to_string();
        assert!(p.authorize_ssh_sign(&key.sign(&c).unwrap()).await.is_err());

        let mut c = claims("jane@example.com");
        c.email = String::new();
        assert!(p.authorize_ssh_sign(&key.sign(&c).unwrap()).await.is_err());

        let mut c = claims("jane@example.com");
        c.iss = "https://impostor.example".to_string();
        assert!(p.authorize_ssh_sign(&key.sign(&c).unwrap()).await.is_err());

        let mut c = claims("jane@example.com");
        c.aud = vec!["another-client".to_string()];
        assert!(p.authorize_ssh_sign(&key.sign(&c).unwrap()).await.is_err());
    }

    #[tokio::test]
    async fn test_not_yet_valid_token_rejected() {
        let key = TokenKey::generate("idp-key");
        let p = provisioner(&key, vec![], vec![]);

        let now = Utc::now().timestamp();
        let mut c = claims("jane@example.com");
        c.nbf = Some(now + 3600);
        c.exp = Some(now + 7200);
        let err = p.authorize_ssh_sign(&key.sign(&c).unwrap()).await.unwrap_err();
        assert!(matches!(err, ProvisionerError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn test_unknown_kid() {
        let key = TokenKey::generate("idp-key");
        let p = provisioner(&key, vec![], vec![]);
        let other = TokenKey::generate("rotated-key");

        let token = other.sign(&claims("jane@example.com")).unwrap();
        assert!(matches!(
            p.authorize_ssh_sign(&token).await,
            Err(ProvisionerError::KeyNotFound(_))
        ));
    }
}
