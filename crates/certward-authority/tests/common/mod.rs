//! Shared fixtures for authority tests

#![allow(dead_code)]

use certward_authority::{Authority, AuthorityConfig, SshCaKeys};
use certward_core::{CertType, Claims, SshCaKey, SshDurations, SshOptions, StepClaims, TokenKey};
use certward_provisioner::{JwkProvisionerConfig, ProvisionerConfig};
use chrono::Utc;
use ssh_key::PublicKey;

// =============================================================================
// Constants
// =============================================================================

pub const DNS_NAME: &str = "ca.example";
pub const PROVISIONER: &str = "admin";
pub const KID: &str = "admin-key-1";

// =============================================================================
// Fixtures
// =============================================================================

/// An authority trusting one JWK provisioner, plus the key that signs its tokens
pub struct Fixture {
    pub authority: Authority,
    pub token_key: TokenKey,
}

pub fn config(token_key: &TokenKey, claims: SshDurations) -> AuthorityConfig {
    AuthorityConfig {
        dns_names: vec![DNS_NAME.to_string()],
        provisioners: vec![ProvisionerConfig::Jwk(JwkProvisionerConfig {
            name: PROVISIONER.to_string(),
            key: token_key.jwk().expect("jwk"),
            claims,
        })],
        ..Default::default()
    }
}

pub fn ca_keys() -> SshCaKeys {
    SshCaKeys {
        user: Some(SshCaKey::generate().expect("user ca key")),
        host: Some(SshCaKey::generate().expect("host ca key")),
    }
}

pub fn fixture() -> Fixture {
    fixture_with(SshDurations::default(), ca_keys())
}

pub fn fixture_with(claims: SshDurations, keys: SshCaKeys) -> Fixture {
    let token_key = TokenKey::generate(KID);
    let authority =
        Authority::new(config(&token_key, claims), keys).expect("authority should build");
    Fixture {
        authority,
        token_key,
    }
}

/// A fresh subject public key
pub fn subject_key() -> PublicKey {
    SshCaKey::generate()
        .expect("subject key")
        .public_key()
        .clone()
}

// =============================================================================
// Tokens
// =============================================================================

pub fn user_options(principals: &[&str]) -> SshOptions {
    SshOptions {
        cert_type: Some(CertType::User),
        principals: principals.iter().map(|p| p.to_string()).collect(),
        ..Default::default()
    }
}

pub fn host_options(principals: &[&str]) -> SshOptions {
    SshOptions {
        cert_type: Some(CertType::Host),
        principals: principals.iter().map(|p| p.to_string()).collect(),
        ..Default::default()
    }
}

/// Claims for a token addressed to the sign endpoint
pub fn claims(jti: &str, sub: &str, ssh: SshOptions) -> Claims {
    let now = Utc::now().timestamp();
    Claims {
        iss: PROVISIONER.to_string(),
        sub: sub.to_string(),
        aud: vec![format!("https://{}/1.0/ssh/sign", DNS_NAME)],
        iat: Some(now),
        nbf: Some(now),
        exp: Some(now + 300),
        jti: jti.to_string(),
        step: Some(StepClaims { ssh: Some(ssh) }),
        ..Default::default()
    }
}

impl Fixture {
    /// A signed token for `sub` carrying `ssh`
    pub fn token(&self, jti: &str, sub: &str, ssh: SshOptions) -> String {
        self.sign(&claims(jti, sub, ssh))
    }

    pub fn sign(&self, claims: &Claims) -> String {
        self.token_key.sign(claims).expect("token should sign")
    }
}
