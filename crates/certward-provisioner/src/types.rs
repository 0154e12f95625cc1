//! Provisioner kinds and configuration

use certward_core::SshDurations;
use jsonwebtoken::jwk::Jwk;
use serde::{Deserialize, Serialize};

/// Kinds of provisioners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProvisionerType {
    /// Single-use token signed by a configured key
    #[serde(rename = "JWK")]
    Jwk,
    /// Identity provider token bound to a client id
    #[serde(rename = "OIDC")]
    Oidc,
}

impl ProvisionerType {
    /// Wire name, as stored in provisioner references
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisionerType::Jwk => "JWK",
            ProvisionerType::Oidc => "OIDC",
        }
    }
}

impl std::fmt::Display for ProvisionerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProvisionerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "JWK" => Ok(ProvisionerType::Jwk),
            "OIDC" => Ok(ProvisionerType::Oidc),
            _ => Err(format!("unknown provisioner type: {}", s)),
        }
    }
}

/// Provisioner configuration, tagged by `type`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProvisionerConfig {
    #[serde(rename = "JWK")]
    Jwk(JwkProvisionerConfig),
    #[serde(rename = "OIDC")]
    Oidc(OidcProvisionerConfig),
}

impl ProvisionerConfig {
    /// Configured provisioner name
    pub fn name(&self) -> &str {
        match self {
            ProvisionerConfig::Jwk(c) => &c.name,
            ProvisionerConfig::Oidc(c) => &c.name,
        }
    }
}

/// JWK provisioner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwkProvisionerConfig {
    /// Provisioner name, also the expected token issuer
    pub name: String,

    /// Public key that signs tokens; must carry a `kid`
    pub key: Jwk,

    /// Duration bounds and switches
    #[serde(default)]
    pub claims: SshDurations,
}

/// OIDC provisioner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OidcProvisionerConfig {
    pub name: String,

    #[serde(rename = "clientID")]
    pub client_id: String,

    /// OpenID discovery document URL
    pub configuration_endpoint: String,

    /// Emails allowed to request any principal
    #[serde(default)]
    pub admins: Vec<String>,

    /// Allowed email domains; empty allows all
    #[serde(default)]
    pub domains: Vec<String>,

    #[serde(default)]
    pub claims: SshDurations,
}
