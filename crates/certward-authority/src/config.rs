//! Authority configuration
//!
//! Loaded from a JSON file named by `CERTWARD_CONFIG`:
//!
//! ```json
//! {
//!   "dnsNames": ["ca.internal"],
//!   "disableIssuedAtCheck": false,
//!   "ssh": { "userKey": "/etc/certward/ssh_user_ca", "hostKey": "/etc/certward/ssh_host_ca" },
//!   "provisioners": [ { "type": "JWK", "name": "admin", "key": { ... } } ]
//! }
//! ```

use certward_provisioner::ProvisionerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::authority::templates::SshTemplates;
use crate::error::{AuthorityError, Result};

/// Principal of add-user certificates unless configured
pub const DEFAULT_ADD_USER_PRINCIPAL: &str = "provisioner";

/// Forced command of add-user certificates unless configured. `<principal>`
/// is replaced by the principal of the primary certificate.
pub const DEFAULT_ADD_USER_COMMAND: &str =
    "sudo useradd -m <principal>; nohup sudo passwd -d <principal> >/dev/null 2>&1 &";

/// Top level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorityConfig {
    /// Names the authority is reachable at; used to derive token audiences
    #[serde(default = "default_dns_names")]
    pub dns_names: Vec<String>,

    /// Accept tokens issued before the process started
    #[serde(default)]
    pub disable_issued_at_check: bool,

    /// SSH CA settings; absent disables SSH
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh: Option<SshConfig>,

    #[serde(default)]
    pub provisioners: Vec<ProvisionerConfig>,

    /// Configuration templates; defaults ship when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub templates: Option<SshTemplates>,
}

fn default_dns_names() -> Vec<String> {
    vec!["localhost".to_string()]
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            dns_names: default_dns_names(),
            disable_issued_at_check: false,
            ssh: Some(SshConfig::default()),
            provisioners: Vec::new(),
            templates: None,
        }
    }
}

/// SSH CA settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshConfig {
    /// OpenSSH private key signing user certificates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_key: Option<PathBuf>,

    /// OpenSSH private key signing host certificates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_key: Option<PathBuf>,

    #[serde(default = "default_add_user_principal")]
    pub add_user_principal: String,

    #[serde(default = "default_add_user_command")]
    pub add_user_command: String,
}

fn default_add_user_principal() -> String {
    DEFAULT_ADD_USER_PRINCIPAL.to_string()
}

fn default_add_user_command() -> String {
    DEFAULT_ADD_USER_COMMAND.to_string()
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user_key: None,
            host_key: None,
            add_user_principal: default_add_user_principal(),
            add_user_command: default_add_user_command(),
        }
    }
}

impl AuthorityConfig {
    /// Read and validate a JSON configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AuthorityError::Config(format!("error reading {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            AuthorityError::Config(format!("error parsing {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.dns_names.is_empty() || self.dns_names.iter().any(|n| n.trim().is_empty()) {
            return Err(AuthorityError::Config("dnsNames cannot be empty".into()));
        }
        if let Some(ssh) = &self.ssh {
            if ssh.add_user_principal.is_empty() {
                return Err(AuthorityError::Config("ssh.addUserPrincipal cannot be empty".into()));
            }
        }
        Ok(())
    }

    /// Audiences accepted by JWK provisioners
    pub fn sign_audiences(&self) -> Vec<String> {
        self.dns_names
            .iter()
            .flat_map(|name| {
                [
                    format!("https://{}/ssh/sign", name),
                    format!("https://{}/1.0/ssh/sign", name),
                    format!("https://{}/sign", name),
                    format!("https://{}/1.0/sign", name),
                ]
            })
            .collect()
    }
}
