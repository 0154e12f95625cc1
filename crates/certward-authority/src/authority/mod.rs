//! The certificate authority
//!
//! [`Authority`] owns the provisioner registry, the replay guard and the SSH
//! CA keys. It authorizes one-time tokens and signs certificates under the
//! constraints those tokens grant.

pub mod authorize;
pub mod replay;
pub mod ssh;
pub mod templates;

use certward_core::SshCaKey;
use certward_provisioner::ProvisionerRegistry;
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use crate::config::{AuthorityConfig, SshConfig};
use crate::error::{AuthorityError, Result};
use replay::ReplayGuard;
use templates::SshTemplates;

/// CA signing keys. Either may be absent.
#[derive(Debug, Clone, Default)]
pub struct SshCaKeys {
    pub user: Option<SshCaKey>,
    pub host: Option<SshCaKey>,
}

impl SshCaKeys {
    /// Load the configured keys, generating ephemeral ones for missing paths
    pub fn load_or_generate(config: &SshConfig) -> Result<Self> {
        let load = |path: &Option<std::path::PathBuf>, purpose: &str| -> Result<SshCaKey> {
            let key = match path {
                Some(path) => SshCaKey::read_openssh_file(path)
                    .map_err(|e| AuthorityError::Config(e.to_string()))?,
                None => {
                    let key = SshCaKey::generate()
                        .map_err(|e| AuthorityError::Internal(e.to_string()))?;
                    info!(purpose = purpose, "Generated ephemeral SSH CA key");
                    key
                }
            };
            info!(purpose = purpose, fingerprint = %key.fingerprint(), "Loaded SSH CA key");
            Ok(key)
        };

        Ok(Self {
            user: Some(load(&config.user_key, "user")?),
            host: Some(load(&config.host_key, "host")?),
        })
    }
}

/// The SSH certificate authority
pub struct Authority {
    registry: Arc<ProvisionerRegistry>,
    replay: ReplayGuard,
    /// Process start, unix seconds
    started_at: i64,
    disable_issued_at_check: bool,
    ssh: Option<SshSettings>,
    templates: SshTemplates,
}

/// SSH keys plus add-user settings; present only when SSH is configured
struct SshSettings {
    keys: SshCaKeys,
    add_user_principal: String,
    add_user_command: String,
}

impl Authority {
    /// Build an authority from configuration, constructing the provisioners
    /// it names.
    pub fn new(config: AuthorityConfig, keys: SshCaKeys) -> Result<Self> {
        let registry = ProvisionerRegistry::from_configs(
            config.provisioners.clone(),
            &config.sign_audiences(),
        )
        .map_err(|e| AuthorityError::Config(e.to_string()))?;
        Self::with_registry(config, Arc::new(registry), keys)
    }

    /// Build an authority around an existing registry
    pub fn with_registry(
        config: AuthorityConfig,
        registry: Arc<ProvisionerRegistry>,
        keys: SshCaKeys,
    ) -> Result<Self> {
        config.validate()?;

        let ssh = config.ssh.as_ref().map(|ssh| SshSettings {
            keys,
            add_user_principal: ssh.add_user_principal.clone(),
            add_user_command: ssh.add_user_command.clone(),
        });

        let authority = Self {
            registry,
            replay: ReplayGuard::new(),
            started_at: Utc::now().timestamp(),
            disable_issued_at_check: config.disable_issued_at_check,
            ssh,
            templates: config.templates.unwrap_or_default(),
        };

        info!(
            provisioners = authority.registry.len(),
            ssh_enabled = authority.ssh.is_some(),
            issued_at_check = !authority.disable_issued_at_check,
            "Authority initialized"
        );

        Ok(authority)
    }

    /// Provisioner registry
    pub fn registry(&self) -> &ProvisionerRegistry {
        &self.registry
    }

    /// Replay guard
    pub fn replay_guard(&self) -> &ReplayGuard {
        &self.replay
    }

    /// Process start time, unix seconds
    pub fn started_at(&self) -> i64 {
        self.started_at
    }

    /// Override the recorded start time
    pub fn with_started_at(mut self, started_at: i64) -> Self {
        self.started_at = started_at;
        self
    }
}

impl std::fmt::Debug for Authority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authority")
            .field("registry", &self.registry)
            .field("started_at", &self.started_at)
            .field("ssh_enabled", &self.ssh.is_some())
            .finish()
    }
}
