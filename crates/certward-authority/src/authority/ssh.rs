//! SSH certificate issuance, CA keys and configuration templates

use certward_core::{apply_all, CertType, CertificateTemplate, SignOption, SshCaKey, SshOptions};
use chrono::Utc;
use ssh_key::{Certificate, PublicKey};
use std::collections::{BTreeMap, HashMap};
use tracing::info;

use super::templates::{render_all, variables, TemplateOutput};
use super::Authority;
use crate::error::{AuthorityError, ErrorContext, Result};

/// Public CA keys; either may be absent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SshKeys {
    pub user_key: Option<PublicKey>,
    pub host_key: Option<PublicKey>,
}

impl Authority {
    fn ca_key(&self, cert_type: CertType) -> Option<&SshCaKey> {
        let keys = &self.ssh.as_ref()?.keys;
        match cert_type {
            CertType::User => keys.user.as_ref(),
            CertType::Host => keys.host.as_ref(),
        }
    }

    /// Sign `key` with the requested options under the authorized constraints.
    ///
    /// Constraints run in order against a template built from `opts`; the
    /// completed template must then pass the final completeness check.
    pub fn sign_ssh(
        &self,
        key: PublicKey,
        opts: &SshOptions,
        sign_options: &[SignOption],
    ) -> Result<Certificate> {
        let now = Utc::now();
        let mut tpl = CertificateTemplate::new(key, opts, now);

        apply_all(sign_options, opts, &mut tpl, now)
            .and_then(|_| SignOption::DefaultValidator.apply(opts, &mut tpl, now))
            .map_err(|e| {
                AuthorityError::forbidden(
                    format!("sign ssh: {}", e),
                    ErrorContext::default().with_key_id(tpl.key_id.clone()),
                )
            })?;

        let cert_type = tpl.cert_type.unwrap_or(CertType::User);
        let ca = self.ca_key(cert_type).ok_or_else(|| {
            AuthorityError::forbidden(
                format!("sign ssh: {} certificate signing is not enabled", cert_type),
                ErrorContext::default().with_key_id(tpl.key_id.clone()),
            )
        })?;

        let cert = ca.sign(&tpl).map_err(|e| {
            AuthorityError::forbidden(
                format!("sign ssh: {}", e),
                ErrorContext::default().with_key_id(tpl.key_id.clone()),
            )
        })?;

        info!(
            serial = cert.serial(),
            key_id = %cert.key_id(),
            cert_type = %cert_type,
            principals = ?cert.valid_principals(),
            valid_before = cert.valid_before(),
            "Signed SSH certificate"
        );
        Ok(cert)
    }

    /// Sign the add-user companion of a user certificate.
    ///
    /// The companion is a user certificate for the configured add-user
    /// principal, valid for the same window as `subject`, whose forced
    /// command creates the subject's account on first login.
    pub fn sign_ssh_add_user(&self, key: PublicKey, subject: &Certificate) -> Result<Certificate> {
        let context = ErrorContext::default()
            .with_serial(subject.serial())
            .with_key_id(subject.key_id());

        let ssh = self.ssh.as_ref().ok_or_else(|| {
            AuthorityError::forbidden(
                "sign ssh add user: user certificate signing is not enabled",
                context.clone(),
            )
        })?;
        let ca = ssh.keys.user.as_ref().ok_or_else(|| {
            AuthorityError::forbidden(
                "sign ssh add user: user certificate signing is not enabled",
                context.clone(),
            )
        })?;

        if !subject.cert_type().is_user() {
            return Err(AuthorityError::forbidden(
                "sign ssh add user: certificate is not a user certificate",
                context,
            ));
        }
        let principal = match subject.valid_principals() {
            [principal] => principal,
            _ => {
                return Err(AuthorityError::forbidden(
                    "sign ssh add user: certificate does not have only one principal",
                    context,
                ))
            }
        };

        let mut critical_options = BTreeMap::new();
        critical_options.insert(
            "force-command".to_string(),
            ssh.add_user_command.replace("<principal>", principal),
        );

        let tpl = CertificateTemplate {
            key,
            cert_type: Some(CertType::User),
            key_id: format!("{}-{}", principal, ssh.add_user_principal),
            principals: vec![ssh.add_user_principal.clone()],
            valid_after: subject.valid_after(),
            valid_before: subject.valid_before(),
            critical_options,
            extensions: BTreeMap::new(),
        };

        let cert = ca.sign(&tpl).map_err(|e| {
            AuthorityError::forbidden(format!("sign ssh add user: {}", e), context.clone())
        })?;

        info!(
            serial = cert.serial(),
            key_id = %cert.key_id(),
            subject_serial = subject.serial(),
            "Signed SSH add-user certificate"
        );
        Ok(cert)
    }

    /// CA public keys. `NotFound` when SSH is not configured at all.
    pub fn ssh_keys(&self) -> Result<SshKeys> {
        let ssh = self
            .ssh
            .as_ref()
            .ok_or_else(|| AuthorityError::NotFound("ssh is not configured".into()))?;

        let keys = SshKeys {
            user_key: ssh.keys.user.as_ref().map(|k| k.public_key().clone()),
            host_key: ssh.keys.host.as_ref().map(|k| k.public_key().clone()),
        };
        if keys.user_key.is_none() && keys.host_key.is_none() {
            return Err(AuthorityError::NotFound("ssh is not configured".into()));
        }
        Ok(keys)
    }

    /// Render the configuration templates for `cert_type`.
    ///
    /// CA keys that are not configured are left out of the variable tree;
    /// only templates that reference them fail.
    pub fn ssh_config(
        &self,
        cert_type: CertType,
        data: &HashMap<String, String>,
    ) -> Result<Vec<TemplateOutput>> {
        let keys = self.ssh.as_ref().map(|ssh| &ssh.keys);
        let user_key = keys
            .and_then(|k| k.user.as_ref())
            .map(|k| authorized_key(k.public_key()))
            .transpose()?;
        let host_key = keys
            .and_then(|k| k.host.as_ref())
            .map(|k| authorized_key(k.public_key()))
            .transpose()?;
        let vars = variables(data, user_key.as_deref(), host_key.as_deref());

        let templates = match cert_type {
            CertType::User => &self.templates.user,
            CertType::Host => &self.templates.host,
        };
        render_all(templates, &vars)
    }
}

/// Public key in `authorized_keys` format
fn authorized_key(key: &PublicKey) -> Result<String> {
    key.to_openssh()
        .map_err(|e| AuthorityError::Internal(format!("error encoding public key: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::SshCaKeys;
    use crate::config::AuthorityConfig;
    use certward_provisioner::ProvisionerRegistryBuilder;
    use std::sync::Arc;

    fn authority(keys: SshCaKeys) -> Authority {
        Authority::with_registry(
            AuthorityConfig::default(),
            Arc::new(ProvisionerRegistryBuilder::new().build().unwrap()),
            keys,
        )
        .unwrap()
    }

    fn keys() -> SshCaKeys {
        SshCaKeys {
            user: Some(SshCaKey::generate().unwrap()),
            host: Some(SshCaKey::generate().unwrap()),
        }
    }

    fn subject_key() -> PublicKey {
        SshCaKey::generate().unwrap().public_key().clone()
    }

    fn user_options(principals: &[&str]) -> Vec<SignOption> {
        vec![
            SignOption::KeyIdModifier("alice".to_string()),
            SignOption::DefaultsModifier(SshOptions {
                cert_type: Some(CertType::User),
                principals: principals.iter().map(|p| p.to_string()).collect(),
                ..Default::default()
            }),
            SignOption::DefaultExtensions,
            SignOption::DefaultDuration(Default::default()),
        ]
    }

    #[test]
    fn test_sign_ssh_user() {
        let authority = authority(keys());
        let cert = authority
            .sign_ssh(subject_key(), &SshOptions::default(), &user_options(&["alice"]))
            .unwrap();

        assert!(cert.cert_type().is_user());
        assert_eq!(cert.valid_principals(), ["alice".to_string()]);
        assert_eq!(cert.valid_before() - cert.valid_after(), 16 * 3600);
    }

    #[test]
    fn test_sign_ssh_final_check() {
        let authority = authority(keys());
        let err = authority
            .sign_ssh(subject_key(), &SshOptions::default(), &user_options(&[]))
            .unwrap_err();
        assert!(matches!(err, AuthorityError::Forbidden { .. }));
        assert!(err.to_string().contains("principals cannot be empty"));
    }

    #[test]
    fn test_sign_ssh_missing_ca_key() {
        let authority = authority(SshCaKeys {
            user: Some(SshCaKey::generate().unwrap()),
            host: None,
        });
        let opts = SshOptions {
            cert_type: Some(CertType::Host),
            principals: vec!["web".to_string()],
            ..Default::default()
        };
        let err = authority
            .sign_ssh(subject_key(), &opts, &[
                SignOption::KeyIdModifier("web".to_string()),
                SignOption::DefaultDuration(Default::default()),
            ])
            .unwrap_err();
        assert!(err.to_string().contains("host certificate signing is not enabled"));
    }

    #[test]
    fn test_add_user_certificate() {
        let authority = authority(keys());
        let primary = authority
            .sign_ssh(subject_key(), &SshOptions::default(), &user_options(&["alice"]))
            .unwrap();

        let companion = authority.sign_ssh_add_user(subject_key(), &primary).unwrap();
        assert!(companion.cert_type().is_user());
        assert_eq!(companion.valid_principals(), ["provisioner".to_string()]);
        assert_eq!(companion.key_id(), "alice-provisioner");
        assert_eq!(companion.valid_after(), primary.valid_after());
        assert_eq!(companion.valid_before(), primary.valid_before());
        assert_eq!(
            companion.critical_options().get("force-command").map(String::as_str),
            Some("sudo useradd -m alice; nohup sudo passwd -d alice >/dev/null 2>&1 &")
        );
    }

    #[test]
    fn test_add_user_requires_single_principal() {
        let authority = authority(keys());
        let primary = authority
            .sign_ssh(subject_key(), &SshOptions::default(), &user_options(&["alice", "root"]))
            .unwrap();
        assert!(matches!(
            authority.sign_ssh_add_user(subject_key(), &primary),
            Err(AuthorityError::Forbidden { .. })
        ));
    }

    #[test]
    fn test_ssh_keys_absent() {
        let config = AuthorityConfig {
            ssh: None,
            ..Default::default()
        };
        let authority = Authority::with_registry(
            config,
            Arc::new(ProvisionerRegistryBuilder::new().build().unwrap()),
            SshCaKeys::default(),
        )
        .unwrap();
        assert!(matches!(authority.ssh_keys(), Err(AuthorityError::NotFound(_))));
    }

    #[test]
    fn test_ssh_keys_partial() {
        let user = SshCaKey::generate().unwrap();
        let authority = authority(SshCaKeys {
            user: Some(user.clone()),
            host: None,
        });
        let keys = authority.ssh_keys().unwrap();
        assert_eq!(keys.user_key.as_ref(), Some(user.public_key()));
        assert!(keys.host_key.is_none());
    }

    #[test]
    fn test_ssh_config_host() {
        let authority = authority(keys());
        let mut data = HashMap::new();
        data.insert("Certificate".to_string(), "ssh_host_ed25519_key-cert.pub".to_string());
        data.insert("Key".to_string(), "ssh_host_ed25519_key".to_string());

        let outputs = authority.ssh_config(CertType::Host, &data).unwrap();
        assert_eq!(outputs.len(), 2);
        let ca_pub = String::from_utf8(outputs[1].content.clone()).unwrap();
        assert!(ca_pub.starts_with("ssh-ed25519 "));
    }

    #[test]
    fn test_ssh_config_without_ssh() {
        let config = AuthorityConfig {
            ssh: None,
            ..Default::default()
        };
        let authority = Authority::with_registry(
            config,
            Arc::new(ProvisionerRegistryBuilder::new().build().unwrap()),
            SshCaKeys::default(),
        )
        .unwrap();
        let mut data = HashMap::new();
        data.insert("ConfigDir".to_string(), "/home/alice/.certward".to_string());

        // include and config render; known_hosts needs the host CA key
        let err = authority.ssh_config(CertType::User, &data).unwrap_err();
        assert!(matches!(err, AuthorityError::Internal(_)));
        assert!(err.to_string().contains("known_hosts"));
    }

    #[test]
    fn test_ssh_config_omits_missing_key() {
        let authority = authority(SshCaKeys {
            user: Some(SshCaKey::generate().unwrap()),
            host: None,
        });
        let mut data = HashMap::new();
        data.insert("Certificate".to_string(), "ssh_host_ed25519_key-cert.pub".to_string());
        data.insert("Key".to_string(), "ssh_host_ed25519_key".to_string());

        let outputs = authority.ssh_config(CertType::Host, &data).unwrap();
        assert_eq!(outputs.len(), 2);
    }
}
