//! Signing constraints
//!
//! A provisioner authorizes a request by returning an ordered list of
//! [`SignOption`]s. The signer applies them in order to the certificate
//! template: modifiers fill or force fields, validators reject the request.
//! The first failing option aborts signing.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use ssh_key::public::KeyData;
use tracing::debug;

use crate::duration::serde_duration;
use crate::error::{CoreError, Result};
use crate::ssh::{CertType, CertificateTemplate, ProvisionerReference, SshOptions, PROVISIONER_EXTENSION};

/// Extensions granted to user certificates that request none
pub const DEFAULT_USER_EXTENSIONS: [&str; 5] = [
    "permit-X11-forwarding",
    "permit-agent-forwarding",
    "permit-port-forwarding",
    "permit-pty",
    "permit-user-rc",
];

const MIN_RSA_KEY_BITS: usize = 2048;

// ============================================================================
// Durations
// ============================================================================

/// Per-provisioner SSH certificate duration bounds and switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshDurations {
    #[serde(rename = "minUserSSHCertDuration", with = "serde_duration")]
    pub min_user: Duration,
    #[serde(rename = "maxUserSSHCertDuration", with = "serde_duration")]
    pub max_user: Duration,
    #[serde(rename = "defaultUserSSHCertDuration", with = "serde_duration")]
    pub default_user: Duration,
    #[serde(rename = "minHostSSHCertDuration", with = "serde_duration")]
    pub min_host: Duration,
    #[serde(rename = "maxHostSSHCertDuration", with = "serde_duration")]
    pub max_host: Duration,
    #[serde(rename = "defaultHostSSHCertDuration", with = "serde_duration")]
    pub default_host: Duration,
    #[serde(rename = "enableSSHCA")]
    pub enable_ssh_ca: bool,
    #[serde(rename = "disableRenewal")]
    pub disable_renewal: bool,
}

impl Default for SshDurations {
    fn default() -> Self {
        Self {
            min_user: Duration::minutes(5),
            max_user: Duration::hours(24),
            default_user: Duration::hours(16),
            min_host: Duration::minutes(5),
            max_host: Duration::hours(30 * 24),
            default_host: Duration::hours(30 * 24),
            enable_ssh_ca: true,
            disable_renewal: false,
        }
    }
}

impl SshDurations {
    /// Minimum accepted duration for the certificate type
    pub fn min(&self, cert_type: CertType) -> Duration {
        match cert_type {
            CertType::User => self.min_user,
            CertType::Host => self.min_host,
        }
    }

    /// Maximum accepted duration for the certificate type
    pub fn max(&self, cert_type: CertType) -> Duration {
        match cert_type {
            CertType::User => self.max_user,
            CertType::Host => self.max_host,
        }
    }

    /// Duration used when the request leaves validBefore unset
    pub fn default_duration(&self, cert_type: CertType) -> Duration {
        match cert_type {
            CertType::User => self.default_user,
            CertType::Host => self.default_host,
        }
    }
}

// ============================================================================
// Sign options
// ============================================================================

/// A single signing constraint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignOption {
    /// Requested options must agree with the authorized ones
    OptionsValidator(SshOptions),
    /// Force the certificate type
    CertTypeModifier(CertType),
    /// Force the principals
    PrincipalsModifier(Vec<String>),
    /// Force validAfter (unix seconds)
    ValidAfterModifier(u64),
    /// Force validBefore (unix seconds)
    ValidBeforeModifier(u64),
    /// Force the key id
    KeyIdModifier(String),
    /// Fill type, principals and validity where unset
    DefaultsModifier(SshOptions),
    /// Grant the standard user extensions when none are present
    DefaultExtensions,
    /// Fill the validity window from the provisioner's default duration
    DefaultDuration(SshDurations),
    /// Stamp the provisioner reference used for renewal
    ProvisionerExtension(ProvisionerReference),
    /// Key id must equal the given value
    KeyIdValidator(String),
    /// Reject weak or unsupported public keys
    PublicKeyValidator,
    /// Validity window must fit the provisioner's bounds
    ValidityValidator(SshDurations),
    /// Final completeness check
    DefaultValidator,
}

impl SignOption {
    /// Apply this option. `requested` are the options sent by the client.
    pub fn apply(
        &self,
        requested: &SshOptions,
        tpl: &mut CertificateTemplate,
        now: DateTime<Utc>,
    ) -> Result<()> {
        match self {
            SignOption::OptionsValidator(authorized) => validate_options(authorized, requested),
            SignOption::CertTypeModifier(t) => {
                tpl.cert_type = Some(*t);
                Ok(())
            }
            SignOption::PrincipalsModifier(principals) => {
                tpl.principals = principals.clone();
                Ok(())
            }
            SignOption::ValidAfterModifier(t) => {
                tpl.valid_after = *t;
                Ok(())
            }
            SignOption::ValidBeforeModifier(t) => {
                tpl.valid_before = *t;
                Ok(())
            }
            SignOption::KeyIdModifier(id) => {
                tpl.key_id = id.clone();
                Ok(())
            }
            SignOption::DefaultsModifier(defaults) => {
                if tpl.cert_type.is_none() {
                    tpl.cert_type = defaults.cert_type;
                }
                if tpl.principals.is_empty() {
                    tpl.principals = defaults.principals.clone();
                }
                if tpl.valid_after == 0 {
                    tpl.valid_after = defaults.valid_after.unix(now);
                }
                if tpl.valid_before == 0 {
                    tpl.valid_before = defaults.valid_before.unix(now);
                }
                Ok(())
            }
            SignOption::DefaultExtensions => match tpl.cert_type {
                Some(CertType::User) => {
                    if tpl.extensions.is_empty() {
                        for ext in DEFAULT_USER_EXTENSIONS {
                            tpl.extensions.insert(ext.to_string(), String::new());
                        }
                    }
                    Ok(())
                }
                Some(CertType::Host) => Ok(()),
                None => Err(type_not_set()),
            },
            SignOption::DefaultDuration(durations) => {
                let cert_type = tpl.cert_type.ok_or_else(type_not_set)?;
                if tpl.valid_after == 0 {
                    tpl.valid_after = unix_seconds(now);
                }
                if tpl.valid_before == 0 {
                    let d = durations.default_duration(cert_type).num_seconds().max(0) as u64;
                    tpl.valid_before = tpl.valid_after.saturating_add(d);
                }
                Ok(())
            }
            SignOption::ProvisionerExtension(reference) => {
                tpl.extensions
                    .insert(PROVISIONER_EXTENSION.to_string(), reference.to_extension_value()?);
                Ok(())
            }
            SignOption::KeyIdValidator(want) => {
                if &tpl.key_id != want {
                    return Err(CoreError::ConstraintViolation(format!(
                        "invalid ssh certificate key id; want {}, but got {}",
                        want, tpl.key_id
                    )));
                }
                Ok(())
            }
            SignOption::PublicKeyValidator => validate_public_key(tpl.key.key_data()),
            SignOption::ValidityValidator(durations) => validate_validity(durations, tpl, now),
            SignOption::DefaultValidator => validate_defaults(tpl, now),
        }
    }
}

/// Apply `options` in order, stopping at the first failure.
pub fn apply_all(
    options: &[SignOption],
    requested: &SshOptions,
    tpl: &mut CertificateTemplate,
    now: DateTime<Utc>,
) -> Result<()> {
    for option in options {
        if let Err(e) = option.apply(requested, tpl, now) {
            debug!(option = ?option, error = %e, "Sign option rejected certificate");
            return Err(e);
        }
    }
    Ok(())
}

fn type_not_set() -> CoreError {
    CoreError::ConstraintViolation("ssh certificate type has not been set".to_string())
}

fn unix_seconds(t: DateTime<Utc>) -> u64 {
    u64::try_from(t.timestamp()).unwrap_or(0)
}

fn validate_options(authorized: &SshOptions, requested: &SshOptions) -> Result<()> {
    if let (Some(want), Some(got)) = (authorized.cert_type, requested.cert_type) {
        if want != got {
            return Err(CoreError::ConstraintViolation(format!(
                "ssh certificate type does not match - got {}, want {}",
                got, want
            )));
        }
    }

    if !authorized.principals.is_empty()
        && !requested.principals.is_empty()
        && !requested
            .principals
            .iter()
            .all(|p| authorized.principals.contains(p))
    {
        return Err(CoreError::ConstraintViolation(format!(
            "ssh certificate principals does not match - got {:?}, want {:?}",
            requested.principals, authorized.principals
        )));
    }

    if !authorized.valid_after.is_zero()
        && !requested.valid_after.is_zero()
        && authorized.valid_after != requested.valid_after
    {
        return Err(CoreError::ConstraintViolation(format!(
            "ssh certificate validAfter does not match - got {}, want {}",
            requested.valid_after, authorized.valid_after
        )));
    }

    if !authorized.valid_before.is_zero()
        && !requested.valid_before.is_zero()
        && authorized.valid_before != requested.valid_before
    {
        return Err(CoreError::ConstraintViolation(format!(
            "ssh certificate validBefore does not match - got {}, want {}",
            requested.valid_before, authorized.valid_before
        )));
    }

    Ok(())
}

fn validate_public_key(key: &KeyData) -> Result<()> {
    match key {
        KeyData::Dsa(_) => Err(CoreError::ConstraintViolation(
            "ssh certificate key algorithm (DSA) is not supported".to_string(),
        )),
        KeyData::Rsa(rsa) => {
            let bits = significant_bits(rsa.n.as_bytes());
            if bits < MIN_RSA_KEY_BITS {
                return Err(CoreError::ConstraintViolation(format!(
                    "ssh certificate key must be at least {} bits ({} bytes)",
                    MIN_RSA_KEY_BITS,
                    MIN_RSA_KEY_BITS / 8
                )));
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn significant_bits(be_bytes: &[u8]) -> usize {
    let trimmed: &[u8] = match be_bytes.iter().position(|b| *b != 0) {
        Some(i) => &be_bytes[i..],
        None => return 0,
    };
    trimmed.len() * 8 - trimmed[0].leading_zeros() as usize
}

fn check_window(tpl: &CertificateTemplate, now: DateTime<Utc>) -> Result<()> {
    if tpl.valid_after == 0 {
        return Err(CoreError::ConstraintViolation(
            "ssh certificate validAfter cannot be 0".to_string(),
        ));
    }
    if tpl.valid_before < unix_seconds(now) {
        return Err(CoreError::ConstraintViolation(
            "ssh certificate validBefore cannot be in the past".to_string(),
        ));
    }
    if tpl.valid_before < tpl.valid_after {
        return Err(CoreError::ConstraintViolation(
            "ssh certificate validBefore cannot be before validAfter".to_string(),
        ));
    }
    Ok(())
}

fn validate_validity(
    durations: &SshDurations,
    tpl: &CertificateTemplate,
    now: DateTime<Utc>,
) -> Result<()> {
    check_window(tpl, now)?;
    let cert_type = tpl.cert_type.ok_or_else(type_not_set)?;

    let requested = Duration::seconds((tpl.valid_before - tpl.valid_after) as i64);
    let min = durations.min(cert_type);
    let max = durations.max(cert_type);

    if requested < min {
        return Err(CoreError::ConstraintViolation(format!(
            "requested duration of {} is less than minimum accepted duration for selected provisioner of {}",
            crate::duration::format_duration(requested),
            crate::duration::format_duration(min)
        )));
    }
    if requested > max {
        return Err(CoreError::ConstraintViolation(format!(
            "requested duration of {} is more than the authorized maximum of {}",
            crate::duration::format_duration(requested),
            crate::duration::format_duration(max)
        )));
    }
    Ok(())
}

fn validate_defaults(tpl: &CertificateTemplate, now: DateTime<Utc>) -> Result<()> {
    let cert_type = tpl.cert_type.ok_or_else(type_not_set)?;
    if tpl.key_id.is_empty() {
        return Err(CoreError::ConstraintViolation(
            "ssh certificate key id cannot be empty".to_string(),
        ));
    }
    if tpl.principals.is_empty() {
        return Err(CoreError::ConstraintViolation(
            "ssh certificate valid principals cannot be empty".to_string(),
        ));
    }
    check_window(tpl, now)?;
    if cert_type == CertType::User && tpl.extensions.is_empty() {
        return Err(CoreError::ConstraintViolation(
            "ssh certificate extensions cannot be empty".to_string(),
        ));
    }
    Ok(())
}
