//! SSH certificate options and templates
//!
//! - `SshOptions`: what a request or token asks for
//! - `CertificateTemplate`: the certificate being assembled before signing
//! - `ProvisionerReference`: the extension that ties a certificate back to
//!   the provisioner that authorized it

use serde::{Deserialize, Deserializer, Serialize};
use ssh_key::{Certificate, PublicKey};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::duration::TimeDuration;
use crate::error::{CoreError, Result};

/// Certificate extension holding the JSON encoded [`ProvisionerReference`]
pub const PROVISIONER_EXTENSION: &str = "provisioner@certward";

/// SSH certificate type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertType {
    /// Certificate authenticating a user to a host
    User,
    /// Certificate authenticating a host to a user
    Host,
}

impl CertType {
    /// Wire name ("user" or "host")
    pub fn as_str(&self) -> &'static str {
        match self {
            CertType::User => "user",
            CertType::Host => "host",
        }
    }
}

impl fmt::Display for CertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CertType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(CertType::User),
            "host" => Ok(CertType::Host),
            other => Err(CoreError::ConstraintViolation(format!(
                "unknown certificate type '{}'",
                other
            ))),
        }
    }
}

impl From<CertType> for ssh_key::certificate::CertType {
    fn from(t: CertType) -> Self {
        match t {
            CertType::User => ssh_key::certificate::CertType::User,
            CertType::Host => ssh_key::certificate::CertType::Host,
        }
    }
}

impl From<ssh_key::certificate::CertType> for CertType {
    fn from(t: ssh_key::certificate::CertType) -> Self {
        if t.is_host() {
            CertType::Host
        } else {
            CertType::User
        }
    }
}

/// Requested or authorized SSH certificate options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshOptions {
    #[serde(
        default,
        deserialize_with = "empty_cert_type",
        skip_serializing_if = "Option::is_none"
    )]
    pub cert_type: Option<CertType>,

    #[serde(rename = "keyID", default, skip_serializing_if = "String::is_empty")]
    pub key_id: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub principals: Vec<String>,

    #[serde(default, skip_serializing_if = "TimeDuration::is_zero")]
    pub valid_after: TimeDuration,

    #[serde(default, skip_serializing_if = "TimeDuration::is_zero")]
    pub valid_before: TimeDuration,
}

fn empty_cert_type<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<CertType>, D::Error> {
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(s) if s.is_empty() => Ok(None),
        Some(s) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

/// A certificate under construction
///
/// Times are unix seconds; `0` means not set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateTemplate {
    pub key: PublicKey,
    pub cert_type: Option<CertType>,
    pub key_id: String,
    pub principals: Vec<String>,
    pub valid_after: u64,
    pub valid_before: u64,
    pub critical_options: BTreeMap<String, String>,
    pub extensions: BTreeMap<String, String>,
}

impl CertificateTemplate {
    /// Start a template from the requested options, resolving relative times
    /// against `now`.
    pub fn new(key: PublicKey, opts: &SshOptions, now: DateTime<Utc>) -> Self {
        Self {
            key,
            cert_type: opts.cert_type,
            key_id: opts.key_id.clone(),
            principals: opts.principals.clone(),
            valid_after: opts.valid_after.unix(now),
            valid_before: opts.valid_before.unix(now),
            critical_options: BTreeMap::new(),
            extensions: BTreeMap::new(),
        }
    }

    /// Start a template from a bare public key
    pub fn for_key(key: PublicKey) -> Self {
        Self {
            key,
            cert_type: None,
            key_id: String::new(),
            principals: Vec::new(),
            valid_after: 0,
            valid_before: 0,
            critical_options: BTreeMap::new(),
            extensions: BTreeMap::new(),
        }
    }
}

/// Identifies the provisioner that authorized a certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionerReference {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(rename = "credentialId")]
    pub credential_id: String,
}

impl ProvisionerReference {
    /// Encode as the extension value
    pub fn to_extension_value(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Read the reference from a certificate. `Ok(None)` if the extension is
    /// absent.
    pub fn from_certificate(cert: &Certificate) -> Result<Option<Self>> {
        match cert.extensions().get(PROVISIONER_EXTENSION) {
            None => Ok(None),
            Some(value) => Ok(Some(serde_json::from_str(value)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cert_type_parse() {
        assert_eq!("user".parse::<CertType>().unwrap(), CertType::User);
        assert_eq!("host".parse::<CertType>().unwrap(), CertType::Host);
        assert!("robot".parse::<CertType>().is_err());
        assert!("User".parse::<CertType>().is_err());
    }

    #[test]
    fn test_options_deserialize() {
        let opts: SshOptions = serde_json::from_value(serde_json::json!({
            "certType": "host",
            "keyID": "web-1",
            "principals": ["web-1.internal"],
            "validBefore": "1h"
        }))
        .unwrap();

        assert_eq!(opts.cert_type, Some(CertType::Host));
        assert_eq!(opts.key_id, "web-1");
        assert!(opts.valid_after.is_zero());
        assert!(!opts.valid_before.is_zero());
    }

    #[test]
    fn test_options_empty_cert_type_is_unset() {
        let opts: SshOptions =
            serde_json::from_value(serde_json::json!({"certType": ""})).unwrap();
        assert_eq!(opts.cert_type, None);

        assert!(serde_json::from_value::<SshOptions>(serde_json::json!({"certType": "robot"})).is_err());
    }

    #[test]
    fn test_provisioner_reference_json() {
        let reference = ProvisionerReference {
            kind: "JWK".to_string(),
            name: "admin".to_string(),
            credential_id: "kid-1".to_string(),
        };
        let value = reference.to_extension_value().unwrap();
        assert_eq!(value, r#"{"type":"JWK","name":"admin","credentialId":"kid-1"}"#);
    }
}
