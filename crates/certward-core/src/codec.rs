//! Certificate and public key transport encoding
//!
//! Keys and certificates travel as the base64 (standard alphabet) encoding of
//! their SSH wire format, inside JSON strings. An absent value is JSON `null`;
//! both `null` and `""` decode to absent.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ssh_key::{Certificate, PublicKey};

use crate::error::{CoreError, Result};

const CERT_ALGORITHM_SUFFIX: &str = "-cert-v01@openssh.com";

/// Encode a certificate as base64 wire format
pub fn encode_certificate(cert: &Certificate) -> Result<String> {
    let bytes = cert
        .to_bytes()
        .map_err(|e| CoreError::Encode(format!("error encoding certificate: {}", e)))?;
    Ok(STANDARD.encode(bytes))
}

/// Encode a public key as base64 wire format
pub fn encode_public_key(key: &PublicKey) -> Result<String> {
    let bytes = key
        .to_bytes()
        .map_err(|e| CoreError::Encode(format!("error encoding public key: {}", e)))?;
    Ok(STANDARD.encode(bytes))
}

/// Decode a certificate. Empty input is absent.
pub fn decode_certificate(encoded: &str) -> Result<Option<Certificate>> {
    if encoded.is_empty() {
        return Ok(None);
    }
    let bytes = decode_base64(encoded)?;
    let algorithm = wire_algorithm(&bytes)?;
    if !algorithm.ends_with(CERT_ALGORITHM_SUFFIX) {
        return Err(CoreError::Decode(format!(
            "error decoding certificate: found public key of type {}",
            algorithm
        )));
    }
    Certificate::from_bytes(&bytes)
        .map(Some)
        .map_err(|e| CoreError::Decode(format!("error parsing certificate: {}", e)))
}

/// Decode a public key. Empty input is absent.
pub fn decode_public_key(encoded: &str) -> Result<Option<PublicKey>> {
    if encoded.is_empty() {
        return Ok(None);
    }
    let bytes = decode_base64(encoded)?;
    let algorithm = wire_algorithm(&bytes)?;
    if algorithm.ends_with(CERT_ALGORITHM_SUFFIX) {
        return Err(CoreError::Decode(format!(
            "error decoding public key: found certificate of type {}",
            algorithm
        )));
    }
    PublicKey::from_bytes(&bytes)
        .map(Some)
        .map_err(|e| CoreError::Decode(format!("error parsing public key: {}", e)))
}

fn decode_base64(encoded: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(encoded)
        .map_err(|e| CoreError::Decode(format!("error decoding base64: {}", e)))
}

/// Read the leading length-prefixed algorithm name of an SSH wire blob
fn wire_algorithm(bytes: &[u8]) -> Result<&str> {
    let truncated = || CoreError::Decode("error parsing ssh wire format: truncated".to_string());

    let prefix: [u8; 4] = bytes
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(truncated)?;
    let len = u32::from_be_bytes(prefix) as usize;
    let name = bytes.get(4..4usize.saturating_add(len)).ok_or_else(truncated)?;
    std::str::from_utf8(name)
        .map_err(|_| CoreError::Decode("error parsing ssh wire format: invalid algorithm name".to_string()))
}

// ============================================================================
// Serde wrappers
// ============================================================================

/// An optional certificate encoded for JSON transport
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SshCertificate(pub Option<Certificate>);

/// An optional public key encoded for JSON transport
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SshPublicKey(pub Option<PublicKey>);

impl From<Certificate> for SshCertificate {
    fn from(cert: Certificate) -> Self {
        Self(Some(cert))
    }
}

impl From<PublicKey> for SshPublicKey {
    fn from(key: PublicKey) -> Self {
        Self(Some(key))
    }
}

impl Serialize for SshCertificate {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match &self.0 {
            None => serializer.serialize_none(),
            Some(cert) => {
                let encoded = encode_certificate(cert).map_err(serde::ser::Error::custom)?;
                serializer.serialize_str(&encoded)
            }
        }
    }
}

impl<'de> Deserialize<'de> for SshCertificate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        decode_certificate(&encoded)
            .map(SshCertificate)
            .map_err(serde::de::Error::custom)
    }
}

impl Serialize for SshPublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match &self.0 {
            None => serializer.serialize_none(),
            Some(key) => {
                let encoded = encode_public_key(key).map_err(serde::ser::Error::custom)?;
                serializer.serialize_str(&encoded)
            }
        }
    }
}

impl<'de> Deserialize<'de> for SshPublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        decode_public_key(&encoded)
            .map(SshPublicKey)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SshCaKey;
    use crate::ssh::{CertType, CertificateTemplate};

    fn sample_certificate() -> Certificate {
        let ca = SshCaKey::generate().unwrap();
        let subject = SshCaKey::generate().unwrap();
        let mut tpl = CertificateTemplate::for_key(subject.public_key().clone());
        tpl.cert_type = Some(CertType::User);
        tpl.key_id = "alice".to_string();
        tpl.principals = vec!["alice".to_string()];
        tpl.valid_after = 1_700_000_000;
        tpl.valid_before = 1_700_003_600;
        ca.sign(&tpl).unwrap()
    }

    #[test]
    fn test_certificate_roundtrip() {
        let cert = sample_certificate();
        let encoded = encode_certificate(&cert).unwrap();
        let decoded = decode_certificate(&encoded).unwrap().unwrap();
        assert_eq!(decoded, cert);
    }

    #[test]
    fn test_absent_values() {
        assert!(decode_certificate("").unwrap().is_none());
        assert!(decode_public_key("").unwrap().is_none());

        let cert: SshCertificate = serde_json::from_str("null").unwrap();
        assert!(cert.0.is_none());
        assert_eq!(serde_json::to_string(&SshCertificate(None)).unwrap(), "null");

        let key: SshPublicKey = serde_json::from_str("\"\"").unwrap();
        assert!(key.0.is_none());
    }

    #[test]
    fn test_public_key_in_certificate_field() {
        let key = SshCaKey::generate().unwrap();
        let encoded = encode_public_key(key.public_key()).unwrap();

        let err = decode_certificate(&encoded).unwrap_err();
        assert!(err.to_string().contains("found public key of type ssh-ed25519"));

        assert_eq!(decode_public_key(&encoded).unwrap().as_ref(), Some(key.public_key()));
    }

    #[test]
    fn test_certificate_in_key_field() {
        let encoded = encode_certificate(&sample_certificate()).unwrap();
        assert!(decode_public_key(&encoded).is_err());
    }

    #[test]
    fn test_malformed_input() {
        assert!(decode_certificate("!!!not base64!!!").is_err());
        assert!(decode_certificate("AAAA").is_err());
        assert!(decode_public_key(&STANDARD.encode(b"\x00\x00\x00\x0bssh-ed25519")).is_err());
        assert!(serde_json::from_str::<SshPublicKey>("\"Zm9v\"").is_err());
    }

    #[test]
    fn test_json_string_encoding() {
        let cert = sample_certificate();
        let json = serde_json::to_value(SshCertificate::from(cert.clone())).unwrap();
        assert_eq!(json.as_str().unwrap(), encode_certificate(&cert).unwrap());
    }
}
