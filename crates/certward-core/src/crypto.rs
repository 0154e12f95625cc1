//! Key material
//!
//! - `SshCaKey`: an SSH CA private key that signs certificate templates
//! - `TokenKey`: an Ed25519 key that mints one-time tokens and publishes
//!   itself as a JWK, used by token issuers and in tests

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ed25519_dalek::SigningKey;
use jsonwebtoken::jwk::Jwk;
use jsonwebtoken::{encode, Algorithm as JwsAlgorithm, EncodingKey, Header};
use rand::rngs::OsRng;
use serde::Serialize;
use ssh_key::certificate::Builder;
use ssh_key::{Algorithm, Certificate, HashAlg, LineEnding, PrivateKey, PublicKey};
use std::path::Path;

use crate::error::{CoreError, Result};
use crate::ssh::CertificateTemplate;

/// PKCS#8 v1 prefix for a bare Ed25519 seed
const ED25519_PKCS8_PREFIX: [u8; 16] = [
    0x30, 0x2e, 0x02, 0x01, 0x00, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x04, 0x22, 0x04, 0x20,
];

// ============================================================================
// SSH CA key
// ============================================================================

/// SSH certificate authority signing key
#[derive(Clone)]
pub struct SshCaKey {
    key: PrivateKey,
}

impl std::fmt::Debug for SshCaKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshCaKey")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

impl SshCaKey {
    /// Generate a new random Ed25519 CA key
    pub fn generate() -> Result<Self> {
        let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519)?;
        Ok(Self { key })
    }

    /// Load an unencrypted OpenSSH private key
    pub fn from_openssh(pem: &str) -> Result<Self> {
        let key = PrivateKey::from_openssh(pem)?;
        if key.is_encrypted() {
            return Err(CoreError::CryptoError(
                "encrypted CA keys are not supported".to_string(),
            ));
        }
        Ok(Self { key })
    }

    /// Load an unencrypted OpenSSH private key from a file
    pub fn read_openssh_file(path: &Path) -> Result<Self> {
        let pem = std::fs::read_to_string(path).map_err(|e| {
            CoreError::CryptoError(format!("error reading {}: {}", path.display(), e))
        })?;
        Self::from_openssh(&pem)
    }

    /// Serialize as an OpenSSH private key
    pub fn to_openssh(&self) -> Result<String> {
        let pem = self.key.to_openssh(LineEnding::LF)?;
        Ok(pem.as_str().to_owned())
    }

    /// The CA public key
    pub fn public_key(&self) -> &PublicKey {
        self.key.public_key()
    }

    /// SHA-256 fingerprint of the public key
    pub fn fingerprint(&self) -> String {
        self.key.public_key().fingerprint(HashAlg::Sha256).to_string()
    }

    /// Sign a completed template. The serial and nonce are random.
    pub fn sign(&self, tpl: &CertificateTemplate) -> Result<Certificate> {
        let cert_type = tpl.cert_type.ok_or_else(|| {
            CoreError::Signing("ssh certificate type has not been set".to_string())
        })?;

        let mut builder = Builder::new_with_random_nonce(
            &mut OsRng,
            tpl.key.key_data().clone(),
            tpl.valid_after,
            tpl.valid_before,
        )
        .map_err(signing_error)?;

        builder
            .serial(rand::random::<u64>())
            .and_then(|b| b.cert_type(cert_type.into()))
            .and_then(|b| b.key_id(&tpl.key_id))
            .map_err(signing_error)?;

        for principal in &tpl.principals {
            builder.valid_principal(principal).map_err(signing_error)?;
        }
        for (name, data) in &tpl.critical_options {
            builder.critical_option(name, data).map_err(signing_error)?;
        }
        for (name, data) in &tpl.extensions {
            builder.extension(name, data).map_err(signing_error)?;
        }

        builder.sign(&self.key).map_err(signing_error)
    }
}

fn signing_error(err: ssh_key::Error) -> CoreError {
    CoreError::Signing(err.to_string())
}

// ============================================================================
// Token key
// ============================================================================

/// Ed25519 key for minting one-time tokens
#[derive(Clone)]
pub struct TokenKey {
    kid: String,
    signing_key: SigningKey,
}

impl std::fmt::Debug for TokenKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenKey")
            .field("kid", &self.kid)
            .field("signing_key", &"[redacted]")
            .finish()
    }
}

impl TokenKey {
    /// Generate a new random key
    pub fn generate(kid: impl Into<String>) -> Self {
        Self {
            kid: kid.into(),
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Create a key from a 32-byte seed
    pub fn from_bytes(kid: impl Into<String>, seed: &[u8; 32]) -> Self {
        Self {
            kid: kid.into(),
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Key identifier
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Public half as a JWK (`kty: OKP`, `crv: Ed25519`)
    pub fn jwk(&self) -> Result<Jwk> {
        let x = URL_SAFE_NO_PAD.encode(self.signing_key.verifying_key().to_bytes());
        let value = serde_json::json!({
            "kty": "OKP",
            "crv": "Ed25519",
            "x": x,
            "kid": self.kid,
            "alg": "EdDSA",
            "use": "sig",
        });
        Ok(serde_json::from_value(value)?)
    }

    /// Sign claims as a compact JWS with `alg: EdDSA` and this key's `kid`.
    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String> {
        let mut der = Vec::with_capacity(ED25519_PKCS8_PREFIX.len() + 32);
        der.extend_from_slice(&ED25519_PKCS8_PREFIX);
        der.extend_from_slice(&self.signing_key.to_bytes());

        let mut header = Header::new(JwsAlgorithm::EdDSA);
        header.kid = Some(self.kid.clone());

        Ok(encode(&header, claims, &EncodingKey::from_ed_der(&der))?)
    }
}
