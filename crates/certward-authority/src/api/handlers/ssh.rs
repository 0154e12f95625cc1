//! SSH Certificate Handlers
//!
//! Handles certificate signing, CA key publication and configuration
//! template rendering.

use async_trait::async_trait;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use certward_core::codec::decode_public_key;
use certward_core::{CertType, SignOption, SshCertificate, SshOptions, SshPublicKey, TimeDuration};
use serde::{Deserialize, Serialize};
use ssh_key::{Certificate, PublicKey};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::api::error::ApiError;
use crate::authority::ssh::SshKeys;
use crate::authority::templates::TemplateOutput;
use crate::authority::Authority;
use crate::error::Result;

// ============================================================================
// Application state
// ============================================================================

/// Operations the handlers need from the certificate authority
#[async_trait]
pub trait SshAuthority: Send + Sync {
    async fn authorize(&self, ott: &str) -> Result<Vec<SignOption>>;

    fn sign_ssh(
        &self,
        key: PublicKey,
        opts: &SshOptions,
        sign_options: &[SignOption],
    ) -> Result<Certificate>;

    fn sign_ssh_add_user(&self, key: PublicKey, subject: &Certificate) -> Result<Certificate>;

    fn ssh_keys(&self) -> Result<SshKeys>;

    fn ssh_config(
        &self,
        cert_type: CertType,
        data: &HashMap<String, String>,
    ) -> Result<Vec<TemplateOutput>>;

    fn provisioner_count(&self) -> usize;
}

#[async_trait]
impl SshAuthority for Authority {
    async fn authorize(&self, ott: &str) -> Result<Vec<SignOption>> {
        Authority::authorize(self, ott).await
    }

    fn sign_ssh(
        &self,
        key: PublicKey,
        opts: &SshOptions,
        sign_options: &[SignOption],
    ) -> Result<Certificate> {
        Authority::sign_ssh(self, key, opts, sign_options)
    }

    fn sign_ssh_add_user(&self, key: PublicKey, subject: &Certificate) -> Result<Certificate> {
        Authority::sign_ssh_add_user(self, key, subject)
    }

    fn ssh_keys(&self) -> Result<SshKeys> {
        Authority::ssh_keys(self)
    }

    fn ssh_config(
        &self,
        cert_type: CertType,
        data: &HashMap<String, String>,
    ) -> Result<Vec<TemplateOutput>> {
        Authority::ssh_config(self, cert_type, data)
    }

    fn provisioner_count(&self) -> usize {
        self.registry().len()
    }
}

/// Shared application state
pub struct AppState {
    pub authority: Arc<dyn SshAuthority>,

    /// Instance name reported by readiness checks
    pub name: String,
}

// ============================================================================
// Sign
// ============================================================================

/// Request to sign an SSH public key
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignSshRequest {
    /// Base64 wire-format public key to certify
    #[serde(default)]
    pub public_key: String,

    /// One-time token authorizing the request
    #[serde(default)]
    pub ott: String,

    /// "user", "host" or empty
    #[serde(default)]
    pub cert_type: String,

    #[serde(rename = "keyID", default)]
    pub key_id: String,

    #[serde(default)]
    pub principals: Vec<String>,

    #[serde(default)]
    pub valid_after: TimeDuration,

    #[serde(default)]
    pub valid_before: TimeDuration,

    /// Base64 wire-format key for the add-user certificate
    #[serde(default)]
    pub add_user_public_key: String,
}

impl SignSshRequest {
    /// Check the request shape and extract the requested options
    pub fn validate(&self) -> std::result::Result<SshOptions, ApiError> {
        let cert_type = match self.cert_type.as_str() {
            "" => None,
            other => Some(other.parse::<CertType>().map_err(|_| {
                ApiError::BadRequest(format!("unknown certType {}", other))
            })?),
        };
        if self.public_key.is_empty() {
            return Err(ApiError::BadRequest("missing or empty publicKey".into()));
        }
        if self.ott.is_empty() {
            return Err(ApiError::BadRequest("missing or empty ott".into()));
        }

        Ok(SshOptions {
            cert_type,
            key_id: self.key_id.clone(),
            principals: self.principals.clone(),
            valid_after: self.valid_after,
            valid_before: self.valid_before,
        })
    }
}

/// Response from signing
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignSshResponse {
    pub crt: SshCertificate,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub add_user_crt: Option<SshCertificate>,
}

/// Sign an SSH public key
///
/// POST /ssh/sign
///
/// A user certificate with exactly one principal gets an add-user companion
/// when `addUserPublicKey` is supplied.
pub async fn sign_ssh(
    State(state): State<Arc<AppState>>,
    body: std::result::Result<Json<SignSshRequest>, JsonRejection>,
) -> std::result::Result<(StatusCode, Json<SignSshResponse>), ApiError> {
    let Json(request) = body.map_err(|e| {
        ApiError::BadRequest(format!("error reading request body: {}", e.body_text()))
    })?;
    let opts = request.validate()?;

    let public_key = decode_public_key(&request.public_key)?
        .ok_or_else(|| ApiError::BadRequest("missing or empty publicKey".into()))?;
    let add_user_key = decode_public_key(&request.add_user_public_key)?;

    let sign_options = state
        .authority
        .authorize(&request.ott)
        .await
        .map_err(ApiError::unauthorized)?;

    let cert = state
        .authority
        .sign_ssh(public_key, &opts, &sign_options)
        .map_err(ApiError::forbidden)?;

    let add_user_crt = match add_user_key {
        Some(key) if cert.cert_type().is_user() && cert.valid_principals().len() == 1 => Some(
            state
                .authority
                .sign_ssh_add_user(key, &cert)
                .map_err(ApiError::forbidden)?,
        ),
        _ => None,
    };

    info!(
        serial = cert.serial(),
        key_id = %cert.key_id(),
        add_user = add_user_crt.is_some(),
        "Issued SSH certificate"
    );

    Ok((
        StatusCode::CREATED,
        Json(SignSshResponse {
            crt: cert.into(),
            add_user_crt: add_user_crt.map(SshCertificate::from),
        }),
    ))
}

// ============================================================================
// Keys
// ============================================================================

/// CA public keys
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SshKeysResponse {
    pub user_key: SshPublicKey,
    pub host_key: SshPublicKey,
}

/// Get the CA public keys
///
/// GET /ssh/keys
pub async fn ssh_keys(
    State(state): State<Arc<AppState>>,
) -> std::result::Result<Json<SshKeysResponse>, ApiError> {
    let keys = state.authority.ssh_keys()?;

    Ok(Json(SshKeysResponse {
        user_key: SshPublicKey(keys.user_key),
        host_key: SshPublicKey(keys.host_key),
    }))
}

// ============================================================================
// Config
// ============================================================================

/// Request to render configuration templates
#[derive(Debug, Deserialize)]
pub struct SshConfigRequest {
    /// "user", "host" or empty for user
    #[serde(rename = "type", default)]
    pub kind: String,

    #[serde(default)]
    pub data: HashMap<String, String>,
}

/// Rendered templates; only the requested kind is present
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SshConfigResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_templates: Option<Vec<TemplateOutput>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_templates: Option<Vec<TemplateOutput>>,
}

/// Render SSH configuration templates
///
/// POST /ssh/config
pub async fn ssh_config(
    State(state): State<Arc<AppState>>,
    body: std::result::Result<Json<SshConfigRequest>, JsonRejection>,
) -> std::result::Result<Json<SshConfigResponse>, ApiError> {
    let Json(request) = body.map_err(|e| {
        ApiError::BadRequest(format!("error reading request body: {}", e.body_text()))
    })?;

    let cert_type = match request.kind.as_str() {
        "" => CertType::User,
        other => other
            .parse::<CertType>()
            .map_err(|_| ApiError::BadRequest(format!("unsupported type {}", other)))?,
    };

    let outputs = state
        .authority
        .ssh_config(cert_type, &request.data)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let response = match cert_type {
        CertType::User => SshConfigResponse {
            user_templates: Some(outputs),
            host_templates: None,
        },
        CertType::Host => SshConfigResponse {
            user_templates: None,
            host_templates: Some(outputs),
        },
    };
    Ok(Json(response))
}
