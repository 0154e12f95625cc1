//! Certward SSH Certificate Authority
//!
//! The authority signs SSH user and host certificates for clients holding a
//! one-time token (OTT) minted by a trusted provisioner:
//! - Authorizes tokens against the provisioner registry
//! - Rejects replayed and pre-bootstrap tokens
//! - Signs certificates under the constraints the provisioner grants
//! - Issues add-user companion certificates
//! - Publishes CA keys and renders client and server configuration
//!
//! ## API Endpoints
//!
//! - `GET /health` - Liveness check
//! - `GET /ready` - Readiness check with provisioner and key info
//! - `POST /ssh/sign` - Sign an SSH public key
//! - `GET /ssh/keys` - CA public keys
//! - `POST /ssh/config` - Render user or host configuration templates

pub mod api;
pub mod authority;
pub mod config;
pub mod error;

pub use api::create_router;
pub use api::handlers::{AppState, SshAuthority};
pub use authority::replay::ReplayGuard;
pub use authority::ssh::SshKeys;
pub use authority::templates::{SshTemplates, Template, TemplateOutput, TemplateType};
pub use authority::{Authority, SshCaKeys};
pub use config::{AuthorityConfig, SshConfig};
pub use error::{AuthorityError, ErrorContext};
