//! Certward Provisioners
//!
//! A provisioner is an authority the CA trusts to vouch for certificate
//! requests. Each one verifies the tokens it is responsible for and answers
//! with the constraints the issued certificate must satisfy:
//!
//! - **JWK**: single-use tokens signed by a configured public key
//! - **OIDC**: identity provider tokens bound to a client id
//!
//! The [`ProvisionerRegistry`] routes an unverified token (or an issued
//! certificate) to the provisioner that can vouch for it.
//!
//! ## Usage
//!
//! ```ignore
//! use certward_provisioner::{ProvisionerRegistry, ProvisionerConfig};
//!
//! let registry = ProvisionerRegistry::from_configs(configs, &sign_audiences)?;
//! let provisioner = registry.load_by_token(&token, &claims)?;
//! let options = provisioner.authorize_ssh_sign(token.as_str()).await?;
//! ```

pub mod error;
pub mod jwk;
pub mod oidc;
pub mod provisioner;
pub mod registry;
pub mod types;

pub use error::{ProvisionerError, Result};
pub use jwk::JwkProvisioner;
pub use oidc::{JwksSource, OidcProvisioner, ProviderKeys, RemoteJwks, StaticJwks};
pub use provisioner::{provisioner_id, Provisioner};
pub use registry::{ProvisionerRegistry, ProvisionerRegistryBuilder};
pub use types::{JwkProvisionerConfig, OidcProvisionerConfig, ProvisionerConfig, ProvisionerType};
