//! # Certward Core
//!
//! Types and primitives shared by the certward SSH certificate authority.
//!
//! ## Key Concepts
//!
//! - **One-time token (OTT)**: a signed JWT that authorizes a single signing request
//! - **Sign option**: an ordered constraint a provisioner attaches to an authorization
//! - **Certificate template**: the certificate being assembled before the CA signs it
//! - **Provisioner reference**: the extension that links a certificate to its provisioner

pub mod codec;
pub mod crypto;
pub mod duration;
pub mod error;
pub mod options;
pub mod ssh;
pub mod token;

pub use codec::{SshCertificate, SshPublicKey};
pub use crypto::{SshCaKey, TokenKey};
pub use duration::TimeDuration;
pub use error::{CoreError, Result};
pub use options::{apply_all, SignOption, SshDurations};
pub use ssh::{CertType, CertificateTemplate, ProvisionerReference, SshOptions, PROVISIONER_EXTENSION};
pub use token::{matches_audience, strip_port, Claims, StepClaims, UnverifiedToken};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
