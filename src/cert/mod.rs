//! Identity for the provisioning endpoint and the final service.
//!
//! - [`Identity`]: freshly generated self-signed certificate, optionally
//!   carrying an attestation quote, written to the key directory
//! - [`OwnerCertificate`]: certificate supplied by the code owner
//! - [`to_wildcard_domain`]: hostname normalization

pub mod attestation;
pub mod domain;
pub mod identity;

pub use attestation::{Attestor, DevAttestation};
pub use domain::to_wildcard_domain;
pub use identity::{Identity, OwnerCertificate};
