//! Binding the provisioning identity to a platform quote.
//!
//! The quote's report data commits to the certificate's public key, so a
//! secret sender that verifies the quote out of band knows the TLS peer is
//! the attested environment.

use crate::error::{BootError, BootResult};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::PathBuf;
use tracing::debug;

/// X.509 extension carrying the quote (Intel SGX RA-TLS quote OID).
pub const QUOTE_EXTENSION_OID: &[u64] = &[1, 2, 840, 113741, 1337, 6];

/// Produces a quote over caller-chosen report data.
pub trait Attestor: Send + Sync {
    fn quote(&self, report_data: &[u8; 64]) -> BootResult<Vec<u8>>;
}

/// Report data committing to a public key: `SHA-256(spki_der) || [0; 32]`.
pub fn report_data_for_key(spki_der: &[u8]) -> [u8; 64] {
    let mut report_data = [0u8; 64];
    report_data[..32].copy_from_slice(&Sha256::digest(spki_der));
    report_data
}

/// Pseudo-filesystem attestation interface (`/dev/attestation`).
///
/// Writing `user_report_data` and reading back `quote` yields a quote that
/// embeds the written report data.
#[derive(Debug, Clone)]
pub struct DevAttestation {
    root: PathBuf,
}

impl DevAttestation {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Attestor for DevAttestation {
    fn quote(&self, report_data: &[u8; 64]) -> BootResult<Vec<u8>> {
        let report_path = self.root.join("user_report_data");
        fs::write(&report_path, report_data).map_err(|e| {
            BootError::Attestation(format!("writing {}: {}", report_path.display(), e))
        })?;

        let quote_path = self.root.join("quote");
        let quote = fs::read(&quote_path).map_err(|e| {
            BootError::Attestation(format!("reading {}: {}", quote_path.display(), e))
        })?;

        if quote.is_empty() {
            return Err(BootError::Attestation("platform returned an empty quote".to_string()));
        }

        debug!(len = quote.len(), "Obtained attestation quote");
        Ok(quote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_data_commits_to_key() {
        let a = report_data_for_key(b"key-a");
        let b = report_data_for_key(b"key-b");
        assert_ne!(a, b);
        assert_eq!(&a[32..], &[0u8; 32]);
        assert_eq!(&a[..32], Sha256::digest(b"key-a").as_slice());
    }

    #[test]
    fn test_dev_attestation_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("quote"), b"quote-bytes").unwrap();

        let attestor = DevAttestation::new(dir.path());
        let report_data = report_data_for_key(b"spki");
        let quote = attestor.quote(&report_data).unwrap();

        assert_eq!(quote, b"quote-bytes");
        assert_eq!(
            std::fs::read(dir.path().join("user_report_data")).unwrap(),
            report_data.to_vec()
        );
    }

    #[test]
    fn test_missing_device_is_attestation_error() {
        let attestor = DevAttestation::new("/nonexistent/attestation");
        let result = attestor.quote(&[0u8; 64]);
        assert!(matches!(result, Err(BootError::Attestation(_))));
    }
}
