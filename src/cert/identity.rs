//! Self-signed identity generation and owner certificate lookup.

use crate::cert::attestation::{report_data_for_key, Attestor, QUOTE_EXTENSION_OID};
use crate::cert::domain::to_wildcard_domain;
use crate::error::{BootError, BootResult};
use crate::storage::{self, PRIVATE_MODE, PUBLIC_MODE};
use rcgen::{CertificateParams, CustomExtension, DistinguishedName, DnType, KeyPair};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::CertificateDer;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tracing::info;
use zeroize::Zeroizing;

pub const CERT_FILE: &str = "cert.pem";
pub const KEY_FILE: &str = "key.pem";

/// Fixed subject attributes preceding the common name.
const SUBJECT: [(DnType, &str); 4] = [
    (DnType::CountryName, "FR"),
    (DnType::StateOrProvinceName, "Ile-de-France"),
    (DnType::LocalityName, "Paris"),
    (DnType::OrganizationName, "Enclave Bootstrap"),
];

/// TLS identity bound to a (normalized) domain name.
///
/// Created once per boot and never modified; the PEM files at
/// `cert_path`/`key_path` mirror the in-memory material.
pub struct Identity {
    pub common_name: String,
    pub cert_pem: String,
    pub cert_der: Vec<u8>,
    pub key_pem: Zeroizing<String>,
    pub key_der: Zeroizing<Vec<u8>>,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    /// Whether an attestation quote is embedded in the certificate
    pub attested: bool,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("common_name", &self.common_name)
            .field("cert_path", &self.cert_path)
            .field("key_path", &self.key_path)
            .field("attested", &self.attested)
            .finish_non_exhaustive()
    }
}

impl Identity {
    /// Generate a self-signed certificate for `host` and write it to `key_dir`.
    ///
    /// # Arguments
    /// * `host` - Public hostname; normalized with [`to_wildcard_domain`]
    /// * `expiration` - Unix timestamp (seconds) of the end of validity
    /// * `attestor` - When set, the certificate embeds a quote over its key
    /// * `key_dir` - Destination of `cert.pem` and `key.pem`
    pub fn self_signed(
        host: &str,
        expiration: i64,
        attestor: Option<&dyn Attestor>,
        key_dir: &Path,
    ) -> BootResult<Self> {
        let common_name = to_wildcard_domain(host)?;

        let now = OffsetDateTime::now_utc();
        let not_after = OffsetDateTime::from_unix_timestamp(expiration)
            .map_err(|e| BootError::configuration(format!("invalid expiration date: {}", e)))?;
        if not_after <= now {
            return Err(BootError::configuration(format!(
                "certificate expiration {} is not in the future",
                not_after
            )));
        }

        let key_pair = KeyPair::generate().map_err(|e| BootError::Certificate(e.to_string()))?;

        let mut params = CertificateParams::new(vec![common_name.clone()])
            .map_err(|e| BootError::Certificate(e.to_string()))?;
        params.distinguished_name = DistinguishedName::new();
        for (attribute, value) in SUBJECT {
            params.distinguished_name.push(attribute, value);
        }
        params
            .distinguished_name
            .push(DnType::CommonName, common_name.as_str());
        params.not_before = now;
        params.not_after = not_after;

        let attested = match attestor {
            Some(attestor) => {
                let report_data = report_data_for_key(&key_pair.public_key_der());
                let quote = attestor.quote(&report_data)?;
                params
                    .custom_extensions
                    .push(CustomExtension::from_oid_content(QUOTE_EXTENSION_OID, quote));
                true
            }
            None => false,
        };

        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| BootError::Certificate(e.to_string()))?;

        let identity = Self {
            common_name,
            cert_pem: cert.pem(),
            cert_der: cert.der().to_vec(),
            key_pem: Zeroizing::new(key_pair.serialize_pem()),
            key_der: Zeroizing::new(key_pair.serialize_der()),
            cert_path: key_dir.join(CERT_FILE),
            key_path: key_dir.join(KEY_FILE),
            attested,
        };

        storage::write_file(&identity.key_path, identity.key_pem.as_bytes(), PRIVATE_MODE)?;
        storage::write_file(&identity.cert_path, identity.cert_pem.as_bytes(), PUBLIC_MODE)?;

        info!(
            common_name = %identity.common_name,
            attested = identity.attested,
            expires = %not_after,
            "Generated self-signed certificate"
        );

        Ok(identity)
    }
}

/// Certificate provided by the code owner, already present on disk.
///
/// Its private key is only known once the provisioning endpoint receives it.
#[derive(Debug, Clone)]
pub struct OwnerCertificate {
    pub path: PathBuf,
}

impl OwnerCertificate {
    /// Check that `path` is a readable PEM file holding at least one certificate.
    pub fn locate(path: &Path) -> BootResult<Self> {
        let pem = std::fs::read(path).map_err(|e| {
            BootError::configuration(format!(
                "owner certificate {} is not readable: {}",
                path.display(),
                e
            ))
        })?;

        let count = CertificateDer::pem_slice_iter(&pem)
            .filter_map(Result::ok)
            .count();
        if count == 0 {
            return Err(BootError::configuration(format!(
                "owner certificate {} contains no PEM certificate",
                path.display()
            )));
        }

        info!(path = %path.display(), certificates = count, "Using owner-supplied certificate");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}
