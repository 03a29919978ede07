use crate::error::{BootError, BootResult};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, Value};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Provisioning endpoint network settings
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Public hostname of the instance. Bound into the self-signed
    /// certificate after wildcard normalization.
    pub host: String,
    /// Port shared by the provisioning endpoint and the application
    pub port: u16,
    /// Local address to listen on
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

impl ServerConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

/// Secret provisioning settings
#[derive(Debug, Deserialize, Clone)]
pub struct ProvisioningConfig {
    /// Authorization token every submission must present
    pub uuid: String,
    /// How long the provisioning endpoint waits for secrets
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    300
}

impl ProvisioningConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Filesystem layout
#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    /// Directory holding the sealed (`.enc`) workload. Read only.
    pub app_dir: PathBuf,
    /// Restricted directory for certificates and key material
    #[serde(default = "default_key_dir")]
    pub key_dir: PathBuf,
    /// Where the decrypted workload is materialized
    #[serde(default = "default_module_dir")]
    pub module_dir: PathBuf,
    /// Where delivered `app_secrets` are written
    #[serde(default = "default_secrets_path")]
    pub secrets_path: PathBuf,
}

fn default_key_dir() -> PathBuf {
    PathBuf::from("/key")
}

fn default_module_dir() -> PathBuf {
    PathBuf::from("/app-module")
}

fn default_secrets_path() -> PathBuf {
    PathBuf::from("/root/.cache/enclave-bootstrap/secrets.json")
}

/// Attestation device settings
#[derive(Debug, Deserialize, Clone)]
pub struct AttestationConfig {
    #[serde(default = "default_attestation_device")]
    pub device: PathBuf,
}

fn default_attestation_device() -> PathBuf {
    PathBuf::from("/dev/attestation")
}

impl Default for AttestationConfig {
    fn default() -> Self {
        Self {
            device: default_attestation_device(),
        }
    }
}

/// The application started once secrets are in place
#[derive(Debug, Deserialize, Clone)]
pub struct ApplicationConfig {
    /// Program followed by its arguments
    pub command: Vec<String>,
}

/// TLS trust model of the final service.
///
/// Deserialized from the raw `[certificate]` table and validated on the way
/// in, so the rest of the crate only ever sees a consistent mode.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "CertificateConfig")]
pub enum CertificateMode {
    /// Self-signed (optionally attested) certificate, reused by the application.
    /// `expiration` is a Unix timestamp in seconds.
    Attested { expiration: i64 },
    /// Certificate supplied by the code owner; its private key arrives through
    /// the provisioning endpoint.
    OwnerSupplied { certificate: PathBuf },
    /// No TLS for the application; an external terminator provides it.
    NoTls,
}

impl CertificateMode {
    /// Whether submissions must carry `ssl_private_key`.
    pub fn requires_private_key(&self) -> bool {
        matches!(self, CertificateMode::OwnerSupplied { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            CertificateMode::Attested { .. } => "self-signed",
            CertificateMode::OwnerSupplied { .. } => "owner-supplied",
            CertificateMode::NoTls => "no-tls",
        }
    }
}

#[derive(Debug, Deserialize)]
struct CertificateConfig {
    mode: String,
    #[serde(default)]
    expiration: Option<i64>,
    #[serde(default)]
    path: Option<PathBuf>,
}

impl TryFrom<CertificateConfig> for CertificateMode {
    type Error = String;

    fn try_from(raw: CertificateConfig) -> Result<Self, Self::Error> {
        match raw.mode.as_str() {
            "self-signed" => raw
                .expiration
                .map(|expiration| CertificateMode::Attested { expiration })
                .ok_or_else(|| "certificate.expiration is required in self-signed mode".to_string()),
            "owner-supplied" => raw
                .path
                .map(|certificate| CertificateMode::OwnerSupplied { certificate })
                .ok_or_else(|| "certificate.path is required in owner-supplied mode".to_string()),
            "no-tls" => Ok(CertificateMode::NoTls),
            other => Err(format!(
                "unknown certificate.mode '{}' (expected self-signed, owner-supplied or no-tls)",
                other
            )),
        }
    }
}

/// Root bootstrap configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub provisioning: ProvisioningConfig,
    pub certificate: CertificateMode,
    pub paths: PathsConfig,
    #[serde(default)]
    pub attestation: AttestationConfig,
    pub application: ApplicationConfig,
    /// Run without attestation (no quote in the certificate)
    #[serde(default)]
    pub debug: bool,
}

impl AppConfig {
    /// Load configuration from files, environment variables and overrides.
    ///
    /// Later sources win: `config/default`, `config/local`, `extra_file`,
    /// `BOOTSTRAP__*` environment variables, then `overrides` (command line).
    pub fn load(extra_file: Option<&Path>, overrides: Vec<(&str, Value)>) -> BootResult<Self> {
        let mut builder = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false));

        if let Some(path) = extra_file {
            builder = builder.add_source(File::from(path).required(true));
        }

        // e.g., BOOTSTRAP__SERVER__PORT, BOOTSTRAP__APPLICATION__COMMAND="./app --flag"
        builder = builder.add_source(
            Environment::with_prefix("BOOTSTRAP")
                .prefix_separator("__")
                .separator("__")
                .list_separator(" ")
                .with_list_parse_key("application.command")
                .try_parsing(true),
        );

        for (key, value) in overrides {
            builder = builder.set_override(key, value)?;
        }

        Self::from_builder(builder)
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> BootResult<Self> {
        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> BootResult<()> {
        if self.provisioning.uuid.trim().is_empty() {
            return Err(BootError::configuration("provisioning.uuid must not be empty"));
        }
        if self.provisioning.timeout_secs == 0 {
            return Err(BootError::configuration(
                "provisioning.timeout_secs must be greater than zero",
            ));
        }
        if self.application.command.is_empty() {
            return Err(BootError::configuration("application.command must not be empty"));
        }
        Ok(())
    }

    /// Initialize the global config singleton
    pub fn init(extra_file: Option<&Path>, overrides: Vec<(&str, Value)>) -> BootResult<&'static Self> {
        let config = Self::load(extra_file, overrides)?;
        Ok(CONFIG.get_or_init(|| config))
    }
}
