mod client;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use client::ProvisioningClient;
use enclave_bootstrap::provision::{CodeKey, ProvisionRequest, CODE_KEY_LEN};
use enclave_bootstrap::storage::{self, PRIVATE_MODE};
use enclave_bootstrap::workload::seal_directory;
use rand::rngs::OsRng;
use rand::RngCore;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use zeroize::Zeroizing;

#[derive(Parser)]
#[command(name = "enclave-bootstrap-admin")]
#[command(about = "Operator CLI for enclave-bootstrap instances")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Endpoint {
    /// Provisioning endpoint, e.g. https://instance.example.app:8443
    #[arg(long)]
    url: String,

    /// Trust only this PEM certificate (the instance's provisioning identity)
    #[arg(long, value_name = "PEM", conflicts_with = "insecure")]
    ca_cert: Option<PathBuf>,

    /// Do not verify the server certificate
    #[arg(long)]
    insecure: bool,
}

impl Endpoint {
    fn client(&self) -> Result<ProvisioningClient> {
        ProvisioningClient::new(&self.url, self.ca_cert.as_deref(), self.insecure)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show whether the instance is waiting for secrets
    Status {
        #[command(flatten)]
        endpoint: Endpoint,
    },
    /// Wait until the instance is waiting for secrets
    Wait {
        #[command(flatten)]
        endpoint: Endpoint,
        #[arg(long, default_value_t = 60)]
        timeout_secs: u64,
    },
    /// Deliver secrets
    Provision {
        #[command(flatten)]
        endpoint: Endpoint,
        /// Authorization token of the instance
        #[arg(long)]
        uuid: String,
        /// File holding the hex-encoded code key
        #[arg(long)]
        key_file: PathBuf,
        /// PEM private key of the owner-supplied certificate
        #[arg(long, value_name = "FILE")]
        ssl_private_key: Option<PathBuf>,
        /// JSON file with application secrets
        #[arg(long, value_name = "FILE")]
        app_secrets: Option<PathBuf>,
    },
    /// Generate a code key
    Keygen {
        #[arg(long)]
        out: PathBuf,
    },
    /// Seal a workload directory with a code key
    Seal {
        #[arg(long)]
        key_file: PathBuf,
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
}

fn read_key(path: &Path) -> Result<CodeKey> {
    let encoded = Zeroizing::new(
        std::fs::read_to_string(path)
            .with_context(|| format!("failed to read key file {}", path.display()))?,
    );
    CodeKey::from_hex(&encoded).with_context(|| format!("invalid key file {}", path.display()))
}

fn keygen(out: &Path) -> Result<()> {
    let mut bytes = Zeroizing::new([0u8; CODE_KEY_LEN]);
    OsRng.fill_bytes(&mut *bytes);
    let key = CodeKey::new(*bytes);
    storage::write_file(out, key.to_hex().as_bytes(), PRIVATE_MODE)?;
    Ok(())
}

fn build_request(
    uuid: String,
    key_file: &Path,
    ssl_private_key: Option<&Path>,
    app_secrets: Option<&Path>,
) -> Result<ProvisionRequest> {
    let mut request = ProvisionRequest::default();
    request.uuid = Some(uuid);
    request.code_secret_key = Some(read_key(key_file)?.to_hex().to_string());

    if let Some(path) = ssl_private_key {
        request.ssl_private_key = Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("failed to read private key {}", path.display()))?,
        );
    }
    if let Some(path) = app_secrets {
        let raw = std::fs::read(path)
            .with_context(|| format!("failed to read app secrets {}", path.display()))?;
        request.app_secrets = Some(
            serde_json::from_slice(&raw)
                .with_context(|| format!("{} is not valid JSON", path.display()))?,
        );
    }

    Ok(request)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "enclave_bootstrap_admin=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Status { endpoint } => match endpoint.client()?.status().await {
            Some(status) => println!("{}", status),
            None => bail!("{} is not answering", endpoint.url),
        },
        Commands::Wait {
            endpoint,
            timeout_secs,
        } => {
            let status = endpoint
                .client()?
                .wait_until_ready(Duration::from_secs(timeout_secs))
                .await?;
            println!("{}", status);
        }
        Commands::Provision {
            endpoint,
            uuid,
            key_file,
            ssl_private_key,
            app_secrets,
        } => {
            let request = build_request(
                uuid,
                &key_file,
                ssl_private_key.as_deref(),
                app_secrets.as_deref(),
            )?;
            if !endpoint.client()?.provision(&request).await? {
                bail!("{} rejected the secrets", endpoint.url);
            }
            info!("Secrets accepted by {}", endpoint.url);
        }
        Commands::Keygen { out } => {
            keygen(&out)?;
            info!("Wrote code key to {}", out.display());
        }
        Commands::Seal {
            key_file,
            input,
            output,
        } => {
            let count = seal_directory(&input, &read_key(&key_file)?, &output)?;
            info!("Sealed {} files into {}", count, output.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keygen_writes_hex_key() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("code.key");
        keygen(&out).unwrap();

        let encoded = std::fs::read_to_string(&out).unwrap();
        assert_eq!(encoded.len(), 2 * CODE_KEY_LEN);
        assert!(read_key(&out).is_ok());
    }

    #[test]
    fn test_build_request() {
        let dir = tempfile::tempdir().unwrap();
        let key_file = dir.path().join("code.key");
        std::fs::write(&key_file, format!("{}\n", hex::encode([1u8; 32]))).unwrap();
        let secrets = dir.path().join("secrets.json");
        std::fs::write(&secrets, br#"{"db":"pw"}"#).unwrap();

        let request = build_request("token".into(), &key_file, None, Some(secrets.as_path())).unwrap();
        assert_eq!(request.uuid.as_deref(), Some("token"));
        assert_eq!(
            request.code_secret_key.as_deref(),
            Some(hex::encode([1u8; 32]).as_str())
        );
        assert!(request.ssl_private_key.is_none());
        assert_eq!(request.app_secrets, Some(serde_json::json!({ "db": "pw" })));
    }

    #[test]
    fn test_endpoint_trust_flags_conflict() {
        assert!(Cli::try_parse_from([
            "enclave-bootstrap-admin",
            "status",
            "--url",
            "https://localhost:8443",
            "--ca-cert",
            "cert.pem",
            "--insecure",
        ])
        .is_err());
    }
}
