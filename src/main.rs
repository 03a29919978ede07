use clap::{Args, Parser};
use enclave_bootstrap::{
    boot,
    config::AppConfig,
    launch::{exit_code, run_application},
};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "enclave-bootstrap", version)]
#[command(about = "Receive workload secrets over attested HTTPS, then start the workload")]
struct Cli {
    /// Public hostname of the instance
    #[arg(long)]
    host: Option<String>,

    /// Port of the provisioning endpoint and of the application
    #[arg(long)]
    port: Option<u16>,

    /// Directory holding the sealed workload (read only)
    #[arg(long)]
    app_dir: Option<PathBuf>,

    /// Authorization token expected in every submission
    #[arg(long)]
    uuid: Option<String>,

    /// Seconds to wait for secrets
    #[arg(long = "timeout", value_name = "SECONDS")]
    timeout_secs: Option<u32>,

    /// Run without attestation
    #[arg(long)]
    debug: bool,

    /// Additional configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(flatten)]
    mode: ModeArgs,

    /// Application command line, after `--`
    #[arg(trailing_var_arg = true, value_name = "COMMAND")]
    command: Vec<String>,
}

#[derive(Args, Debug)]
#[group(multiple = false)]
struct ModeArgs {
    /// Serve the application with the attested self-signed certificate,
    /// valid until EXPIRATION_DATE (Unix seconds)
    #[arg(long, value_name = "EXPIRATION_DATE")]
    self_signed: Option<i64>,

    /// Serve the application with the owner's certificate; its private key
    /// is delivered during provisioning
    #[arg(long, value_name = "CERTIFICATE_PATH")]
    certificate: Option<PathBuf>,

    /// Serve the application without TLS
    #[arg(long)]
    no_ssl: bool,
}

impl Cli {
    /// Command line values as configuration overrides.
    fn overrides(&self) -> Vec<(&'static str, config::Value)> {
        let mut overrides: Vec<(&'static str, config::Value)> = Vec::new();

        if let Some(host) = &self.host {
            overrides.push(("server.host", host.clone().into()));
        }
        if let Some(port) = self.port {
            overrides.push(("server.port", i64::from(port).into()));
        }
        if let Some(app_dir) = &self.app_dir {
            overrides.push(("paths.app_dir", app_dir.display().to_string().into()));
        }
        if let Some(uuid) = &self.uuid {
            overrides.push(("provisioning.uuid", uuid.clone().into()));
        }
        if let Some(timeout) = self.timeout_secs {
            overrides.push(("provisioning.timeout_secs", i64::from(timeout).into()));
        }
        if self.debug {
            overrides.push(("debug", true.into()));
        }

        if let Some(expiration) = self.mode.self_signed {
            overrides.push(("certificate.mode", "self-signed".into()));
            overrides.push(("certificate.expiration", expiration.into()));
        } else if let Some(path) = &self.mode.certificate {
            overrides.push(("certificate.mode", "owner-supplied".into()));
            overrides.push(("certificate.path", path.display().to_string().into()));
        } else if self.mode.no_ssl {
            overrides.push(("certificate.mode", "no-tls".into()));
        }

        if !self.command.is_empty() {
            overrides.push(("application.command", self.command.clone().into()));
        }

        overrides
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging first
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "enclave_bootstrap=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    info!("Starting enclave-bootstrap v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::init(cli.config.as_deref(), cli.overrides())?;
    info!(
        mode = config.certificate.name(),
        debug = config.debug,
        "Configuration loaded"
    );

    let plan = match boot::run(config).await {
        Ok(plan) => plan,
        Err(e) => {
            error!("Boot failed: {}", e);
            return Err(e.into());
        }
    };

    let status = run_application(&plan).await?;
    std::process::exit(exit_code(status));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overrides(args: &[&str]) -> Vec<(&'static str, config::Value)> {
        Cli::try_parse_from(args).unwrap().overrides()
    }

    fn keys(args: &[&str]) -> Vec<&'static str> {
        overrides(args).into_iter().map(|(key, _)| key).collect()
    }

    #[test]
    fn test_mode_flags_are_exclusive() {
        assert!(Cli::try_parse_from(["enclave-bootstrap", "--no-ssl", "--self-signed", "1"]).is_err());
    }

    #[test]
    fn test_self_signed_overrides() {
        let keys = keys(&["enclave-bootstrap", "--self-signed", "1900000000", "--port", "443"]);
        assert_eq!(
            keys,
            vec!["server.port", "certificate.mode", "certificate.expiration"]
        );
    }

    #[test]
    fn test_trailing_command() {
        let cli = Cli::try_parse_from([
            "enclave-bootstrap",
            "--no-ssl",
            "--",
            "python",
            "-m",
            "app",
        ])
        .unwrap();
        assert_eq!(cli.command, vec!["python", "-m", "app"]);
        assert!(cli
            .overrides()
            .iter()
            .any(|(key, _)| *key == "application.command"));
    }

    #[test]
    fn test_no_flags_no_overrides() {
        assert!(keys(&["enclave-bootstrap"]).is_empty());
    }
}
