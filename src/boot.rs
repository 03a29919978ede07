//! Boot sequence: identity, provisioning, launch plan.

use crate::cert::{Attestor, DevAttestation, Identity, OwnerCertificate};
use crate::config::{AppConfig, CertificateMode};
use crate::error::{BootError, BootResult};
use crate::launch::{LaunchPlan, LaunchPlanner};
use crate::provision::{tls_server_config, Handoff, HandoffCoordinator, ProvisioningSession};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Validity of the provisioning certificate when the application does not reuse it.
pub const PROVISIONING_CERT_VALIDITY_SECS: i64 = 10 * 3600;

/// Bind the configured address and run the boot sequence.
pub async fn run(config: &AppConfig) -> BootResult<LaunchPlan> {
    let addr = config.server.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| BootError::Transport(format!("failed to bind {}: {}", addr, e)))?;
    run_on(config, listener).await
}

/// Run the boot sequence with the provisioning endpoint on `listener`.
pub async fn run_on(config: &AppConfig, listener: TcpListener) -> BootResult<LaunchPlan> {
    for dir in [&config.paths.key_dir, &config.paths.module_dir] {
        std::fs::create_dir_all(dir).map_err(|e| BootError::storage(dir, e))?;
    }

    let identity = provisioning_identity(config)?;

    if let CertificateMode::OwnerSupplied { certificate } = &config.certificate {
        OwnerCertificate::locate(certificate)?;
    }

    let session = Arc::new(ProvisioningSession::new(
        config.provisioning.uuid.clone(),
        config.certificate.requires_private_key(),
        config.paths.secrets_path.clone(),
    ));

    if let Ok(addr) = listener.local_addr() {
        info!(
            %addr,
            common_name = %identity.common_name,
            mode = config.certificate.name(),
            "Provisioning endpoint listening on https://{}",
            addr
        );
    }

    let timeout = config.provisioning.timeout();
    let handoff = HandoffCoordinator::new(session, timeout)
        .run(listener, tls_server_config(&identity)?)
        .await?;

    let bundle = match handoff {
        Handoff::Provisioned(bundle) => bundle,
        Handoff::TimedOut => return Err(BootError::Timeout(timeout)),
    };

    LaunchPlanner::from_config(config)
        .plan_blocking(identity, bundle)
        .await
}

/// Self-signed identity served by the provisioning endpoint.
fn provisioning_identity(config: &AppConfig) -> BootResult<Identity> {
    let expiration = match config.certificate {
        CertificateMode::Attested { expiration } => expiration,
        _ => OffsetDateTime::now_utc().unix_timestamp() + PROVISIONING_CERT_VALIDITY_SECS,
    };

    let attestor = if config.debug {
        warn!("Debug mode: the certificate carries no attestation quote");
        None
    } else {
        Some(DevAttestation::new(&config.attestation.device))
    };

    Identity::self_signed(
        &config.server.host,
        expiration,
        attestor.as_ref().map(|a| a as &dyn Attestor),
        &config.paths.key_dir,
    )
}
