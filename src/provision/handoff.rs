//! Hand-off between the provisioning endpoint and the rest of the boot.
//!
//! Two events can end provisioning: a valid submission, or the deadline.
//! Whichever completes the session first wins; the other becomes a no-op.

use crate::error::{BootError, BootResult};
use crate::provision::secrets::SecretBundle;
use crate::provision::server::serve_tls;
use crate::provision::session::{Phase, ProvisioningSession};
use crate::provision::transport::provisioning_router;
use rustls::ServerConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tracing::{info, warn};

/// Outcome of the provisioning phase.
#[derive(Debug)]
pub enum Handoff {
    Provisioned(Arc<SecretBundle>),
    TimedOut,
}

/// Timer expiring the session. Cancelled on drop.
pub struct Deadline {
    handle: JoinHandle<()>,
}

impl Deadline {
    pub fn arm(session: Arc<ProvisioningSession>, timeout: Duration) -> Self {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if session.expire().await {
                warn!("No secrets received within {:?}", timeout);
            }
        });
        Self { handle }
    }

    /// Stop the timer. Safe to call any number of times.
    pub fn cancel(&self) {
        self.handle.abort();
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Runs the provisioning endpoint until the session completes.
pub struct HandoffCoordinator {
    session: Arc<ProvisioningSession>,
    timeout: Duration,
}

impl HandoffCoordinator {
    pub fn new(session: Arc<ProvisioningSession>, timeout: Duration) -> Self {
        Self { session, timeout }
    }

    /// Serve `listener` with `tls_config` until secrets arrive or the
    /// deadline elapses, then stop the endpoint and report the outcome.
    pub async fn run(self, listener: TcpListener, tls_config: Arc<ServerConfig>) -> BootResult<Handoff> {
        let deadline = Deadline::arm(self.session.clone(), self.timeout);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let router = provisioning_router(self.session.clone());
        let mut server = tokio::spawn(serve_tls(
            listener,
            TlsAcceptor::from(tls_config),
            router,
            async move {
                let _ = shutdown_rx.await;
            },
        ));

        info!(timeout = ?self.timeout, "Waiting for secrets");

        let phase = tokio::select! {
            phase = self.session.wait_for_completion() => phase,
            // The endpoint only returns early on failure
            result = &mut server => {
                deadline.cancel();
                return match result {
                    Ok(Ok(())) => Err(BootError::Transport("provisioning endpoint stopped unexpectedly".into())),
                    Ok(Err(e)) => Err(e),
                    Err(e) => Err(BootError::Transport(format!("provisioning endpoint task failed: {}", e))),
                };
            }
        };

        deadline.cancel();
        let _ = shutdown_tx.send(());
        server
            .await
            .map_err(|e| BootError::Transport(format!("provisioning endpoint task failed: {}", e)))??;

        match phase {
            Phase::Provisioned(bundle) => {
                info!("Provisioning complete");
                Ok(Handoff::Provisioned(bundle))
            }
            Phase::TimedOut | Phase::Waiting => Ok(Handoff::TimedOut),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::Identity;
    use crate::provision::secrets::CodeKey;
    use crate::provision::server::tls_server_config;
    use crate::provision::session::ProvisioningStatus;
    use std::path::PathBuf;
    use time::OffsetDateTime;

    fn session() -> Arc<ProvisioningSession> {
        Arc::new(ProvisioningSession::new(
            "token",
            false,
            PathBuf::from("/nonexistent/secrets.json"),
        ))
    }

    fn tls_config(dir: &std::path::Path) -> Arc<ServerConfig> {
        let expiration = OffsetDateTime::now_utc().unix_timestamp() + 3600;
        let identity = Identity::self_signed("localhost", expiration, None, dir).unwrap();
        tls_server_config(&identity).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires_session() {
        let session = session();
        let _deadline = Deadline::arm(session.clone(), Duration::from_secs(300));

        tokio::time::sleep(Duration::from_secs(299)).await;
        assert!(session.is_waiting());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(session.status(), ProvisioningStatus::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_deadline_never_fires() {
        let session = session();
        let deadline = Deadline::arm(session.clone(), Duration::from_secs(1));
        deadline.cancel();
        deadline.cancel();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(session.is_waiting());
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let session = session();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handoff = HandoffCoordinator::new(session.clone(), Duration::from_millis(200))
            .run(listener, tls_config(dir.path()))
            .await
            .unwrap();

        assert!(matches!(handoff, Handoff::TimedOut));
        assert!(session.bundle().is_none());
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_run_returns_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let session = session();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let provisioner = {
            let session = session.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                session
                    .provision(SecretBundle {
                        code_secret_key: CodeKey::new([9u8; 32]),
                        ssl_private_key: None,
                        app_secrets: None,
                    })
                    .await
            })
        };

        let handoff = HandoffCoordinator::new(session.clone(), Duration::from_secs(30))
            .run(listener, tls_config(dir.path()))
            .await
            .unwrap();

        assert!(provisioner.await.unwrap());
        match handoff {
            Handoff::Provisioned(bundle) => {
                assert_eq!(bundle.code_secret_key.as_bytes(), &[9u8; 32])
            }
            Handoff::TimedOut => panic!("expected secrets"),
        }
        // A late deadline cannot undo the outcome
        assert!(!session.expire().await);
    }
}
