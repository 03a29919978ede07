//! HTTPS serving of the provisioning router.

use crate::cert::Identity;
use crate::error::{BootError, BootResult};
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::server::graceful::GracefulShutdown;
use hyper_util::service::TowerToHyperService;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

/// Upper bound on a client's TLS handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long in-flight connections get to finish once shutdown starts.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Build the rustls configuration serving `identity`.
pub fn tls_server_config(identity: &Identity) -> BootResult<Arc<ServerConfig>> {
    let certs = vec![CertificateDer::from(identity.cert_der.clone())];
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(identity.key_der.to_vec()));

    let mut config =
        ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| BootError::Tls(e.to_string()))?
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| BootError::Tls(e.to_string()))?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}

/// Serve `router` over TLS until `shutdown` resolves.
///
/// On shutdown the listener is closed first, then live connections are
/// drained for at most [`SHUTDOWN_GRACE`]. Connections still open after that
/// are aborted, so no connection task outlives this function.
pub async fn serve_tls<F>(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    router: Router,
    shutdown: F,
) -> BootResult<()>
where
    F: Future<Output = ()> + Send,
{
    let graceful = GracefulShutdown::new();
    let mut connections = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(connection) => connection,
                Err(e) => {
                    // Usually transient (e.g. EMFILE)
                    warn!("Failed to accept connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            },
            // Reap finished connections
            Some(_) = connections.join_next() => continue,
            _ = &mut shutdown => break,
        };

        let acceptor = acceptor.clone();
        let service = TowerToHyperService::new(router.clone());
        let watcher = graceful.watcher();

        connections.spawn(async move {
            let tls = match tokio::time::timeout(HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
                Ok(Ok(tls)) => tls,
                Ok(Err(e)) => {
                    debug!(%peer, "TLS handshake failed: {}", e);
                    return;
                }
                Err(_) => {
                    debug!(%peer, "TLS handshake timed out");
                    return;
                }
            };

            let builder = auto::Builder::new(TokioExecutor::new());
            let connection = builder.serve_connection(TokioIo::new(tls), service);
            if let Err(e) = watcher.watch(connection).await {
                debug!(%peer, "Connection closed with error: {}", e);
            }
        });
    }

    drop(listener);
    info!("Provisioning endpoint stopped accepting connections");

    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
        graceful.shutdown().await;
        while connections.join_next().await.is_some() {}
    })
    .await;

    match drained {
        Ok(()) => debug!("All provisioning connections closed"),
        Err(_) => {
            warn!(
                remaining = connections.len(),
                "Provisioning connections still open after {:?}; aborting them", SHUTDOWN_GRACE
            );
            connections.abort_all();
            while connections.join_next().await.is_some() {}
        }
    }

    Ok(())
}
