//! Provisioning session: the completion signal and the accepted secrets.
//!
//! The session phase lives in a `watch` channel. Leaving `Waiting` is a single
//! compare-and-set under the channel lock, and the bundle travels inside the
//! phase value, so:
//! - secrets are accepted at most once,
//! - nobody can observe `Provisioned` before the bundle is complete,
//! - the deadline and a late submission can never both win.
//!
//! Submissions and transitions also share one lock, so a submission's
//! `app_secrets` write either completes while `Waiting` or never starts.

use crate::error::{BootError, BootResult};
use crate::provision::secrets::{ProtocolError, ProvisionRequest, SecretBundle};
use crate::storage;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{error, info};

/// Session phase, carried by the completion signal.
#[derive(Debug, Clone)]
pub enum Phase {
    Waiting,
    Provisioned(Arc<SecretBundle>),
    TimedOut,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Phase::Waiting)
    }
}

/// Current provisioning status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningStatus {
    /// Waiting for the operator to deliver secrets
    WaitingForProvisioning,
    /// Secrets received
    Provisioned,
    /// Deadline elapsed without secrets
    TimedOut,
}

/// State shared by the provisioning endpoint, the deadline and the coordinator.
pub struct ProvisioningSession {
    token: String,
    requires_private_key: bool,
    secrets_path: PathBuf,
    phase: watch::Sender<Phase>,
    /// Held for a whole submission and for every phase transition
    submission: Mutex<()>,
}

impl ProvisioningSession {
    /// Create a session waiting for secrets.
    ///
    /// # Arguments
    /// * `token` - Authorization token submissions must match exactly
    /// * `requires_private_key` - Whether `ssl_private_key` is mandatory
    /// * `secrets_path` - Destination of delivered `app_secrets`
    pub fn new(token: impl Into<String>, requires_private_key: bool, secrets_path: PathBuf) -> Self {
        let (phase, _) = watch::channel(Phase::Waiting);
        Self {
            token: token.into(),
            requires_private_key,
            secrets_path,
            phase,
            submission: Mutex::new(()),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn requires_private_key(&self) -> bool {
        self.requires_private_key
    }

    pub fn secrets_path(&self) -> &Path {
        &self.secrets_path
    }

    pub fn is_waiting(&self) -> bool {
        !self.phase.borrow().is_terminal()
    }

    pub fn status(&self) -> ProvisioningStatus {
        match *self.phase.borrow() {
            Phase::Waiting => ProvisioningStatus::WaitingForProvisioning,
            Phase::Provisioned(_) => ProvisioningStatus::Provisioned,
            Phase::TimedOut => ProvisioningStatus::TimedOut,
        }
    }

    /// Accept secrets.
    ///
    /// Returns false if the session already left `Waiting` (secrets accepted
    /// earlier, or deadline elapsed); the bundle is then dropped.
    pub async fn provision(&self, bundle: SecretBundle) -> bool {
        let _guard = self.submission.lock().await;
        self.transition(Phase::Provisioned(Arc::new(bundle)))
    }

    /// Mark the deadline as elapsed. No-op (returns false) if already terminal.
    ///
    /// Waits for an in-flight submission to finish first.
    pub async fn expire(&self) -> bool {
        let _guard = self.submission.lock().await;
        self.transition(Phase::TimedOut)
    }

    /// Handle one submission from start to finish.
    ///
    /// `app_secrets` are stored before the request is validated. The whole
    /// submission runs under the session lock, so nothing it writes can land
    /// after the session has left `Waiting`.
    pub async fn submit(&self, request: &ProvisionRequest) -> Result<(), ProtocolError> {
        let _guard = self.submission.lock().await;
        if !self.is_waiting() {
            return Err(ProtocolError::AlreadyProvisioned);
        }

        if let Some(app_secrets) = request.app_secrets() {
            self.store_app_secrets(app_secrets).await.map_err(|e| {
                error!("Failed to store app secrets: {}", e);
                ProtocolError::Storage
            })?;
        }

        let bundle = request.to_bundle(&self.token, self.requires_private_key)?;
        if !self.transition(Phase::Provisioned(Arc::new(bundle))) {
            return Err(ProtocolError::AlreadyProvisioned);
        }
        Ok(())
    }

    /// Wait until the session leaves `Waiting`, returning the terminal phase.
    pub async fn wait_for_completion(&self) -> Phase {
        let mut rx = self.phase.subscribe();
        let result = rx.wait_for(Phase::is_terminal).await;
        match result {
            Ok(phase) => phase.clone(),
            // The sender lives in `self`, so the channel cannot close while we wait
            Err(_) => Phase::TimedOut,
        }
    }

    /// Accepted bundle, if any.
    pub fn bundle(&self) -> Option<Arc<SecretBundle>> {
        match &*self.phase.borrow() {
            Phase::Provisioned(bundle) => Some(bundle.clone()),
            _ => None,
        }
    }

    /// Leave `Waiting`. Caller holds the submission lock.
    fn transition(&self, next: Phase) -> bool {
        self.phase.send_if_modified(|phase| {
            if phase.is_terminal() {
                return false;
            }
            *phase = next;
            true
        })
    }

    /// Persist `app_secrets` verbatim. Caller holds the submission lock.
    async fn store_app_secrets(&self, app_secrets: &Value) -> BootResult<()> {
        let data = serde_json::to_vec(app_secrets)
            .map_err(|e| BootError::storage(&self.secrets_path, e.into()))?;
        storage::write_atomic(&self.secrets_path, &data).await?;
        info!(path = %self.secrets_path.display(), "Stored app secrets");
        Ok(())
    }
}

impl std::fmt::Debug for ProvisioningSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisioningSession")
            .field("status", &self.status())
            .field("requires_private_key", &self.requires_private_key)
            .field("secrets_path", &self.secrets_path)
            .finish_non_exhaustive()
    }
}
