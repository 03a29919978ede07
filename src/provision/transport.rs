//! Provisioning transport layer - HTTP endpoints the operator talks to.
//!
//! Exposes endpoints for:
//! - Checking that the instance is waiting for secrets
//! - Receiving the code key (and, depending on the mode, the TLS private key
//!   and application secrets)

use crate::provision::secrets::{ProtocolError, ProvisionRequest};
use crate::provision::session::ProvisioningSession;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Response header advertising the endpoint state.
pub const STATUS_HEADER: HeaderName = HeaderName::from_static("mse-status");

/// Body of `GET /`.
pub const WAITING_BODY: &str = "Waiting for code secret key and/or ssl private key...";

impl IntoResponse for ProtocolError {
    fn into_response(self) -> Response {
        // The operator only ever learns "accepted" or "not accepted"
        StatusCode::UNAUTHORIZED.into_response()
    }
}

/// Handler: GET /
///
/// Tells the operator the instance is waiting for secrets.
async fn get_status() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(STATUS_HEADER, HeaderValue::from_static("Waiting"))],
        WAITING_BODY,
    )
}

/// Handler: POST /
///
/// Validates a submission and, if it is the first valid one, completes the
/// session. The body is taken as raw bytes so that every failure, including
/// malformed JSON, is answered with the same 401.
async fn provision(
    State(session): State<Arc<ProvisioningSession>>,
    body: Bytes,
) -> Result<StatusCode, ProtocolError> {
    accept_submission(&session, &body)
        .await
        .inspect_err(|e| warn!(reason = e.reason(), "Rejected provisioning request: {}", e))?;

    info!("Secrets provisioned successfully");
    Ok(StatusCode::OK)
}

async fn accept_submission(session: &ProvisioningSession, body: &[u8]) -> Result<(), ProtocolError> {
    if !session.is_waiting() {
        return Err(ProtocolError::AlreadyProvisioned);
    }

    let request = ProvisionRequest::parse(body)?;
    session.submit(&request).await
}

/// Create the provisioning router.
pub fn provisioning_router(session: Arc<ProvisioningSession>) -> Router {
    Router::new()
        .route("/", get(get_status).post(provision))
        .layer(TraceLayer::new_for_http())
        .with_state(session)
}
