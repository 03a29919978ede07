//! Secret provisioning over HTTPS.
//!
//! The instance exposes a single endpoint, served with the self-signed
//! identity, until the operator delivers the code key or the deadline
//! elapses.
//!
//! ## Flow
//!
//! - [`ProvisioningSession`] holds the token and the completion signal
//! - [`provisioning_router`] validates submissions (`GET /`, `POST /`)
//! - [`serve_tls`] runs the router behind rustls
//! - [`HandoffCoordinator`] arms the [`Deadline`], serves until the session
//!   completes, then shuts the endpoint down
//!
//! ## Usage
//!
//! ```ignore
//! let session = Arc::new(ProvisioningSession::new(token, false, secrets_path));
//! let handoff = HandoffCoordinator::new(session, Duration::from_secs(300))
//!     .run(listener, tls_server_config(&identity)?)
//!     .await?;
//! ```

pub mod handoff;
pub mod secrets;
pub mod server;
pub mod session;
pub mod transport;

pub use handoff::{Deadline, Handoff, HandoffCoordinator};
pub use secrets::{CodeKey, ProtocolError, ProvisionRequest, SecretBundle, CODE_KEY_LEN};
pub use server::{serve_tls, tls_server_config};
pub use session::{Phase, ProvisioningSession, ProvisioningStatus};
pub use transport::{provisioning_router, STATUS_HEADER, WAITING_BODY};
