pub mod boot;
pub mod cert;
pub mod config;
pub mod error;
pub mod launch;
pub mod provision;
pub mod storage;
pub mod workload;

pub use config::{AppConfig, CertificateMode};
pub use error::{BootError, BootResult};
