//! Transition from provisioning to the real service.

pub mod exec;
pub mod planner;

pub use exec::{exit_code, run_application};
pub use planner::{LaunchPlan, LaunchPlanner, TlsMaterial};
