//! Application hand-off: run the workload with its launch plan.

use crate::error::{BootError, BootResult};
use crate::launch::planner::{LaunchPlan, TlsMaterial};
use std::process::ExitStatus;
use tokio::process::Command;
use tracing::info;

pub const ENV_BIND: &str = "BOOTSTRAP_BIND";
pub const ENV_MODULE_DIR: &str = "BOOTSTRAP_MODULE_DIR";
pub const ENV_SECRETS_PATH: &str = "BOOTSTRAP_SECRETS_PATH";
pub const ENV_CERT_PATH: &str = "BOOTSTRAP_CERT_PATH";
pub const ENV_KEY_PATH: &str = "BOOTSTRAP_KEY_PATH";

impl LaunchPlan {
    /// Environment passed to the application.
    pub fn environment(&self) -> Vec<(&'static str, String)> {
        let mut env = vec![
            (ENV_BIND, self.bind.clone()),
            (ENV_MODULE_DIR, self.module_dir.display().to_string()),
            (ENV_SECRETS_PATH, self.secrets_path.display().to_string()),
        ];
        if let TlsMaterial::Files { cert, key } = &self.tls {
            env.push((ENV_CERT_PATH, cert.display().to_string()));
            env.push((ENV_KEY_PATH, key.display().to_string()));
        }
        env
    }
}

/// Start the application from the module directory and wait for it.
pub async fn run_application(plan: &LaunchPlan) -> BootResult<ExitStatus> {
    let (program, args) = plan
        .command
        .split_first()
        .ok_or_else(|| BootError::Launch("empty application command".into()))?;

    info!(program = %program, module_dir = %plan.module_dir.display(), "Starting application");

    let mut child = Command::new(program)
        .args(args)
        .current_dir(&plan.module_dir)
        .envs(plan.environment())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| BootError::Launch(format!("failed to start {}: {}", program, e)))?;

    let status = child
        .wait()
        .await
        .map_err(|e| BootError::Launch(format!("failed to wait for {}: {}", program, e)))?;

    info!(%status, "Application exited");
    Ok(status)
}

/// Process exit code mirroring the application's.
///
/// A child killed by a signal maps to `128 + signal`, like a shell.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn plan(module_dir: PathBuf, command: &[&str], tls: TlsMaterial) -> LaunchPlan {
        LaunchPlan {
            bind: "0.0.0.0:8443".into(),
            tls,
            module_dir,
            secrets_path: PathBuf::from("/tmp/secrets.json"),
            command: command.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_environment_for_tls_plan() {
        let p = plan(
            PathBuf::from("/app-module"),
            &["app"],
            TlsMaterial::Files {
                cert: PathBuf::from("/key/cert.pem"),
                key: PathBuf::from("/key/key.pem"),
            },
        );
        let env = p.environment();
        assert!(env.contains(&(ENV_BIND, "0.0.0.0:8443".to_string())));
        assert!(env.contains(&(ENV_CERT_PATH, "/key/cert.pem".to_string())));
        assert!(env.contains(&(ENV_KEY_PATH, "/key/key.pem".to_string())));

        let p = plan(PathBuf::from("/app-module"), &["app"], TlsMaterial::Plaintext);
        assert!(!p.environment().iter().any(|(name, _)| *name == ENV_CERT_PATH));
    }

    #[tokio::test]
    async fn test_runs_in_module_dir_with_environment() {
        let dir = tempfile::tempdir().unwrap();
        let p = plan(
            dir.path().to_path_buf(),
            &["sh", "-c", "echo \"$BOOTSTRAP_BIND\" > out.txt && exit 3"],
            TlsMaterial::Plaintext,
        );

        let status = run_application(&p).await.unwrap();
        assert_eq!(exit_code(status), 3);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("out.txt")).unwrap(),
            "0.0.0.0:8443\n"
        );
    }

    #[tokio::test]
    async fn test_missing_program_is_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let p = plan(
            dir.path().to_path_buf(),
            &["/nonexistent/program"],
            TlsMaterial::Plaintext,
        );
        assert!(matches!(run_application(&p).await, Err(BootError::Launch(_))));

        let p = plan(dir.path().to_path_buf(), &[], TlsMaterial::Plaintext);
        assert!(matches!(run_application(&p).await, Err(BootError::Launch(_))));
    }
}
