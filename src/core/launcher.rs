use super::address::{Address, LaunchSpec};
use super::locator::{BinaryLocator, LocateError};
use super::registry::{ProcessRegistry, SupervisedProcess};
use super::stats::LaunchStats;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Make sure a server is running for `spec.address` and return its entry.
///
/// An address that is already registered is returned as is, without spawning.
/// Otherwise the server is spawned and registered, then the caller waits
/// `settle` so it can start listening. That wait is a heuristic, not a
/// readiness check. Registration comes first so a caller cancelled during the
/// wait still leaves the process to the registry.
pub async fn ensure_running<'r>(
    registry: &'r mut ProcessRegistry,
    locator: &BinaryLocator,
    spec: &LaunchSpec,
    settle: Duration,
    stats: &LaunchStats,
) -> Result<&'r SupervisedProcess, LaunchError> {
    let address = spec.address();

    if registry.contains(address) {
        debug!("Reusing memcached already running on {}", address);
        stats.record_reuse();
    } else {
        let process = spawn(locator, spec).await?;
        stats.record_spawn();
        registry.insert(process);
        tokio::time::sleep(settle).await;
    }

    registry
        .get(address)
        .ok_or_else(|| LaunchError::NotRegistered(address.to_string()))
}

async fn spawn(locator: &BinaryLocator, spec: &LaunchSpec) -> Result<SupervisedProcess, LaunchError> {
    let location = locator.locate().await?;

    if let Address::UnixPath(path) = spec.address() {
        remove_stale_socket(path);
    }

    let executable = location.executable();
    let args = spec.command_args();
    info!("Starting {} {}", executable.display(), args.join(" "));

    let child = Command::new(&executable)
        .args(&args)
        .envs(spec.env_vars())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| LaunchError::Spawn(format!("{}: {}", executable.display(), e)))?;

    let pid = child
        .id()
        .ok_or_else(|| LaunchError::Spawn(format!("{} exited immediately", executable.display())))?;
    debug!("memcached for {} started with pid {}", spec.address(), pid);

    Ok(SupervisedProcess::new(spec.address().clone(), pid, child))
}

/// Best-effort removal of a socket file left behind by an earlier run
pub(crate) fn remove_stale_socket(path: &std::path::Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed stale socket {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove stale socket {}: {}", path.display(), e),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error(transparent)]
    Locate(#[from] LocateError),
    #[error("Spawn failed: {0}")]
    Spawn(String),
    #[error("No process registered for {0} after launch")]
    NotRegistered(String),
}
