//! Stopping supervised servers.
//!
//! Nothing here returns an error. Teardown usually runs while a test is
//! cleaning up, and a failure raised there would hide the test's own result.
//! A process that is already gone counts as stopped; anything else is logged.

use super::address::Address;
use super::registry::{ProcessRegistry, SupervisedProcess};
use nix::errno::Errno;
use nix::sys::signal::{kill as send_signal, Signal};
use nix::unistd::Pid;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const BLOCKING_GRACE: Duration = Duration::from_secs(5);
const BLOCKING_POLL: Duration = Duration::from_millis(5);

/// Remove `address` from the registry and stop its process.
///
/// Returns whether a process was registered. Never fails.
pub async fn kill(registry: &mut ProcessRegistry, address: &Address) -> bool {
    match registry.remove(address) {
        Some(process) => {
            terminate(process).await;
            true
        }
        None => {
            debug!("No supervised process registered for {}", address);
            false
        }
    }
}

/// Send SIGTERM and wait until the process is reaped
pub async fn terminate(mut process: SupervisedProcess) {
    if !signal_term(&process) {
        return;
    }

    match process.child.wait().await {
        Ok(status) => {
            debug!(
                "Reaped memcached {} (pid {}): {}",
                process.address, process.pid, status
            );
        }
        Err(e) if e.raw_os_error() == Some(Errno::ECHILD as i32) => {
            debug!("Process {} was already reaped", process.pid);
        }
        Err(e) => {
            warn!("Failed to reap process {}: {}", process.pid, e);
        }
    }
}

/// Blocking variant for contexts that cannot await, such as `Drop`.
///
/// The exit is collected through the child handle, so the runtime never
/// tries to reap the pid again later.
pub fn terminate_blocking(mut process: SupervisedProcess) {
    if !signal_term(&process) {
        return;
    }

    if wait_blocking(&mut process) {
        return;
    }

    warn!(
        "memcached {} (pid {}) ignored SIGTERM, killing",
        process.address, process.pid
    );
    if let Err(e) = process.child.start_kill() {
        warn!("Failed to kill process {}: {}", process.pid, e);
        return;
    }
    if !wait_blocking(&mut process) {
        warn!("Process {} still running after SIGKILL", process.pid);
    }
}

/// Poll the child until it exits or the grace period runs out
fn wait_blocking(process: &mut SupervisedProcess) -> bool {
    let deadline = Instant::now() + BLOCKING_GRACE;
    loop {
        match process.child.try_wait() {
            Ok(Some(status)) => {
                debug!("Reaped process {}: {}", process.pid, status);
                return true;
            }
            Ok(None) if Instant::now() < deadline => std::thread::sleep(BLOCKING_POLL),
            Ok(None) => return false,
            Err(e) if e.raw_os_error() == Some(Errno::ECHILD as i32) => {
                debug!("Process {} was already reaped", process.pid);
                return true;
            }
            Err(e) => {
                warn!("Failed to reap process {}: {}", process.pid, e);
                return true;
            }
        }
    }
}

/// Returns false when there is nothing worth waiting for
fn signal_term(process: &SupervisedProcess) -> bool {
    debug!(
        "Sending SIGTERM to memcached {} (pid {})",
        process.address, process.pid
    );
    match send_signal(Pid::from_raw(process.pid as i32), Signal::SIGTERM) {
        Ok(()) => true,
        // exited but maybe not reaped yet
        Err(Errno::ESRCH) => true,
        Err(e) => {
            warn!("Failed to send SIGTERM to {}: {}", process.pid, e);
            false
        }
    }
}
