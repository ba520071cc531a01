//! Last-chance cleanup when the test process exits.
//!
//! A registry that is never dropped, such as one behind a supervisor kept in a
//! `static`, would otherwise leak its servers past the end of the test binary.
//! Every registered pid is tracked here and an `atexit` handler stops whatever
//! is still tracked when the process exits normally.

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::waitpid;
use nix::unistd::Pid;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, Once, OnceLock, PoisonError};
use tracing::warn;

static LIVE_PIDS: OnceLock<Mutex<HashSet<u32>>> = OnceLock::new();
static INSTALL: Once = Once::new();

fn live_pids() -> MutexGuard<'static, HashSet<u32>> {
    LIVE_PIDS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Start tracking `pid`, installing the exit handler on first use
pub(crate) fn track(pid: u32) {
    install();
    live_pids().insert(pid);
}

/// Stop tracking `pid`; its owner is stopping it
pub(crate) fn untrack(pid: u32) {
    live_pids().remove(&pid);
}

pub fn is_tracked(pid: u32) -> bool {
    live_pids().contains(&pid)
}

fn install() {
    INSTALL.call_once(|| {
        // SAFETY: `reap_tracked` is a plain function with no captured state and
        // does not unwind.
        if unsafe { libc::atexit(reap_tracked) } != 0 {
            warn!("Could not register exit handler; servers may outlive this process");
        }
    });
}

extern "C" fn reap_tracked() {
    let pids: Vec<u32> = live_pids().drain().collect();
    reap(pids);
}

/// SIGTERM then reap each pid. Runs during process exit, so it neither logs
/// nor panics.
fn reap(pids: impl IntoIterator<Item = u32>) {
    for pid in pids {
        let pid = Pid::from_raw(pid as i32);
        match kill(pid, Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => {
                let _ = waitpid(pid, None);
            }
            Err(_) => {}
        }
    }
}
