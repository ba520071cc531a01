use super::address::Address;
use super::{exit_hook, teardown};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::time::Instant;
use tokio::process::Child;
use tracing::debug;

/// A server process started by the launcher
#[derive(Debug)]
pub struct SupervisedProcess {
    pub address: Address,
    pub pid: u32,
    pub started_at: Instant,
    pub(crate) child: Child,
}

impl SupervisedProcess {
    pub(crate) fn new(address: Address, pid: u32, child: Child) -> Self {
        Self {
            address,
            pid,
            started_at: Instant::now(),
            child,
        }
    }
}

/// Maps listening addresses to the server processes bound to them.
///
/// Every mutation takes `&mut self`, so one owner drives the registry at a
/// time. Separate test binaries launching against the same address are not
/// coordinated and will collide; pick distinct ports per suite.
///
/// Dropping the registry terminates and reaps every process still in it.
/// Processes removed through [`ProcessRegistry::remove`] are no longer its
/// concern, so nothing is signalled twice. Registered pids are also tracked
/// process-wide and stopped at exit if the registry itself is never dropped.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    processes: HashMap<Address, SupervisedProcess>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.processes.contains_key(address)
    }

    pub fn get(&self, address: &Address) -> Option<&SupervisedProcess> {
        self.processes.get(address)
    }

    /// Register a process. An existing entry for the same address wins and
    /// the rejected process is killed when dropped.
    pub fn insert(&mut self, process: SupervisedProcess) -> &SupervisedProcess {
        match self.processes.entry(process.address.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                exit_hook::track(process.pid);
                entry.insert(process)
            }
        }
    }

    pub fn remove(&mut self, address: &Address) -> Option<SupervisedProcess> {
        let process = self.processes.remove(address)?;
        exit_hook::untrack(process.pid);
        Some(process)
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.processes.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}

impl Drop for ProcessRegistry {
    fn drop(&mut self) {
        if self.processes.is_empty() {
            return;
        }
        debug!(
            "Shutting down {} supervised process(es)",
            self.processes.len()
        );
        for (_, process) in self.processes.drain() {
            exit_hook::untrack(process.pid);
            teardown::terminate_blocking(process);
        }
    }
}
