//! Servers owned by a supervisor that is never dropped
//!
//! The test re-runs this test binary with a supervisor held in a `static`.
//! Statics are never dropped, so only the exit handler can stop the server
//! once that child test process finishes.

use crate::integration::helpers::{fake_memcached::FakeMemcached, free_port};
use memcached_harness::{Address, LaunchSpec, Supervisor};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Mutex;

const FAKE_DIR_ENV: &str = "MEMCACHED_HARNESS_STATIC_FAKE_DIR";
const PID_FILE_ENV: &str = "MEMCACHED_HARNESS_STATIC_PID_FILE";

static SUPERVISOR: OnceLock<Mutex<Supervisor>> = OnceLock::new();

#[tokio::test]
async fn test_static_supervisor_servers_stop_with_test_process() {
    if let Ok(dir) = std::env::var(FAKE_DIR_ENV) {
        launch_from_static_supervisor(Path::new(&dir)).await;
        return;
    }

    let fake = FakeMemcached::install();
    let pid_file = fake.dir().join("server.pid");

    let status = Command::new(std::env::current_exe().unwrap())
        .arg("test_static_supervisor_servers_stop_with_test_process")
        .arg("--test-threads=1")
        .env(FAKE_DIR_ENV, fake.dir())
        .env(PID_FILE_ENV, &pid_file)
        .status()
        .await
        .unwrap();
    assert!(status.success(), "child test run failed: {}", status);

    let pid: i32 = std::fs::read_to_string(&pid_file)
        .unwrap()
        .trim()
        .parse()
        .unwrap();

    // the server is reparented once the child exits; allow init to collect it
    for _ in 0..50 {
        if kill(Pid::from_raw(pid), None) == Err(Errno::ESRCH) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("server {} outlived the test process that started it", pid);
}

async fn launch_from_static_supervisor(dir: &Path) {
    let supervisor = SUPERVISOR.get_or_init(|| {
        Mutex::new(Supervisor::new(FakeMemcached::config_in(dir)).unwrap())
    });

    let pid = supervisor
        .lock()
        .await
        .ensure_running(&LaunchSpec::new(Address::tcp(free_port())))
        .await
        .unwrap()
        .pid;

    let pid_file = PathBuf::from(std::env::var(PID_FILE_ENV).unwrap());
    std::fs::write(pid_file, pid.to_string()).unwrap();
}
