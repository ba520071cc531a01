use super::address::LaunchSpec;
use super::client::{CacheClient, ClientError, ClientFactory, ClientOptions};
use super::launcher::{self, LaunchError};
use super::locator::BinaryLocator;
use super::registry::ProcessRegistry;
use super::stats::LaunchStats;
use super::teardown;
use std::time::Duration;
use tracing::{debug, error, warn};

/// How hard to try bringing a server up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub settle: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            settle: Duration::from_millis(100),
        }
    }
}

/// Launch a server, connect a client to it and flush it, retrying the whole
/// sequence up to `policy.max_attempts` times.
///
/// Only the first attempt flushes. A failed attempt removes the address from
/// the registry and stops whatever was started, so the next attempt launches a
/// fresh process instead of reusing a broken one. After the last attempt the
/// underlying error is returned.
pub async fn start_and_flush_with_retry<F: ClientFactory>(
    registry: &mut ProcessRegistry,
    locator: &BinaryLocator,
    factory: &F,
    spec: &LaunchSpec,
    options: &ClientOptions,
    policy: RetryPolicy,
    stats: &LaunchStats,
) -> Result<F::Client, HarnessError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        let flush = attempt == 0;
        match start_and_flush(registry, locator, factory, spec, options, policy.settle, stats, flush)
            .await
        {
            Ok(client) => {
                debug!(
                    "memcached on {} ready after {} attempt(s)",
                    spec.address(),
                    attempt + 1
                );
                return Ok(client);
            }
            Err(e) => {
                stats.record_failed_attempt();
                if let Some(process) = registry.remove(spec.address()) {
                    teardown::terminate(process).await;
                    stats.record_kill();
                }

                attempt += 1;
                if attempt >= max_attempts {
                    error!(
                        "Giving up on memcached {} after {} attempts: {}",
                        spec.address(),
                        attempt,
                        e
                    );
                    return Err(e);
                }
                warn!(
                    "Attempt {}/{} to start memcached on {} failed: {}",
                    attempt,
                    max_attempts,
                    spec.address(),
                    e
                );
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn start_and_flush<F: ClientFactory>(
    registry: &mut ProcessRegistry,
    locator: &BinaryLocator,
    factory: &F,
    spec: &LaunchSpec,
    options: &ClientOptions,
    settle: Duration,
    stats: &LaunchStats,
    flush: bool,
) -> Result<F::Client, HarnessError> {
    launcher::ensure_running(registry, locator, spec, settle, stats).await?;

    let endpoints = spec.address().endpoints();
    let mut client = factory.connect(&endpoints, options).await?;
    if flush {
        client.flush_all().await?;
    }
    Ok(client)
}

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("Launch failed: {0}")]
    Launch(#[from] LaunchError),
    #[error("Client failed: {0}")]
    Client(#[from] ClientError),
}
