use crate::config::{ConfigError, HarnessConfig};
use crate::core::address::{Address, LaunchSpec};
use crate::core::client::{ClientFactory, ClientOptions, TextClientFactory};
use crate::core::launcher::{self, LaunchError};
use crate::core::locator::{BinaryLocation, BinaryLocator, LocateError};
use crate::core::mock::{self, MockConnection, MockListener};
use crate::core::registry::{ProcessRegistry, SupervisedProcess};
use crate::core::retry::{self, HarnessError, RetryPolicy};
use crate::core::stats::{LaunchStats, StatsSnapshot};
use crate::core::teardown;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tracing::info;

/// Port used by [`Supervisor::memcached_persistent`] callers by default
pub const DEFAULT_PERSISTENT_PORT: u16 = 21345;
/// Port used by [`Supervisor::memcached_sasl_persistent`] callers by default
pub const DEFAULT_SASL_PORT: u16 = 21397;

/// Owns every server a test suite starts.
///
/// Servers stay registered until [`Supervisor::kill`] or until the supervisor
/// is dropped, at which point the registry stops and reaps whatever is left.
pub struct Supervisor<F: ClientFactory = TextClientFactory> {
    config: HarnessConfig,
    locator: BinaryLocator,
    registry: ProcessRegistry,
    factory: F,
    stats: LaunchStats,
}

impl Supervisor<TextClientFactory> {
    pub fn new(config: HarnessConfig) -> Result<Self, ConfigError> {
        Self::with_factory(config, TextClientFactory)
    }
}

impl<F: ClientFactory> Supervisor<F> {
    pub fn with_factory(config: HarnessConfig, factory: F) -> Result<Self, ConfigError> {
        config.validate()?;
        let locator = BinaryLocator::new(
            config.search_system_path,
            config.search_paths.clone(),
            config.min_version()?,
        );

        Ok(Self {
            config,
            locator,
            registry: ProcessRegistry::new(),
            factory,
            stats: LaunchStats::new(),
        })
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub async fn locate(&self) -> Result<BinaryLocation, LocateError> {
        self.locator.locate().await
    }

    /// Client options carrying the configured connect timeout
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions::default().connect_timeout(self.config.connect_timeout())
    }

    /// Client options carrying the configured SASL credentials
    pub fn sasl_options(&self) -> ClientOptions {
        self.client_options()
            .with_credentials(&self.config.sasl.username, &self.config.sasl.password)
    }

    /// Launch spec for a SASL-enabled server: `-S` plus the fixture environment
    pub fn sasl_spec(&self, address: Address) -> LaunchSpec {
        LaunchSpec::new(address)
            .extra_args("-S")
            .env(
                "MEMCACHED_SASL_PWDB",
                self.config.sasl.pwdb_path.display().to_string(),
            )
            .env(
                "SASL_CONF_PATH",
                self.config.sasl.conf_path.display().to_string(),
            )
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.config.max_attempts,
            settle: self.config.settle(),
        }
    }

    /// Start a server for `spec` unless one is already registered
    pub async fn ensure_running(&mut self, spec: &LaunchSpec) -> Result<&SupervisedProcess, LaunchError> {
        launcher::ensure_running(
            &mut self.registry,
            &self.locator,
            spec,
            self.config.settle(),
            &self.stats,
        )
        .await
    }

    /// Stop the server on `address`, if any. Never fails.
    pub async fn kill(&mut self, address: &Address) {
        if teardown::kill(&mut self.registry, address).await {
            self.stats.record_kill();
        }
    }

    /// Stop every registered server
    pub async fn shutdown(&mut self) {
        for address in self.registry.addresses() {
            self.kill(&address).await;
        }
    }

    pub async fn start_and_flush_with_retry(
        &mut self,
        address: Address,
        extra_args: &str,
        options: &ClientOptions,
    ) -> Result<F::Client, HarnessError> {
        let spec = LaunchSpec::new(address).extra_args(extra_args);
        self.start_spec_with_retry(&spec, options).await
    }

    /// Retry wrapper for a fully built spec, for servers that need environment
    pub async fn start_spec_with_retry(
        &mut self,
        spec: &LaunchSpec,
        options: &ClientOptions,
    ) -> Result<F::Client, HarnessError> {
        let policy = self.retry_policy();
        retry::start_and_flush_with_retry(
            &mut self.registry,
            &self.locator,
            &self.factory,
            spec,
            options,
            policy,
            &self.stats,
        )
        .await
    }

    /// Start a server, run `body` with a flushed client, then stop the server.
    ///
    /// The server is stopped even if `body` panics.
    pub async fn memcached<B, Fut, T>(
        &mut self,
        address: Address,
        extra_args: &str,
        options: &ClientOptions,
        body: B,
    ) -> Result<T, HarnessError>
    where
        B: FnOnce(F::Client, Address) -> Fut,
        Fut: Future<Output = T>,
    {
        let client = self
            .start_and_flush_with_retry(address.clone(), extra_args, options)
            .await?;

        let outcome = AssertUnwindSafe(body(client, address.clone()))
            .catch_unwind()
            .await;
        self.kill(&address).await;

        match outcome {
            Ok(value) => Ok(value),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// Start (or reuse) a plain server on `port` that lives as long as the supervisor
    pub async fn memcached_persistent(
        &mut self,
        port: u16,
        options: &ClientOptions,
    ) -> Result<F::Client, HarnessError> {
        self.start_and_flush_with_retry(Address::tcp(port), "", options)
            .await
    }

    /// Start (or reuse) a SASL-enabled server on `port` that lives as long as the supervisor
    pub async fn memcached_sasl_persistent(&mut self, port: u16) -> Result<F::Client, HarnessError> {
        let spec = self.sasl_spec(Address::tcp(port));
        let options = self.sasl_options();
        info!("Starting SASL memcached on port {}", port);
        self.start_spec_with_retry(&spec, &options).await
    }

    /// Run `body` against a background mock using the configured settle delay
    pub async fn mock<H, HFut, B, BFut, T>(&self, listener: MockListener, handler: H, body: B) -> T
    where
        H: FnOnce(MockConnection) -> HFut + Send + 'static,
        HFut: Future<Output = ()> + Send + 'static,
        B: FnOnce() -> BFut,
        BFut: Future<Output = T>,
    {
        mock::with_mock(listener, handler, self.config.mock_settle(), body).await
    }
}
