pub mod address;
pub mod client;
pub mod exit_hook;
pub mod launcher;
pub mod locator;
pub mod mock;
pub mod registry;
pub mod retry;
pub mod stats;
pub mod teardown;

// Re-export core types
pub use address::{Address, Endpoints, LaunchSpec};
pub use client::{CacheClient, ClientError, ClientFactory, ClientOptions, TextClient, TextClientFactory};
pub use launcher::LaunchError;
pub use locator::{BinaryLocation, BinaryLocator, LocateError, Version};
pub use mock::{MockConnection, MockListener, MockServer};
pub use registry::{ProcessRegistry, SupervisedProcess};
pub use retry::{HarnessError, RetryPolicy};
pub use stats::{LaunchStats, StatsSnapshot};
