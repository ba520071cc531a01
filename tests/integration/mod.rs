//! Integration test helpers and scenarios
//!
//! - helpers: a fake memcached binary, a text-protocol test client, port picking
//! - scenarios: supervision, retry and mock listener behavior


// Re-export commonly used helpers
pub use helpers::{fake_memcached::FakeMemcached, free_port, test_client::TestClient};
