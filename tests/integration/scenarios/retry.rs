//! Retry protocol: launch, connect, flush, with forced re-launch on failure

use crate::integration::helpers::{fake_memcached::FakeMemcached, free_port};
use async_trait::async_trait;
use memcached_harness::{
    Address, CacheClient, ClientError, ClientFactory, ClientOptions, Endpoints, HarnessError,
    Supervisor,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Client that only counts flushes
pub struct CountingClient {
    flushes: Arc<AtomicUsize>,
}

#[async_trait]
impl CacheClient for CountingClient {
    async fn flush_all(&mut self) -> Result<(), ClientError> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory that fails its first `failures` connects and records every endpoint set
#[derive(Default)]
pub struct ScriptedFactory {
    failures: usize,
    connects: Mutex<Vec<Endpoints>>,
    flushes: Arc<AtomicUsize>,
}

impl ScriptedFactory {
    fn failing(failures: usize) -> Self {
        Self {
            failures,
            ..Self::default()
        }
    }

    fn connects(&self) -> Vec<Endpoints> {
        self.connects.lock().unwrap().clone()
    }

    fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClientFactory for ScriptedFactory {
    type Client = CountingClient;

    async fn connect(
        &self,
        endpoints: &Endpoints,
        _options: &ClientOptions,
    ) -> Result<CountingClient, ClientError> {
        let attempt = {
            let mut connects = self.connects.lock().unwrap();
            connects.push(endpoints.clone());
            connects.len()
        };

        if attempt <= self.failures {
            return Err(ClientError::ConnectionFailed(format!(
                "scripted failure {}",
                attempt
            )));
        }

        Ok(CountingClient {
            flushes: Arc::clone(&self.flushes),
        })
    }
}

#[tokio::test]
async fn test_gives_up_after_three_attempts() {
    let fake = FakeMemcached::install();
    let mut supervisor =
        Supervisor::with_factory(fake.config(), ScriptedFactory::failing(usize::MAX)).unwrap();
    let options = supervisor.client_options();

    let result = supervisor
        .start_and_flush_with_retry(Address::tcp(free_port()), "", &options)
        .await;

    match result {
        Err(HarnessError::Client(ClientError::ConnectionFailed(msg))) => {
            assert_eq!(msg, "scripted failure 3");
        }
        Err(other) => panic!("Expected the last client error, got {}", other),
        Ok(_) => panic!("Expected failure"),
    }

    assert_eq!(supervisor.factory().connects().len(), 3);
    let stats = supervisor.stats();
    assert_eq!(stats.spawned, 3);
    assert_eq!(stats.failed_attempts, 3);
    assert_eq!(stats.killed, 3);
    // no ghost registration is left behind
    assert!(supervisor.registry().is_empty());
}

#[tokio::test]
async fn test_recovers_on_second_attempt_with_fresh_process() {
    let fake = FakeMemcached::install();
    let mut supervisor =
        Supervisor::with_factory(fake.config(), ScriptedFactory::failing(1)).unwrap();
    let options = supervisor.client_options();
    let address = Address::tcp(free_port());

    let result = supervisor
        .start_and_flush_with_retry(address.clone(), "", &options)
        .await;

    assert!(result.is_ok());
    assert_eq!(supervisor.factory().connects().len(), 2);

    let stats = supervisor.stats();
    assert_eq!(stats.spawned, 2);
    assert_eq!(stats.reused, 0);
    assert_eq!(stats.failed_attempts, 1);
    assert_eq!(stats.killed, 1);

    assert_eq!(supervisor.registry().len(), 1);
    assert!(supervisor.registry().contains(&address));
    assert_eq!(fake.wait_for_invocations(2).await.len(), 2);
}

#[tokio::test]
async fn test_only_first_attempt_flushes() {
    let fake = FakeMemcached::install();

    let mut clean =
        Supervisor::with_factory(fake.config(), ScriptedFactory::failing(0)).unwrap();
    let options = clean.client_options();
    clean
        .start_and_flush_with_retry(Address::tcp(free_port()), "", &options)
        .await
        .unwrap();
    assert_eq!(clean.factory().flushes(), 1);

    let mut flaky =
        Supervisor::with_factory(fake.config(), ScriptedFactory::failing(1)).unwrap();
    flaky
        .start_and_flush_with_retry(Address::tcp(free_port()), "", &options)
        .await
        .unwrap();
    assert_eq!(flaky.factory().flushes(), 0);
}

#[tokio::test]
async fn test_tcp_client_gets_two_aliases_for_the_port() {
    let fake = FakeMemcached::install();
    let mut supervisor =
        Supervisor::with_factory(fake.config(), ScriptedFactory::failing(0)).unwrap();
    let options = supervisor.client_options();
    let port = free_port();

    supervisor
        .start_and_flush_with_retry(Address::tcp(port), "", &options)
        .await
        .unwrap();

    let connects = supervisor.factory().connects();
    assert_eq!(
        connects,
        vec![Endpoints::Tcp(vec![
            format!("localhost:{}", port),
            format!("127.0.0.1:{}", port),
        ])]
    );
}

#[tokio::test]
async fn test_unix_client_gets_single_path_endpoint() {
    let fake = FakeMemcached::install();
    let mut supervisor =
        Supervisor::with_factory(fake.config(), ScriptedFactory::failing(0)).unwrap();
    let options = supervisor.client_options();
    let path = fake.dir().join("client.sock");

    supervisor
        .start_and_flush_with_retry(Address::unix(&path), "", &options)
        .await
        .unwrap();

    let connects = supervisor.factory().connects();
    assert_eq!(connects, vec![Endpoints::Unix(PathBuf::from(&path))]);
    assert_eq!(connects[0].len(), 1);
}

#[tokio::test]
async fn test_persistent_server_is_reused() {
    let fake = FakeMemcached::install();
    let mut supervisor =
        Supervisor::with_factory(fake.config(), ScriptedFactory::failing(0)).unwrap();
    let options = supervisor.client_options();
    let port = free_port();

    supervisor.memcached_persistent(port, &options).await.unwrap();
    supervisor.memcached_persistent(port, &options).await.unwrap();

    let stats = supervisor.stats();
    assert_eq!(stats.spawned, 1);
    assert_eq!(stats.reused, 1);
    assert_eq!(supervisor.registry().len(), 1);
}

#[tokio::test]
async fn test_sasl_persistent_launches_with_sasl_flag() {
    let fake = FakeMemcached::install();
    let mut supervisor =
        Supervisor::with_factory(fake.config(), ScriptedFactory::failing(0)).unwrap();
    let port = free_port();

    supervisor.memcached_sasl_persistent(port).await.unwrap();

    let invocations = fake.wait_for_invocations(1).await;
    assert!(invocations[0].starts_with(&format!("-S -p {}", port)));
}

#[tokio::test]
async fn test_scoped_server_is_killed_after_body() {
    let fake = FakeMemcached::install();
    let mut supervisor =
        Supervisor::with_factory(fake.config(), ScriptedFactory::failing(0)).unwrap();
    let options = supervisor.client_options();
    let port = free_port();

    let seen = supervisor
        .memcached(Address::tcp(port), "-m 16", &options, |_client, address| async move {
            address
        })
        .await
        .unwrap();

    assert_eq!(seen, Address::tcp(port));
    assert!(supervisor.registry().is_empty());
    assert_eq!(supervisor.stats().killed, 1);
}

#[tokio::test]
async fn test_default_text_client_fails_against_silent_server() {
    // the fake never listens, so every connect is refused
    let fake = FakeMemcached::install();
    let mut supervisor = Supervisor::new(fake.config()).unwrap();
    let options = supervisor.client_options();

    let result = supervisor
        .start_and_flush_with_retry(Address::tcp(free_port()), "", &options)
        .await;

    assert!(matches!(result, Err(HarnessError::Client(_))));
    assert_eq!(supervisor.stats().failed_attempts, 3);
    assert!(supervisor.registry().is_empty());
}
