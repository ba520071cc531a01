//! One-shot mock memcached listeners
//!
//! A mock opens a single listening socket, accepts a single connection and
//! hands the raw connection to test code, which plays the server side by
//! writing whatever bytes it likes. There is no protocol handling here.

use futures::FutureExt;
use socket2::{Domain, Protocol, Socket, Type};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const DEFAULT_MOCK_PORT: u16 = 19123;
pub const DEFAULT_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MOCK_SETTLE: Duration = Duration::from_millis(300);

/// Per-process socket path used when a test does not pick one
pub fn default_unix_socket_path() -> PathBuf {
    std::env::temp_dir().join(format!("memcached_harness_{}.sock", std::process::id()))
}

/// Which kind of mock to open
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockListener {
    Tcp { port: u16 },
    Unix { path: PathBuf },
    /// Sleeps `wait` before binding, then hands over the listener itself
    Delayed { port: u16, wait: Duration },
}

impl MockListener {
    pub fn tcp(port: u16) -> Self {
        MockListener::Tcp { port }
    }

    pub fn unix(path: impl AsRef<Path>) -> Self {
        MockListener::Unix {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn delayed(port: u16, wait: Duration) -> Self {
        MockListener::Delayed { port, wait }
    }

    /// Open the listener, accept once, run the handler, return
    pub async fn run<F, Fut>(self, handler: F) -> io::Result<()>
    where
        F: FnOnce(MockConnection) -> Fut,
        Fut: Future<Output = ()>,
    {
        match self {
            MockListener::Tcp { port } => start(port, |s| handler(MockConnection::Tcp(s))).await,
            MockListener::Unix { path } => {
                start_unix(&path, |s| handler(MockConnection::Unix(s))).await
            }
            MockListener::Delayed { port, wait } => {
                delayed_start(port, wait, |l| handler(MockConnection::Listener(l))).await
            }
        }
    }
}

impl Default for MockListener {
    fn default() -> Self {
        MockListener::tcp(DEFAULT_MOCK_PORT)
    }
}

/// What a mock hands to its handler
#[derive(Debug)]
pub enum MockConnection {
    Tcp(TcpStream),
    Unix(UnixStream),
    Listener(TcpListener),
}

impl MockConnection {
    pub fn into_tcp(self) -> Option<TcpStream> {
        match self {
            MockConnection::Tcp(stream) => Some(stream),
            _ => None,
        }
    }

    pub fn into_unix(self) -> Option<UnixStream> {
        match self {
            MockConnection::Unix(stream) => Some(stream),
            _ => None,
        }
    }

    pub fn into_listener(self) -> Option<TcpListener> {
        match self {
            MockConnection::Listener(listener) => Some(listener),
            _ => None,
        }
    }
}

/// Listen on 127.0.0.1:`port` with address reuse so back-to-back tests can
/// rebind a port still in TIME_WAIT
fn bind_tcp(port: u16) -> io::Result<TcpListener> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(128)?;
    TcpListener::from_std(socket.into())
}

/// Accept one TCP connection on `port` and pass it to `handler`.
///
/// The listener is closed before the handler runs, so later connection
/// attempts are refused.
pub async fn start<F, Fut>(port: u16, handler: F) -> io::Result<()>
where
    F: FnOnce(TcpStream) -> Fut,
    Fut: Future<Output = ()>,
{
    let listener = bind_tcp(port)?;
    debug!("Mock listening on 127.0.0.1:{}", port);
    let (stream, peer) = listener.accept().await?;
    drop(listener);
    debug!("Mock on port {} accepted {}", port, peer);
    handler(stream).await;
    Ok(())
}

/// Accept one connection on a Unix socket at `path`, replacing any stale file
pub async fn start_unix<F, Fut>(path: &Path, handler: F) -> io::Result<()>
where
    F: FnOnce(UnixStream) -> Fut,
    Fut: Future<Output = ()>,
{
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed stale socket {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let listener = UnixListener::bind(path)?;
    debug!("Mock listening on {}", path.display());
    let (stream, _) = listener.accept().await?;
    drop(listener);
    handler(stream).await;
    Ok(())
}

/// Sleep `wait`, then bind `port` and give the listener to `handler`.
///
/// Nothing is listening during the wait, which lets client tests observe
/// connect timeouts and refusals.
pub async fn delayed_start<F, Fut>(port: u16, wait: Duration, handler: F) -> io::Result<()>
where
    F: FnOnce(TcpListener) -> Fut,
    Fut: Future<Output = ()>,
{
    tokio::time::sleep(wait).await;
    let listener = bind_tcp(port)?;
    debug!("Delayed mock listening on 127.0.0.1:{} after {:?}", port, wait);
    handler(listener).await;
    Ok(())
}

/// A mock running in the background while the test acts as the client.
///
/// Call [`MockServer::stop`] to terminate it and wait for it. Dropping the
/// guard instead still signals the mock and aborts its task.
pub struct MockServer {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<io::Result<()>>>,
}

impl MockServer {
    /// Start `listener` in the background and wait `settle` for it to bind
    pub async fn spawn<F, Fut>(listener: MockListener, handler: F, settle: Duration) -> Self
    where
        F: FnOnce(MockConnection) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            tokio::select! {
                result = listener.run(handler) => result,
                _ = shutdown_rx => {
                    debug!("Mock terminated");
                    Ok(())
                }
            }
        });

        tokio::time::sleep(settle).await;

        Self {
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }

    /// Whether the mock has already returned on its own
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |task| task.is_finished())
    }

    /// Signal the mock and wait for it to finish.
    ///
    /// Returns the listener's own error, if it had one. A panic inside the
    /// handler is resumed here so the test fails with it.
    pub async fn stop(mut self) -> io::Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        match self.task.take() {
            Some(task) => match task.await {
                Ok(result) => result,
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(_) => Ok(()),
            },
            None => Ok(()),
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Run `body` against a background mock and always stop the mock afterwards,
/// including when `body` panics.
pub async fn with_mock<F, Fut, B, BFut, T>(
    listener: MockListener,
    handler: F,
    settle: Duration,
    body: B,
) -> T
where
    F: FnOnce(MockConnection) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
    B: FnOnce() -> BFut,
    BFut: Future<Output = T>,
{
    let server = MockServer::spawn(listener, handler, settle).await;
    let outcome = AssertUnwindSafe(body()).catch_unwind().await;
    let stopped = server.stop().await;

    match outcome {
        Ok(value) => {
            if let Err(e) = stopped {
                warn!("Mock listener failed: {}", e);
            }
            value
        }
        Err(panic) => std::panic::resume_unwind(panic),
    }
}
