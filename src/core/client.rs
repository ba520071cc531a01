//! Client collaborator seam.
//!
//! The harness does not speak the memcached protocol itself. It builds a
//! client through a [`ClientFactory`] and only ever asks it to flush. Test
//! suites plug in the client library under test; [`TextClientFactory`] is a
//! minimal text-protocol client for suites that just need a clean server.

use super::address::Endpoints;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, UnixStream};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Options forwarded to the client factory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    pub username: Option<String>,
    pub password: Option<String>,
    pub connect_timeout: Duration,
}

impl ClientOptions {
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn has_credentials(&self) -> bool {
        self.username.is_some()
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            connect_timeout: Duration::from_millis(1000),
        }
    }
}

/// A client bound to a running server
#[async_trait]
pub trait CacheClient: Send {
    /// Drop every item stored on the server
    async fn flush_all(&mut self) -> Result<(), ClientError>;
}

/// Builds clients for freshly launched servers
#[async_trait]
pub trait ClientFactory: Send + Sync {
    type Client: CacheClient;

    async fn connect(
        &self,
        endpoints: &Endpoints,
        options: &ClientOptions,
    ) -> Result<Self::Client, ClientError>;
}

enum TextStream {
    Tcp(BufReader<TcpStream>),
    Unix(BufReader<UnixStream>),
}

/// Memcached text-protocol client supporting `flush_all` and `version`
pub struct TextClient {
    server: String,
    stream: TextStream,
}

impl TextClient {
    /// Connect to the first reachable endpoint
    pub async fn connect(endpoints: &Endpoints, options: &ClientOptions) -> Result<Self, ClientError> {
        if options.has_credentials() {
            return Err(ClientError::Unsupported(
                "SASL authentication needs a client that implements it".to_string(),
            ));
        }

        match endpoints {
            Endpoints::Unix(path) => {
                let stream = timeout(options.connect_timeout, UnixStream::connect(path))
                    .await
                    .map_err(|_| {
                        ClientError::ConnectionFailed(format!("{} timed out", path.display()))
                    })?
                    .map_err(|e| ClientError::ConnectionFailed(format!("{}: {}", path.display(), e)))?;
                Ok(Self {
                    server: path.display().to_string(),
                    stream: TextStream::Unix(BufReader::new(stream)),
                })
            }
            Endpoints::Tcp(servers) => {
                let mut last_error = ClientError::NoEndpoints;
                for server in servers {
                    match timeout(options.connect_timeout, TcpStream::connect(server.as_str())).await {
                        Ok(Ok(stream)) => {
                            let _ = stream.set_nodelay(true);
                            debug!("Connected to {}", server);
                            return Ok(Self {
                                server: server.clone(),
                                stream: TextStream::Tcp(BufReader::new(stream)),
                            });
                        }
                        Ok(Err(e)) => {
                            warn!("Connection to {} failed: {}", server, e);
                            last_error = ClientError::ConnectionFailed(format!("{}: {}", server, e));
                        }
                        Err(_) => {
                            warn!("Connection to {} timed out", server);
                            last_error = ClientError::ConnectionFailed(format!(
                                "{} timed out after {:?}",
                                server, options.connect_timeout
                            ));
                        }
                    }
                }
                Err(last_error)
            }
        }
    }

    /// Endpoint this client ended up connected to
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Server version string, e.g. "1.6.21"
    pub async fn version(&mut self) -> Result<String, ClientError> {
        let line = self.request("version").await?;
        if let Some(version) = line.strip_prefix("VERSION ") {
            return Ok(version.to_string());
        }
        Err(ClientError::UnexpectedResponse(line))
    }

    async fn request(&mut self, command: &str) -> Result<String, ClientError> {
        match &mut self.stream {
            TextStream::Tcp(stream) => send_line(stream, command).await,
            TextStream::Unix(stream) => send_line(stream, command).await,
        }
    }
}

#[async_trait]
impl CacheClient for TextClient {
    async fn flush_all(&mut self) -> Result<(), ClientError> {
        let line = self.request("flush_all").await?;
        if line == "OK" {
            Ok(())
        } else {
            Err(ClientError::UnexpectedResponse(line))
        }
    }
}

/// Write one command line and read one response line, without the terminator
async fn send_line<S>(stream: &mut S, command: &str) -> Result<String, ClientError>
where
    S: AsyncBufRead + AsyncWrite + Unpin,
{
    stream
        .write_all(format!("{}\r\n", command).as_bytes())
        .await
        .map_err(|e| ClientError::Io(e.to_string()))?;
    stream.flush().await.map_err(|e| ClientError::Io(e.to_string()))?;

    let mut line = String::new();
    let n = stream
        .read_line(&mut line)
        .await
        .map_err(|e| ClientError::Io(e.to_string()))?;
    if n == 0 {
        return Err(ClientError::Io("connection closed by server".to_string()));
    }
    Ok(line.trim_end().to_string())
}

/// Factory for [`TextClient`]
#[derive(Debug, Clone, Copy, Default)]
pub struct TextClientFactory;

#[async_trait]
impl ClientFactory for TextClientFactory {
    type Client = TextClient;

    async fn connect(
        &self,
        endpoints: &Endpoints,
        options: &ClientOptions,
    ) -> Result<TextClient, ClientError> {
        TextClient::connect(endpoints, options).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
    #[error("Unsupported: {0}")]
    Unsupported(String),
    #[error("No endpoints to connect to")]
    NoEndpoints,
}
