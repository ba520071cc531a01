//! Test client for talking to mock listeners
//!
//! Speaks just enough of the text protocol (get, version, flush_all) for
//! scenarios to check what a mock handler wrote back.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

pub struct TestClient {
    stream: BufReader<TcpStream>,
}

impl TestClient {
    pub async fn connect(addr: &str) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            stream: BufReader::new(stream),
        })
    }

    async fn send(&mut self, command: &str) -> std::io::Result<()> {
        let stream = self.stream.get_mut();
        stream.write_all(format!("{}\r\n", command).as_bytes()).await?;
        stream.flush().await
    }

    /// One response line without its terminator
    async fn read_line(&mut self) -> std::io::Result<String> {
        let mut line = String::new();
        self.stream.read_line(&mut line).await?;
        Ok(line.trim_end_matches("\r\n").to_string())
    }

    /// `get` for one key: a VALUE header and data line followed by END, or a bare END
    pub async fn get(&mut self, key: &str) -> std::io::Result<Option<String>> {
        self.send(&format!("get {}", key)).await?;
        if !self.read_line().await?.starts_with("VALUE ") {
            return Ok(None);
        }

        let data = self.read_line().await?;
        self.read_line().await?;
        Ok(Some(data))
    }

    pub async fn version(&mut self) -> std::io::Result<String> {
        self.send("version").await?;
        let line = self.read_line().await?;
        Ok(line.strip_prefix("VERSION ").unwrap_or_default().to_string())
    }

    pub async fn flush_all(&mut self) -> std::io::Result<bool> {
        self.send("flush_all").await?;
        Ok(self.read_line().await? == "OK")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::helpers::free_port;
    use memcached_harness::core::mock::with_mock;
    use memcached_harness::MockListener;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_client_reads_scripted_replies() {
        let port = free_port();
        let handler = |conn: memcached_harness::MockConnection| async move {
            let mut stream = conn.into_tcp().unwrap();
            let mut buf = [0u8; 64];
            for reply in ["VERSION 1.6.21-mock\r\n", "OK\r\n"] {
                let _ = stream.read(&mut buf).await.unwrap();
                stream.write_all(reply.as_bytes()).await.unwrap();
            }
        };

        with_mock(
            MockListener::tcp(port),
            handler,
            Duration::from_millis(100),
            || async move {
                let mut client = TestClient::connect(&format!("127.0.0.1:{}", port))
                    .await
                    .unwrap();
                assert_eq!(client.version().await.unwrap(), "1.6.21-mock");
                assert!(client.flush_all().await.unwrap());
            },
        )
        .await;
    }

    #[tokio::test]
    async fn test_get_miss_reads_bare_end() {
        let port = free_port();
        let handler = |conn: memcached_harness::MockConnection| async move {
            let mut stream = conn.into_tcp().unwrap();
            let mut buf = [0u8; 64];
            let _ = stream.read(&mut buf).await.unwrap();
            stream.write_all(b"END\r\n").await.unwrap();
        };

        with_mock(
            MockListener::tcp(port),
            handler,
            Duration::from_millis(100),
            || async move {
                let mut client = TestClient::connect(&format!("127.0.0.1:{}", port))
                    .await
                    .unwrap();
                assert_eq!(client.get("missing").await.unwrap(), None);
            },
        )
        .await;
    }
}
