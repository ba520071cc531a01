use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Listening endpoint of a supervised server. Also the registry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    TcpPort(u16),
    UnixPath(PathBuf),
}

impl Address {
    pub fn tcp(port: u16) -> Self {
        Address::TcpPort(port)
    }

    pub fn unix(path: impl AsRef<Path>) -> Self {
        Address::UnixPath(path.as_ref().to_path_buf())
    }

    /// Server flag and value selecting this address on the memcached command line
    pub fn server_args(&self) -> [String; 2] {
        match self {
            Address::TcpPort(port) => ["-p".to_string(), port.to_string()],
            Address::UnixPath(path) => ["-s".to_string(), path.display().to_string()],
        }
    }

    /// Endpoints a client should be built against.
    ///
    /// TCP ports expand to two equivalent host aliases so clients exercise
    /// their multi-server handling against a single process.
    pub fn endpoints(&self) -> Endpoints {
        match self {
            Address::TcpPort(port) => Endpoints::Tcp(vec![
                format!("localhost:{}", port),
                format!("127.0.0.1:{}", port),
            ]),
            Address::UnixPath(path) => Endpoints::Unix(path.clone()),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::TcpPort(port) => write!(f, "{}", port),
            Address::UnixPath(path) => write!(f, "{}", path.display()),
        }
    }
}

/// What a client collaborator connects to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoints {
    Unix(PathBuf),
    Tcp(Vec<String>),
}

impl Endpoints {
    pub fn len(&self) -> usize {
        match self {
            Endpoints::Unix(_) => 1,
            Endpoints::Tcp(servers) => servers.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Everything needed to build a server command line. Builder methods consume
/// `self`, so a spec cannot change once handed to the launcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    address: Address,
    extra_args: String,
    env: HashMap<String, String>,
}

impl LaunchSpec {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            extra_args: String::new(),
            env: HashMap::new(),
        }
    }

    pub fn extra_args(mut self, args: impl Into<String>) -> Self {
        self.extra_args = args.into();
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn env_vars(&self) -> &HashMap<String, String> {
        &self.env
    }

    /// Full argument list: caller args split on whitespace, then the address flag
    pub fn command_args(&self) -> Vec<String> {
        let mut args: Vec<String> = self
            .extra_args
            .split_whitespace()
            .map(String::from)
            .collect();
        args.extend(self.address.server_args());
        args
    }
}
