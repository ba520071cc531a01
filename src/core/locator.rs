use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use std::sync::OnceLock;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info};

pub const BINARY_NAME: &str = "memcached";

/// Directories probed after the default search path
pub const DEFAULT_SEARCH_PATHS: &[&str] = &["/usr/local/bin/", "/opt/local/bin/", "/usr/bin/"];

fn version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^memcached (\d+\.\d+\.\d+)").expect("version pattern is valid")
    })
}

/// Numeric `major.minor.patch` version.
///
/// Compared field by field, so 1.10.0 sorts after 1.4.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Extract the server version from the first line of `memcached -h` output
    pub fn from_help_output(output: &str) -> Option<Self> {
        let first_line = output.lines().next()?.trim();
        let captures = version_pattern().captures(first_line)?;
        captures.get(1)?.as_str().parse().ok()
    }
}

impl FromStr for Version {
    type Err = String;

    /// Accepts `x`, `x.y` or `x.y.z`; missing fields are zero
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = [0u32; 3];
        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.is_empty() || parts.len() > 3 {
            return Err(format!("Invalid version '{}'", s));
        }
        for (slot, part) in fields.iter_mut().zip(&parts) {
            *slot = part
                .parse()
                .map_err(|_| format!("Invalid version component '{}' in '{}'", part, s))?;
        }
        Ok(Version::new(fields[0], fields[1], fields[2]))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Where a usable memcached binary lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinaryLocation {
    /// Resolved through the default search path
    OnPath,
    InDir(PathBuf),
}

impl BinaryLocation {
    pub fn executable(&self) -> PathBuf {
        match self {
            BinaryLocation::OnPath => PathBuf::from(BINARY_NAME),
            BinaryLocation::InDir(dir) => dir.join(BINARY_NAME),
        }
    }
}

impl fmt::Display for BinaryLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinaryLocation::OnPath => write!(f, "PATH"),
            BinaryLocation::InDir(dir) => write!(f, "{}", dir.display()),
        }
    }
}

/// Finds a memcached binary new enough for the test suite and remembers it
#[derive(Debug)]
pub struct BinaryLocator {
    search_system_path: bool,
    search_paths: Vec<PathBuf>,
    min_version: Version,
    found: OnceCell<BinaryLocation>,
}

impl BinaryLocator {
    pub fn new(search_system_path: bool, search_paths: Vec<PathBuf>, min_version: Version) -> Self {
        Self {
            search_system_path,
            search_paths,
            min_version,
            found: OnceCell::new(),
        }
    }

    pub fn min_version(&self) -> Version {
        self.min_version
    }

    /// Cached location, if a previous `locate` succeeded
    pub fn cached(&self) -> Option<&BinaryLocation> {
        self.found.get()
    }

    /// Locate the binary. The first success is memoized; failures are not.
    pub async fn locate(&self) -> Result<BinaryLocation, LocateError> {
        self.found
            .get_or_try_init(|| self.search())
            .await
            .cloned()
    }

    async fn search(&self) -> Result<BinaryLocation, LocateError> {
        let mut candidates = Vec::with_capacity(self.search_paths.len() + 1);
        if self.search_system_path {
            candidates.push(BinaryLocation::OnPath);
        }
        candidates.extend(
            self.search_paths
                .iter()
                .map(|dir| BinaryLocation::InDir(dir.clone())),
        );

        for candidate in candidates {
            match probe_version(&candidate.executable()).await {
                Some(version) if version >= self.min_version => {
                    info!("Found memcached {} in {}", version, candidate);
                    return Ok(candidate);
                }
                Some(version) => {
                    debug!(
                        "Skipping memcached {} in {}: older than {}",
                        version, candidate, self.min_version
                    );
                }
                None => debug!("No usable memcached in {}", candidate),
            }
        }

        Err(LocateError::BinaryNotFound(format!(
            "Unable to find memcached {}+ locally",
            self.min_version
        )))
    }
}

impl Default for BinaryLocator {
    fn default() -> Self {
        Self::new(
            true,
            DEFAULT_SEARCH_PATHS.iter().map(PathBuf::from).collect(),
            Version::new(1, 4, 0),
        )
    }
}

/// Run `<executable> -h` and parse the version banner
async fn probe_version(executable: &Path) -> Option<Version> {
    let output = Command::new(executable)
        .arg("-h")
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await
        .ok()?;
    Version::from_help_output(&String::from_utf8_lossy(&output.stdout))
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum LocateError {
    #[error("Binary not found: {0}")]
    BinaryNotFound(String),
}
