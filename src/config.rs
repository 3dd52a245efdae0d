use crate::error::Result;
use fs_err as fs;
use serde::Deserialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const HOME_ENV: &str = "TVM_HOME";
pub const VERSION_ENV: &str = "TVM_VERSION";
pub const LOG_ENV: &str = "TVM_LOG";
/// Set on a dispatched child to the tag it was started for
pub const DISPATCHED_ENV: &str = "TVM_DISPATCHED";
pub const CONFIG_FILE: &str = "config.toml";

/// Default cache lifetime for API responses (5 minutes)
pub const DEFAULT_CACHE_TTL_SECS: u64 = 5 * 60;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct TvmConfig {
    pub github: GitHubSource,
    /// File name of the tool inside `versions/{tag}/`
    pub executable_name: String,
    pub cache_ttl_secs: u64,
    pub lock_timeout_ms: u64,
    pub lock_poll_ms: u64,
    /// Key of the store inside the shared document
    pub store_name: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct GitHubSource {
    pub owner: String,
    pub repo: String,
    pub api_url: String,
    /// Environment variable holding an optional API token
    pub token_env: String,
}

impl Default for TvmConfig {
    fn default() -> Self {
        Self {
            github: GitHubSource::default(),
            executable_name: "tvm".to_string(),
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            lock_timeout_ms: 60_000,
            lock_poll_ms: 100,
            store_name: "tvm".to_string(),
        }
    }
}

impl Default for GitHubSource {
    fn default() -> Self {
        Self {
            owner: "tvm-cli".to_string(),
            repo: "tvm".to_string(),
            api_url: "https://api.github.com".to_string(),
            token_env: "GITHUB_TOKEN".to_string(),
        }
    }
}

impl TvmConfig {
    /// Reads `path`; a missing file means defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(data) => Ok(toml::from_str(&data)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn lock_poll(&self) -> Duration {
        Duration::from_millis(self.lock_poll_ms)
    }
}

/// On-disk layout under the CLI home directory.
#[derive(Debug, Clone, PartialEq)]
pub struct CliDirs {
    pub main: PathBuf,
    pub tmp: PathBuf,
    pub versions: PathBuf,
    pub local_storage: PathBuf,
}

impl CliDirs {
    pub fn new(root: &Path) -> Self {
        Self {
            main: root.join("main"),
            tmp: root.join("tmp"),
            versions: root.join("versions"),
            local_storage: root.join("localStorage"),
        }
    }
}

/// `$TVM_HOME`, else `~/.tvm`, else `./.tvm`.
pub fn home_dir() -> PathBuf {
    home_dir_with_env(std::env::var_os(HOME_ENV).map(PathBuf::from), dirs::home_dir())
}

fn home_dir_with_env(tvm_home: Option<PathBuf>, home: Option<PathBuf>) -> PathBuf {
    tvm_home
        .filter(|p| !p.as_os_str().is_empty())
        .or_else(|| home.map(|h| h.join(".tvm")))
        .unwrap_or_else(|| PathBuf::from(".tvm"))
}

/// Version forced through `$TVM_VERSION`, if any.
pub fn preferred_version_from_env() -> Option<String> {
    std::env::var(VERSION_ENV)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Tag this process was dispatched for, if a parent `tvm` started it.
pub fn dispatched_tag_from_env() -> Option<String> {
    std::env::var(DISPATCHED_ENV).ok().filter(|v| !v.is_empty())
}
