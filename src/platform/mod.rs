pub fn platform() -> &'static dyn PlatformOps {
    &ConcretePlatform
}

use crate::error::{Error, Result};
use std::fmt;
use std::path::Path;

pub trait PlatformOps: Sync + Send {
    fn final_binary_name(&self, base: &str) -> String;
    /// Adds the execute bits when none are set. Returns whether the mode changed.
    fn ensure_executable(&self, path: &Path) -> Result<bool>;
    /// Applies a mode recorded in an archive entry.
    fn apply_archive_mode(&self, path: &Path, mode: Option<u32>) -> Result<()>;
}

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::UNIX_PLATFORM as ConcretePlatform;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::WINDOWS_PLATFORM as ConcretePlatform;

/// Platform part of a release asset name (`{alias}.zip`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsAlias {
    LinuxX64,
    MacosX64,
    MacosArm,
}

impl OsAlias {
    pub fn detect(os: &str, arch: &str) -> Result<Self> {
        match (os, arch) {
            ("linux", "x86_64") => Ok(Self::LinuxX64),
            ("macos", "x86_64") => Ok(Self::MacosX64),
            ("macos", "aarch64") => Ok(Self::MacosArm),
            _ => Err(Error::UnsupportedOs {
                os: os.to_string(),
                arch: arch.to_string(),
            }),
        }
    }

    pub fn current() -> Result<Self> {
        Self::detect(std::env::consts::OS, std::env::consts::ARCH)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LinuxX64 => "linux_x64",
            Self::MacosX64 => "macos_x64",
            Self::MacosArm => "macos_arm",
        }
    }

    pub fn asset_name(&self) -> String {
        format!("{}.zip", self.as_str())
    }
}

impl fmt::Display for OsAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
