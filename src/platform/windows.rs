use crate::error::Result;
use crate::platform::PlatformOps;
use std::path::Path;

pub static WINDOWS_PLATFORM: Windows = Windows;

pub struct Windows;

impl PlatformOps for Windows {
    fn final_binary_name(&self, base: &str) -> String { if base.ends_with(".exe") { base.to_string() } else { format!("{base}.exe") } }
    fn ensure_executable(&self, _path: &Path) -> Result<bool> { Ok(false) }
    fn apply_archive_mode(&self, _path: &Path, _mode: Option<u32>) -> Result<()> { Ok(()) }
}
