use crate::error::Result;
use crate::platform::PlatformOps;
use fs_err as fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

const EXECUTE_BITS: u32 = 0o111;

pub static UNIX_PLATFORM: Unix = Unix;

pub struct Unix;

impl PlatformOps for Unix {
    fn final_binary_name(&self, base: &str) -> String {
        base.to_string()
    }
    fn ensure_executable(&self, path: &Path) -> Result<bool> {
        let mut perms = fs::metadata(path)?.permissions();
        let mode = perms.mode();
        if mode & EXECUTE_BITS != 0 {
            return Ok(false);
        }
        perms.set_mode(mode | EXECUTE_BITS);
        fs::set_permissions(path, perms)?;
        Ok(true)
    }
    fn apply_archive_mode(&self, path: &Path, mode: Option<u32>) -> Result<()> {
        if let Some(mode) = mode {
            fs::set_permissions(path, std::fs::Permissions::from_mode(mode & 0o7777))?;
        }
        Ok(())
    }
}
