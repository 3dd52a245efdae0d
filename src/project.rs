//! Project discovery and the version pin file.

use crate::error::{Error, Result};
use fs_err as fs;
use semver::Version;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Entries that must all exist side by side for a directory to be a project root.
pub const PROJECT_MARKERS: [&str; 3] = [".tvm", "data", "source"];

/// Pin file location relative to the project root.
pub const PIN_FILE: &str = ".tvm/version";

/// Nearest ancestor of `start` (inclusive) carrying every project marker.
pub fn find_project_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| PROJECT_MARKERS.iter().all(|m| dir.join(m).exists()))
        .map(Path::to_path_buf)
}

/// Version pinned by the project around `start`.
///
/// `Ok(None)` when there is no project; a project without a pin file is an error.
pub fn required_version(start: &Path) -> Result<Option<String>> {
    let Some(root) = find_project_root(start) else {
        debug!("no project root above {start:?}");
        return Ok(None);
    };
    let pin = root.join(PIN_FILE);
    if !pin.is_file() {
        return Err(Error::PinFileMissing(pin));
    }
    let version = fs::read_to_string(&pin)?.trim().to_string();
    debug!("project {root:?} pins {version:?}");
    Ok(Some(version))
}

fn parse_version(v: &str) -> Option<Version> {
    Version::parse(v.trim().trim_start_matches('v')).ok()
}

/// Compares as semver when both sides parse, otherwise as trimmed strings.
pub fn versions_match(a: &str, b: &str) -> bool {
    match (parse_version(a), parse_version(b)) {
        (Some(a), Some(b)) => a == b,
        _ => a.trim() == b.trim(),
    }
}
