use crate::error::{Error, Result};
use std::path::Path;
use std::time::{Duration, Instant};
use uuid::Uuid;

const UNIQUE_BASENAME_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Random lowercase alphanumeric id of exactly `len` characters.
pub fn random_id(len: usize) -> String {
    let mut id = String::with_capacity(len);
    while id.len() < len {
        id.push_str(&Uuid::new_v4().simple().to_string());
    }
    id.truncate(len);
    id
}

/// Picks `{prefix}{random}` (plus `.{extension}`) that does not exist yet under `base`.
pub fn unique_basename(base: &Path, prefix: &str, extension: Option<&str>) -> Result<String> {
    let started = Instant::now();
    loop {
        let mut candidate = format!("{prefix}{}", random_id(16));
        if let Some(ext) = extension {
            candidate.push('.');
            candidate.push_str(ext);
        }
        if !base.join(&candidate).exists() {
            return Ok(candidate);
        }
        if started.elapsed() > UNIQUE_BASENAME_TIMEOUT {
            return Err(Error::UniqueNameTimeout(base.to_path_buf()));
        }
    }
}
