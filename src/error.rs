use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    // ---- store / document ----
    #[error("There is no store!")]
    NoStore,

    #[error("Store is invalid!")]
    InvalidStore,

    #[error("Document storage session is destroyed! First initialize session!")]
    SessionDestroyed,

    #[error("Document filename doesn't exist \"{}\"!", .0.display())]
    DocumentMissing(PathBuf),

    #[error("Document already locked by \"{0}\"!")]
    DocumentLocked(String),

    #[error("timed out after {waited:?} waiting for lock {}", path.display())]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("Generate unique basename hit a timeout (5 mins) in {}", .0.display())]
    UniqueNameTimeout(PathBuf),

    #[error("internal lock poisoned")]
    LockPoisoned,

    // ---- releases ----
    #[error("Not found releases of {owner}/{repo}!")]
    ReleasesNotFound { owner: String, repo: String },

    #[error("Not found release by tag name \"{0}\"!")]
    ReleaseNotFound(String),

    #[error("unexpected status {status} from {url}")]
    UnexpectedStatus { url: String, status: u16 },

    #[error("No available version!")]
    NoAvailableVersion,

    #[error("Invalid version \"{tag}\"! Available releases: {}", available.join(", "))]
    VersionNotPublished { tag: String, available: Vec<String> },

    #[error("Invalid version tag \"{0}\"!")]
    InvalidVersionTag(String),

    // ---- install ----
    #[error("Os not recognized ({os}/{arch})")]
    UnsupportedOs { os: String, arch: String },

    #[error("No download url for version \"{0}\"!")]
    NoDownloadUrlForVersion(String),

    #[error("Invalid session tmp dir!")]
    InvalidSessionTmpDir,

    #[error("Something went wrong while request to \"{url}\". Error code: {status}")]
    DownloadFailed { url: String, status: u16 },

    #[error("Downloaded file is missing \"{}\"!", .0.display())]
    DownloadedFileMissing(PathBuf),

    #[error("checksum mismatch for {name}: expected {expected} got {actual}")]
    DigestMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    // ---- dispatch ----
    #[error("Dispatch target doesn't exist \"{}\"!", .0.display())]
    DispatchTargetMissing(PathBuf),

    #[error("Missing file \"{}\"!", .0.display())]
    PinFileMissing(PathBuf),

    // ---- wrapped ----
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),
}
