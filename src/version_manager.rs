//! Decides whether this run must be handed to another installed version
//! and installs versions from GitHub releases.

use crate::config::CliDirs;
use crate::download::{download_file, extract_zip, verify_digest};
use crate::error::{Error, Result};
use crate::github::ReleaseCache;
use crate::platform::{platform, OsAlias};
use crate::project::{required_version, versions_match};
use crate::session::Session;
use chrono::DateTime;
use fs_err as fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Version running right now.
pub const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Persistent store key of the version used outside pinned projects.
pub const DEFAULT_VERSION_KEY: &str = "defaultVersion";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRecord {
    pub tag_name: String,
    /// Publication time in epoch millis
    pub published_date: Option<i64>,
}

/// Where the required version came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSource {
    Preferred,
    Project,
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DispatchState {
    pub should_dispatch: bool,
    pub dispatch_target: Option<PathBuf>,
    pub required_version: Option<String>,
    pub source: Option<VersionSource>,
}

pub struct VersionManager {
    dirs: CliDirs,
    releases: ReleaseCache,
    session: Arc<Session>,
    executable_name: String,
    current_version: String,
    work_dir: PathBuf,
    os_alias: Option<OsAlias>,
    dispatched_tag: Option<String>,
    state: Option<DispatchState>,
}

impl VersionManager {
    pub fn new(
        dirs: CliDirs,
        releases: ReleaseCache,
        session: Arc<Session>,
        executable_name: impl Into<String>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            dirs,
            releases,
            session,
            executable_name: executable_name.into(),
            current_version: CURRENT_VERSION.to_string(),
            work_dir: work_dir.into(),
            os_alias: None,
            dispatched_tag: None,
            state: None,
        }
    }

    pub fn with_current_version(mut self, version: impl Into<String>) -> Self {
        self.current_version = version.into();
        self
    }

    /// Forces the asset platform instead of detecting the host.
    pub fn with_os_alias(mut self, alias: OsAlias) -> Self {
        self.os_alias = Some(alias);
        self
    }

    /// Tag a parent process already dispatched to; it is never dispatched to again.
    pub fn with_dispatch_guard(mut self, tag: Option<String>) -> Self {
        self.dispatched_tag = tag;
        self
    }

    pub fn current_version(&self) -> &str {
        &self.current_version
    }

    pub fn dirs(&self) -> &CliDirs {
        &self.dirs
    }

    pub fn releases(&self) -> &ReleaseCache {
        &self.releases
    }

    /// Computes the dispatch decision for the working directory and installs
    /// the required version when it has to run.
    /// `preferred` replaces the project's pinned version.
    pub fn init(&mut self, preferred: Option<&str>) -> Result<()> {
        self.state = None;
        fs::create_dir_all(&self.dirs.main)?;
        fs::create_dir_all(&self.dirs.versions)?;

        let plan = self.plan(preferred)?;
        if let (true, Some(tag)) = (plan.should_dispatch, plan.required_version.as_deref()) {
            info!("version {tag} required, running {}", self.current_version);
            self.ensure_version(tag)?;
        }
        self.state = Some(plan);
        Ok(())
    }

    /// The dispatch decision `init` would make, without installing anything.
    pub fn plan(&self, preferred: Option<&str>) -> Result<DispatchState> {
        let Some((tag, source)) = self.resolve_required(preferred)? else {
            debug!("no required version, running {}", self.current_version);
            return Ok(DispatchState::default());
        };
        validate_tag(&tag)?;

        let should_dispatch = if versions_match(&tag, &self.current_version) {
            false
        } else if self.dispatched_tag.as_deref() == Some(tag.as_str()) {
            warn!("{tag} already dispatched to {}, not dispatching again", self.current_version);
            false
        } else {
            true
        };
        let dispatch_target = if should_dispatch {
            Some(self.executable_path(&tag)?)
        } else {
            None
        };
        debug!("required {tag} ({source:?}), dispatch {should_dispatch}");
        Ok(DispatchState {
            should_dispatch,
            dispatch_target,
            required_version: Some(tag),
            source: Some(source),
        })
    }

    fn resolve_required(&self, preferred: Option<&str>) -> Result<Option<(String, VersionSource)>> {
        if let Some(v) = preferred.map(str::trim).filter(|v| !v.is_empty()) {
            return Ok(Some((v.to_string(), VersionSource::Preferred)));
        }
        if let Some(v) = required_version(&self.work_dir)? {
            return Ok(Some((v, VersionSource::Project)));
        }
        Ok(self.default_version()?.map(|v| (v, VersionSource::Default)))
    }

    pub fn dispatch_state(&self) -> Option<&DispatchState> {
        self.state.as_ref()
    }

    pub fn should_dispatch_cmd(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.should_dispatch)
    }

    pub fn get_dispatch_target(&self) -> Option<&Path> {
        self.state.as_ref().and_then(|s| s.dispatch_target.as_deref())
    }

    pub fn version_dir(&self, tag: &str) -> Result<PathBuf> {
        validate_tag(tag)?;
        Ok(self.dirs.versions.join(tag))
    }

    pub fn executable_path(&self, tag: &str) -> Result<PathBuf> {
        Ok(self
            .version_dir(tag)?
            .join(platform().final_binary_name(&self.executable_name)))
    }

    pub fn default_version(&self) -> Result<Option<String>> {
        self.session.store().get_persistent(DEFAULT_VERSION_KEY)
    }

    /// Makes `tag` the version used outside pinned projects. It must be a
    /// published release; it is installed before being recorded.
    pub fn set_default_version(&self, tag: &str) -> Result<()> {
        validate_tag(tag)?;
        let records = self.get_versions_list()?;
        if !records.iter().any(|r| r.tag_name == tag) {
            return Err(Error::VersionNotPublished {
                tag: tag.to_string(),
                available: records.into_iter().map(|r| r.tag_name).collect(),
            });
        }
        self.ensure_version(tag)?;
        self.session
            .store()
            .set_persistent(DEFAULT_VERSION_KEY, &tag.to_string())?;
        info!("default version set to {tag}");
        Ok(())
    }

    /// Downloads `tag` unless its executable is already installed.
    pub fn ensure_version(&self, tag: &str) -> Result<()> {
        let exe = self.executable_path(tag)?;
        if exe.is_file() {
            debug!("version {tag} already installed at {exe:?}");
            return Ok(());
        }
        self.download_version(tag)
    }

    /// Installs the most recent release and returns its tag.
    pub fn use_latest(&self) -> Result<String> {
        let latest = self
            .get_versions_list()?
            .into_iter()
            .next()
            .ok_or(Error::NoAvailableVersion)?;
        self.download_version(&latest.tag_name)?;
        Ok(latest.tag_name)
    }

    /// Releases, newest first.
    pub fn get_versions_list(&self) -> Result<Vec<VersionRecord>> {
        let mut records: Vec<VersionRecord> = self
            .releases
            .fetch_releases()?
            .into_iter()
            .map(|r| VersionRecord {
                published_date: r.published_at.as_deref().and_then(parse_date),
                tag_name: r.tag_name,
            })
            .collect();
        sort_newest_first(&mut records);
        Ok(records)
    }

    pub fn download_version(&self, tag: &str) -> Result<()> {
        let dest = self.version_dir(tag)?;
        let release = self.releases.fetch_release_by_tag_name(tag)?;
        let alias = match self.os_alias {
            Some(alias) => alias,
            None => OsAlias::current()?,
        };
        let asset_name = alias.asset_name();
        let asset = release
            .assets
            .iter()
            .find(|a| a.name == asset_name)
            .ok_or_else(|| Error::NoDownloadUrlForVersion(tag.to_string()))?;
        let tmp_dir = self
            .session
            .get_tmp_dir()?
            .ok_or(Error::InvalidSessionTmpDir)?;

        info!("downloading {tag} ({asset_name})");
        let archive = download_file(self.releases.client(), &asset.browser_download_url, &tmp_dir)?;
        if !archive.is_file() {
            return Err(Error::DownloadedFileMissing(archive));
        }
        if let Some(digest) = &asset.digest {
            verify_digest(&archive, digest)?;
        }

        fs::create_dir_all(&dest)?;
        extract_zip(&archive, &dest)?;
        info!("installed {tag} into {dest:?}");
        Ok(())
    }
}

/// A tag names one directory under `versions/`: it cannot be empty, a path,
/// or a `.`/`..` component.
pub fn validate_tag(tag: &str) -> Result<()> {
    let invalid = tag.is_empty()
        || tag == "."
        || tag == ".."
        || tag.contains(['/', '\\', ':'])
        || tag.chars().any(char::is_control)
        || Path::new(tag).is_absolute();
    if invalid {
        return Err(Error::InvalidVersionTag(tag.to_string()));
    }
    Ok(())
}

fn parse_date(raw: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|d| d.timestamp_millis())
}

/// Orders dated records newest first; records without a date keep their slot.
fn sort_newest_first(records: &mut [VersionRecord]) {
    let slots: Vec<usize> = records
        .iter()
        .enumerate()
        .filter(|(_, r)| r.published_date.is_some())
        .map(|(i, _)| i)
        .collect();
    let mut dated: Vec<VersionRecord> = slots.iter().map(|&i| records[i].clone()).collect();
    dated.sort_by(|a, b| b.published_date.cmp(&a.published_date));
    for (slot, record) in slots.into_iter().zip(dated) {
        records[slot] = record;
    }
}
