//! GitHub Releases API client with a read-through cache in the [`Store`].

use crate::config::GitHubSource;
use crate::error::{Error, Result};
use crate::store::Store;
use chrono::Utc;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
    /// `sha256:<hex>` when GitHub reports it
    #[serde(default)]
    pub digest: Option<String>,
}

/// Serialized API response plus its expiry (epoch millis).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub data: String,
    pub expiration: i64,
}

pub struct ReleaseCache {
    client: Client,
    source: GitHubSource,
    store: Arc<Store>,
    ttl: Duration,
    token: Option<String>,
}

impl ReleaseCache {
    pub fn new(source: GitHubSource, store: Arc<Store>) -> Self {
        let token = std::env::var(&source.token_env)
            .ok()
            .filter(|t| !t.is_empty());
        Self {
            client: Client::new(),
            source,
            store,
            ttl: DEFAULT_TTL,
            token,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn source(&self) -> &GitHubSource {
        &self.source
    }

    fn cache_id(&self, operation: &str) -> String {
        format!("{}-{}-{operation}", self.source.owner, self.source.repo)
    }

    /// Drops every cached response of this repository; returns how many.
    pub fn clear_cache(&self) -> Result<usize> {
        let removed = self.store.remove_persistent_prefixed(&self.cache_id(""))?;
        debug!("cleared {removed} cache entries");
        Ok(removed)
    }

    fn add_cache(&self, id: &str, data: String) -> Result<()> {
        let ttl_ms = i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX);
        let entry = CacheEntry {
            data,
            expiration: Utc::now().timestamp_millis().saturating_add(ttl_ms),
        };
        debug!("add cache {id} expiring at {}", entry.expiration);
        self.store.set_persistent(id, &entry)
    }

    /// Cached payload, if present and not expired. Expired entries are removed.
    fn get_cache(&self, id: &str) -> Result<Option<String>> {
        let Some(raw) = self.store.get_persistent_value(Some(id))? else {
            debug!("cache miss {id}");
            return Ok(None);
        };
        let Ok(entry) = serde_json::from_value::<CacheEntry>(raw) else {
            debug!("cache entry {id} malformed, dropping");
            self.store.remove_persistent_key(id)?;
            return Ok(None);
        };
        if Utc::now().timestamp_millis() >= entry.expiration {
            debug!("cache expired {id}");
            self.store.remove_persistent_key(id)?;
            return Ok(None);
        }
        debug!("cache hit {id}");
        Ok(Some(entry.data))
    }

    fn get(&self, url: &str) -> Result<reqwest::blocking::Response> {
        debug!("GET {url}");
        let mut request = self
            .client
            .get(url)
            .header("User-Agent", "tvm")
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        Ok(request.send()?)
    }

    /// First page (20 entries) of releases.
    pub fn fetch_releases(&self) -> Result<Vec<Release>> {
        let id = self.cache_id("fetchReleases");
        if let Some(cached) = self.get_cache(&id)? {
            return Ok(serde_json::from_str(&cached)?);
        }

        let url = format!(
            "{}/repos/{}/{}/releases?per_page=20&page=1",
            self.source.api_url, self.source.owner, self.source.repo
        );
        let response = self.get(&url)?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::ReleasesNotFound {
                owner: self.source.owner.clone(),
                repo: self.source.repo.clone(),
            });
        }
        if !status.is_success() {
            return Err(Error::UnexpectedStatus { url, status: status.as_u16() });
        }
        let body = response.text()?;
        let releases: Vec<Release> = serde_json::from_str(&body)?;
        self.add_cache(&id, body)?;
        Ok(releases)
    }

    pub fn fetch_release_by_tag_name(&self, tag: &str) -> Result<Release> {
        let id = self.cache_id(&format!("fetchReleaseByTagName-{tag}"));
        if let Some(cached) = self.get_cache(&id)? {
            return Ok(serde_json::from_str(&cached)?);
        }

        let url = format!(
            "{}/repos/{}/{}/releases/tags/{tag}",
            self.source.api_url, self.source.owner, self.source.repo
        );
        let response = self.get(&url)?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::ReleaseNotFound(tag.to_string()));
        }
        if !status.is_success() {
            return Err(Error::UnexpectedStatus { url, status: status.as_u16() });
        }
        let body = response.text()?;
        let release: Release = serde_json::from_str(&body)?;
        self.add_cache(&id, body)?;
        Ok(release)
    }
}
