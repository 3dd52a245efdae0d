//! Fixture helpers for end-to-end runs

#![allow(dead_code)]

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use mockito::{Mock, ServerGuard};
use tempfile::TempDir;
use zip::write::FileOptions;
use zip::ZipWriter;

use tvm::config::{CliDirs, GitHubSource};
use tvm::engine::Engine;
use tvm::github::ReleaseCache;
use tvm::platform::OsAlias;
use tvm::project::{PIN_FILE, PROJECT_MARKERS};
use tvm::session::Session;
use tvm::store::Store;
use tvm::version_manager::VersionManager;

/// Zip archive holding a single `tvm` entry stored without execute bits
pub fn tool_archive(script: &str) -> Vec<u8> {
    let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    zip.start_file("tvm", FileOptions::default().unix_permissions(0o644))
        .unwrap();
    zip.write_all(script.as_bytes()).unwrap();
    zip.finish().unwrap().into_inner()
}

/// Serves the release list, the release by tag and its `linux_x64.zip` asset
pub fn serve_release(server: &mut ServerGuard, tag: &str, archive: Vec<u8>) -> Vec<Mock> {
    let release = format!(
        r#"{{"tag_name": "{tag}", "published_at": "2024-01-01T00:00:00Z",
            "assets": [{{"name": "linux_x64.zip", "browser_download_url": "{}/download/{tag}/linux_x64.zip"}}]}}"#,
        server.url()
    );
    let list = server
        .mock("GET", "/repos/acme/tool/releases")
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_body(format!("[{release}]"))
        .create();
    let by_tag = server
        .mock("GET", format!("/repos/acme/tool/releases/tags/{tag}").as_str())
        .with_status(200)
        .with_body(release)
        .expect(1)
        .create();
    let asset = server
        .mock("GET", format!("/download/{tag}/linux_x64.zip").as_str())
        .with_status(200)
        .with_header("content-type", "application/zip")
        .with_body(archive)
        .expect(1)
        .create();
    vec![list, by_tag, asset]
}

/// Marks `dir` as a project pinned to `version`
pub fn pin_project(dir: &Path, version: &str) {
    for marker in PROJECT_MARKERS {
        std::fs::create_dir_all(dir.join(marker)).unwrap();
    }
    std::fs::write(dir.join(PIN_FILE), format!("{version}\n")).unwrap();
}

pub struct Harness {
    pub home: TempDir,
    pub work: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            home: TempDir::new().unwrap(),
            work: TempDir::new().unwrap(),
        }
    }

    pub fn dirs(&self) -> CliDirs {
        CliDirs::new(self.home.path())
    }

    /// Engine wired like the binary, pretending to run `current`
    pub fn engine(&self, server: &ServerGuard, current: &str) -> (Engine, Arc<Store>) {
        let dirs = self.dirs();
        let store = Arc::new(Store::new(&dirs.local_storage));
        let session = Arc::new(Session::new(store.clone(), "tvm", &dirs.tmp));
        let source = GitHubSource {
            owner: "acme".into(),
            repo: "tool".into(),
            api_url: server.url(),
            token_env: "TVM_TEST_UNSET_TOKEN".into(),
        };
        let vm = VersionManager::new(
            dirs,
            ReleaseCache::new(source, store.clone()),
            session.clone(),
            "tvm",
            self.work.path(),
        )
        .with_current_version(current)
        .with_os_alias(OsAlias::LinuxX64);
        (Engine::new(session, vm), store)
    }
}
