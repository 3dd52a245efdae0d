//! Release asset download, checksum verification and zip extraction.

use crate::error::{Error, Result};
use crate::platform::platform;
use fs_err as fs;
use indicatif::{ProgressBar, ProgressStyle};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::blocking::{Client, Response};
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::result::ZipError;
use zip::ZipArchive;

const FALLBACK_FILENAME: &str = "unknown";

static CONTENT_DISPOSITION_FILENAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"filename\*?=(?:UTF-8'')?"?([^";]+)"?"#).expect("valid filename regex")
});

/// Downloads `url` into `dest_dir`, replacing a file with the same name.
pub fn download_file(client: &Client, url: &str, dest_dir: &Path) -> Result<PathBuf> {
    debug!("downloading {url} into {dest_dir:?}");
    let response = client.get(url).header("User-Agent", "tvm").send()?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::DownloadFailed {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let filename = response_filename(&response);
    fs::create_dir_all(dest_dir)?;
    let path = dest_dir.join(&filename);
    if path.exists() {
        debug!("overwriting {path:?}");
        fs::remove_file(&path)?;
    }

    let pb = match response.content_length() {
        Some(len) => ProgressBar::new(len),
        None => ProgressBar::new_spinner(),
    };
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg} {bytes}/{total_bytes}") {
        pb.set_style(style);
    }
    pb.set_message(format!("Downloading {filename}"));

    let mut out = fs::File::create(&path)?;
    io::copy(&mut pb.wrap_read(response), &mut out)?;
    pb.finish_and_clear();
    debug!("downloaded {path:?}");
    Ok(path)
}

fn response_filename(response: &Response) -> String {
    let from_header = response
        .headers()
        .get(reqwest::header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(filename_from_disposition);
    from_header
        .or_else(|| filename_from_url(response.url().path()))
        .unwrap_or_else(|| FALLBACK_FILENAME.to_string())
}

fn filename_from_disposition(header: &str) -> Option<String> {
    CONTENT_DISPOSITION_FILENAME
        .captures(header)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|name| is_plain_filename(name))
}

fn filename_from_url(path: &str) -> Option<String> {
    path.rsplit('/')
        .next()
        .map(str::to_string)
        .filter(|name| is_plain_filename(name))
}

fn is_plain_filename(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

/// Checks `path` against a GitHub asset digest of the form `sha256:<hex>`.
/// Digests in any other algorithm are not checked.
pub fn verify_digest(path: &Path, digest: &str) -> Result<()> {
    let Some(expected) = digest.strip_prefix("sha256:") else {
        debug!("skipping unsupported digest {digest}");
        return Ok(());
    };
    let mut hasher = Sha256::new();
    io::copy(&mut fs::File::open(path)?, &mut hasher)?;
    let actual = hex::encode(hasher.finalize());
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(Error::DigestMismatch {
            name: path.display().to_string(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

/// Extracts every entry of `archive` under `dest`, keeping stored unix modes.
pub fn extract_zip(archive: &Path, dest: &Path) -> Result<()> {
    debug!("extracting {archive:?} into {dest:?}");
    let mut zip = ZipArchive::new(fs::File::open(archive)?)?;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let Some(rel) = entry.enclosed_name().map(Path::to_path_buf) else {
            return Err(ZipError::InvalidArchive("entry path escapes the destination").into());
        };
        let out_path = dest.join(rel);
        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = fs::File::create(&out_path)?;
        io::copy(&mut entry, &mut out)?;
        platform().apply_archive_mode(&out_path, entry.unix_mode())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;
    use rstest::rstest;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::FileOptions;
    use zip::ZipWriter;

    #[rstest]
    #[case(r#"attachment; filename="linux_x64.zip""#, Some("linux_x64.zip"))]
    #[case("attachment; filename=tool.zip", Some("tool.zip"))]
    #[case("attachment; filename*=UTF-8''tool.zip", Some("tool.zip"))]
    #[case(r#"attachment; filename="../evil""#, None)]
    #[case("inline", None)]
    fn disposition_filename(#[case] header: &str, #[case] expected: Option<&str>) {
        assert_eq!(filename_from_disposition(header).as_deref(), expected);
    }

    #[test]
    fn url_filename_falls_back_to_none_for_trailing_slash() {
        assert_eq!(filename_from_url("/a/b/linux_x64.zip").as_deref(), Some("linux_x64.zip"));
        assert_eq!(filename_from_url("/a/b/"), None);
    }

    #[test]
    fn download_uses_header_name_and_overwrites() {
        let mut server = Server::new();
        let _mock = server
            .mock("GET", "/asset/123")
            .with_status(200)
            .with_header("content-disposition", r#"attachment; filename="linux_x64.zip""#)
            .with_body("new")
            .create();
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("linux_x64.zip"), "old contents").unwrap();

        let path = download_file(&Client::new(), &format!("{}/asset/123", server.url()), dir.path())
            .unwrap();
        assert_eq!(path, dir.path().join("linux_x64.zip"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "new");
    }

    #[test]
    fn download_uses_url_segment_without_header() {
        let mut server = Server::new();
        let _mock = server
            .mock("GET", "/dl/macos_arm.zip")
            .with_status(200)
            .with_body("zip")
            .create();
        let dir = TempDir::new().unwrap();

        let path = download_file(&Client::new(), &format!("{}/dl/macos_arm.zip", server.url()), dir.path())
            .unwrap();
        assert_eq!(path.file_name().unwrap(), "macos_arm.zip");
    }

    #[test]
    fn download_reports_failed_status() {
        let mut server = Server::new();
        let _mock = server.mock("GET", "/missing.zip").with_status(403).create();
        let dir = TempDir::new().unwrap();

        let err = download_file(&Client::new(), &format!("{}/missing.zip", server.url()), dir.path())
            .unwrap_err();
        assert!(matches!(err, Error::DownloadFailed { status: 403, .. }));
    }

    #[test]
    fn digest_is_checked() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.zip");
        std::fs::write(&file, "abc").unwrap();
        let good = "sha256:ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

        verify_digest(&file, good).unwrap();
        verify_digest(&file, "md5:whatever").unwrap();
        assert!(matches!(
            verify_digest(&file, "sha256:00"),
            Err(Error::DigestMismatch { .. })
        ));
    }

    #[test]
    fn extract_writes_nested_entries() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("bundle.zip");
        let mut zip = ZipWriter::new(std::fs::File::create(&archive).unwrap());
        zip.start_file("tvm", FileOptions::default().unix_permissions(0o755)).unwrap();
        zip.write_all(b"#!/bin/sh\n").unwrap();
        zip.start_file("share/readme.txt", FileOptions::default()).unwrap();
        zip.write_all(b"hello").unwrap();
        zip.finish().unwrap();

        let dest = dir.path().join("out");
        extract_zip(&archive, &dest).unwrap();
        assert_eq!(std::fs::read_to_string(dest.join("share/readme.txt")).unwrap(), "hello");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(dest.join("tvm")).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }
}
