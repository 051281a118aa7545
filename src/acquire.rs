//! Relay binary acquisition.
//!
//! bore is not expected on the runner, so [`BinaryStore`] downloads the
//! release archive for the current platform from GitHub, unpacks it with
//! the system `tar` and stages the executable in the resources directory.
//! A binary that is already staged is reused.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use reqwest::Client;
use tracing::{debug, info};

use crate::error::{ExposeError, Result};

pub const DEFAULT_RESOURCES_DIR: &str = "/tmp/expose-tunnel";
pub const DEFAULT_BORE_VERSION: &str = "0.5.0";

const BORE_RELEASES_URL: &str = "https://github.com/ekzhang/bore/releases/download";
const USER_AGENT: &str = concat!("expose-tunnel/", env!("CARGO_PKG_VERSION"));
const MAX_ARCHIVE_BYTES: usize = 32 * 1024 * 1024;

/// Directory holding downloaded relay executables.
#[derive(Debug, Clone)]
pub struct BinaryStore {
    dir: PathBuf,
    bore_version: String,
}

impl BinaryStore {
    pub fn new(dir: impl Into<PathBuf>, bore_version: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            bore_version: bore_version.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn bore_path(&self) -> PathBuf {
        self.dir.join(bore_executable_name())
    }

    /// Release archive URL for the platform this process runs on.
    pub fn bore_release_url(&self) -> Result<String> {
        let target = release_target(std::env::consts::OS, std::env::consts::ARCH)?;
        Ok(bore_release_url(&self.bore_version, target))
    }

    /// Return the staged bore executable, downloading it first if needed.
    pub async fn ensure_bore(&self) -> Result<PathBuf> {
        let path = self.bore_path();
        if is_staged(&path) {
            debug!(path = %path.display(), "bore already staged");
            return Ok(path);
        }

        ensure_dir(&self.dir)?;
        let url = self.bore_release_url()?;
        info!(url = %url, "Downloading bore {}", self.bore_version);

        let archive = download(&url).await?;
        let archive_name = url.rsplit('/').next().unwrap_or("bore-archive");
        stage_archive(archive, archive_name.to_string(), self.dir.clone()).await?;

        info!(path = %path.display(), "bore staged");
        Ok(path)
    }
}

impl Default for BinaryStore {
    fn default() -> Self {
        Self::new(DEFAULT_RESOURCES_DIR, DEFAULT_BORE_VERSION)
    }
}

/// Create `dir` and its parents if missing.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| {
        ExposeError::Acquisition(format!("failed to create {}: {}", dir.display(), e))
    })
}

/// A staged executable is a regular file with an execute bit set.
fn is_staged(path: &Path) -> bool {
    match fs::metadata(path) {
        #[cfg(unix)]
        Ok(meta) => {
            use std::os::unix::fs::PermissionsExt;
            meta.is_file() && meta.permissions().mode() & 0o111 != 0
        }
        #[cfg(not(unix))]
        Ok(meta) => meta.is_file(),
        Err(_) => false,
    }
}

fn bore_executable_name() -> &'static str {
    if cfg!(windows) {
        "bore.exe"
    } else {
        "bore"
    }
}

/// Map an OS/architecture pair to bore's release target triple.
pub fn release_target(os: &str, arch: &str) -> Result<&'static str> {
    match (os, arch) {
        ("linux", "x86_64") => Ok("x86_64-unknown-linux-musl"),
        ("linux", "aarch64") => Ok("aarch64-unknown-linux-musl"),
        ("linux", "arm") => Ok("arm-unknown-linux-musleabi"),
        ("macos", "x86_64") => Ok("x86_64-apple-darwin"),
        ("macos", "aarch64") => Ok("aarch64-apple-darwin"),
        ("windows", "x86_64") => Ok("x86_64-pc-windows-msvc"),
        (os, arch) => Err(ExposeError::Acquisition(format!(
            "no bore release for {}/{}",
            os, arch
        ))),
    }
}

pub fn bore_release_url(version: &str, target: &str) -> String {
    let ext = if target.contains("windows") {
        "zip"
    } else {
        "tar.gz"
    };
    format!(
        "{}/v{}/bore-v{}-{}.{}",
        BORE_RELEASES_URL, version, version, target, ext
    )
}

async fn download(url: &str) -> Result<Vec<u8>> {
    let client = Client::builder()
        .timeout(Duration::from_secs(60))
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| ExposeError::Acquisition(format!("failed to build HTTP client: {}", e)))?;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| ExposeError::Acquisition(format!("request failed: {}: {}", url, e)))?;
    let status = response.status();
    let bytes = response.bytes().await.map_err(|e| {
        ExposeError::Acquisition(format!("failed reading response body: {}: {}", url, e))
    })?;

    if !status.is_success() {
        return Err(ExposeError::Acquisition(format!(
            "download failed ({}): {}",
            status.as_u16(),
            url
        )));
    }
    if bytes.len() > MAX_ARCHIVE_BYTES {
        return Err(ExposeError::Acquisition(format!(
            "archive too large ({} bytes, max {})",
            bytes.len(),
            MAX_ARCHIVE_BYTES
        )));
    }
    Ok(bytes.to_vec())
}

/// Run [`extract_executable`] for bore on the blocking pool.
async fn stage_archive(archive: Vec<u8>, archive_name: String, dest_dir: PathBuf) -> Result<PathBuf> {
    tokio::task::spawn_blocking(move || {
        extract_executable(&archive, &archive_name, bore_executable_name(), &dest_dir)
    })
    .await
    .map_err(|e| ExposeError::Acquisition(format!("extraction task failed: {}", e)))?
}

/// Unpack `archive` and copy the entry called `executable` into `dest_dir`.
fn extract_executable(
    archive: &[u8],
    archive_name: &str,
    executable: &str,
    dest_dir: &Path,
) -> Result<PathBuf> {
    let temp_root = tempfile::tempdir().map_err(|e| {
        ExposeError::Acquisition(format!("failed to create temp extraction dir: {}", e))
    })?;
    let archive_path = temp_root.path().join(archive_name);
    fs::write(&archive_path, archive).map_err(|e| {
        ExposeError::Acquisition(format!("failed to write {}: {}", archive_path.display(), e))
    })?;

    let extract_root = temp_root.path().join("extract");
    fs::create_dir_all(&extract_root)?;

    let output = Command::new("tar")
        .arg("-xf")
        .arg(&archive_path)
        .arg("-C")
        .arg(&extract_root)
        .output()
        .map_err(|e| ExposeError::Acquisition(format!("failed to run tar: {}", e)))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ExposeError::Acquisition(format!(
            "failed extracting {}: {}",
            archive_name,
            stderr.trim()
        )));
    }

    let found = find_file(&extract_root, executable)?.ok_or_else(|| {
        ExposeError::Acquisition(format!("{} not found in {}", executable, archive_name))
    })?;

    // Staged beside `dest` and renamed into place; `dest` never holds a partial copy.
    let dest = dest_dir.join(executable);
    let stage_err =
        |e: std::io::Error| ExposeError::Acquisition(format!("failed to stage {}: {}", dest.display(), e));
    let mut staged = tempfile::Builder::new()
        .prefix(".staging-")
        .tempfile_in(dest_dir)
        .map_err(stage_err)?;
    let mut source = fs::File::open(&found).map_err(stage_err)?;
    std::io::copy(&mut source, staged.as_file_mut()).map_err(stage_err)?;
    staged.as_file().sync_all().map_err(stage_err)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(staged.path(), fs::Permissions::from_mode(0o755)).map_err(stage_err)?;
    }

    staged.persist(&dest).map_err(|e| stage_err(e.error))?;
    Ok(dest)
}

fn find_file(root: &Path, name: &str) -> Result<Option<PathBuf>> {
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_file() && entry.file_name().to_str() == Some(name) {
            return Ok(Some(path));
        }
        if file_type.is_dir() {
            if let Some(found) = find_file(&path, name)? {
                return Ok(Some(found));
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_target_supported() {
        assert_eq!(
            release_target("linux", "x86_64").unwrap(),
            "x86_64-unknown-linux-musl"
        );
        assert_eq!(
            release_target("macos", "aarch64").unwrap(),
            "aarch64-apple-darwin"
        );
        assert_eq!(
            release_target("windows", "x86_64").unwrap(),
            "x86_64-pc-windows-msvc"
        );
    }

    #[test]
    fn test_release_target_unsupported() {
        let err = release_target("freebsd", "riscv64").unwrap_err();
        assert_eq!(err.as_label(), "acquisition_failure");
        assert!(err.to_string().contains("freebsd/riscv64"));
    }

    #[test]
    fn test_bore_release_url() {
        assert_eq!(
            bore_release_url("0.5.0", "x86_64-unknown-linux-musl"),
            "https://github.com/ekzhang/bore/releases/download/v0.5.0/bore-v0.5.0-x86_64-unknown-linux-musl.tar.gz"
        );
        assert!(bore_release_url("0.5.0", "x86_64-pc-windows-msvc").ends_with(".zip"));
    }

    #[test]
    fn test_default_store_layout() {
        let store = BinaryStore::default();
        assert_eq!(store.dir(), Path::new(DEFAULT_RESOURCES_DIR));
        assert!(store.bore_path().starts_with(DEFAULT_RESOURCES_DIR));
    }

    #[tokio::test]
    async fn test_ensure_bore_reuses_staged_binary() {
        let tmp = tempfile::tempdir().unwrap();
        let store = BinaryStore::new(tmp.path(), DEFAULT_BORE_VERSION);
        fs::write(store.bore_path(), b"#!/bin/sh\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(store.bore_path(), fs::Permissions::from_mode(0o755)).unwrap();
        }

        let path = store.ensure_bore().await.unwrap();
        assert_eq!(path, store.bore_path());
    }

    #[cfg(unix)]
    #[test]
    fn test_non_executable_leftover_is_not_staged() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bore");
        assert!(!is_staged(&path));

        fs::write(&path, b"partial").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        assert!(!is_staged(&path));

        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        assert!(is_staged(&path));
    }

    #[test]
    fn test_ensure_dir_creates_nested() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a").join("b");
        ensure_dir(&nested).unwrap();
        assert!(nested.is_dir());
    }

    #[cfg(unix)]
    fn bore_tarball() -> Vec<u8> {
        let src = tempfile::tempdir().unwrap();
        fs::write(src.path().join("bore"), b"#!/bin/sh\necho bore\n").unwrap();
        let archive = src.path().join("bore.tar.gz");
        let status = Command::new("tar")
            .arg("-czf")
            .arg(&archive)
            .arg("-C")
            .arg(src.path())
            .arg("bore")
            .status()
            .unwrap();
        assert!(status.success());
        fs::read(&archive).unwrap()
    }

    #[cfg(unix)]
    #[test]
    fn test_extract_executable_from_tarball() {
        let bytes = bore_tarball();
        let dest = tempfile::tempdir().unwrap();
        let staged = extract_executable(&bytes, "bore.tar.gz", "bore", dest.path()).unwrap();

        assert_eq!(staged, dest.path().join("bore"));
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(&staged).unwrap().permissions().mode();
        assert_eq!(mode & 0o755, 0o755);
    }

    #[cfg(unix)]
    #[test]
    fn test_extract_executable_replaces_partial_binary() {
        let bytes = bore_tarball();
        let dest = tempfile::tempdir().unwrap();
        fs::write(dest.path().join("bore"), b"trunc").unwrap();

        let staged = extract_executable(&bytes, "bore.tar.gz", "bore", dest.path()).unwrap();
        assert_eq!(fs::read(&staged).unwrap(), b"#!/bin/sh\necho bore\n");
        assert!(is_staged(&staged));

        // Only the executable is left behind, no staging files.
        let entries: Vec<_> = fs::read_dir(dest.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, ["bore"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stage_archive_runs_off_runtime() {
        let dest = tempfile::tempdir().unwrap();
        let staged = stage_archive(bore_tarball(), "bore.tar.gz".into(), dest.path().to_path_buf())
            .await
            .unwrap();
        assert!(is_staged(&staged));
    }

    #[cfg(unix)]
    #[test]
    fn test_extract_executable_rejects_garbage() {
        let dest = tempfile::tempdir().unwrap();
        let err = extract_executable(b"not an archive", "bore.tar.gz", "bore", dest.path())
            .unwrap_err();
        assert_eq!(err.as_label(), "acquisition_failure");
    }
}
