//! Disposable per-job directories holding the code under analysis.
//!
//! A [`Workspace`] owns its [`TempDir`]: the directory is removed when the
//! value is closed or dropped, whichever comes first, on every exit path
//! of the pipeline that owns it.

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::{self, Cursor, Read};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use url::Url;

use crate::error::{CoreError, Result, ValidationError};
use crate::scanner::process::ToolCommand;

const WORKSPACE_PREFIX: &str = "sast_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveKind {
    Zip,
    Tar,
    TarGz,
}

impl ArchiveKind {
    /// Picks the kind from the uploaded file name.
    pub fn from_file_name(name: &str) -> std::result::Result<Self, ValidationError> {
        let lower = name.trim().to_ascii_lowercase();
        if lower.ends_with(".zip") {
            Ok(ArchiveKind::Zip)
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Ok(ArchiveKind::TarGz)
        } else if lower.ends_with(".tar") {
            Ok(ArchiveKind::Tar)
        } else {
            Err(ValidationError::UnsupportedFormat(format!(
                "'{}' is not a .zip, .tar, .tar.gz or .tgz archive",
                name
            )))
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveKind::Zip => "zip",
            ArchiveKind::Tar => "tar",
            ArchiveKind::TarGz => "tar_gz",
        }
    }
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts http(s), git and ssh URLs that name a host.
pub fn validate_repository_url(raw: &str) -> std::result::Result<Url, ValidationError> {
    let parsed = Url::parse(raw.trim()).map_err(|e| {
        ValidationError::InvalidSource(format!("'{}' is not a valid URL: {}", raw, e))
    })?;
    match parsed.scheme() {
        "http" | "https" | "git" | "ssh" => {}
        other => {
            return Err(ValidationError::InvalidSource(format!(
                "unsupported URL scheme '{}'",
                other
            )))
        }
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(ValidationError::InvalidSource(format!(
            "'{}' has no host",
            raw
        )));
    }
    Ok(parsed)
}

/// Rejects names git would read as options or that cannot be refs.
pub fn validate_branch(branch: &str) -> std::result::Result<(), ValidationError> {
    let invalid = branch.is_empty()
        || branch.starts_with('-')
        || branch.contains("..")
        || branch.chars().any(|c| c.is_whitespace() || c.is_control());
    if invalid {
        return Err(ValidationError::InvalidSource(format!(
            "invalid branch name '{}'",
            branch
        )));
    }
    Ok(())
}

fn acquisition(message: impl Into<String>) -> CoreError {
    CoreError::SourceAcquisition(message.into())
}

#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
    root: PathBuf,
}

impl Workspace {
    fn create(base: &Path) -> Result<(TempDir, PathBuf)> {
        fs::create_dir_all(base)
            .map_err(|e| acquisition(format!("cannot create {}: {}", base.display(), e)))?;
        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(base)
            .map_err(|e| acquisition(format!("cannot create workspace: {}", e)))?;
        // Tools report canonical paths; keep the root comparable to them.
        let root = dir
            .path()
            .canonicalize()
            .unwrap_or_else(|_| dir.path().to_path_buf());
        Ok((dir, root))
    }

    /// Unpacks `bytes` into a fresh directory under `base`.
    pub async fn from_archive(
        base: &Path,
        bytes: Vec<u8>,
        kind: ArchiveKind,
        max_extracted_bytes: u64,
    ) -> Result<Self> {
        let (dir, root) = Self::create(base)?;
        let dest = root.clone();

        let extracted = tokio::task::spawn_blocking(move || match kind {
            ArchiveKind::Zip => extract_zip(&bytes, &dest, max_extracted_bytes),
            ArchiveKind::Tar => extract_tar(Cursor::new(bytes), &dest, max_extracted_bytes),
            ArchiveKind::TarGz => extract_tar(
                GzDecoder::new(Cursor::new(bytes)),
                &dest,
                max_extracted_bytes,
            ),
        })
        .await
        .map_err(|e| acquisition(format!("extraction task failed: {}", e)))??;

        tracing::info!("Extracted {} bytes of {} archive into {:?}", extracted, kind, root);
        Ok(Self { dir, root })
    }

    /// Shallow clone of exactly one branch.
    pub async fn from_repository(
        base: &Path,
        url: &str,
        branch: &str,
        git: &str,
        timeout: Duration,
    ) -> Result<Self> {
        validate_repository_url(url)?;
        validate_branch(branch)?;

        let (dir, root) = Self::create(base)?;
        tracing::info!("Cloning {} (branch {}) into {:?}", url, branch, root);

        let output = ToolCommand::new("git", git)
            .args(["clone", "--depth", "1", "--single-branch", "--branch"])
            .arg(branch)
            .arg("--")
            .arg(url)
            .arg(root.as_os_str())
            .env("GIT_TERMINAL_PROMPT", "0")
            .timeout(timeout)
            .run()
            .await
            .map_err(|e| acquisition(format!("git clone failed: {}", e)))?;

        if !output.status.success() {
            let stderr = output.stderr.trim();
            return Err(acquisition(format!(
                "git clone of {} (branch {}) exited with {:?}: {}",
                url,
                branch,
                output.status.code(),
                stderr
            )));
        }
        Ok(Self { dir, root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Removes the directory now. Dropping a `Workspace` does the same,
    /// silently.
    pub fn close(self) -> Result<()> {
        let path = self.root.clone();
        self.dir.close().map_err(|e| {
            tracing::warn!("Failed to remove workspace {:?}: {}", path, e);
            CoreError::Io(e)
        })
    }
}

fn write_failed(e: io::Error) -> CoreError {
    acquisition(format!("failed to write extracted file: {}", e))
}

fn extract_zip(bytes: &[u8], dest: &Path, max_bytes: u64) -> Result<u64> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| acquisition(format!("invalid zip archive: {}", e)))?;

    let mut total = 0u64;
    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| acquisition(format!("corrupt zip entry {}: {}", i, e)))?;

        let enclosed_name = match file.enclosed_name() {
            Some(name) => name.to_path_buf(),
            None => {
                tracing::warn!("Skipping zip entry with unsafe path: {}", file.name());
                continue;
            }
        };
        let file_path = dest.join(enclosed_name);

        if file.is_dir() {
            fs::create_dir_all(&file_path).map_err(write_failed)?;
            continue;
        }
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).map_err(write_failed)?;
        }

        let remaining = max_bytes.saturating_sub(total);
        let mut outfile = fs::File::create(&file_path).map_err(write_failed)?;
        let written = io::copy(&mut (&mut file).take(remaining.saturating_add(1)), &mut outfile)
            .map_err(write_failed)?;
        total += written;
        if total > max_bytes {
            return Err(acquisition(format!(
                "archive expands beyond {} bytes",
                max_bytes
            )));
        }
    }
    Ok(total)
}

fn extract_tar<R: Read>(reader: R, dest: &Path, max_bytes: u64) -> Result<u64> {
    let mut archive = tar::Archive::new(reader);
    let entries = archive
        .entries()
        .map_err(|e| acquisition(format!("invalid tar archive: {}", e)))?;

    let mut total = 0u64;
    for entry in entries {
        let mut entry = entry.map_err(|e| acquisition(format!("corrupt tar entry: {}", e)))?;
        let entry_type = entry.header().entry_type();
        if !(entry_type.is_file() || entry_type.is_dir()) {
            tracing::debug!("Skipping tar entry of type {:?}", entry_type);
            continue;
        }

        total += entry.size();
        if total > max_bytes {
            return Err(acquisition(format!(
                "archive expands beyond {} bytes",
                max_bytes
            )));
        }

        let relative = entry
            .path()
            .map_err(|e| acquisition(format!("corrupt tar entry path: {}", e)))?
            .into_owned();
        let unpacked = entry
            .unpack_in(dest)
            .map_err(|e| acquisition(format!("failed to unpack tar entry: {}", e)))?;
        if !unpacked {
            tracing::warn!("Skipping tar entry with unsafe path: {:?}", relative);
            continue;
        }
        if entry_type.is_dir() {
            keep_owner_writable(&dest.join(sanitized(&relative))).map_err(write_failed)?;
        }
    }
    Ok(total)
}

/// The components `unpack_in` writes to: root and `.` are dropped.
fn sanitized(path: &Path) -> PathBuf {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect()
}

/// Header modes are applied on unpack. A directory without owner `rwx`
/// would make the workspace impossible to remove.
#[cfg(unix)]
fn keep_owner_writable(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = fs::metadata(dir)?.permissions();
    let mode = perms.mode();
    if mode & 0o700 != 0o700 {
        perms.set_mode(mode | 0o700);
        fs::set_permissions(dir, perms)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn keep_owner_writable(dir: &Path) -> io::Result<()> {
    let mut perms = fs::metadata(dir)?.permissions();
    if perms.readonly() {
        perms.set_readonly(false);
        fs::set_permissions(dir, perms)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in files {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn tar_gz_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        let tar = builder.into_inner().unwrap();
        let mut gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        gz.write_all(&tar).unwrap();
        gz.finish().unwrap()
    }

    fn dir_is_empty(path: &Path) -> bool {
        fs::read_dir(path).unwrap().next().is_none()
    }

    #[test]
    fn archive_kind_from_name() {
        assert_eq!(ArchiveKind::from_file_name("a.ZIP").unwrap(), ArchiveKind::Zip);
        assert_eq!(ArchiveKind::from_file_name("a.tar").unwrap(), ArchiveKind::Tar);
        assert_eq!(ArchiveKind::from_file_name("a.tar.gz").unwrap(), ArchiveKind::TarGz);
        assert_eq!(ArchiveKind::from_file_name("a.tgz").unwrap(), ArchiveKind::TarGz);
        assert!(matches!(
            ArchiveKind::from_file_name("a.rar"),
            Err(ValidationError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn url_validation() {
        assert!(validate_repository_url("https://github.com/org/repo.git").is_ok());
        assert!(validate_repository_url("ssh://git@host/org/repo.git").is_ok());
        for bad in ["not a url", "file:///etc/passwd", "https://", "ftp://host/x"] {
            assert!(
                matches!(validate_repository_url(bad), Err(ValidationError::InvalidSource(_))),
                "{}",
                bad
            );
        }
    }

    #[test]
    fn branch_validation() {
        assert!(validate_branch("main").is_ok());
        assert!(validate_branch("release/1.2").is_ok());
        for bad in ["", "-upload-pack=x", "a..b", "has space"] {
            assert!(validate_branch(bad).is_err(), "{}", bad);
        }
    }

    #[tokio::test]
    async fn zip_extracts_and_close_removes() {
        let base = tempfile::tempdir().unwrap();
        let bytes = zip_bytes(&[("src/app.py", b"print(1)\n"), ("README.md", b"hi")]);
        let ws = Workspace::from_archive(base.path(), bytes, ArchiveKind::Zip, 1024)
            .await
            .unwrap();

        assert!(ws.root().join("src/app.py").is_file());
        assert!(ws.root().starts_with(base.path().canonicalize().unwrap()));
        ws.close().unwrap();
        assert!(dir_is_empty(base.path()));
    }

    #[tokio::test]
    async fn unsafe_zip_entries_are_skipped() {
        let base = tempfile::tempdir().unwrap();
        let bytes = zip_bytes(&[("../escape.py", b"x"), ("ok.py", b"y")]);
        let ws = Workspace::from_archive(base.path(), bytes, ArchiveKind::Zip, 1024)
            .await
            .unwrap();
        assert!(ws.root().join("ok.py").is_file());
        assert!(!base.path().join("escape.py").exists());
    }

    #[tokio::test]
    async fn tar_gz_extracts() {
        let base = tempfile::tempdir().unwrap();
        let bytes = tar_gz_bytes(&[("pkg/main.go", b"package main\n")]);
        let ws = Workspace::from_archive(base.path(), bytes, ArchiveKind::TarGz, 1024)
            .await
            .unwrap();
        assert!(ws.root().join("pkg/main.go").is_file());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn read_only_tar_directories_stay_removable() {
        use std::os::unix::fs::PermissionsExt;

        let mut builder = tar::Builder::new(Vec::new());
        let mut file = tar::Header::new_gnu();
        file.set_size(6);
        file.set_mode(0o644);
        file.set_cksum();
        builder.append_data(&mut file, "d/x.py", &b"x = 1\n"[..]).unwrap();

        let mut dir = tar::Header::new_gnu();
        dir.set_entry_type(tar::EntryType::Directory);
        dir.set_size(0);
        dir.set_mode(0o555);
        dir.set_cksum();
        builder.append_data(&mut dir, "d/", io::empty()).unwrap();
        let bytes = builder.into_inner().unwrap();

        let base = tempfile::tempdir().unwrap();
        let ws = Workspace::from_archive(base.path(), bytes, ArchiveKind::Tar, 1024)
            .await
            .unwrap();
        let mode = fs::metadata(ws.root().join("d")).unwrap().permissions().mode();
        assert_eq!(mode & 0o700, 0o700);
        assert!(ws.root().join("d/x.py").is_file());

        ws.close().unwrap();
        assert!(dir_is_empty(base.path()));
    }

    #[tokio::test]
    async fn extraction_limit_and_corrupt_input_leave_nothing_behind() {
        let base = tempfile::tempdir().unwrap();
        let big = vec![b'a'; 600];
        let bytes = zip_bytes(&[("a.py", &big), ("b.py", &big)]);
        let err = Workspace::from_archive(base.path(), bytes, ArchiveKind::Zip, 1000)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "SourceAcquisitionError");

        let err = Workspace::from_archive(base.path(), b"garbage".to_vec(), ArchiveKind::TarGz, 1000)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "SourceAcquisitionError");
        assert!(dir_is_empty(base.path()));
    }

    #[tokio::test]
    async fn invalid_repository_is_rejected_before_cloning() {
        let base = tempfile::tempdir().unwrap();
        let err = Workspace::from_repository(
            base.path(),
            "not a url",
            "main",
            "git",
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
        assert!(dir_is_empty(base.path()));
    }

    #[tokio::test]
    async fn failed_clone_removes_directory() {
        let base = tempfile::tempdir().unwrap();
        let err = Workspace::from_repository(
            base.path(),
            "https://127.0.0.1:9/nonexistent/repo.git",
            "no-such-branch",
            "/nonexistent/bin/git",
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "SourceAcquisitionError");
        assert!(dir_is_empty(base.path()));
    }
}
