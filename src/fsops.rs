//! File operations guarded by the [`Jail`].
//!
//! The primitives at the bottom of this module take [`ResolvedPath`]s only.
//! [`FileManager`] is the client-facing entry point: it resolves raw,
//! jail-relative strings first and aborts with [`Error::OutsideJail`] before
//! any I/O when resolution fails.

use std::io;
use std::path::PathBuf;

use tokio::fs;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::jail::{Jail, ResolvedPath};

/// A single name in a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    pub is_directory: bool,
}

impl DirectoryEntry {
    /// The listing form of the entry: directories carry a trailing `/`.
    pub fn display_name(&self) -> String {
        if self.is_directory {
            format!("{}/", self.name)
        } else {
            self.name.clone()
        }
    }

    fn is_dotfile(&self) -> bool {
        self.name.starts_with('.')
    }
}

/// Outcome of [`FileManager::validate_for_download`].
///
/// `valid` is true when the path is inside the jail and exists. A directory is
/// valid too; the caller rejects it before streaming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadCheck {
    pub valid: bool,
    pub path: PathBuf,
}

pub struct FileManager {
    jail: Jail,
}

impl FileManager {
    pub fn new(jail: Jail) -> Self {
        Self { jail }
    }

    pub fn jail(&self) -> &Jail {
        &self.jail
    }

    pub async fn list(&self, raw: &str) -> Result<Vec<DirectoryEntry>> {
        let path = self.jail.resolve_async(raw).await?;
        list_dir(&path, self.jail.include_dotfiles()).await
    }

    pub async fn remove(&self, raw: &str) -> Result<()> {
        let path = self.jail.resolve_async(raw).await?;
        if self.jail.is_root(&path) {
            return Err(Error::InvalidPath {
                reason: "refusing to remove the jail root",
            });
        }
        remove_path(&path).await
    }

    /// Move `source` to `target`. Both are resolved before anything is touched.
    pub async fn rename(&self, source: &str, target: &str) -> Result<()> {
        let source = self.jail.resolve_async(source).await?;
        let target = self.jail.resolve_async(target).await?;
        if self.jail.is_root(&source) || self.jail.is_root(&target) {
            return Err(Error::InvalidPath {
                reason: "refusing to move the jail root",
            });
        }
        move_path(&source, &target).await
    }

    pub async fn make_directory(&self, raw: &str) -> Result<()> {
        let path = self.jail.resolve_async(raw).await?;
        create_dir(&path).await
    }

    /// Never fails: reports whether `raw` names something inside the jail
    /// that exists, together with the best-effort absolute path.
    pub async fn validate_for_download(&self, raw: &str) -> DownloadCheck {
        match self.jail.resolve_async(raw).await {
            Ok(resolved) => {
                let valid = fs::symlink_metadata(resolved.as_path()).await.is_ok();
                DownloadCheck {
                    valid,
                    path: resolved.as_path().to_path_buf(),
                }
            }
            Err(_) => DownloadCheck {
                valid: false,
                path: self.jail.candidate(raw),
            },
        }
    }
}

/// Read the entries of a directory, without `.` and `..`. Dotfiles are only
/// included when `include_dotfiles` is set. Order is whatever the platform
/// enumeration yields.
pub async fn list_dir(path: &ResolvedPath, include_dotfiles: bool) -> Result<Vec<DirectoryEntry>> {
    let metadata = fs::metadata(path.as_path())
        .await
        .map_err(|source| Error::io("stat", path.as_path(), source))?;
    if !metadata.is_dir() {
        return Err(Error::NotADirectory {
            path: path.as_path().to_path_buf(),
        });
    }

    let mut reader = fs::read_dir(path.as_path())
        .await
        .map_err(|source| Error::io("open", path.as_path(), source))?;
    let mut entries = Vec::new();
    while let Some(entry) = reader
        .next_entry()
        .await
        .map_err(|source| Error::io("read", path.as_path(), source))?
    {
        let file_type = entry
            .file_type()
            .await
            .map_err(|source| Error::io("stat", entry.path(), source))?;
        let entry = DirectoryEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            is_directory: file_type.is_dir(),
        };
        if !include_dotfiles && entry.is_dotfile() {
            continue;
        }
        entries.push(entry);
    }
    debug!(path = %path.as_path().display(), count = entries.len(), "listed directory");
    Ok(entries)
}

/// Remove a file, a symlink or a whole directory tree. There is no undo.
pub async fn remove_path(path: &ResolvedPath) -> Result<()> {
    let metadata = fs::symlink_metadata(path.as_path())
        .await
        .map_err(|source| Error::io("stat", path.as_path(), source))?;
    let removed = if metadata.is_dir() {
        fs::remove_dir_all(path.as_path()).await
    } else {
        fs::remove_file(path.as_path()).await
    };
    removed.map_err(|source| Error::io("remove", path.as_path(), source))?;
    info!(path = %path.as_path().display(), "removed");
    Ok(())
}

/// A single rename at the filesystem layer.
///
/// `ENOENT` is blamed on the target's parent when the source is still there.
pub async fn move_path(source: &ResolvedPath, target: &ResolvedPath) -> Result<()> {
    if let Err(err) = fs::rename(source.as_path(), target.as_path()).await {
        if err.kind() == io::ErrorKind::NotFound
            && fs::symlink_metadata(source.as_path()).await.is_ok()
        {
            return Err(Error::ParentMissing {
                path: target.as_path().to_path_buf(),
            });
        }
        return Err(Error::io("rename", source.as_path(), err));
    }
    info!(
        source = %source.as_path().display(),
        target = %target.as_path().display(),
        "moved"
    );
    Ok(())
}

/// Create one directory. The parent must exist and the target must not.
pub async fn create_dir(path: &ResolvedPath) -> Result<()> {
    fs::create_dir(path.as_path())
        .await
        .map_err(|source| match Error::io("mkdir", path.as_path(), source) {
            Error::NotFound { path } => Error::ParentMissing { path },
            err => err,
        })?;
    info!(path = %path.as_path().display(), "created directory");
    Ok(())
}
