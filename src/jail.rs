//! Path resolution restricted to a single root directory.
//!
//! Client paths are always jail-relative: they are joined onto the root,
//! normalised lexically and then proven to stay below the root before any
//! filesystem call is made with them. The only way to obtain a
//! [`ResolvedPath`] is through [`Jail::resolve`] (or [`Jail::resolve_sibling`]),
//! so everything that mutates the filesystem is forced through that check.

use std::io;
use std::path::{Component, Path, PathBuf};

use tokio::task;
use tracing::debug;

use crate::error::{Error, Result};

/// The configured root directory and listing policy.
///
/// Built once at startup and shared read-only by every request.
#[derive(Debug, Clone)]
pub struct Jail {
    root: PathBuf,
    include_dotfiles: bool,
}

/// An absolute path proven to lie inside a [`Jail`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    path: PathBuf,
}

impl ResolvedPath {
    pub fn as_path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|name| name.to_str())
    }
}

impl AsRef<Path> for ResolvedPath {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

impl Jail {
    /// Create a jail rooted at `root`, which must be an absolute path to an
    /// existing directory. The root is canonicalised once here, with a
    /// blocking call; build the jail at startup, not per request.
    pub fn new(root: impl AsRef<Path>, include_dotfiles: bool) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_absolute() {
            return Err(Error::InvalidJail {
                root: root.to_path_buf(),
                reason: "must be an absolute path",
            });
        }
        let canonical = std::fs::canonicalize(root)
            .map_err(|source| Error::io("canonicalize", root, source))?;
        if !canonical.is_dir() {
            return Err(Error::InvalidJail {
                root: root.to_path_buf(),
                reason: "not a directory",
            });
        }
        Ok(Self {
            root: canonical,
            include_dotfiles,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn include_dotfiles(&self) -> bool {
        self.include_dotfiles
    }

    /// Resolve a jail-relative client path.
    ///
    /// Blocks on the filesystem for the symlink check. Async callers use
    /// [`Jail::resolve_async`].
    ///
    /// A leading `/` is jail-relative, not filesystem-absolute, and an empty
    /// string resolves to the root itself.
    pub fn resolve(&self, raw: &str) -> Result<ResolvedPath> {
        self.check(raw, self.candidate(raw))
    }

    /// Resolve `name` as a sibling of `path`, i.e. in the same directory.
    ///
    /// `name` must be a single path component.
    pub fn resolve_sibling(&self, path: &ResolvedPath, name: &str) -> Result<ResolvedPath> {
        if name.is_empty() || name == "." || name == ".." || name.chars().any(std::path::is_separator)
        {
            return Err(Error::InvalidPath {
                reason: "file name must be a single path component",
            });
        }
        let parent = path.path.parent().ok_or(Error::InvalidPath {
            reason: "path has no parent directory",
        })?;
        self.check(name, parent.join(name))
    }

    /// [`Jail::resolve`] on the blocking pool. The symlink check canonicalises
    /// ancestors, which must not stall other requests on the runtime.
    pub async fn resolve_async(&self, raw: &str) -> Result<ResolvedPath> {
        let jail = self.clone();
        let owned = raw.to_string();
        task::spawn_blocking(move || jail.resolve(&owned))
            .await
            .map_err(|err| Error::io("resolve", self.candidate(raw), io::Error::other(err)))?
    }

    /// [`Jail::resolve_sibling`] on the blocking pool.
    pub async fn resolve_sibling_async(
        &self,
        path: &ResolvedPath,
        name: &str,
    ) -> Result<ResolvedPath> {
        let jail = self.clone();
        let path = path.clone();
        let owned = name.to_string();
        task::spawn_blocking(move || jail.resolve_sibling(&path, &owned))
            .await
            .map_err(|err| Error::io("resolve", self.candidate(name), io::Error::other(err)))?
    }

    pub fn is_root(&self, path: &ResolvedPath) -> bool {
        path.path == self.root
    }

    /// Render a resolved path the way clients address it: `/` separated and
    /// rooted at the jail.
    pub fn display(&self, path: &ResolvedPath) -> String {
        let relative = path.path.strip_prefix(&self.root).unwrap_or(Path::new(""));
        let parts = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>();
        format!("/{}", parts.join("/"))
    }

    /// Strip the jail root from text that is about to leave the process.
    pub fn redact(&self, message: &str) -> String {
        let root = self.root.to_string_lossy();
        if root == "/" {
            return message.to_string();
        }
        message
            .replace(&format!("{root}/"), "/")
            .replace(root.as_ref(), "/")
    }

    /// The normalised absolute path for `raw`, whether or not it is inside
    /// the jail.
    pub(crate) fn candidate(&self, raw: &str) -> PathBuf {
        normalize(&self.root.join(raw.trim_start_matches('/')))
    }

    fn check(&self, raw: &str, candidate: PathBuf) -> Result<ResolvedPath> {
        if !self.contains(&candidate) {
            debug!(raw, candidate = %candidate.display(), "path escapes jail");
            return Err(Error::outside_jail(raw));
        }
        if !self.links_stay_inside(&candidate) {
            debug!(raw, candidate = %candidate.display(), "symlink escapes jail");
            return Err(Error::outside_jail(raw));
        }
        Ok(ResolvedPath { path: candidate })
    }

    fn contains(&self, path: &Path) -> bool {
        let root = self.root.as_os_str().as_encoded_bytes();
        if !path.as_os_str().as_encoded_bytes().starts_with(root) {
            return false;
        }
        // Rejects "/srv/jail-other" for a root of "/srv/jail".
        if !path.starts_with(&self.root) {
            return false;
        }
        // Unreachable after normalisation, kept as a second line of defence.
        if path.to_string_lossy().contains("../") {
            return false;
        }
        !path
            .components()
            .any(|component| matches!(component, Component::ParentDir))
    }

    /// The nearest existing ancestor of `path` (or `path` itself) must still be
    /// inside the root once symlinks are followed. Missing tails are not
    /// checked, so a move destination that does not exist yet still resolves.
    fn links_stay_inside(&self, path: &Path) -> bool {
        for ancestor in path.ancestors() {
            if !ancestor.starts_with(&self.root) {
                break;
            }
            if let Ok(real) = std::fs::canonicalize(ancestor) {
                return real.starts_with(&self.root);
            }
        }
        true
    }
}

/// Lexically normalise `path`: drop `.` components, fold `..` into the
/// preceding component and collapse repeated separators. `..` above the
/// filesystem root stays at the root. Never touches the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if depth > 0 {
                    out.pop();
                    depth -= 1;
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}
