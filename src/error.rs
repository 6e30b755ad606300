use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failures surfaced by the jail, the file operations and the episode renamer.
#[derive(Debug, Error)]
pub enum Error {
    /// The requested path normalises to somewhere outside the jail root.
    #[error("path outside of jail")]
    OutsideJail {
        /// Client supplied path, before normalisation.
        raw: String,
    },
    #[error("{}: no such file or directory", path.display())]
    NotFound { path: PathBuf },
    #[error("{}: not a directory", path.display())]
    NotADirectory { path: PathBuf },
    #[error("{}: already exists", path.display())]
    AlreadyExists { path: PathBuf },
    #[error("{}: parent directory does not exist", path.display())]
    ParentMissing { path: PathBuf },
    #[error("invalid path: {reason}")]
    InvalidPath { reason: &'static str },
    #[error("invalid jail root {}: {reason}", root.display())]
    InvalidJail { root: PathBuf, reason: &'static str },
    /// A file name or a lookup response did not have the expected shape.
    #[error("could not parse {subject}")]
    ParseFailure { subject: &'static str },
    /// The metadata service could not be reached or its body could not be read.
    #[error("episode lookup failed")]
    LookupFailure {
        #[source]
        source: BoxError,
    },
    #[error("{operation} {} failed", path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// Classify an I/O failure by kind, keeping the rest as [`Error::Io`].
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            io::ErrorKind::NotFound => Self::NotFound { path },
            io::ErrorKind::AlreadyExists => Self::AlreadyExists { path },
            io::ErrorKind::NotADirectory => Self::NotADirectory { path },
            _ => Self::Io {
                operation,
                path,
                source,
            },
        }
    }

    pub(crate) fn outside_jail(raw: impl Into<String>) -> Self {
        Self::OutsideJail { raw: raw.into() }
    }

    pub(crate) fn lookup(source: impl Into<BoxError>) -> Self {
        Self::LookupFailure {
            source: source.into(),
        }
    }

    /// The message followed by every source in the chain, joined with `": "`.
    pub fn chain_message(&self) -> String {
        let mut message = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_not_found_is_classified() {
        let err = Error::io(
            "open",
            "/srv/jail/missing",
            io::Error::from(io::ErrorKind::NotFound),
        );
        assert!(matches!(err, Error::NotFound { .. }));
        assert_eq!(
            err.to_string(),
            "/srv/jail/missing: no such file or directory"
        );
    }

    #[test]
    fn test_io_already_exists_is_classified() {
        let err = Error::io(
            "mkdir",
            "/srv/jail/dir",
            io::Error::from(io::ErrorKind::AlreadyExists),
        );
        assert!(matches!(err, Error::AlreadyExists { .. }));
    }

    #[test]
    fn test_io_other_kind_keeps_source() {
        let err = Error::io(
            "remove",
            "/srv/jail/file",
            io::Error::new(io::ErrorKind::PermissionDenied, "permission denied"),
        );
        assert!(matches!(err, Error::Io { .. }));
        assert_eq!(
            err.chain_message(),
            "remove /srv/jail/file failed: permission denied"
        );
    }

    #[test]
    fn test_lookup_chain_message() {
        let err = Error::lookup(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert_eq!(err.chain_message(), "episode lookup failed: reset");
    }
}
