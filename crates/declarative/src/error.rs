//! Error types for resource reconciliation.
//!
//! [`Error`] covers failures raised by the engine and the bundled file
//! resource. Resource implementations return `anyhow::Result`, so callers
//! can attach context freely; [`ApplyError`] aggregates everything that went
//! wrong in one apply run while keeping the full result log.

use crate::types::ApplyResults;
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the reconciliation engine and its bundled resources.
#[derive(Debug, Error)]
pub enum Error {
    /// The apply run was cancelled through its token
    #[error("operation cancelled")]
    Cancelled,

    /// Rendered content did not match the declared checksum
    #[error("checksum of content for {path} differs: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Target path of the write
        path: PathBuf,
        /// Declared checksum
        expected: String,
        /// Checksum of the bytes actually produced
        actual: String,
    },

    /// Existing entity has a different type and replacement was not forced
    #[error("{path} is a {actual}, expected a {expected} (set force to replace it)")]
    TypeMismatch {
        /// Conflicting path
        path: PathBuf,
        /// Declared type
        expected: &'static str,
        /// Type found on disk
        actual: &'static str,
    },

    /// Filesystem operation failed
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path involved in the failed operation
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Existing file could not be replaced by the freshly written one
    #[error("cannot replace file {path}: {source}")]
    Replace {
        /// Target path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Template could not be rendered
    #[error("template {path}: {message}")]
    Template {
        /// Template path inside its source directory
        path: String,
        /// What went wrong
        message: String,
    },

    /// Source path is absolute or climbs out of its source directory
    #[error("source path {path} is not inside {root}")]
    InvalidSourcePath {
        /// Source directory
        root: PathBuf,
        /// Offending path as given
        path: PathBuf,
    },

    /// A template referenced a fact no facter knows about
    #[error("fact {0:?} not found")]
    FactNotFound(String),

    /// HTTP content source failed
    #[error("failed to fetch {url}: {message}")]
    Http {
        /// Requested location
        url: String,
        /// Error reported by the HTTP client
        message: String,
    },

    /// Migration cursor could not be loaded
    #[error("failed to load migration version from {path}: {message}")]
    VersionLoad {
        /// Cursor file
        path: PathBuf,
        /// Parse or read error
        message: String,
    },

    /// Migration cursor could not be persisted
    #[error("failed to save migration version {version}: {source}")]
    VersionSave {
        /// Version that could not be stored
        version: u64,
        /// Underlying error
        #[source]
        source: anyhow::Error,
    },

    /// A migration step reported failures
    #[error("migration {version} failed")]
    Migration {
        /// Version of the failed step
        version: u64,
    },
}

impl Error {
    /// Build an I/O error tagged with the path it happened at.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result alias for engine-internal operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Whether `err`, or anything in its source chain, is a cancellation.
pub fn is_cancellation(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| matches!(cause.downcast_ref::<Error>(), Some(Error::Cancelled)))
}

/// Every failure from one apply run, together with the results it produced.
///
/// Per-resource failures live on their [`ApplyResult`](crate::ApplyResult)s;
/// failures not tied to a single resource (cancellation, migrator errors) are
/// kept as extra causes. [`ApplyError::causes`] yields both, in order.
#[derive(Debug)]
pub struct ApplyError {
    results: ApplyResults,
    extra: Vec<anyhow::Error>,
}

impl ApplyError {
    /// Build an aggregate from a log and causes not tied to a resource.
    pub fn new(results: ApplyResults, extra: Vec<anyhow::Error>) -> Self {
        Self { results, extra }
    }

    /// Turn a run into `Ok(results)` or `Err(ApplyError)`.
    pub fn check(
        results: ApplyResults,
        extra: Vec<anyhow::Error>,
    ) -> std::result::Result<ApplyResults, Self> {
        if extra.is_empty() && results.errors().next().is_none() {
            return Ok(results);
        }
        Err(Self { results, extra })
    }

    /// Results produced before and including the failures
    pub fn results(&self) -> &ApplyResults {
        &self.results
    }

    /// Take the result log out of the error
    pub fn into_results(self) -> ApplyResults {
        self.results
    }

    /// Split into the result log and the causes not tied to a resource
    pub fn into_parts(self) -> (ApplyResults, Vec<anyhow::Error>) {
        (self.results, self.extra)
    }

    /// All causes: per-resource errors first, then run-level ones
    pub fn causes(&self) -> impl Iterator<Item = &anyhow::Error> {
        self.results.errors().chain(self.extra.iter())
    }

    /// Number of causes
    pub fn len(&self) -> usize {
        self.causes().count()
    }

    /// Whether no cause is recorded, which [`ApplyError::new`] allows
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First error of type `E` found anywhere in any cause chain
    pub fn find<E>(&self) -> Option<&E>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.causes()
            .flat_map(anyhow::Error::chain)
            .find_map(|cause| cause.downcast_ref::<E>())
    }

    /// Whether an error of type `E` occurred anywhere in the run
    pub fn contains<E>(&self) -> bool
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.find::<E>().is_some()
    }

    /// Whether the run, or any resource in it, was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.causes().any(is_cancellation)
    }
}

impl From<anyhow::Error> for ApplyError {
    fn from(err: anyhow::Error) -> Self {
        Self {
            results: ApplyResults::new(),
            extra: vec![err],
        }
    }
}

impl From<Error> for ApplyError {
    fn from(err: Error) -> Self {
        Self::from(anyhow::Error::new(err))
    }
}

impl fmt::Display for ApplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut causes = self.causes();
        match (causes.next(), causes.next()) {
            (Some(only), None) => write!(f, "there was an apply error: {only:#}"),
            _ => write!(f, "there were {} errors", self.len()),
        }
    }
}

impl std::error::Error for ApplyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.causes().next().map(|cause| {
            let source: &(dyn std::error::Error + 'static) = cause.as_ref();
            source
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_no_causes_is_ok() {
        assert!(ApplyError::check(ApplyResults::new(), Vec::new()).is_ok());

        let empty = ApplyError::new(ApplyResults::new(), Vec::new());
        assert!(empty.is_empty());
        assert_eq!(empty.len(), 0);
    }

    #[test]
    fn test_single_cancellation() {
        let err = ApplyError::from(Error::Cancelled);
        assert!(err.is_cancelled());
        assert!(err.contains::<Error>());
        assert_eq!(err.len(), 1);
        assert_eq!(err.to_string(), "there was an apply error: operation cancelled");
    }

    #[test]
    fn test_wrapped_cancellation_counts() {
        let wrapped = Err::<(), _>(Error::Cancelled)
            .context("interrupted")
            .unwrap_err();
        let err = ApplyError::check(
            ApplyResults::new(),
            vec![anyhow::anyhow!("some error"), wrapped],
        )
        .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(err.to_string(), "there were 2 errors");
    }

    #[test]
    fn test_find_io_error() {
        let io = Error::io("/nope", io::Error::from(io::ErrorKind::PermissionDenied));
        let err = ApplyError::from(anyhow::Error::new(io).context("inspecting"));

        assert!(!err.is_cancelled());
        assert!(err.contains::<io::Error>());
        assert!(matches!(err.find::<Error>(), Some(Error::Io { .. })));
    }
}
