//! Versioned one-time migrations
//!
//! A [`Migrator`] holds migration steps keyed by strictly increasing
//! versions and a [`Versioner`] that remembers the last version applied.
//! Steps receive the bare [`Reconciler`], so a migration can apply resources
//! but never re-enter the migrator.

use crate::cancel::CancellationToken;
use crate::error::{ApplyError, Error};
use crate::file::write_atomic;
use crate::manager::Reconciler;
use crate::types::ApplyResults;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// One migration step
pub type Migration =
    Box<dyn Fn(&Reconciler, &CancellationToken) -> Result<ApplyResults, ApplyError> + Send + Sync>;

/// Persistent cursor of the last applied migration version
pub trait Versioner: Send + Sync {
    /// Last applied version, 0 when nothing has run
    fn current(&self) -> u64;

    /// Record `version` as applied
    fn set(&mut self, version: u64) -> anyhow::Result<()>;
}

/// Ordered migration steps plus their cursor
pub struct Migrator {
    versioner: Box<dyn Versioner>,
    migrations: Vec<(u64, Migration)>,
}

impl Migrator {
    pub fn new(versioner: impl Versioner + 'static) -> Self {
        Self {
            versioner: Box::new(versioner),
            migrations: Vec::new(),
        }
    }

    /// Register the step for `version`
    ///
    /// # Panics
    ///
    /// Panics if `version` is not greater than every version added before.
    pub fn add_migration<F>(&mut self, version: u64, migration: F)
    where
        F: Fn(&Reconciler, &CancellationToken) -> Result<ApplyResults, ApplyError>
            + Send
            + Sync
            + 'static,
    {
        if let Some((last, _)) = self.migrations.last() {
            assert!(
                version > *last,
                "migration {version} added after migration {last}"
            );
        }
        self.migrations.push((version, Box::new(migration)));
    }

    /// Builder form of [`Migrator::add_migration`]
    #[must_use]
    pub fn with_migration<F>(mut self, version: u64, migration: F) -> Self
    where
        F: Fn(&Reconciler, &CancellationToken) -> Result<ApplyResults, ApplyError>
            + Send
            + Sync
            + 'static,
    {
        self.add_migration(version, migration);
        self
    }

    /// Last applied version
    pub fn current(&self) -> u64 {
        self.versioner.current()
    }

    /// Versions that the next run would apply, in order
    pub fn pending(&self) -> Vec<u64> {
        let current = self.current();
        self.migrations
            .iter()
            .map(|(version, _)| *version)
            .filter(|version| *version > current)
            .collect()
    }

    /// Run every pending step in version order
    ///
    /// The cursor advances after each successful step. The first failing
    /// step stops the run; its results are kept and the cursor stays at the
    /// last successful version.
    pub fn run(
        &mut self,
        reconciler: &Reconciler,
        cancel: &CancellationToken,
    ) -> Result<ApplyResults, ApplyError> {
        let current = self.versioner.current();
        let mut results = ApplyResults::new();

        for (version, migration) in self.migrations.iter().filter(|(v, _)| *v > current) {
            let version = *version;
            if let Err(err) = cancel.check() {
                let cause = anyhow::Error::new(err).context("migrations interrupted");
                return Err(ApplyError::new(results, vec![cause]));
            }

            log::info!("Running migration {version}");
            match migration(reconciler, cancel) {
                Ok(applied) => results.append(applied),
                Err(err) => {
                    let (applied, mut causes) = err.into_parts();
                    results.append(applied);
                    causes.push(Error::Migration { version }.into());
                    return Err(ApplyError::new(results, causes));
                }
            }

            if let Err(source) = self.versioner.set(version) {
                let cause = Error::VersionSave { version, source };
                return Err(ApplyError::new(results, vec![cause.into()]));
            }
        }

        Ok(results)
    }
}

impl fmt::Debug for Migrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let versions: Vec<u64> = self.migrations.iter().map(|(v, _)| *v).collect();
        f.debug_struct("Migrator")
            .field("current", &self.current())
            .field("versions", &versions)
            .finish()
    }
}

// ============================================================================
// File-backed cursor
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct VersionRecord {
    version: u64,
    updated_at: DateTime<Utc>,
}

/// Cursor stored as a small TOML file
#[derive(Debug)]
pub struct FileVersioner {
    path: PathBuf,
    current: u64,
}

impl FileVersioner {
    /// Load the cursor from `path`; a missing file means version 0
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        let current = match fs::read_to_string(&path) {
            Ok(text) => {
                let record: VersionRecord =
                    toml::from_str(&text).map_err(|e| Error::VersionLoad {
                        path: path.clone(),
                        message: e.to_string(),
                    })?;
                record.version
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => {
                return Err(Error::VersionLoad {
                    path,
                    message: e.to_string(),
                });
            }
        };
        log::debug!("Migration version {current} from {}", path.display());
        Ok(Self { path, current })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Versioner for FileVersioner {
    fn current(&self) -> u64 {
        self.current
    }

    fn set(&mut self, version: u64) -> anyhow::Result<()> {
        let record = VersionRecord {
            version,
            updated_at: Utc::now(),
        };
        let text = toml::to_string_pretty(&record).context("Failed to serialize version")?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        write_atomic(&self.path, None, |sink| {
            sink.write_all(text.as_bytes())?;
            Ok(())
        })
        .with_context(|| format!("Failed to write {}", self.path.display()))?;

        self.current = version;
        Ok(())
    }
}
