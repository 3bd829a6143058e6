//! File resource
//!
//! A [`File`] declares a regular file or directory: whether it exists, its
//! permissions and, for regular files, its content. Paths are resolved under
//! the prefix of a [`FileProvider`], looked up by name in the scope.

pub mod atomic;

pub use atomic::{checksum_bytes, checksum_file, write_atomic};

use crate::content::Content;
use crate::error::Error;
use crate::provider::Provider;
use crate::resource::{Resource, ResourceState};
use crate::scope::Scope;
use anyhow::{Context, Result};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Provider name used by files that do not name one
pub const DEFAULT_PROVIDER: &str = "file";

/// Default permissions of regular files
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Default permissions of directories
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// Root under which file paths are managed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileProvider {
    prefix: PathBuf,
}

impl FileProvider {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    /// Location of `path` under this provider's prefix
    ///
    /// Paths are joined textually, so an absolute `path` stays inside the
    /// prefix. Without a prefix the path is used as is.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if self.prefix.as_os_str().is_empty() {
            return path.to_path_buf();
        }
        let relative: PathBuf = path
            .components()
            .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
            .collect();
        self.prefix.join(relative)
    }
}

impl Provider for FileProvider {}

/// Declared state of a file or directory
#[derive(Debug, Clone)]
pub struct File {
    provider: Option<String>,
    path: PathBuf,
    absent: bool,
    mode: Option<u32>,
    directory: bool,
    create_parent: bool,
    force: bool,
    content: Option<Content>,
    keep_existing_content: bool,
    checksum: Option<String>,
}

impl File {
    /// Regular file at `path` that should exist
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            provider: None,
            path: path.into(),
            absent: false,
            mode: None,
            directory: false,
            create_parent: false,
            force: false,
            content: None,
            keep_existing_content: false,
            checksum: None,
        }
    }

    /// Resolve the path through the named provider instead of `file`
    #[must_use]
    pub fn provider(mut self, name: impl Into<String>) -> Self {
        self.provider = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_content(mut self, content: Content) -> Self {
        self.content = Some(content);
        self
    }

    /// The file must not exist; an existing one is removed
    #[must_use]
    pub const fn absent(mut self) -> Self {
        self.absent = true;
        self
    }

    #[must_use]
    pub const fn directory(mut self) -> Self {
        self.directory = true;
        self
    }

    /// Permission bits, defaulting to 0644 for files and 0755 for directories
    #[must_use]
    pub const fn mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Create missing parent directories
    #[must_use]
    pub const fn create_parent(mut self) -> Self {
        self.create_parent = true;
        self
    }

    /// Allow replacing a file with a directory and the other way around
    #[must_use]
    pub const fn force(mut self) -> Self {
        self.force = true;
        self
    }

    /// Only write content when the file is created
    #[must_use]
    pub const fn keep_existing_content(mut self) -> Self {
        self.keep_existing_content = true;
        self
    }

    /// Expected BLAKE3 hex digest of the content
    ///
    /// Writes whose content does not match are refused, and an existing file
    /// with this digest is considered up to date without rendering the
    /// content.
    #[must_use]
    pub fn checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn provider_name(&self) -> &str {
        self.provider.as_deref().unwrap_or(DEFAULT_PROVIDER)
    }

    pub fn is_absent(&self) -> bool {
        self.absent
    }

    pub fn is_directory(&self) -> bool {
        self.directory
    }

    /// Effective permission bits
    pub fn effective_mode(&self) -> u32 {
        match self.mode {
            Some(mode) => mode,
            None if self.directory => DEFAULT_DIR_MODE,
            None => DEFAULT_FILE_MODE,
        }
    }

    /// Location of the file on disk for this scope
    pub fn resolve(&self, scope: &Scope<'_>) -> PathBuf {
        let name = self.provider_name();
        match scope.provider::<FileProvider>(name) {
            Some(provider) => provider.resolve(&self.path),
            None => {
                log::debug!("No file provider named {name}, using {} as is", self.path.display());
                self.path.clone()
            }
        }
    }

    fn kind(&self) -> &'static str {
        if self.directory { "directory" } else { "file" }
    }

    fn write_content(&self, scope: &Scope<'_>, path: &Path) -> Result<()> {
        let Some(content) = &self.content else {
            return Ok(());
        };
        write_atomic(path, self.checksum.as_deref(), |sink| {
            content.render(scope, sink)
        })
        .with_context(|| format!("failed to write content of {}", path.display()))?;
        Ok(())
    }

    fn ensure_mode(&self, path: &Path) -> Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(self.effective_mode()))
                .map_err(|e| Error::io(path, e))
                .context("failed to set mode")?;
        }
        #[cfg(not(unix))]
        let _ = path;
        Ok(())
    }

    fn remove(path: &Path, is_dir: bool, recursive: bool) -> Result<(), Error> {
        let removed = match (is_dir, recursive) {
            (true, true) => fs::remove_dir_all(path),
            (true, false) => fs::remove_dir(path),
            (false, _) => fs::remove_file(path),
        };
        match removed {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(Error::io(path, e)),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[File:{}:{}]", self.provider_name(), self.path.display())
    }
}

impl Resource for File {
    fn inspect<'a>(&'a self, scope: &Scope<'_>) -> Result<Box<dyn ResourceState + 'a>> {
        let path = self.resolve(scope);
        let metadata = match fs::metadata(&path) {
            Ok(metadata) => Some(metadata),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(Error::io(&path, e).into()),
        };
        Ok(Box::new(FileState {
            file: self,
            path,
            metadata,
        }))
    }

    fn create(&self, scope: &Scope<'_>) -> Result<()> {
        if self.absent {
            return Ok(());
        }
        let path = self.resolve(scope);

        if self.create_parent
            && let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .map_err(|e| Error::io(parent, e))
                .context("failed to create parent directory")?;
        }

        if self.directory {
            fs::create_dir(&path)
                .map_err(|e| Error::io(&path, e))
                .context("failed to create directory")?;
        } else if self.content.is_some() {
            self.write_content(scope, &path)?;
        } else {
            fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)
                .map_err(|e| Error::io(&path, e))
                .context("failed to create file")?;
        }

        self.ensure_mode(&path)
    }

    fn update(&self, scope: &Scope<'_>) -> Result<()> {
        let path = self.resolve(scope);
        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound && self.absent => return Ok(()),
            Err(e) => return Err(Error::io(&path, e).into()),
        };

        if self.absent {
            log::debug!("Removing {}", path.display());
            Self::remove(&path, metadata.is_dir(), self.force)?;
            return Ok(());
        }

        if metadata.is_dir() != self.directory {
            if !self.force {
                return Err(Error::TypeMismatch {
                    path,
                    expected: self.kind(),
                    actual: if metadata.is_dir() { "directory" } else { "file" },
                }
                .into());
            }
            log::debug!("Replacing {} with a {}", path.display(), self.kind());
            Self::remove(&path, metadata.is_dir(), true)?;
            return self.create(scope);
        }

        if !self.directory && !self.keep_existing_content {
            self.write_content(scope, &path)?;
        }
        self.ensure_mode(&path)
    }
}

/// What [`File::inspect`] found on disk
pub struct FileState<'a> {
    file: &'a File,
    path: PathBuf,
    metadata: Option<fs::Metadata>,
}

impl FileState<'_> {
    /// Resolved location that was inspected
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(unix)]
    fn mode_differs(&self, metadata: &fs::Metadata) -> bool {
        use std::os::unix::fs::PermissionsExt;
        // Only permission bits: the kernel may drop setuid/setgid on its own.
        metadata.permissions().mode() & 0o777 != self.file.effective_mode() & 0o777
    }

    // Permission reconciliation is only implemented for Unix.
    #[cfg(not(unix))]
    fn mode_differs(&self, _metadata: &fs::Metadata) -> bool {
        false
    }

    fn content_differs(&self, scope: &Scope<'_>) -> Result<bool> {
        let Some(content) = &self.file.content else {
            return Ok(false);
        };
        let current = checksum_file(&self.path)?;
        if let Some(expected) = &self.file.checksum
            && expected.eq_ignore_ascii_case(&current)
        {
            return Ok(false);
        }
        let desired = content
            .checksum(scope)
            .with_context(|| format!("failed to render content of {}", self.file))?;
        Ok(current != desired)
    }
}

impl ResourceState for FileState<'_> {
    fn found(&self) -> bool {
        self.metadata.is_some() || self.file.absent
    }

    fn needs_update(&self, scope: &Scope<'_>) -> Result<bool> {
        let Some(metadata) = &self.metadata else {
            return Ok(false);
        };
        if self.file.absent || metadata.is_dir() != self.file.directory {
            return Ok(true);
        }
        if self.mode_differs(metadata) {
            return Ok(true);
        }
        if metadata.is_file() && !self.file.keep_existing_content {
            return self.content_differs(scope);
        }
        Ok(false)
    }
}
