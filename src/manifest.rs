//! Manifest file describing what `converge` manages
//!
//! A manifest is TOML or JSON, picked by file extension:
//!
//! ```toml
//! source_dir = "files"
//!
//! [facts]
//! env = "prod"
//!
//! [providers.file]
//! prefix = "~/site"
//!
//! [[files]]
//! path = "/index.html"
//! template = "index.html.tmpl"
//! create_parent = true
//!
//! [[migrations]]
//! version = 1
//!
//! [[migrations.files]]
//! path = "/old.html"
//! absent = true
//! ```

use crate::paths;
use anyhow::{Context, Result};
use declarative::{
    Content, File, FileProvider, HttpSource, Migrator, ResourceRef, Resources, SourceDir,
    StaticFacter, Versioner,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Problems with a manifest that parsed but cannot be used
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("unsupported manifest format: {0} (expected .toml or .json)")]
    UnsupportedFormat(PathBuf),

    #[error("{path}: only one of content, source, template or url may be set")]
    ConflictingContent { path: String },

    #[error("{path}: {kind} requires source_dir to be set")]
    MissingSourceDir { path: String, kind: &'static str },

    #[error("{path}: {source}")]
    InvalidSource {
        path: String,
        #[source]
        source: declarative::Error,
    },

    #[error("{path}: invalid mode {mode:?}, expected octal like \"0644\"")]
    InvalidMode { path: String, mode: String },

    #[error("migration {version} must come after migration {previous}")]
    MigrationOrder { version: u64, previous: u64 },
}

/// Manifest serialization format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Toml,
    Json,
}

impl Format {
    /// Detect the format from a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// Directory holding `source` files and templates
    #[serde(default)]
    pub source_dir: Option<String>,

    #[serde(default)]
    pub facts: BTreeMap<String, String>,

    #[serde(default)]
    pub providers: BTreeMap<String, ProviderSpec>,

    #[serde(default)]
    pub files: Vec<FileSpec>,

    #[serde(default)]
    pub migrations: Vec<MigrationSpec>,

    /// Directory relative paths are resolved against
    #[serde(skip)]
    base_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderSpec {
    pub prefix: String,
}

/// One `[[files]]` entry
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileSpec {
    pub path: String,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub absent: bool,
    /// Octal permission bits, e.g. "0644"
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub directory: bool,
    #[serde(default)]
    pub create_parent: bool,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub keep_existing_content: bool,
    /// Expected BLAKE3 digest of the content
    #[serde(default)]
    pub checksum: Option<String>,

    // Content sources, at most one
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationSpec {
    pub version: u64,
    #[serde(default)]
    pub files: Vec<FileSpec>,
}

/// Where file contents come from while building resources
struct Sources {
    dir: Option<SourceDir>,
    http: HttpSource,
}

impl Manifest {
    /// Load a manifest, choosing the parser by extension
    pub fn load(path: &Path) -> Result<Self> {
        let format = Format::from_path(path)
            .ok_or_else(|| ManifestError::UnsupportedFormat(path.to_path_buf()))?;
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
        let mut manifest = Self::parse(&text, format)
            .with_context(|| format!("Failed to parse manifest: {}", path.display()))?;
        manifest.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        log::debug!(
            "Loaded manifest {} ({} files, {} migrations)",
            path.display(),
            manifest.files.len(),
            manifest.migrations.len()
        );
        Ok(manifest)
    }

    /// Parse manifest text; relative paths resolve against the working directory
    pub fn parse(text: &str, format: Format) -> Result<Self> {
        let manifest = match format {
            Format::Toml => toml::from_str(text)?,
            Format::Json => serde_json::from_str(text)?,
        };
        Ok(manifest)
    }

    /// Static facts declared in the manifest
    pub fn facter(&self) -> StaticFacter {
        self.facts
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// File providers declared in the manifest, prefixes expanded
    pub fn providers(&self) -> impl Iterator<Item = (&str, FileProvider)> + '_ {
        self.providers.iter().map(|(name, spec)| {
            let prefix = self.resolve(&spec.prefix);
            (name.as_str(), FileProvider::new(prefix))
        })
    }

    /// Resources for the top-level `[[files]]` entries
    pub fn resources(&self) -> Result<Resources> {
        let sources = self.sources();
        build_files(&self.files, &sources)
    }

    /// Migrator over the `[[migrations]]` entries, if there are any
    pub fn migrator(&self, versioner: impl Versioner + 'static) -> Result<Option<Migrator>> {
        if self.migrations.is_empty() {
            return Ok(None);
        }

        let sources = self.sources();
        let mut migrator = Migrator::new(versioner);
        let mut previous = None;
        for spec in &self.migrations {
            if let Some(previous) = previous
                && spec.version <= previous
            {
                return Err(ManifestError::MigrationOrder {
                    version: spec.version,
                    previous,
                }
                .into());
            }
            previous = Some(spec.version);

            let resources = build_files(&spec.files, &sources)
                .with_context(|| format!("Invalid migration {}", spec.version))?;
            migrator.add_migration(spec.version, move |reconciler, cancel| {
                reconciler.apply_with(cancel, &resources)
            });
        }
        Ok(Some(migrator))
    }

    fn sources(&self) -> Sources {
        Sources {
            dir: self
                .source_dir
                .as_deref()
                .map(|dir| SourceDir::new(self.resolve(dir))),
            http: HttpSource::new(),
        }
    }

    /// Expand `~` and variables, then anchor relative paths at the manifest
    fn resolve(&self, path: &str) -> PathBuf {
        let expanded = paths::expand(path);
        if expanded.is_relative() {
            self.base_dir.join(expanded)
        } else {
            expanded
        }
    }
}

fn build_files(specs: &[FileSpec], sources: &Sources) -> Result<Resources> {
    specs
        .iter()
        .map(|spec| {
            let file = spec.to_file(sources)?;
            Ok(Arc::new(file) as ResourceRef)
        })
        .collect()
}

impl FileSpec {
    fn to_file(&self, sources: &Sources) -> Result<File, ManifestError> {
        let mut file = File::new(paths::expand(&self.path));
        if let Some(provider) = &self.provider {
            file = file.provider(provider);
        }
        if let Some(mode) = &self.mode {
            file = file.mode(parse_mode(mode).ok_or_else(|| ManifestError::InvalidMode {
                path: self.path.clone(),
                mode: mode.clone(),
            })?);
        }
        if let Some(checksum) = &self.checksum {
            file = file.checksum(checksum);
        }
        if let Some(content) = self.content(sources)? {
            file = file.with_content(content);
        }
        if self.absent {
            file = file.absent();
        }
        if self.directory {
            file = file.directory();
        }
        if self.create_parent {
            file = file.create_parent();
        }
        if self.force {
            file = file.force();
        }
        if self.keep_existing_content {
            file = file.keep_existing_content();
        }
        Ok(file)
    }

    fn content(&self, sources: &Sources) -> Result<Option<Content>, ManifestError> {
        let declared = [
            self.content.is_some(),
            self.source.is_some(),
            self.template.is_some(),
            self.url.is_some(),
        ];
        if declared.iter().filter(|set| **set).count() > 1 {
            return Err(ManifestError::ConflictingContent {
                path: self.path.clone(),
            });
        }

        let source_dir = |kind| {
            sources
                .dir
                .as_ref()
                .ok_or_else(|| ManifestError::MissingSourceDir {
                    path: self.path.clone(),
                    kind,
                })
        };

        let invalid = |source| ManifestError::InvalidSource {
            path: self.path.clone(),
            source,
        };

        let content = if let Some(text) = &self.content {
            Some(Content::literal(text.clone()))
        } else if let Some(source) = &self.source {
            Some(source_dir("source")?.file(source).map_err(invalid)?)
        } else if let Some(template) = &self.template {
            Some(
                source_dir("template")?
                    .template(template.clone())
                    .map_err(invalid)?,
            )
        } else {
            self.url.as_ref().map(|url| sources.http.get(url.clone()))
        };
        Ok(content)
    }
}

/// Parse octal permission bits, with or without a `0o` prefix
fn parse_mode(mode: &str) -> Option<u32> {
    let digits = mode.trim();
    let digits = digits.strip_prefix("0o").unwrap_or(digits);
    u32::from_str_radix(digits, 8).ok().filter(|bits| *bits <= 0o7777)
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::{Action, FileVersioner, Reconciler};
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
source_dir = "files"

[facts]
greeting = "hello"

[providers.file]
prefix = "root"

[[files]]
path = "/etc/app.conf"
template = "app.conf.tmpl"
create_parent = true
mode = "0600"

[[files]]
path = "/var/cache"
directory = true
create_parent = true

[[migrations]]
version = 1

[[migrations.files]]
path = "/etc/legacy.conf"
absent = true
"#;

    fn write_sample(tmp: &TempDir) -> PathBuf {
        let files = tmp.path().join("files");
        fs::create_dir(&files).unwrap();
        fs::write(files.join("app.conf.tmpl"), "greeting={{ fact \"greeting\" }}\n").unwrap();
        let path = tmp.path().join("converge.toml");
        fs::write(&path, SAMPLE).unwrap();
        path
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(Format::from_path(Path::new("a.toml")), Some(Format::Toml));
        assert_eq!(Format::from_path(Path::new("a.json")), Some(Format::Json));
        assert_eq!(Format::from_path(Path::new("a.yaml")), None);
    }

    #[test]
    fn test_unsupported_extension_is_rejected() {
        let err = Manifest::load(Path::new("converge.yaml")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ManifestError>(),
            Some(ManifestError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_parse_json() {
        let manifest = Manifest::parse(
            r#"{"files": [{"path": "/a.txt", "content": "a"}], "facts": {"k": "v"}}"#,
            Format::Json,
        )
        .unwrap();
        assert_eq!(manifest.files.len(), 1);
        assert_eq!(manifest.files[0].content.as_deref(), Some("a"));
        assert_eq!(manifest.facts["k"], "v");
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        assert!(Manifest::parse("[[files]]\npath = \"/a\"\nowner = \"root\"\n", Format::Toml).is_err());
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode("0644"), Some(0o644));
        assert_eq!(parse_mode("0o755"), Some(0o755));
        assert_eq!(parse_mode("600"), Some(0o600));
        assert_eq!(parse_mode("0999"), None);
        assert_eq!(parse_mode("77777"), None);
    }

    #[test]
    fn test_conflicting_content_sources() {
        let manifest = Manifest::parse(
            "[[files]]\npath = \"/a\"\ncontent = \"x\"\nurl = \"http://example.com\"\n",
            Format::Toml,
        )
        .unwrap();
        let err = manifest.resources().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ManifestError>(),
            Some(ManifestError::ConflictingContent { .. })
        ));
    }

    #[test]
    fn test_source_outside_source_dir_is_rejected() {
        let manifest = Manifest::parse(
            "source_dir = \"files\"\n[[files]]\npath = \"/a\"\nsource = \"../secret\"\n",
            Format::Toml,
        )
        .unwrap();
        let err = manifest.resources().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ManifestError>(),
            Some(ManifestError::InvalidSource { .. })
        ));
    }

    #[test]
    fn test_template_requires_source_dir() {
        let manifest =
            Manifest::parse("[[files]]\npath = \"/a\"\ntemplate = \"a.tmpl\"\n", Format::Toml)
                .unwrap();
        let err = manifest.resources().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ManifestError>(),
            Some(ManifestError::MissingSourceDir { kind: "template", .. })
        ));
    }

    #[test]
    fn test_migrations_must_increase() {
        let tmp = TempDir::new().unwrap();
        let manifest = Manifest::parse(
            "[[migrations]]\nversion = 2\n[[migrations]]\nversion = 2\n",
            Format::Toml,
        )
        .unwrap();
        let versioner = FileVersioner::open(tmp.path().join("versions.toml")).unwrap();

        let err = manifest.migrator(versioner).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ManifestError>(),
            Some(ManifestError::MigrationOrder {
                version: 2,
                previous: 2
            })
        ));
    }

    #[test]
    fn test_loaded_manifest_applies() {
        let tmp = TempDir::new().unwrap();
        let manifest = Manifest::load(&write_sample(&tmp)).unwrap();

        let mut reconciler = Reconciler::new();
        for (name, provider) in manifest.providers() {
            reconciler.register_provider(name, provider);
        }
        reconciler.add_facter(manifest.facter());

        let resources = manifest.resources().unwrap();
        assert_eq!(resources[0].to_string(), "[File:file:/etc/app.conf]");

        let results = reconciler.apply(&resources).unwrap();
        let actions: Vec<Action> = results.iter().map(|r| r.action()).collect();
        assert_eq!(actions, vec![Action::Create, Action::Create]);

        let root = tmp.path().join("root");
        assert_eq!(
            fs::read_to_string(root.join("etc/app.conf")).unwrap(),
            "greeting=hello\n"
        );
        assert!(root.join("var/cache").is_dir());

        assert!(reconciler.apply(&resources).unwrap().is_empty());
    }

    #[test]
    fn test_migrator_built_from_manifest() {
        let tmp = TempDir::new().unwrap();
        let manifest = Manifest::load(&write_sample(&tmp)).unwrap();
        let versioner = FileVersioner::open(tmp.path().join("versions.toml")).unwrap();

        let migrator = manifest.migrator(versioner).unwrap().unwrap();
        assert_eq!(migrator.pending(), vec![1]);
    }
}
