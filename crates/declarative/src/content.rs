//! Content producers for file resources
//!
//! A [`Content`] streams the desired bytes of a file into whatever sink it is
//! given: a temporary file during a write, or a hasher while comparing. It
//! never assumes where its output goes.

use crate::cancel::CancellationToken;
use crate::error::Error;
use crate::scope::Scope;
use anyhow::Result;
use handlebars::{Handlebars, HelperDef, HelperResult, Output, RenderContext, RenderErrorReason};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Chunk size used when copying from readers
const COPY_CHUNK: usize = 64 * 1024;

type Producer = dyn Fn(&Scope<'_>, &mut dyn Write) -> Result<()> + Send + Sync;

/// Desired content of a file
#[derive(Clone)]
pub struct Content(Arc<Producer>);

impl Content {
    /// Content produced by an arbitrary function
    pub fn new<F>(produce: F) -> Self
    where
        F: Fn(&Scope<'_>, &mut dyn Write) -> Result<()> + Send + Sync + 'static,
    {
        Self(Arc::new(produce))
    }

    /// Fixed text
    pub fn literal(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(move |_, sink| {
            sink.write_all(text.as_bytes())?;
            Ok(())
        })
    }

    /// Fixed bytes
    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        Self::new(move |_, sink| {
            sink.write_all(&bytes)?;
            Ok(())
        })
    }

    /// Stream the content into `sink`
    pub fn render(&self, scope: &Scope<'_>, sink: &mut dyn Write) -> Result<()> {
        (*self.0)(scope, sink)
    }

    /// BLAKE3 hex digest of the content, without touching disk
    pub fn checksum(&self, scope: &Scope<'_>) -> Result<String> {
        let mut hasher = blake3::Hasher::new();
        self.render(scope, &mut hasher)?;
        Ok(hasher.finalize().to_hex().to_string())
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Content(..)")
    }
}

/// Copy `reader` into `writer`, checking `cancel` between chunks
pub fn copy_with_cancel(
    reader: &mut dyn Read,
    writer: &mut dyn Write,
    cancel: &CancellationToken,
) -> Result<u64> {
    let mut buf = vec![0u8; COPY_CHUNK];
    let mut total = 0u64;
    loop {
        cancel.check()?;
        let read = match reader.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        writer.write_all(&buf[..read])?;
        total += read as u64;
    }
}

// ============================================================================
// Source directory
// ============================================================================

type Helper = dyn Fn() -> String + Send + Sync;

/// Directory of source files and templates
///
/// Templates are rendered with handlebars in strict mode. `{{fact "name"}}`
/// inserts a fact and `{{name}}` calls a helper registered with
/// [`SourceDir::with_helper`]. Anything else, including unknown names and
/// malformed expressions, fails the render.
#[derive(Clone)]
pub struct SourceDir {
    root: PathBuf,
    helpers: HashMap<String, Arc<Helper>>,
}

impl SourceDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            helpers: HashMap::new(),
        }
    }

    /// Register a zero-argument template helper
    pub fn with_helper<F>(mut self, name: impl Into<String>, helper: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.helpers.insert(name.into(), Arc::new(helper));
        self
    }

    /// Root directory of this source
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Content of a file inside the source directory, copied verbatim
    pub fn file(&self, path: impl AsRef<Path>) -> crate::error::Result<Content> {
        let full = self.contained(path.as_ref())?;
        Ok(Content::new(move |scope, sink| {
            let mut source = fs::File::open(&full).map_err(|e| Error::io(&full, e))?;
            copy_with_cancel(&mut source, sink, scope.token())?;
            Ok(())
        }))
    }

    /// Content of a template inside the source directory, rendered with facts
    pub fn template(&self, path: impl Into<String>) -> crate::error::Result<Content> {
        let path = path.into();
        let full = self.contained(Path::new(&path))?;
        let helpers = self.helpers.clone();
        Ok(Content::new(move |scope, sink| {
            let source = fs::read_to_string(&full).map_err(|e| Error::io(&full, e))?;
            let rendered = render_template(&path, &source, &helpers, scope)?;
            sink.write_all(rendered.as_bytes())?;
            Ok(())
        }))
    }

    /// `path` joined onto the root, refusing anything that could leave it
    fn contained(&self, path: &Path) -> crate::error::Result<PathBuf> {
        let escapes = path.as_os_str().is_empty()
            || path.components().any(|component| {
                matches!(
                    component,
                    Component::RootDir | Component::Prefix(_) | Component::ParentDir
                )
            });
        if escapes {
            return Err(Error::InvalidSourcePath {
                root: self.root.clone(),
                path: path.to_path_buf(),
            });
        }
        Ok(self.root.join(path))
    }
}

impl fmt::Debug for SourceDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut helpers: Vec<_> = self.helpers.keys().collect();
        helpers.sort();
        f.debug_struct("SourceDir")
            .field("root", &self.root)
            .field("helpers", &helpers)
            .finish()
    }
}

/// `{{fact "name"}}`, backed by the facts of the current scope
struct FactHelper<'s, 'a> {
    scope: &'s Scope<'a>,
    missing: &'s Mutex<Option<String>>,
}

impl HelperDef for FactHelper<'_, '_> {
    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &handlebars::Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc handlebars::Context,
        _: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        if h.params().len() != 1 {
            let reason = RenderErrorReason::Other("fact takes exactly one name".to_string());
            return Err(reason.into());
        }
        let name = h
            .param(0)
            .and_then(|param| param.value().as_str())
            .ok_or_else(|| {
                RenderErrorReason::Other("fact name must be a quoted string".to_string())
            })?;

        match self.scope.fact(name) {
            Some(value) => {
                out.write(&value)?;
                Ok(())
            }
            None => {
                if let Ok(mut missing) = self.missing.lock() {
                    missing.get_or_insert_with(|| name.to_string());
                }
                Err(RenderErrorReason::Other(format!("fact {name:?} not found")).into())
            }
        }
    }
}

/// A helper registered through [`SourceDir::with_helper`]
struct UserHelper(Arc<Helper>);

impl HelperDef for UserHelper {
    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &handlebars::Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc handlebars::Context,
        _: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        if !h.params().is_empty() || !h.hash().is_empty() {
            let reason = RenderErrorReason::Other(format!("{} takes no arguments", h.name()));
            return Err(reason.into());
        }
        out.write(&(*self.0)())?;
        Ok(())
    }
}

/// Render `source` with the fact helper and every registered helper
fn render_template(
    path: &str,
    source: &str,
    helpers: &HashMap<String, Arc<Helper>>,
    scope: &Scope<'_>,
) -> Result<String, Error> {
    let missing = Mutex::new(None);
    let mut registry = Handlebars::new();
    registry.set_strict_mode(true);
    registry.register_escape_fn(handlebars::no_escape);
    for (name, helper) in helpers {
        registry.register_helper(name, Box::new(UserHelper(Arc::clone(helper))));
    }
    registry.register_helper(
        "fact",
        Box::new(FactHelper {
            scope,
            missing: &missing,
        }),
    );

    let rendered = registry.render_template(source, &());
    drop(registry);
    rendered.map_err(|err| match missing.into_inner().ok().flatten() {
        Some(name) => Error::FactNotFound(name),
        None => Error::Template {
            path: path.to_string(),
            message: err.to_string(),
        },
    })
}

// ============================================================================
// HTTP
// ============================================================================

/// Content fetched over HTTP
#[derive(Clone)]
pub struct HttpSource {
    agent: ureq::Agent,
}

impl HttpSource {
    /// Source using an agent with default settings
    pub fn new() -> Self {
        Self {
            agent: ureq::Agent::new_with_defaults(),
        }
    }

    /// Source using a preconfigured agent
    pub fn with_agent(agent: ureq::Agent) -> Self {
        Self { agent }
    }

    /// Body of a GET request to `url`
    pub fn get(&self, url: impl Into<String>) -> Content {
        let agent = self.agent.clone();
        let url = url.into();
        Content::new(move |scope, sink| {
            scope.check_cancelled()?;
            let mut response = agent
                .get(&url)
                .header("User-Agent", concat!("declarative/", env!("CARGO_PKG_VERSION")))
                .call()
                .map_err(|e| Error::Http {
                    url: url.clone(),
                    message: e.to_string(),
                })?;
            let mut body = response.body_mut().as_reader();
            copy_with_cancel(&mut body, sink, scope.token())?;
            Ok(())
        })
    }
}

impl Default for HttpSource {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HttpSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpSource").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::is_cancellation;
    use crate::facts::{Facts, StaticFacter};
    use crate::provider::Providers;
    use std::io::BufRead;
    use std::net::TcpListener;
    use std::thread;
    use tempfile::TempDir;

    fn render(content: &Content, facts: &Facts) -> Result<String> {
        let providers = Providers::new();
        let token = CancellationToken::new();
        let scope = Scope::new(&providers, facts, &token);
        let mut out = Vec::new();
        content.render(&scope, &mut out)?;
        Ok(String::from_utf8(out)?)
    }

    #[test]
    fn test_literal_checksum() {
        let providers = Providers::new();
        let facts = Facts::new();
        let token = CancellationToken::new();
        let scope = Scope::new(&providers, &facts, &token);

        let content = Content::literal("somecontent");
        assert_eq!(
            content.checksum(&scope).unwrap(),
            crate::file::checksum_bytes(b"somecontent")
        );
    }

    #[test]
    fn test_source_file() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("sample-file.txt"), "This is a source file.\n").unwrap();

        let source = SourceDir::new(tmp.path());
        let rendered = render(&source.file("sample-file.txt").unwrap(), &Facts::new()).unwrap();
        assert_eq!(rendered, "This is a source file.\n");
    }

    #[test]
    fn test_source_template() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("sample-file.txt.tmpl"),
            "{{ sayHello }} This is a template with a fact: {{ fact \"sample\" }}\n",
        )
        .unwrap();

        let mut facts = Facts::new();
        facts.add(StaticFacter::new().with("sample", "samplefact"));
        let source = SourceDir::new(tmp.path()).with_helper("sayHello", || "Hello!".to_string());

        let rendered = render(&source.template("sample-file.txt.tmpl").unwrap(), &facts).unwrap();
        assert_eq!(rendered, "Hello! This is a template with a fact: samplefact\n");
    }

    #[test]
    fn test_template_missing_fact() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("t.tmpl"), "value: {{ fact \"nope\" }}").unwrap();

        let template = SourceDir::new(tmp.path()).template("t.tmpl").unwrap();
        let err = render(&template, &Facts::new()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::FactNotFound(name)) if name == "nope"
        ));
    }

    #[test]
    fn test_template_unknown_helper() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("t.tmpl"), "{{ shout }}").unwrap();

        let template = SourceDir::new(tmp.path()).template("t.tmpl").unwrap();
        let err = render(&template, &Facts::new()).unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Template { .. })));
        assert!(err.to_string().contains("shout"));
    }

    #[test]
    fn test_template_rejects_malformed_expressions() {
        let tmp = TempDir::new().unwrap();
        let mut facts = Facts::new();
        facts.add(StaticFacter::new().with("sample", "v"));
        let source = SourceDir::new(tmp.path()).with_helper("sayHello", || "Hello!".to_string());

        for (name, body) in [
            ("unquoted.tmpl", "a={{ fact sample }}"),
            ("pipe.tmpl", "c={{fact \"sample\" | printf }}"),
            ("no-name.tmpl", "{{ fact }}"),
            ("helper-args.tmpl", "{{ sayHello \"you\" }}"),
            ("unclosed.tmpl", "{{ fact \"sample\""),
            ("variable.tmpl", "{{ Name }}"),
        ] {
            fs::write(tmp.path().join(name), body).unwrap();
            let result = render(&source.template(name).unwrap(), &facts);
            assert!(result.is_err(), "{name} rendered as {result:?}");
        }
    }

    #[test]
    fn test_template_output_is_not_escaped() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("t.tmpl"), "<{{fact \"tag\"}}>").unwrap();
        let mut facts = Facts::new();
        facts.add(StaticFacter::new().with("tag", "a & b"));

        let template = SourceDir::new(tmp.path()).template("t.tmpl").unwrap();
        assert_eq!(render(&template, &facts).unwrap(), "<a & b>");
    }

    #[test]
    fn test_source_paths_stay_inside_root() {
        let root = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let secret = other.path().join("secret");
        fs::write(&secret, "outside-root").unwrap();
        let source = SourceDir::new(root.path());

        let climbing = Path::new("..")
            .join(other.path().file_name().unwrap())
            .join("secret");
        for path in [secret.clone(), climbing, PathBuf::from("nested/../../secret")] {
            assert!(matches!(
                source.file(&path),
                Err(Error::InvalidSourcePath { .. })
            ));
            assert!(matches!(
                source.template(path.to_string_lossy().into_owned()),
                Err(Error::InvalidSourcePath { .. })
            ));
        }

        fs::create_dir(root.path().join("nested")).unwrap();
        fs::write(root.path().join("nested/inside"), "ok").unwrap();
        let inside = source.file("nested/inside").unwrap();
        assert_eq!(render(&inside, &Facts::new()).unwrap(), "ok");
    }

    #[test]
    fn test_copy_observes_cancellation() {
        let token = CancellationToken::new();
        token.cancel();
        let mut reader: &[u8] = b"data";
        let mut out = Vec::new();

        let err = copy_with_cancel(&mut reader, &mut out, &token).unwrap_err();
        assert!(is_cancellation(&err));
        assert!(out.is_empty());
    }

    #[test]
    fn test_http_source() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let body = "Some content from the Internet!";
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = io::BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            while reader.read_line(&mut line).unwrap() > 0 {
                if line == "\r\n" {
                    break;
                }
                line.clear();
            }
            write!(
                stream,
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            )
            .unwrap();
        });

        let agent: ureq::Agent = ureq::Agent::config_builder().proxy(None).build().into();
        let content = HttpSource::with_agent(agent).get(format!("http://{addr}/file"));
        let rendered = render(&content, &Facts::new()).unwrap();
        server.join().unwrap();

        assert_eq!(rendered, body);
    }
}
