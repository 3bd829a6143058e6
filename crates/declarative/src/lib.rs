//! # Declarative
//!
//! A framework for declarative resource management.
//!
//! Resources declare the desired state of something on the machine. The
//! [`Reconciler`] inspects each one and creates or updates it only when the
//! live state diverges, so applying the same declarations twice changes
//! nothing the second time.
//!
//! ## Core Concepts
//!
//! - **Resource**: Something with state that can be managed (see [`File`])
//! - **ResourceState**: What inspecting a resource found
//! - **Provider**: Named, resource-specific configuration such as [`FileProvider`]
//! - **Facter**: Read-only source of facts used when rendering content
//! - **Migrator**: One-time, versioned steps run before the resources
//!
//! ## Example
//!
//! ```no_run
//! use declarative::{Content, File, FileProvider, Manager, ResourceRef};
//! use std::sync::Arc;
//!
//! let mut manager = Manager::new();
//! manager.register_provider("file", FileProvider::new("/srv/site"));
//!
//! let index: ResourceRef = Arc::new(
//!     File::new("/index.html")
//!         .create_parent()
//!         .with_content(Content::literal("<h1>hello</h1>")),
//! );
//!
//! match manager.apply(&[index]) {
//!     Ok(results) => println!("{} changes", results.len()),
//!     Err(err) => eprintln!("{err}"),
//! }
//! ```
//!
//! Failures never stop a run half way: every resource is attempted and the
//! [`ApplyError`] keeps the full list of results next to the causes.

pub mod cancel;
pub mod content;
pub mod error;
pub mod facts;
pub mod file;
pub mod manager;
pub mod migration;
pub mod provider;
pub mod resource;
pub mod scope;
pub mod types;

// Re-export main types at crate root
pub use cancel::CancellationToken;
pub use content::{Content, HttpSource, SourceDir};
pub use error::{ApplyError, Error};
pub use facts::{EnvFacter, Facter, Facts, StaticFacter};
pub use file::{File, FileProvider, FileState};
pub use manager::{Manager, Reconciler};
pub use migration::{FileVersioner, Migration, Migrator, Versioner};
pub use provider::{Provider, Providers};
pub use resource::{Resource, ResourceRef, ResourceState, Resources};
pub use scope::Scope;
pub use types::{Action, ApplyResult, ApplyResults, ApplySummary};
