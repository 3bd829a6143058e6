//! Resource trait for declarative state management
//!
//! A Resource declares the desired state of one managed entity. The
//! reconciler inspects it, then creates or updates it as needed.

use crate::scope::Scope;
use anyhow::Result;
use std::fmt;
use std::sync::Arc;

/// Core trait for declarative resources
///
/// Implementations declare desired state; the reconciler drives them through
/// `inspect`, then at most one of `create` or `update` per run.
///
/// # Example
///
/// ```ignore
/// use declarative::{Resource, ResourceState, Scope};
///
/// #[derive(Debug)]
/// struct Marker { path: std::path::PathBuf }
///
/// struct MarkerState { exists: bool }
///
/// impl ResourceState for MarkerState {
///     fn found(&self) -> bool { self.exists }
///     fn needs_update(&self, _scope: &Scope<'_>) -> anyhow::Result<bool> { Ok(false) }
/// }
///
/// impl Resource for Marker {
///     fn inspect<'a>(&'a self, _scope: &Scope<'_>) -> anyhow::Result<Box<dyn ResourceState + 'a>> {
///         Ok(Box::new(MarkerState { exists: self.path.exists() }))
///     }
///     fn create(&self, _scope: &Scope<'_>) -> anyhow::Result<()> {
///         std::fs::write(&self.path, b"")?;
///         Ok(())
///     }
///     fn update(&self, _scope: &Scope<'_>) -> anyhow::Result<()> { Ok(()) }
/// }
/// ```
pub trait Resource: fmt::Display + fmt::Debug + Send + Sync {
    /// Inspect the current state of the resource
    ///
    /// Must not change anything. An error means the state could not be
    /// determined, which is different from the resource not existing.
    fn inspect<'a>(&'a self, scope: &Scope<'_>) -> Result<Box<dyn ResourceState + 'a>>;

    /// Bring a missing resource fully into its declared state
    ///
    /// Called only when [`ResourceState::found`] is false. On failure nothing
    /// half-initialised may be left behind.
    fn create(&self, scope: &Scope<'_>) -> Result<()>;

    /// Converge an existing resource to its declared state
    ///
    /// Called only when found and [`ResourceState::needs_update`] returned
    /// true. A resource declared absent is removed here.
    fn update(&self, scope: &Scope<'_>) -> Result<()>;
}

/// State of a resource as observed by [`Resource::inspect`]
///
/// A state borrows the declaration that produced it and is only meaningful
/// for the run it was produced in.
pub trait ResourceState {
    /// Whether the declared condition already exists
    ///
    /// For resources declared absent this is true when the entity is
    /// missing, since absence is the existing condition.
    fn found(&self) -> bool;

    /// Whether the existing entity diverges from its declaration
    fn needs_update(&self, scope: &Scope<'_>) -> Result<bool>;
}

/// Shared handle to a resource, referenced by apply results
pub type ResourceRef = Arc<dyn Resource>;

/// Ordered list of resources, applied in list order
pub type Resources = Vec<ResourceRef>;
