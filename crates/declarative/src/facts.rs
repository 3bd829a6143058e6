//! Facts about the execution environment
//!
//! Facters are read-only key/value sources consulted by content producers.
//! [`Facts`] keeps them in registration order; lookups walk it backwards so
//! the most recently added facter shadows earlier ones.

use std::collections::HashMap;

/// Default environment variable prefix for [`EnvFacter`]
pub const DEFAULT_ENV_PREFIX: &str = "FACT";

/// A source of facts
pub trait Facter: Send + Sync {
    /// Value of the fact `name`, if this facter knows it
    fn fact(&self, name: &str) -> Option<String>;
}

/// Facter backed by a fixed map
#[derive(Debug, Clone, Default)]
pub struct StaticFacter(HashMap<String, String>);

impl StaticFacter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a fact
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }
}

impl From<HashMap<String, String>> for StaticFacter {
    fn from(map: HashMap<String, String>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for StaticFacter {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl Facter for StaticFacter {
    fn fact(&self, name: &str) -> Option<String> {
        self.0.get(name).cloned()
    }
}

/// Facter reading environment variables
///
/// The fact `runtime` is read from `FACT_runtime` unless another prefix is
/// configured.
#[derive(Debug, Clone, Default)]
pub struct EnvFacter {
    prefix: Option<String>,
}

impl EnvFacter {
    /// Facter using the default `FACT` prefix
    pub fn new() -> Self {
        Self::default()
    }

    /// Facter using a custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }

    fn variable(&self, name: &str) -> String {
        let prefix = self.prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
        format!("{prefix}_{name}")
    }
}

impl Facter for EnvFacter {
    fn fact(&self, name: &str) -> Option<String> {
        std::env::var(self.variable(name)).ok()
    }
}

/// Ordered registry of facters
#[derive(Default)]
pub struct Facts {
    facters: Vec<Box<dyn Facter>>,
}

impl Facts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a facter; it takes precedence over every earlier one
    pub fn add(&mut self, facter: impl Facter + 'static) {
        self.facters.push(Box::new(facter));
    }

    /// Look a fact up, most recently registered facter first
    pub fn get(&self, name: &str) -> Option<String> {
        self.facters.iter().rev().find_map(|facter| facter.fact(name))
    }

    /// Number of registered facters
    pub fn len(&self) -> usize {
        self.facters.len()
    }

    /// Whether no facter is registered
    pub fn is_empty(&self) -> bool {
        self.facters.is_empty()
    }
}

impl std::fmt::Debug for Facts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Facts")
            .field("facters", &self.facters.len())
            .finish()
    }
}
