//! Provider registry
//!
//! Providers are resource-type-specific configuration objects looked up by
//! name. The registry stores them type-erased and hands them back through a
//! checked downcast, so the engine never needs to know concrete provider
//! types.

use std::any::Any;
use std::collections::HashMap;

/// Marker trait for provider configuration objects
pub trait Provider: Any + Send + Sync {}

/// Name to provider store
#[derive(Default)]
pub struct Providers {
    providers: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl Providers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider, replacing any previous one with the same name
    pub fn register<P: Provider>(&mut self, name: impl Into<String>, provider: P) {
        let name = name.into();
        if self.providers.insert(name.clone(), Box::new(provider)).is_some() {
            log::debug!("Replaced provider {name}");
        }
    }

    /// Provider registered under `name`, if it exists and is a `P`
    pub fn get<P: Provider>(&self, name: &str) -> Option<&P> {
        self.providers.get(name)?.downcast_ref::<P>()
    }

    /// Whether anything is registered under `name`
    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }
}

impl std::fmt::Debug for Providers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.providers.keys().collect();
        names.sort();
        f.debug_struct("Providers").field("names", &names).finish()
    }
}
