//! Execution scope passed to resource operations
//!
//! A scope borrows the registries of the reconciler running the apply and
//! carries the cancellation token for the run.

use crate::cancel::CancellationToken;
use crate::error::Error;
use crate::facts::Facts;
use crate::provider::{Provider, Providers};

/// What a resource can see while it is inspected, created or updated
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    providers: &'a Providers,
    facts: &'a Facts,
    cancel: &'a CancellationToken,
}

impl<'a> Scope<'a> {
    pub fn new(providers: &'a Providers, facts: &'a Facts, cancel: &'a CancellationToken) -> Self {
        Self {
            providers,
            facts,
            cancel,
        }
    }

    /// Provider registered under `name`, if it exists and is a `P`
    pub fn provider<P: Provider>(&self, name: &str) -> Option<&'a P> {
        self.providers.get(name)
    }

    /// Value of a fact, most recently registered facter first
    pub fn fact(&self, name: &str) -> Option<String> {
        self.facts.get(name)
    }

    /// Cancellation token of the current run
    pub fn token(&self) -> &'a CancellationToken {
        self.cancel
    }

    /// Whether the current run has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Return `Error::Cancelled` if the current run has been cancelled
    pub fn check_cancelled(&self) -> Result<(), Error> {
        self.cancel.check()
    }
}
