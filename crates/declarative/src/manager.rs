//! Reconciliation engine - applies resources in declaration order
//!
//! [`Reconciler`] owns the provider and fact registries and runs the
//! inspect/create/update loop. [`Manager`] wraps a reconciler together with
//! an optional [`Migrator`]; only the manager runs migrations, and migration
//! bodies are handed the bare reconciler so they cannot trigger migrations
//! themselves.

use crate::cancel::CancellationToken;
use crate::error::ApplyError;
use crate::facts::{Facter, Facts};
use crate::migration::Migrator;
use crate::provider::{Provider, Providers};
use crate::resource::ResourceRef;
use crate::scope::Scope;
use crate::types::{Action, ApplyResult, ApplyResults};
use std::sync::Arc;

/// Applies resources against registered providers and facts
#[derive(Debug, Default)]
pub struct Reconciler {
    providers: Providers,
    facts: Facts,
}

impl Reconciler {
    /// Create a reconciler with empty registries
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider; an existing one with the same name is replaced
    pub fn register_provider<P: Provider>(&mut self, name: impl Into<String>, provider: P) {
        self.providers.register(name, provider);
    }

    /// Add a facter; facters added later take precedence
    pub fn add_facter(&mut self, facter: impl Facter + 'static) {
        self.facts.add(facter);
    }

    /// Provider registered under `name`, if it exists and is a `P`
    pub fn provider<P: Provider>(&self, name: &str) -> Option<&P> {
        self.providers.get(name)
    }

    /// Value of a fact, most recently added facter first
    pub fn fact(&self, name: &str) -> Option<String> {
        self.facts.get(name)
    }

    /// Build an execution scope over this reconciler's registries
    pub fn scope<'a>(&'a self, cancel: &'a CancellationToken) -> Scope<'a> {
        Scope::new(&self.providers, &self.facts, cancel)
    }

    /// Apply resources in order with a token that is never cancelled
    pub fn apply(&self, resources: &[ResourceRef]) -> Result<ApplyResults, ApplyError> {
        self.apply_with(&CancellationToken::new(), resources)
    }

    /// Apply resources in order, stopping early if `cancel` fires
    ///
    /// Every resource is inspected, then created when missing or updated
    /// when it diverges from its declaration. A failing resource does not
    /// stop the run. The error, if any, carries every result produced.
    pub fn apply_with(
        &self,
        cancel: &CancellationToken,
        resources: &[ResourceRef],
    ) -> Result<ApplyResults, ApplyError> {
        let scope = self.scope(cancel);
        let mut results = ApplyResults::new();
        let mut interrupted = Vec::new();

        for resource in resources {
            if let Err(err) = scope.check_cancelled() {
                log::warn!("Apply interrupted before {resource}");
                interrupted.push(anyhow::Error::new(err).context("apply interrupted"));
                break;
            }

            let Some(result) = apply_resource(&scope, resource) else {
                log::debug!("{resource} is up to date");
                continue;
            };

            match result.error() {
                Some(err) => log::warn!("Failed to {} {resource}: {err:#}", result.action()),
                None => log::info!("{} {resource}", result.action()),
            }
            results.push(result);
        }

        log::debug!(
            "Applied {} resources, {} changed",
            resources.len(),
            results.len()
        );
        ApplyError::check(results, interrupted)
    }
}

/// Apply a single resource
///
/// Returns `None` when the resource already matches its declaration.
fn apply_resource(scope: &Scope<'_>, resource: &ResourceRef) -> Option<ApplyResult> {
    log::debug!("Inspecting {resource}");
    let state = match resource.inspect(scope) {
        Ok(state) => state,
        Err(err) => {
            return Some(ApplyResult::unknown(
                Arc::clone(resource),
                err.context(format!("failed to inspect {resource}")),
            ));
        }
    };

    if !state.found() {
        return Some(ApplyResult::new(
            Action::Create,
            Arc::clone(resource),
            resource.create(scope),
        ));
    }

    match state.needs_update(scope) {
        Ok(true) => Some(ApplyResult::new(
            Action::Update,
            Arc::clone(resource),
            resource.update(scope),
        )),
        Ok(false) => None,
        Err(err) => Some(ApplyResult::unknown(
            Arc::clone(resource),
            err.context(format!("failed to compare {resource}")),
        )),
    }
}

/// Reconciler with migration support
///
/// This is the entry point for top-level applies: pending migrations run
/// first, through the inner [`Reconciler`], then the given resources.
#[derive(Debug, Default)]
pub struct Manager {
    reconciler: Reconciler,
    migrator: Option<Migrator>,
}

impl Manager {
    /// Create a manager with empty registries and no migrations
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a migrator whose pending steps run before every apply
    pub fn with_migrator(mut self, migrator: Migrator) -> Self {
        self.migrator = Some(migrator);
        self
    }

    /// Register a provider; an existing one with the same name is replaced
    pub fn register_provider<P: Provider>(&mut self, name: impl Into<String>, provider: P) {
        self.reconciler.register_provider(name, provider);
    }

    /// Add a facter; facters added later take precedence
    pub fn add_facter(&mut self, facter: impl Facter + 'static) {
        self.reconciler.add_facter(facter);
    }

    /// Provider registered under `name`, if it exists and is a `P`
    pub fn provider<P: Provider>(&self, name: &str) -> Option<&P> {
        self.reconciler.provider(name)
    }

    /// Value of a fact, most recently added facter first
    pub fn fact(&self, name: &str) -> Option<String> {
        self.reconciler.fact(name)
    }

    /// The bare reconciler, without migration support
    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Attached migrator, if any
    pub fn migrator(&self) -> Option<&Migrator> {
        self.migrator.as_ref()
    }

    /// Run pending migrations, then apply resources
    pub fn apply(&mut self, resources: &[ResourceRef]) -> Result<ApplyResults, ApplyError> {
        self.apply_with(&CancellationToken::new(), resources)
    }

    /// Run pending migrations, then apply resources, observing `cancel`
    ///
    /// If a migration fails the resources are not applied; the error holds
    /// the migration results produced so far.
    pub fn apply_with(
        &mut self,
        cancel: &CancellationToken,
        resources: &[ResourceRef],
    ) -> Result<ApplyResults, ApplyError> {
        let mut results = match self.migrator.as_mut() {
            Some(migrator) => match migrator.run(&self.reconciler, cancel) {
                Ok(results) => results,
                Err(err) => {
                    log::warn!("Migrator failed: {err}");
                    return Err(err);
                }
            },
            None => ApplyResults::new(),
        };

        match self.reconciler.apply_with(cancel, resources) {
            Ok(applied) => {
                results.append(applied);
                Ok(results)
            }
            Err(err) => {
                let (applied, causes) = err.into_parts();
                results.append(applied);
                ApplyError::check(results, causes)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::resource::{Resource, ResourceState};
    use anyhow::{Context, Result};
    use std::fmt;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct DummyResource {
        name: &'static str,
        absent: bool,
        needs_update: bool,
        fail_inspect: bool,
        fail_compare: bool,
        cancelled_create: bool,
        cancel_on_create: bool,
        calls: Mutex<Vec<&'static str>>,
    }

    impl fmt::Display for DummyResource {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "[Dummy:{}]", self.name)
        }
    }

    struct DummyState {
        absent: bool,
        needs_update: bool,
        fail_compare: bool,
    }

    impl ResourceState for DummyState {
        fn found(&self) -> bool {
            !self.absent
        }

        fn needs_update(&self, _scope: &Scope<'_>) -> Result<bool> {
            if self.fail_compare {
                anyhow::bail!("checksum unavailable");
            }
            Ok(self.needs_update)
        }
    }

    impl Resource for DummyResource {
        fn inspect<'a>(&'a self, _scope: &Scope<'_>) -> Result<Box<dyn ResourceState + 'a>> {
            self.calls.lock().unwrap().push("inspect");
            if self.fail_inspect {
                anyhow::bail!("permission denied");
            }
            Ok(Box::new(DummyState {
                absent: self.absent,
                needs_update: self.needs_update,
                fail_compare: self.fail_compare,
            }))
        }

        fn create(&self, scope: &Scope<'_>) -> Result<()> {
            self.calls.lock().unwrap().push("create");
            if self.cancel_on_create {
                scope.token().cancel();
            }
            if self.cancelled_create {
                return Err(Error::Cancelled).context("could not create resource");
            }
            Ok(())
        }

        fn update(&self, _scope: &Scope<'_>) -> Result<()> {
            self.calls.lock().unwrap().push("update");
            Ok(())
        }
    }

    fn dummy(name: &'static str) -> DummyResource {
        DummyResource {
            name,
            ..Default::default()
        }
    }

    #[test]
    fn test_create_update_or_nothing() {
        let missing = Arc::new(DummyResource {
            absent: true,
            ..dummy("missing")
        });
        let stale = Arc::new(DummyResource {
            needs_update: true,
            ..dummy("stale")
        });
        let current = Arc::new(dummy("current"));
        let resources: Vec<ResourceRef> = vec![missing.clone(), stale.clone(), current.clone()];

        let results = Reconciler::new().apply(&resources).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].action(), Action::Create);
        assert_eq!(results[0].resource().to_string(), "[Dummy:missing]");
        assert_eq!(results[1].action(), Action::Update);
        assert_eq!(*missing.calls.lock().unwrap(), vec!["inspect", "create"]);
        assert_eq!(*stale.calls.lock().unwrap(), vec!["inspect", "update"]);
        assert_eq!(*current.calls.lock().unwrap(), vec!["inspect"]);
    }

    #[test]
    fn test_inspect_failure_is_isolated() {
        let broken = Arc::new(DummyResource {
            fail_inspect: true,
            ..dummy("broken")
        });
        let missing = Arc::new(DummyResource {
            absent: true,
            ..dummy("missing")
        });
        let resources: Vec<ResourceRef> = vec![broken, missing];

        let err = Reconciler::new().apply(&resources).unwrap_err();

        assert_eq!(err.results().len(), 2);
        assert_eq!(err.results()[0].action(), Action::Unknown);
        assert!(!err.results()[0].is_success());
        assert_eq!(err.results()[1].action(), Action::Create);
        assert!(err.results()[1].is_success());
        assert!(!err.is_cancelled());
        assert!(err.to_string().starts_with("there was an apply error"));
    }

    #[test]
    fn test_cancelled_before_apply() {
        let token = CancellationToken::new();
        token.cancel();
        let resource = Arc::new(dummy("never"));
        let resources: Vec<ResourceRef> = vec![resource.clone()];

        let err = Reconciler::new()
            .apply_with(&token, &resources)
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(err.results().is_empty());
        assert!(resource.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_cancelled_during_create() {
        let resources: Vec<ResourceRef> = vec![Arc::new(DummyResource {
            absent: true,
            cancelled_create: true,
            ..dummy("interrupted")
        })];

        let err = Reconciler::new().apply(&resources).unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(err.results()[0].action(), Action::Create);
    }

    #[test]
    fn test_cancelled_mid_batch_keeps_earlier_results() {
        let first = Arc::new(DummyResource {
            absent: true,
            cancel_on_create: true,
            ..dummy("first")
        });
        let second = Arc::new(DummyResource {
            absent: true,
            ..dummy("second")
        });
        let resources: Vec<ResourceRef> = vec![first.clone(), second.clone()];

        let err = Reconciler::new().apply(&resources).unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(err.results().len(), 1);
        assert_eq!(err.results()[0].action(), Action::Create);
        assert!(err.results()[0].is_success());
        assert_eq!(*first.calls.lock().unwrap(), vec!["inspect", "create"]);
        assert!(second.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_compare_failure_is_isolated() {
        let unclear = Arc::new(DummyResource {
            fail_compare: true,
            ..dummy("unclear")
        });
        let stale = Arc::new(DummyResource {
            needs_update: true,
            ..dummy("stale")
        });
        let resources: Vec<ResourceRef> = vec![unclear.clone(), stale.clone()];

        let err = Reconciler::new().apply(&resources).unwrap_err();

        assert_eq!(err.results().len(), 2);
        assert_eq!(err.results()[0].action(), Action::Unknown);
        assert!(!err.results()[0].is_success());
        assert_eq!(err.results()[1].action(), Action::Update);
        assert!(err.results()[1].is_success());
        assert!(!err.is_cancelled());
        assert_eq!(*unclear.calls.lock().unwrap(), vec!["inspect"]);
        assert_eq!(*stale.calls.lock().unwrap(), vec!["inspect", "update"]);
    }

    #[test]
    fn test_result_rendering() {
        let resources: Vec<ResourceRef> = vec![
            Arc::new(DummyResource {
                absent: true,
                ..dummy("ok")
            }),
            Arc::new(DummyResource {
                fail_inspect: true,
                ..dummy("bad")
            }),
        ];

        let err = Reconciler::new().apply(&resources).unwrap_err();
        let rendered: Vec<String> = err.results().iter().map(ToString::to_string).collect();

        assert_eq!(rendered[0], "{create: [Dummy:ok]}");
        assert!(rendered[1].starts_with("{unknown: [Dummy:bad], failed: failed to inspect"));
    }

    #[test]
    fn test_manager_delegates_registries() {
        #[derive(Debug)]
        struct Prefix(&'static str);
        impl Provider for Prefix {}

        let mut manager = Manager::new();
        manager.register_provider("p", Prefix("/srv"));
        manager.add_facter(crate::facts::StaticFacter::new().with("k", "a"));
        manager.add_facter(crate::facts::StaticFacter::new().with("k", "b"));

        assert_eq!(manager.provider::<Prefix>("p").unwrap().0, "/srv");
        assert_eq!(manager.fact("k").as_deref(), Some("b"));
        assert!(manager.apply(&[]).unwrap().is_empty());
    }
}
