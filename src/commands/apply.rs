//! `converge apply` - run pending migrations, then converge every declared file

use crate::Context;
use crate::cli::ApplyArgs;
use crate::commands::env_facter;
use crate::manifest::Manifest;
use crate::{paths, ui};
use anyhow::{Context as AnyhowContext, Result};
use declarative::{ApplyResults, FileVersioner, Manager};
use std::path::Path;

pub fn run(ctx: &Context, args: ApplyArgs) -> Result<()> {
    let manifest = Manifest::load(&args.manifest)?;
    let state_file = match args.state_file {
        Some(path) => path,
        None => paths::default_state_file()?,
    };
    let mut manager = build_manager(&manifest, &state_file, args.fact_prefix.as_deref())?;
    let resources = manifest.resources()?;

    if !ctx.quiet {
        ui::header("Applying Manifest");
        ui::kv("Manifest", &args.manifest.display().to_string());
        if ctx.verbose > 0 {
            ui::kv("State", &state_file.display().to_string());
        }
        if let Some(migrator) = manager.migrator() {
            let pending = migrator.pending();
            if !pending.is_empty() {
                ui::info(&format!("{} pending migrations", pending.len()));
            }
        }
        println!();
    }

    match manager.apply(&resources) {
        Ok(results) => {
            report(ctx, &results);
            Ok(())
        }
        Err(err) => {
            report(ctx, err.results());
            for cause in err.causes().skip(err.results().errors().count()) {
                ui::error(&format!("{cause:#}"));
            }
            Err(anyhow::Error::new(err).context("Apply failed"))
        }
    }
}

/// Wire providers, facts and migrations from a manifest into a manager
///
/// Environment facts are added last so they shadow the manifest's own.
pub fn build_manager(
    manifest: &Manifest,
    state_file: &Path,
    fact_prefix: Option<&str>,
) -> Result<Manager> {
    let mut manager = Manager::new();
    for (name, provider) in manifest.providers() {
        manager.register_provider(name, provider);
    }
    manager.add_facter(manifest.facter());
    manager.add_facter(env_facter(fact_prefix));

    if !manifest.migrations.is_empty() {
        let versioner = FileVersioner::open(state_file).with_context(|| {
            format!("Failed to load migration state: {}", state_file.display())
        })?;
        if let Some(migrator) = manifest.migrator(versioner)? {
            manager = manager.with_migrator(migrator);
        }
    }
    Ok(manager)
}

fn report(ctx: &Context, results: &ApplyResults) {
    for result in results {
        if ctx.quiet && result.is_success() {
            continue;
        }
        ui::result(result);
    }

    if ctx.quiet {
        return;
    }
    let summary = results.summary();
    if summary.total_changes() == 0 && summary.is_success() {
        ui::success("Everything is up to date");
    } else {
        ui::dim(&ui::summary_line(&summary));
    }
}
