//! `converge facts` - show what templates would see for each fact

use crate::Context;
use crate::cli::FactsArgs;
use crate::commands::env_facter;
use crate::manifest::Manifest;
use crate::ui;
use anyhow::{Result, bail};
use declarative::Facts;

pub fn run(ctx: &Context, args: FactsArgs) -> Result<()> {
    let manifest = match &args.manifest {
        Some(path) => Manifest::load(path)?,
        None => Manifest::default(),
    };
    let facts = registry(&manifest, args.fact_prefix.as_deref());

    let mut missing = Vec::new();
    for name in &args.names {
        match facts.get(name) {
            Some(value) if ctx.quiet => println!("{value}"),
            Some(value) => ui::kv(name, &value),
            None => {
                ui::warn(&format!("Fact {name} is not set"));
                missing.push(name.as_str());
            }
        }
    }

    if !missing.is_empty() {
        bail!("Unknown facts: {}", missing.join(", "));
    }
    Ok(())
}

/// Manifest facts, shadowed by environment facts
fn registry(manifest: &Manifest, prefix: Option<&str>) -> Facts {
    let mut facts = Facts::new();
    facts.add(manifest.facter());
    facts.add(env_facter(prefix));
    facts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Format;

    #[test]
    fn test_registry_prefers_environment() {
        let manifest = Manifest::parse(
            "[facts]\nowner = \"manifest\"\nonly_manifest = \"yes\"\n",
            Format::Toml,
        )
        .unwrap();
        // SAFETY: the variable name is unique to this test
        unsafe { std::env::set_var("CONVERGE_FACTS_TEST_owner", "env") };

        let facts = registry(&manifest, Some("CONVERGE_FACTS_TEST"));
        assert_eq!(facts.get("owner").as_deref(), Some("env"));
        assert_eq!(facts.get("only_manifest").as_deref(), Some("yes"));
        assert_eq!(facts.get("nothing"), None);

        // SAFETY: as above
        unsafe { std::env::remove_var("CONVERGE_FACTS_TEST_owner") };
    }

    #[test]
    fn test_missing_fact_is_an_error() {
        let ctx = Context {
            verbose: 0,
            quiet: true,
        };
        let args = FactsArgs {
            names: vec!["CONVERGE_FACTS_TEST_surely_unset".to_string()],
            manifest: None,
            fact_prefix: Some("CONVERGE_FACTS_TEST_MISSING".to_string()),
        };
        let err = run(&ctx, args).unwrap_err();
        assert!(err.to_string().contains("CONVERGE_FACTS_TEST_surely_unset"));
    }
}
