pub mod apply;
pub mod facts;

use declarative::EnvFacter;

/// Facter over environment variables named `<prefix>_<fact>`
fn env_facter(prefix: Option<&str>) -> EnvFacter {
    match prefix {
        Some(prefix) => EnvFacter::with_prefix(prefix),
        None => EnvFacter::new(),
    }
}
