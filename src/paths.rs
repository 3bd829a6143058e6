//! Path resolution for converge
//!
//! # Environment Variables
//!
//! - `CONVERGE_STATE_DIR` - Override the directory holding the migration cursor
//!
//! # Path Resolution Priority
//!
//! For state_dir():
//! 1. `CONVERGE_STATE_DIR` environment variable
//! 2. Platform state directory (`XDG_STATE_HOME` on Linux)
//! 3. `~/.local/state/converge`

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "CONVERGE_STATE_DIR";

/// File name of the migration cursor inside the state directory
pub const STATE_FILE: &str = "versions.toml";

/// Get the converge state directory path
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    if let Some(state) = dirs::state_dir() {
        let path = state.join("converge");
        log::debug!("Using platform state dir: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".local").join("state").join("converge");
    log::debug!("Using default state dir: {}", path.display());
    Ok(path)
}

/// Default location of the migration cursor file
pub fn default_state_file() -> Result<PathBuf> {
    Ok(state_dir()?.join(STATE_FILE))
}

/// Expand ~ and environment variables in a path string.
///
/// Unknown variables leave the string untouched rather than failing.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}
