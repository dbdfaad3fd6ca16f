//! Default filesystem locations for the CLI binding.
//!
//! All default paths live under `~/.xstreamd/`:
//! - `~/.xstreamd/config.toml` — default configuration file
//! - `~/.xstreamd/sessions/` — default session/cookie persistence directory

use std::path::PathBuf;

/// Returns the xstreamd home directory (`~/.xstreamd/`), falling back to
/// the current directory if the platform has no resolvable home.
#[must_use]
pub fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".xstreamd")
}

/// Returns the default config file path (`~/.xstreamd/config.toml`).
#[must_use]
pub fn default_config() -> PathBuf {
    home_dir().join("config.toml")
}

/// Returns the default session/cookie persistence directory
/// (`~/.xstreamd/sessions/`).
#[must_use]
pub fn default_session_dir() -> PathBuf {
    home_dir().join("sessions")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_under_xstreamd_home() {
        let home = home_dir();
        assert!(home.to_string_lossy().contains(".xstreamd"));
        assert!(default_config().starts_with(&home));
        assert!(default_session_dir().starts_with(&home));
    }
}
