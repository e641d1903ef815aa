//! Path resolution for buddy.
//!
//! # Environment Variables
//!
//! - `BUDDY_CONFIG_DIR` - Override config directory
//!
//! # Path Resolution Priority
//!
//! For config_dir():
//! 1. `BUDDY_CONFIG_DIR` environment variable
//! 2. `XDG_CONFIG_HOME/buddy` (if set)
//! 3. `~/.config/buddy`

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "BUDDY_CONFIG_DIR";

/// Config file name inside the config directory
pub const CONFIG_FILE: &str = "config.toml";

/// Get the buddy config directory path
pub fn config_dir() -> Result<PathBuf> {
    resolve_config_dir(
        std::env::var(ENV_CONFIG_DIR).ok(),
        std::env::var("XDG_CONFIG_HOME").ok(),
        dirs::home_dir(),
    )
}

/// Get the buddy config file path
pub fn config_file() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE))
}

fn resolve_config_dir(
    override_dir: Option<String>,
    xdg_config: Option<String>,
    home: Option<PathBuf>,
) -> Result<PathBuf> {
    // 1. Check environment variable override
    if let Some(dir) = override_dir.filter(|d| !d.is_empty()) {
        let path = expand(&dir);
        log::debug!("Using config dir from {ENV_CONFIG_DIR}: {}", path.display());
        return Ok(path);
    }

    // 2. Check XDG_CONFIG_HOME
    if let Some(xdg) = xdg_config.filter(|d| !d.is_empty()) {
        let path = PathBuf::from(xdg).join("buddy");
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    // 3. Default: ~/.config/buddy
    let home = home.context("Could not determine home directory")?;
    let path = home.join(".config").join("buddy");
    log::debug!("Using default config dir: {}", path.display());
    Ok(path)
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_wins() {
        let dir = resolve_config_dir(
            Some("/custom/config".to_string()),
            Some("/xdg".to_string()),
            Some(PathBuf::from("/home/u")),
        )
        .unwrap();
        assert_eq!(dir, PathBuf::from("/custom/config"));
    }

    #[test]
    fn test_override_with_tilde() {
        let home = dirs::home_dir().unwrap();
        let dir = resolve_config_dir(Some("~/dotfiles/buddy".to_string()), None, None).unwrap();
        assert_eq!(dir, home.join("dotfiles").join("buddy"));
    }

    #[test]
    fn test_xdg_config_home() {
        let dir = resolve_config_dir(None, Some("/xdg".to_string()), None).unwrap();
        assert_eq!(dir, PathBuf::from("/xdg/buddy"));
    }

    #[test]
    fn test_empty_values_are_ignored() {
        let dir = resolve_config_dir(
            Some(String::new()),
            Some(String::new()),
            Some(PathBuf::from("/home/u")),
        )
        .unwrap();
        assert_eq!(dir, PathBuf::from("/home/u/.config/buddy"));
    }

    #[test]
    fn test_no_home() {
        assert!(resolve_config_dir(None, None, None).is_err());
    }

    #[test]
    fn test_expand_plain_path() {
        assert_eq!(expand("/opt/buddy"), PathBuf::from("/opt/buddy"));
    }
}
