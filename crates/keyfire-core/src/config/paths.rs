// Keyfire Config Paths
// Locating the shortcut file under the XDG config directory

use std::env;
use std::path::{Path, PathBuf};

use super::ConfigError;

/// File name looked up in the config directory
pub const CONFIG_FILE_NAME: &str = "keyfire.conf";

/// Expand a leading `~` to the home directory
pub fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).as_ref())
}

/// Default config file: `$XDG_CONFIG_HOME/keyfire.conf`.
///
/// When `XDG_CONFIG_HOME` holds a colon-separated list, the first entry that
/// is an existing directory wins. Falls back to the platform config dir.
pub fn default_config_path() -> Option<PathBuf> {
    let xdg = env::var("XDG_CONFIG_HOME").ok();
    config_dir_from(xdg.as_deref(), dirs::config_dir()).map(|dir| dir.join(CONFIG_FILE_NAME))
}

/// Config file to load: the explicit one if given, else the default.
pub fn resolve_config_path(explicit: Option<&str>) -> Result<PathBuf, ConfigError> {
    match explicit {
        Some(raw) => Ok(expand_path(raw)),
        None => default_config_path()
            .ok_or_else(|| ConfigError::NotFound(PathBuf::from(CONFIG_FILE_NAME))),
    }
}

fn config_dir_from(xdg: Option<&str>, fallback: Option<PathBuf>) -> Option<PathBuf> {
    let xdg = match xdg.map(str::trim) {
        Some(value) if !value.is_empty() => value,
        _ => return fallback,
    };

    if !xdg.contains(':') {
        return Some(expand_path(xdg));
    }

    xdg.split(':')
        .filter(|entry| !entry.is_empty())
        .map(expand_path)
        .find(|dir| Path::is_dir(dir))
        .or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_uses_fallback() {
        let fallback = Some(PathBuf::from("/home/u/.config"));
        assert_eq!(config_dir_from(None, fallback.clone()), fallback);
        assert_eq!(config_dir_from(Some("  "), fallback.clone()), fallback);
    }

    #[test]
    fn test_single_dir_is_used_as_is() {
        assert_eq!(
            config_dir_from(Some("/etc/xdg"), None),
            Some(PathBuf::from("/etc/xdg"))
        );
    }

    #[test]
    fn test_list_picks_first_existing_dir() {
        let tmp = env::temp_dir();
        let list = format!("/nonexistent/a:{}:/", tmp.display());
        assert_eq!(config_dir_from(Some(&list), None), Some(tmp));
    }

    #[test]
    fn test_list_without_existing_dir_falls_back() {
        let fallback = Some(PathBuf::from("/fallback"));
        assert_eq!(
            config_dir_from(Some("/nonexistent/a:/nonexistent/b"), fallback.clone()),
            fallback
        );
    }

    #[test]
    fn test_tilde_expansion() {
        let expanded = expand_path("~/keyfire.conf");
        assert!(!expanded.starts_with("~"));
        assert!(expanded.ends_with("keyfire.conf"));
        assert_eq!(expand_path("/abs/path"), PathBuf::from("/abs/path"));
    }

    #[test]
    fn test_explicit_path_wins() {
        assert_eq!(
            resolve_config_path(Some("/tmp/custom.toml")).unwrap(),
            PathBuf::from("/tmp/custom.toml")
        );
    }
}
