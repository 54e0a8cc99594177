// Keyfire Config Parser
// Line-based shortcut files and the TOML variant via serde

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::key::key_from_name;
use crate::shortcut::{Shortcut, ShortcutError};
use crate::Key;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    #[error("{at}: invalid line '{text}'")]
    InvalidLine { at: String, text: String },

    #[error("{at}: invalid key '{name}'")]
    InvalidKey { at: String, name: String },

    #[error("{at}: missing keys")]
    MissingKeys { at: String },

    #[error("{at}: missing command")]
    MissingCommand { at: String },

    #[error("timeout must be at least one second, got {0}")]
    TimeoutOutOfRange(u64),

    #[error("{} does not exist", .0.display())]
    NotFound(PathBuf),
}

/// Loaded shortcut configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Shortcuts in file order
    pub shortcuts: Vec<Shortcut>,
    /// Wait timeout override from the file
    pub timeout: Option<Duration>,
    /// File the configuration came from
    pub source: Option<PathBuf>,
}

impl Config {
    /// Load a config file.
    ///
    /// Files ending in `.toml` are parsed strictly as TOML. Anything else
    /// is the line format, where broken lines are logged and skipped.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path)?;

        let is_toml = path.extension().is_some_and(|ext| ext == "toml");
        let mut config = if is_toml {
            Self::from_toml(&content)?
        } else {
            Self::from_lines(&content)
        };
        config.source = Some(path.to_path_buf());

        log::debug!(
            "Loaded {} shortcut(s) from {}",
            config.shortcuts.len(),
            path.display()
        );
        Ok(config)
    }

    /// Parse the line format, skipping lines that do not parse
    pub fn from_lines(content: &str) -> Self {
        let (shortcuts, errors) = parse_lines(content);
        for error in &errors {
            log::warn!("{}", error);
        }
        Self {
            shortcuts,
            ..Self::default()
        }
    }

    /// Parse the TOML format
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let toml_config: ConfigToml =
            toml::from_str(content).map_err(|e| ConfigError::TomlParse(e.to_string()))?;
        toml_config.to_config()
    }
}

/// Parse a whole line-format file.
///
/// Returns the shortcuts that parsed and one error per rejected line.
pub fn parse_lines(content: &str) -> (Vec<Shortcut>, Vec<ConfigError>) {
    let mut shortcuts = Vec::new();
    let mut errors = Vec::new();
    for (index, line) in content.lines().enumerate() {
        match parse_line(line, index + 1) {
            Ok(Some(shortcut)) => shortcuts.push(shortcut),
            Ok(None) => {}
            Err(e) => errors.push(e),
        }
    }
    (shortcuts, errors)
}

/// Parse one `KEY KEY ...: command` line.
///
/// Blank lines and `#` comments yield `Ok(None)`. The command is everything
/// after the first colon.
pub fn parse_line(line: &str, number: usize) -> Result<Option<Shortcut>, ConfigError> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let at = format!("line {}", number);
    let Some((keys, command)) = trimmed.split_once(':') else {
        return Err(ConfigError::InvalidLine {
            at,
            text: trimmed.to_string(),
        });
    };

    build_shortcut(keys, command.trim(), at).map(Some)
}

/// Parse whitespace-separated key names
pub fn parse_key_list(keys: &str) -> Result<Vec<Key>, String> {
    keys.split_whitespace()
        .map(|name| key_from_name(name).ok_or_else(|| name.to_string()))
        .collect()
}

fn build_shortcut(keys: &str, command: &str, at: String) -> Result<Shortcut, ConfigError> {
    if command.is_empty() {
        return Err(ConfigError::MissingCommand { at });
    }
    let keys = parse_key_list(keys).map_err(|name| ConfigError::InvalidKey {
        at: at.clone(),
        name,
    })?;

    Shortcut::new(keys, command).map_err(|e| match e {
        ShortcutError::NoKeys => ConfigError::MissingKeys { at },
        ShortcutError::EmptyCommand(_) => ConfigError::MissingCommand { at },
    })
}

/// Root TOML table
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigToml {
    #[serde(default)]
    daemon: Option<DaemonToml>,

    #[serde(default, rename = "shortcut")]
    shortcuts: Vec<ShortcutToml>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct DaemonToml {
    /// Idle seconds before the key state is cleared
    timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ShortcutToml {
    keys: KeysToml,
    command: String,
}

/// Keys as a list of names or one space-separated string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum KeysToml {
    List(Vec<String>),
    Text(String),
}

impl KeysToml {
    fn joined(&self) -> String {
        match self {
            KeysToml::List(names) => names.join(" "),
            KeysToml::Text(text) => text.clone(),
        }
    }
}

impl ConfigToml {
    fn to_config(&self) -> Result<Config, ConfigError> {
        let timeout = match self.daemon.as_ref().and_then(|d| d.timeout_secs) {
            Some(0) => return Err(ConfigError::TimeoutOutOfRange(0)),
            Some(secs) => Some(Duration::from_secs(secs)),
            None => None,
        };

        let shortcuts = self
            .shortcuts
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let at = format!("shortcut {}", index + 1);
                build_shortcut(&entry.keys.joined(), entry.command.trim(), at)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Config {
            shortcuts,
            timeout,
            source: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line() {
        let shortcut = parse_line("LEFTCTRL LEFTALT T: launch-terminal", 1)
            .unwrap()
            .unwrap();
        assert_eq!(shortcut.keys(), &[Key::T, Key::LEFTCTRL, Key::LEFTALT]);
        assert_eq!(shortcut.command(), "launch-terminal");
    }

    #[test]
    fn test_parse_line_media_keys() {
        let shortcut = parse_line("MIC_MUTE: pactl set-source-mute @DEFAULT_SOURCE@ toggle", 1)
            .unwrap()
            .unwrap();
        assert_eq!(shortcut.keys(), &[Key::from(190)]);

        let shortcut = parse_line("TOUCHPAD_TOGGLE: toggle-touchpad", 2)
            .unwrap()
            .unwrap();
        assert_eq!(shortcut.keys(), &[Key::from(530)]);
    }

    #[test]
    fn test_parse_line_keeps_colons_in_command() {
        let shortcut = parse_line("  leftmeta  e : xdg-open http://example.com ", 4)
            .unwrap()
            .unwrap();
        assert_eq!(shortcut.command(), "xdg-open http://example.com");
    }

    #[test]
    fn test_comments_and_blank_lines() {
        assert!(parse_line("", 1).unwrap().is_none());
        assert!(parse_line("   ", 2).unwrap().is_none());
        assert!(parse_line("# LEFTCTRL T: nope", 3).unwrap().is_none());
    }

    #[test]
    fn test_invalid_lines() {
        assert!(matches!(
            parse_line("LEFTCTRL T", 1),
            Err(ConfigError::InvalidLine { .. })
        ));
        assert!(matches!(
            parse_line("LEFTCTRL T:   ", 2),
            Err(ConfigError::MissingCommand { .. })
        ));
        assert!(matches!(
            parse_line(" : echo hi", 3),
            Err(ConfigError::MissingKeys { .. })
        ));
        match parse_line("LEFTCTRL NOPE: echo", 7) {
            Err(ConfigError::InvalidKey { at, name }) => {
                assert_eq!(at, "line 7");
                assert_eq!(name, "NOPE");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_lines_skips_bad_lines() {
        let content = "\
# shortcuts
LEFTCTRL LEFTALT T: launch-terminal
broken line
LEFTMETA NOPE: never
LEFTMETA L: lock-screen
";
        let (shortcuts, errors) = parse_lines(content);
        let commands: Vec<&str> = shortcuts.iter().map(Shortcut::command).collect();
        assert_eq!(commands, vec!["launch-terminal", "lock-screen"]);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].to_string(), "line 3: invalid line 'broken line'");
    }

    #[test]
    fn test_parse_key_list() {
        assert_eq!(
            parse_key_list("ctrl KEY_T").unwrap(),
            vec![Key::LEFTCTRL, Key::T]
        );
        assert_eq!(parse_key_list("ESC BOGUS").unwrap_err(), "BOGUS");
    }

    #[test]
    fn test_from_toml() {
        let config = Config::from_toml(
            r#"
[daemon]
timeout_secs = 5

[[shortcut]]
keys = ["LEFTCTRL", "LEFTALT", "T"]
command = "launch-terminal"

[[shortcut]]
keys = "LEFTMETA L"
command = "lock-screen"
"#,
        )
        .unwrap();
        assert_eq!(config.timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.shortcuts.len(), 2);
        assert_eq!(config.shortcuts[1].keys(), &[Key::from(38), Key::LEFTMETA]);
    }

    #[test]
    fn test_from_toml_rejects_bad_entries() {
        let err = Config::from_toml(
            r#"
[[shortcut]]
keys = ["LEFTCTRL", "WAT"]
command = "x"
"#,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "shortcut 1: invalid key 'WAT'");

        assert!(matches!(
            Config::from_toml("[daemon]\ntimeout_secs = 0\n"),
            Err(ConfigError::TimeoutOutOfRange(0))
        ));
        assert!(matches!(
            Config::from_toml("[unknown]\n"),
            Err(ConfigError::TomlParse(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Path::new("/nonexistent/keyfire.conf")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_load_line_file() {
        let path = std::env::temp_dir().join(format!("keyfire-load-{}.conf", std::process::id()));
        fs::write(&path, "LEFTCTRL T: echo hi\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.shortcuts.len(), 1);
        assert_eq!(config.source.as_deref(), Some(path.as_path()));
        assert_eq!(config.timeout, None);
        fs::remove_file(&path).unwrap();
    }
}
