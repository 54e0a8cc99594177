// Keyfire Config
// Shortcut files in the line format or TOML, and where to find them

mod parser;
mod paths;

pub use parser::{parse_key_list, parse_line, parse_lines, Config, ConfigError};
pub use paths::{default_config_path, expand_path, resolve_config_path, CONFIG_FILE_NAME};
