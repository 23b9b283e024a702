use std::path::{Path, PathBuf};

use tracing::debug;

use super::{ConfigError, OptionLayer, CONFIG_DIR_NAME, CONFIG_FILE_NAME};

/// `$XDG_CONFIG_HOME/convoy/convoy.toml`, when a config dir is known.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Loads the file layer.
///
/// An explicit path must exist. The default path is optional and a
/// missing file yields an empty layer.
pub fn load_layer(explicit: Option<&Path>) -> Result<OptionLayer, ConfigError> {
    let (path, required) = match explicit {
        Some(path) => (path.to_path_buf(), true),
        None => match default_config_path() {
            Some(path) => (path, false),
            None => return Ok(OptionLayer::default()),
        },
    };

    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(source) if !required && source.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(OptionLayer::default());
        }
        Err(source) => return Err(ConfigError::read_file(&path, source)),
    };

    let layer = parse_layer(&raw).map_err(|source| ConfigError::parse_toml(&path, source))?;
    debug!(path = %path.display(), "Loaded config file");
    Ok(layer)
}

fn parse_layer(raw: &str) -> Result<OptionLayer, toml::de::Error> {
    toml::from_str(raw)
}
