//! Launcher options.
//!
//! # Layers
//!
//! 1. Defaults (compile-time)
//! 2. Config file (`$XDG_CONFIG_HOME/convoy/convoy.toml` or `--config`)
//! 3. Command line
//!
//! Each layer overrides the previous. The merged result is validated into
//! [`LaunchOptions`], the only options structure the orchestrator reads.

mod error;
mod loader;
mod options;

pub use error::ConfigError;
pub use loader::{default_config_path, load_layer};
pub use options::{LaunchOptions, OptionLayer, RenderingBackend, RuntimeMode};

/// Default remote version endpoint.
pub const DEFAULT_VERSION_URL: &str = "https://api.convoy-mp.net/v2/version";

/// Mirrors tried after the ones the version document lists.
pub const DEFAULT_FALLBACK_MIRRORS: &[&str] = &[
    "https://download.convoy-mp.net",
    "https://failover.convoy-mp.net",
];

pub const CONFIG_DIR_NAME: &str = "convoy";
pub const CONFIG_FILE_NAME: &str = "convoy.toml";
