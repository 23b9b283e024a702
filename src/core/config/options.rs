use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{ConfigError, DEFAULT_FALLBACK_MIRRORS, DEFAULT_VERSION_URL};
use crate::core::profile::GameProfile;

const DEFAULT_WORKERS: usize = 4;
const MAX_WORKERS: usize = 32;
const DEFAULT_TERMINATE_GRACE_SECS: u64 = 5;

/// Which translation-layer strategy the user asked for.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeMode {
    /// Vendor build if a compatible one is installed, else the system build.
    #[default]
    Auto,
    Vendor,
    System,
    /// Containerized base runtime beneath the translation layer.
    Container,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RenderingBackend {
    #[default]
    Auto,
    Dx11,
    #[serde(alias = "opengl")]
    #[value(alias = "opengl")]
    Gl,
}

/// One layer of options as found in the config file or on the command
/// line. Every field is optional; unknown TOML keys are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OptionLayer {
    pub game: Option<GameProfile>,
    pub runtime: Option<RuntimeMode>,
    pub runtime_path: Option<PathBuf>,
    pub container_runtime_dir: Option<PathBuf>,
    pub game_dir: Option<PathBuf>,
    pub prefix_dir: Option<PathBuf>,
    pub mod_dir: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub steam_dir: Option<PathBuf>,
    pub throttle: Option<u64>,
    pub workers: Option<usize>,
    pub version_url: Option<String>,
    pub fallback_mirrors: Option<Vec<String>>,
    pub game_version: Option<String>,
    pub account: Option<String>,
    pub login_file: Option<PathBuf>,
    pub singleplayer: Option<bool>,
    pub skip_update: Option<bool>,
    pub presence_bridge: Option<bool>,
    pub overlay: Option<bool>,
    pub native_d3dcompiler: Option<bool>,
    pub rendering_backend: Option<RenderingBackend>,
    pub wined3d: Option<bool>,
    pub fullscreen_upscaling: Option<bool>,
    pub wine_desktop: Option<String>,
    pub kill_procs: Option<bool>,
    pub game_options: Option<String>,
    pub verbose: Option<bool>,
    pub log_file: Option<PathBuf>,
    pub terminate_grace_secs: Option<u64>,
}

macro_rules! overlay_fields {
    ($base:expr, $top:expr, $($field:ident),+ $(,)?) => {
        $(
            if $top.$field.is_some() {
                $base.$field = $top.$field.clone();
            }
        )+
    };
}

impl OptionLayer {
    /// Overrides every field `other` sets.
    pub fn merge(&mut self, other: &OptionLayer) {
        overlay_fields!(
            self,
            other,
            game,
            runtime,
            runtime_path,
            container_runtime_dir,
            game_dir,
            prefix_dir,
            mod_dir,
            data_dir,
            steam_dir,
            throttle,
            workers,
            version_url,
            fallback_mirrors,
            game_version,
            account,
            login_file,
            singleplayer,
            skip_update,
            presence_bridge,
            overlay,
            native_d3dcompiler,
            rendering_backend,
            wined3d,
            fullscreen_upscaling,
            wine_desktop,
            kill_procs,
            game_options,
            verbose,
            log_file,
            terminate_grace_secs,
        );
    }
}

/// Fully validated options handed to the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchOptions {
    pub game: GameProfile,
    pub runtime_mode: RuntimeMode,
    pub runtime_path: Option<PathBuf>,
    pub container_runtime_dir: Option<PathBuf>,
    pub game_dir: Option<PathBuf>,
    pub prefix_dir: Option<PathBuf>,
    pub mod_dir: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub steam_dir: Option<PathBuf>,
    /// Bytes per second per transfer; `None` is unlimited.
    pub throttle: Option<u64>,
    pub workers: usize,
    pub version_url: String,
    pub fallback_mirrors: Vec<String>,
    pub game_version: Option<String>,
    pub account: Option<String>,
    pub login_file: Option<PathBuf>,
    pub singleplayer: bool,
    pub skip_update: bool,
    pub presence_bridge: bool,
    pub overlay: bool,
    pub native_d3dcompiler: bool,
    pub rendering_backend: RenderingBackend,
    pub wined3d: bool,
    pub fullscreen_upscaling: bool,
    /// `WIDTHxHEIGHT` of a virtual desktop to run the game in.
    pub wine_desktop: Option<String>,
    /// Stop every process left in the prefix once the session ends.
    pub kill_procs: bool,
    pub game_options: Vec<String>,
    pub verbose: bool,
    pub log_file: Option<PathBuf>,
    pub terminate_grace: Duration,
}

impl LaunchOptions {
    /// Defaults for `game`; used directly by tests and as the base layer.
    pub fn for_game(game: GameProfile) -> Self {
        Self {
            game,
            runtime_mode: RuntimeMode::Auto,
            runtime_path: None,
            container_runtime_dir: None,
            game_dir: None,
            prefix_dir: None,
            mod_dir: None,
            data_dir: None,
            steam_dir: None,
            throttle: None,
            workers: DEFAULT_WORKERS,
            version_url: DEFAULT_VERSION_URL.to_string(),
            fallback_mirrors: DEFAULT_FALLBACK_MIRRORS
                .iter()
                .map(|m| m.to_string())
                .collect(),
            game_version: None,
            account: None,
            login_file: None,
            singleplayer: false,
            skip_update: false,
            presence_bridge: true,
            overlay: true,
            native_d3dcompiler: false,
            rendering_backend: RenderingBackend::Auto,
            wined3d: false,
            fullscreen_upscaling: false,
            wine_desktop: None,
            kill_procs: false,
            game_options: Vec::new(),
            verbose: false,
            log_file: None,
            terminate_grace: Duration::from_secs(DEFAULT_TERMINATE_GRACE_SECS),
        }
    }

    /// Validates a merged layer.
    pub fn from_layer(layer: &OptionLayer) -> Result<Self, ConfigError> {
        let game = layer.game.ok_or(ConfigError::Missing("game"))?;
        let mut options = Self::for_game(game);

        if let Some(mode) = layer.runtime {
            options.runtime_mode = mode;
        }
        options.runtime_path = layer.runtime_path.clone();
        options.container_runtime_dir = layer.container_runtime_dir.clone();
        options.game_dir = layer.game_dir.clone();
        options.prefix_dir = layer.prefix_dir.clone();
        options.mod_dir = layer.mod_dir.clone();
        options.data_dir = layer.data_dir.clone();
        options.steam_dir = layer.steam_dir.clone();

        // 0 means "unlimited", like leaving it unset.
        options.throttle = layer.throttle.filter(|rate| *rate > 0);

        if let Some(workers) = layer.workers {
            if workers == 0 || workers > MAX_WORKERS {
                return Err(ConfigError::invalid(
                    "workers",
                    format!("expected 1..={MAX_WORKERS}, got {workers}"),
                ));
            }
            options.workers = workers;
        }

        if let Some(url) = &layer.version_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::invalid("version_url", "expected an http(s) URL"));
            }
            options.version_url = url.clone();
        }
        if let Some(mirrors) = &layer.fallback_mirrors {
            options.fallback_mirrors = mirrors
                .iter()
                .map(|m| m.trim_end_matches('/').to_string())
                .collect();
        }

        options.game_version = layer
            .game_version
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        options.account = layer
            .account
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string);
        if let Some(account) = &options.account {
            if account.contains(['/', '\\']) || account.starts_with('.') {
                return Err(ConfigError::invalid(
                    "account",
                    "must not contain path separators or start with '.'",
                ));
            }
        }
        options.login_file = layer.login_file.clone();

        options.singleplayer = layer.singleplayer.unwrap_or(false);
        options.skip_update = layer.skip_update.unwrap_or(false);
        options.presence_bridge = layer.presence_bridge.unwrap_or(true);
        options.overlay = layer.overlay.unwrap_or(true);
        options.native_d3dcompiler = layer.native_d3dcompiler.unwrap_or(false);
        options.rendering_backend = layer.rendering_backend.unwrap_or_default();
        options.wined3d = layer.wined3d.unwrap_or(false);
        options.fullscreen_upscaling = layer.fullscreen_upscaling.unwrap_or(false);
        if let Some(size) = layer.wine_desktop.as_deref().map(str::trim) {
            if !is_desktop_size(size) {
                return Err(ConfigError::invalid(
                    "wine_desktop",
                    format!("expected WIDTHxHEIGHT, got {size:?}"),
                ));
            }
            options.wine_desktop = Some(size.to_string());
        }
        options.kill_procs = layer.kill_procs.unwrap_or(false);
        options.game_options = layer
            .game_options
            .as_deref()
            .map(|raw| raw.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        options.verbose = layer.verbose.unwrap_or(false);
        options.log_file = layer.log_file.clone();
        if let Some(secs) = layer.terminate_grace_secs {
            options.terminate_grace = Duration::from_secs(secs);
        }

        Ok(options)
    }
}

fn is_desktop_size(raw: &str) -> bool {
    let Some((width, height)) = raw.split_once('x') else {
        return false;
    };
    [width, height]
        .iter()
        .all(|n| !n.is_empty() && n.len() <= 5 && n.bytes().all(|b| b.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_layer_overrides_file_layer() {
        let mut merged = OptionLayer {
            game: Some(GameProfile::Ets2),
            throttle: Some(1000),
            workers: Some(2),
            overlay: Some(false),
            ..Default::default()
        };
        let cli = OptionLayer {
            game: Some(GameProfile::Ats),
            throttle: Some(5000),
            ..Default::default()
        };
        merged.merge(&cli);

        let options = LaunchOptions::from_layer(&merged).unwrap();
        assert_eq!(options.game, GameProfile::Ats);
        assert_eq!(options.throttle, Some(5000));
        assert_eq!(options.workers, 2);
        assert!(!options.overlay);
        assert!(options.presence_bridge);
    }

    #[test]
    fn game_is_required() {
        let err = LaunchOptions::from_layer(&OptionLayer::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("game")));
    }

    #[test]
    fn rejects_out_of_range_workers_and_path_like_accounts() {
        let layer = OptionLayer {
            game: Some(GameProfile::Ets2),
            workers: Some(0),
            ..Default::default()
        };
        assert!(LaunchOptions::from_layer(&layer).is_err());

        let layer = OptionLayer {
            game: Some(GameProfile::Ets2),
            account: Some("../other".into()),
            ..Default::default()
        };
        assert!(LaunchOptions::from_layer(&layer).is_err());
    }

    #[test]
    fn zero_throttle_means_unlimited_and_game_options_split() {
        let layer = OptionLayer {
            game: Some(GameProfile::Ets2),
            throttle: Some(0),
            game_options: Some("-nointro  -mm_max_tmp_buffers_size 1000".into()),
            ..Default::default()
        };
        let options = LaunchOptions::from_layer(&layer).unwrap();
        assert_eq!(options.throttle, None);
        assert_eq!(
            options.game_options,
            vec!["-nointro", "-mm_max_tmp_buffers_size", "1000"]
        );
    }

    #[test]
    fn desktop_size_must_be_width_by_height() {
        let mut layer = OptionLayer {
            game: Some(GameProfile::Ats),
            wine_desktop: Some(" 1920x1080 ".into()),
            kill_procs: Some(true),
            ..Default::default()
        };
        let options = LaunchOptions::from_layer(&layer).unwrap();
        assert_eq!(options.wine_desktop.as_deref(), Some("1920x1080"));
        assert!(options.kill_procs);

        for bad in ["1920", "1920x", "x1080", "big x small", "1920x1080x2"] {
            layer.wine_desktop = Some(bad.into());
            assert!(LaunchOptions::from_layer(&layer).is_err(), "{bad} accepted");
        }
    }
}
