use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::core::config::{OptionLayer, RenderingBackend, RuntimeMode};
use crate::core::profile::GameProfile;

#[derive(Parser, Debug)]
#[command(name = "convoy")]
#[command(version, propagate_version = true)]
#[command(about = "Keeps the truck-simulator multiplayer mod up to date and launches it on Linux", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub options: GlobalArgs,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Checks versions and downloads mod-loader files; does not launch
    Update,
    /// Prepares the prefix and launches without touching the network
    Launch,
    /// Update, prepare and launch
    Start,
    /// Prints recorded versions and prefix state
    Status,
}

/// Flags shared by every subcommand. Unset flags leave the config file
/// value in place.
#[derive(Args, Debug, Default)]
pub struct GlobalArgs {
    /// Path to a TOML config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Which game to run (ets2 or ats)
    #[arg(short, long, global = true)]
    pub game: Option<GameProfile>,

    /// Translation-layer strategy
    #[arg(long, global = true, value_enum)]
    pub runtime: Option<RuntimeMode>,

    /// Explicit translation layer: a vendor build directory or a wine binary
    #[arg(long, global = true, value_name = "PATH")]
    pub runtime_path: Option<PathBuf>,

    #[arg(long, global = true, value_name = "DIR")]
    pub container_runtime_dir: Option<PathBuf>,

    #[arg(long, global = true, value_name = "DIR")]
    pub game_dir: Option<PathBuf>,

    #[arg(long, global = true, value_name = "DIR")]
    pub prefix_dir: Option<PathBuf>,

    #[arg(long, global = true, value_name = "DIR")]
    pub mod_dir: Option<PathBuf>,

    /// Root for every launcher-managed directory
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Steam installation, for the overlay renderer
    #[arg(long, global = true, value_name = "DIR")]
    pub steam_dir: Option<PathBuf>,

    /// Download limit per transfer in bytes per second (0 = unlimited)
    #[arg(long, global = true, value_name = "BYTES")]
    pub throttle: Option<u64>,

    /// Concurrent downloads
    #[arg(long, global = true)]
    pub workers: Option<usize>,

    #[arg(long, global = true, value_name = "URL")]
    pub version_url: Option<String>,

    /// Extra mirror root tried after the listed ones (repeatable)
    #[arg(long = "fallback-mirror", global = true, value_name = "URL")]
    pub fallback_mirrors: Vec<String>,

    /// Installed game version, used for the compatibility check
    #[arg(long, global = true, value_name = "VERSION")]
    pub game_version: Option<String>,

    /// Account name; selects a per-account prefix
    #[arg(long, global = true)]
    pub account: Option<String>,

    /// loginusers.vdf to take the account from
    #[arg(long, global = true, value_name = "PATH")]
    pub login_file: Option<PathBuf>,

    /// Run the game without the mod
    #[arg(long, global = true)]
    pub singleplayer: bool,

    /// Skip the update stage of `start`
    #[arg(long, global = true)]
    pub skip_update: bool,

    #[arg(long, global = true)]
    pub no_presence_bridge: bool,

    #[arg(long, global = true)]
    pub no_overlay: bool,

    /// Install the native d3dcompiler_47 into the prefix
    #[arg(long, global = true)]
    pub native_d3dcompiler: bool,

    #[arg(long, global = true, value_enum)]
    pub rendering_backend: Option<RenderingBackend>,

    /// Use the OpenGL-based Direct3D implementation instead of the Vulkan one
    #[arg(long, global = true)]
    pub wined3d: bool,

    #[arg(long, global = true)]
    pub fullscreen_upscaling: bool,

    /// Run the game in a virtual desktop of this size
    #[arg(long, global = true, value_name = "WIDTHxHEIGHT")]
    pub wine_desktop: Option<String>,

    /// Stop every process left in the prefix after the game ends
    #[arg(long, global = true)]
    pub kill_procs: bool,

    /// Extra game arguments, split on whitespace
    #[arg(long, global = true, value_name = "ARGS", allow_hyphen_values = true)]
    pub game_options: Option<String>,

    /// Seconds between SIGTERM and the forced kill
    #[arg(long, global = true, value_name = "SECS")]
    pub terminate_grace: Option<u64>,

    /// Debug logging for the launcher
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Write logs to a file instead of stderr
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

fn flag(set: bool) -> Option<bool> {
    set.then_some(true)
}

impl GlobalArgs {
    /// The command-line layer; only flags the user passed are set.
    pub fn to_layer(&self) -> OptionLayer {
        OptionLayer {
            game: self.game,
            runtime: self.runtime,
            runtime_path: self.runtime_path.clone(),
            container_runtime_dir: self.container_runtime_dir.clone(),
            game_dir: self.game_dir.clone(),
            prefix_dir: self.prefix_dir.clone(),
            mod_dir: self.mod_dir.clone(),
            data_dir: self.data_dir.clone(),
            steam_dir: self.steam_dir.clone(),
            throttle: self.throttle,
            workers: self.workers,
            version_url: self.version_url.clone(),
            fallback_mirrors: (!self.fallback_mirrors.is_empty())
                .then(|| self.fallback_mirrors.clone()),
            game_version: self.game_version.clone(),
            account: self.account.clone(),
            login_file: self.login_file.clone(),
            singleplayer: flag(self.singleplayer),
            skip_update: flag(self.skip_update),
            presence_bridge: self.no_presence_bridge.then_some(false),
            overlay: self.no_overlay.then_some(false),
            native_d3dcompiler: flag(self.native_d3dcompiler),
            rendering_backend: self.rendering_backend,
            wined3d: flag(self.wined3d),
            fullscreen_upscaling: flag(self.fullscreen_upscaling),
            wine_desktop: self.wine_desktop.clone(),
            kill_procs: flag(self.kill_procs),
            game_options: self.game_options.clone(),
            verbose: flag(self.verbose),
            log_file: self.log_file.clone(),
            terminate_grace_secs: self.terminate_grace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::LaunchOptions;

    #[test]
    fn flags_after_the_subcommand_are_accepted() {
        let cli = Cli::try_parse_from([
            "convoy",
            "start",
            "--game",
            "ats",
            "--runtime",
            "system",
            "--no-overlay",
            "--rendering-backend",
            "opengl",
            "--game-options",
            "-nointro -unlimitedlog",
        ])
        .unwrap();

        assert_eq!(cli.command, Commands::Start);
        let layer = cli.options.to_layer();
        assert_eq!(layer.game, Some(GameProfile::Ats));
        assert_eq!(layer.runtime, Some(RuntimeMode::System));
        assert_eq!(layer.overlay, Some(false));
        assert_eq!(layer.presence_bridge, None);
        assert_eq!(layer.rendering_backend, Some(RenderingBackend::Gl));
        assert_eq!(layer.game_options.as_deref(), Some("-nointro -unlimitedlog"));
    }

    #[test]
    fn absent_flags_keep_file_values() {
        let mut merged = OptionLayer {
            game: Some(GameProfile::Ets2),
            singleplayer: Some(true),
            presence_bridge: Some(false),
            ..OptionLayer::default()
        };
        let cli = Cli::try_parse_from(["convoy", "--throttle", "1000", "update"]).unwrap();
        merged.merge(&cli.options.to_layer());

        let options = LaunchOptions::from_layer(&merged).unwrap();
        assert!(options.singleplayer);
        assert!(!options.presence_bridge);
        assert_eq!(options.throttle, Some(1000));
    }

    #[test]
    fn unknown_game_is_rejected() {
        assert!(Cli::try_parse_from(["convoy", "status", "--game", "fs22"]).is_err());
    }
}
