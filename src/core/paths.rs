use std::path::{Path, PathBuf};

use tracing::info;

use crate::core::config::LaunchOptions;
use crate::core::profile::GameProfile;
use crate::core::steam;

const APP_DIR_NAME: &str = "convoy";

/// Every filesystem location the launcher touches, resolved once.
///
/// Components receive this struct instead of reading environment
/// variables or user directories themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub data_dir: PathBuf,
    pub game_dir: PathBuf,
    pub prefix_dir: PathBuf,
    pub mod_dir: PathBuf,
    pub vendor_layer_dir: PathBuf,
    pub container_runtime_dir: PathBuf,
    pub dlls_dir: PathBuf,
    pub presence_bridge_dir: PathBuf,
    pub injector_dir: PathBuf,
    pub state_dir: PathBuf,
    pub steam_dir: Option<PathBuf>,
}

impl ResolvedPaths {
    /// Resolves paths from options, falling back to the per-user data dir.
    pub fn resolve(options: &LaunchOptions) -> Self {
        let data_dir = options
            .data_dir
            .clone()
            .unwrap_or_else(default_data_dir);
        let steam_dir = options.steam_dir.clone().or_else(steam::detect_steam_dir);
        let mut paths = Self::under(&data_dir, options, steam_dir);
        if options.game_dir.is_none() {
            paths.game_dir = pick_game_dir(paths.game_dir, paths.steam_dir.as_deref(), options.game);
        }
        paths
    }

    /// Resolves paths rooted at `data_dir` without consulting the user's
    /// home directory.
    pub fn under(data_dir: &Path, options: &LaunchOptions, steam_dir: Option<PathBuf>) -> Self {
        let game = options.game;
        let prefix_dir = options
            .prefix_dir
            .clone()
            .unwrap_or_else(|| default_prefix_dir(data_dir, game, options.account.as_deref()));

        Self {
            data_dir: data_dir.to_path_buf(),
            game_dir: options
                .game_dir
                .clone()
                .unwrap_or_else(|| data_dir.join(game.default_game_subpath())),
            prefix_dir,
            mod_dir: options
                .mod_dir
                .clone()
                .unwrap_or_else(|| data_dir.join("mod")),
            vendor_layer_dir: data_dir.join("translation-layer"),
            container_runtime_dir: options
                .container_runtime_dir
                .clone()
                .unwrap_or_else(|| data_dir.join("container-runtime")),
            dlls_dir: data_dir.join("dlls"),
            presence_bridge_dir: data_dir.join("presence-bridge"),
            injector_dir: data_dir.join("injector"),
            state_dir: data_dir.join("state"),
            steam_dir,
        }
    }

    pub fn game_executable(&self, game: GameProfile) -> PathBuf {
        self.game_dir.join(game.executable_inner())
    }

    pub fn injector_executable(&self) -> PathBuf {
        self.injector_dir.join("inject.exe")
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

/// One prefix per account, so several local logins never share state.
fn default_prefix_dir(data_dir: &Path, game: GameProfile, account: Option<&str>) -> PathBuf {
    let base = data_dir.join(game.default_prefix_subpath());
    match account {
        Some(account) => {
            let name = base
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "prefix".to_string());
            base.with_file_name(format!("{name}-{account}"))
        }
        None => base,
    }
}

/// A launcher-managed install wins, then a Steam library install.
fn pick_game_dir(managed: PathBuf, steam_dir: Option<&Path>, game: GameProfile) -> PathBuf {
    if managed.join(game.executable_inner()).is_file() {
        return managed;
    }
    match steam_dir.and_then(|dir| steam::find_game_dir(dir, game)) {
        Some(found) => {
            info!("Using game installed in Steam library {:?}", found);
            found
        }
        None => managed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::steam::tests::install_library;

    #[test]
    fn defaults_are_rooted_in_data_dir() {
        let options = LaunchOptions::for_game(GameProfile::Ats);
        let paths = ResolvedPaths::under(Path::new("/data"), &options, None);

        assert_eq!(
            paths.game_dir,
            PathBuf::from("/data/American Truck Simulator/data")
        );
        assert_eq!(
            paths.prefix_dir,
            PathBuf::from("/data/American Truck Simulator/prefix")
        );
        assert_eq!(
            paths.game_executable(GameProfile::Ats),
            PathBuf::from("/data/American Truck Simulator/data/bin/win_x64/amtrucks.exe")
        );
    }

    #[test]
    fn account_selects_its_own_prefix_unless_prefix_is_explicit() {
        let mut options = LaunchOptions::for_game(GameProfile::Ets2);
        options.account = Some("driver42".into());
        let paths = ResolvedPaths::under(Path::new("/data"), &options, None);
        assert_eq!(
            paths.prefix_dir,
            PathBuf::from("/data/Euro Truck Simulator 2/prefix-driver42")
        );

        options.prefix_dir = Some(PathBuf::from("/custom/pfx"));
        let paths = ResolvedPaths::under(Path::new("/data"), &options, None);
        assert_eq!(paths.prefix_dir, PathBuf::from("/custom/pfx"));
    }

    #[test]
    fn steam_library_install_is_used_only_without_a_managed_one() {
        let dir = tempfile::tempdir().unwrap();
        let steam_dir = dir.path().join("Steam");
        let library_game =
            install_library(&steam_dir, &dir.path().join("SteamLibrary"), GameProfile::Ets2);
        let managed = dir.path().join("managed");

        assert_eq!(
            pick_game_dir(managed.clone(), Some(&steam_dir), GameProfile::Ets2),
            managed
        );

        let exe = library_game.join(GameProfile::Ets2.executable_inner());
        std::fs::create_dir_all(exe.parent().unwrap()).unwrap();
        std::fs::write(&exe, b"MZ").unwrap();
        assert_eq!(
            pick_game_dir(managed.clone(), Some(&steam_dir), GameProfile::Ets2),
            library_game
        );

        let managed_exe = managed.join(GameProfile::Ets2.executable_inner());
        std::fs::create_dir_all(managed_exe.parent().unwrap()).unwrap();
        std::fs::write(&managed_exe, b"MZ").unwrap();
        assert_eq!(
            pick_game_dir(managed.clone(), Some(&steam_dir), GameProfile::Ets2),
            managed
        );
    }
}
