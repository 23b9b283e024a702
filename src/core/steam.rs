// ─── Steam Install Discovery ───
// Finds the local Steam client, its login file and the library a game
// is installed in.

use std::path::{Path, PathBuf};

use steamlocate::SteamDir;
use tracing::debug;

use crate::core::profile::GameProfile;

const LOGIN_FILE_INNER: &str = "config/loginusers.vdf";

pub fn detect_steam_dir() -> Option<PathBuf> {
    match SteamDir::locate() {
        Ok(steam) => Some(steam.path().to_path_buf()),
        Err(err) => {
            debug!("No Steam client found: {}", err);
            None
        }
    }
}

/// Places a `loginusers.vdf` may live, `steam_dir` first.
pub fn login_file_candidates(steam_dir: Option<&Path>) -> Vec<PathBuf> {
    let mut candidates: Vec<PathBuf> = steam_dir
        .map(|dir| dir.join(LOGIN_FILE_INNER))
        .into_iter()
        .collect();
    if let Some(data) = dirs::data_dir() {
        candidates.push(data.join("Steam").join(LOGIN_FILE_INNER));
    }
    if let Some(home) = dirs::home_dir() {
        for root in [".steam", ".steam/steam", ".steam/debian-installation"] {
            candidates.push(home.join(root).join(LOGIN_FILE_INNER));
        }
    }
    let mut seen = Vec::new();
    candidates.retain(|path| {
        let fresh = !seen.contains(path);
        seen.push(path.clone());
        fresh
    });
    candidates
}

pub fn find_login_file(steam_dir: Option<&Path>) -> Option<PathBuf> {
    let found = login_file_candidates(steam_dir)
        .into_iter()
        .find(|path| path.is_file());
    if let Some(path) = &found {
        debug!("Found login file {:?}", path);
    }
    found
}

/// Library install of `game` whose executable is present.
pub fn find_game_dir(steam_dir: &Path, game: GameProfile) -> Option<PathBuf> {
    let steam = SteamDir::from_dir(steam_dir).ok()?;
    let (app, library) = match steam.find_app(game.steam_app_id()) {
        Ok(Some(found)) => found,
        Ok(None) => return None,
        Err(err) => {
            debug!("Could not read Steam libraries in {:?}: {}", steam_dir, err);
            return None;
        }
    };
    let dir = library.resolve_app_dir(&app);
    dir.join(game.executable_inner()).is_file().then_some(dir)
}

/// Quoted strings on one VDF line, in order.
pub fn quoted_tokens(line: &str) -> Vec<&str> {
    line.split('"')
        .enumerate()
        .filter(|(i, _)| i % 2 == 1)
        .map(|(_, token)| token)
        .collect()
}
