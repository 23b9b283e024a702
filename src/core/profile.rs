use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Supported titles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GameProfile {
    Ets2,
    Ats,
}

impl GameProfile {
    pub fn id(self) -> &'static str {
        match self {
            GameProfile::Ets2 => "ets2",
            GameProfile::Ats => "ats",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            GameProfile::Ets2 => "Euro Truck Simulator 2",
            GameProfile::Ats => "American Truck Simulator",
        }
    }

    pub fn steam_app_id(self) -> u32 {
        match self {
            GameProfile::Ets2 => 227_300,
            GameProfile::Ats => 270_880,
        }
    }

    /// Game executable relative to the game directory.
    pub fn executable_inner(self) -> &'static Path {
        match self {
            GameProfile::Ets2 => Path::new("bin/win_x64/eurotrucks2.exe"),
            GameProfile::Ats => Path::new("bin/win_x64/amtrucks.exe"),
        }
    }

    /// Default install subpath under the data directory.
    pub fn default_game_subpath(self) -> &'static Path {
        match self {
            GameProfile::Ets2 => Path::new("Euro Truck Simulator 2/data"),
            GameProfile::Ats => Path::new("American Truck Simulator/data"),
        }
    }

    /// Default prefix subpath under the data directory.
    pub fn default_prefix_subpath(self) -> &'static Path {
        match self {
            GameProfile::Ets2 => Path::new("Euro Truck Simulator 2/prefix"),
            GameProfile::Ats => Path::new("American Truck Simulator/prefix"),
        }
    }
}

impl fmt::Display for GameProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for GameProfile {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ets2" => Ok(GameProfile::Ets2),
            "ats" => Ok(GameProfile::Ats),
            other => Err(format!("unknown game {other:?} (expected ets2 or ats)")),
        }
    }
}

/// Versioned components tracked per profile.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Component {
    Game,
    ModLoader,
}

impl Component {
    pub fn id(self) -> &'static str {
        match self {
            Component::Game => "game",
            Component::ModLoader => "mod-loader",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_profiles_case_insensitively() {
        assert_eq!("ETS2".parse::<GameProfile>(), Ok(GameProfile::Ets2));
        assert_eq!(" ats ".parse::<GameProfile>(), Ok(GameProfile::Ats));
        assert!("fs22".parse::<GameProfile>().is_err());
    }

    #[test]
    fn profiles_do_not_share_default_paths() {
        assert_ne!(
            GameProfile::Ets2.default_prefix_subpath(),
            GameProfile::Ats.default_prefix_subpath()
        );
        assert_eq!(GameProfile::Ats.steam_app_id(), 270_880);
    }
}
