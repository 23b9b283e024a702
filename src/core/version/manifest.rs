// ─── Version Document ───
// Fetching and parsing the remote mod-loader version document.

use std::path::{Component as PathComponent, Path};

use serde::Deserialize;
use tracing::info;

use crate::core::checksum::Digest;
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::http::Transport;
use crate::core::profile::GameProfile;

use super::compare::{compare_versions, game_version_matches};

/// Top-level document served by the version endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionDocument {
    pub version: String,
    pub supported_game_versions: Vec<String>,
    pub mirrors: Vec<String>,
    #[serde(default)]
    pub files: Vec<ModFile>,
    /// Service-side refusal regardless of game version.
    #[serde(default)]
    pub incompatible: bool,
}

/// A single mod-loader file listed in the document.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ModFile {
    /// Path relative to the mod directory and to each mirror root.
    pub path: String,
    pub digest: Digest,
    /// Restricts the file to one title; absent means both.
    #[serde(default)]
    pub game: Option<GameProfile>,
    #[serde(default)]
    pub size: Option<u64>,
}

impl VersionDocument {
    /// Fetch and validate the document. Any failure is reported as
    /// [`LauncherError::VersionEndpoint`].
    pub async fn fetch(transport: &dyn Transport, url: &str) -> LauncherResult<Self> {
        info!("Fetching version document from {}", url);

        let endpoint_error = |reason: String| LauncherError::VersionEndpoint {
            url: url.to_string(),
            reason,
        };

        let body = transport
            .get_document(url)
            .await
            .map_err(|e| endpoint_error(e.to_string()))?;
        let document = Self::parse(&body).map_err(endpoint_error)?;

        info!(
            "Mod version {} supports game {}; {} mirrors, {} files",
            document.version,
            document.supported_game_versions.join(", "),
            document.mirrors.len(),
            document.files.len()
        );
        Ok(document)
    }

    pub fn parse(body: &[u8]) -> Result<Self, String> {
        let mut document: VersionDocument =
            serde_json::from_slice(body).map_err(|e| format!("malformed JSON: {e}"))?;

        if document.version.trim().is_empty() {
            return Err("empty version".into());
        }
        if let Some(bad) = document.files.iter().find(|f| !is_safe_relative(&f.path)) {
            return Err(format!("file path {:?} escapes the mod directory", bad.path));
        }
        // Mirror-style "/bin/x.dll" entries are relative to the mod directory.
        for file in &mut document.files {
            file.path = file.path.trim_start_matches('/').to_string();
        }
        Ok(document)
    }

    /// Files that apply to `profile`.
    pub fn files_for(&self, profile: GameProfile) -> impl Iterator<Item = &ModFile> {
        self.files
            .iter()
            .filter(move |f| f.game.map_or(true, |g| g == profile))
    }

    pub fn supports_game(&self, detected: &str) -> bool {
        self.supported_game_versions
            .iter()
            .any(|supported| game_version_matches(supported, detected))
    }

    /// Highest game version the mod supports.
    pub fn latest_supported_game(&self) -> Option<&str> {
        self.supported_game_versions
            .iter()
            .max_by(|a, b| compare_versions(a, b))
            .map(String::as_str)
    }
}

fn is_safe_relative(raw: &str) -> bool {
    let trimmed = raw.trim_start_matches('/');
    !trimmed.is_empty()
        && Path::new(trimmed)
            .components()
            .all(|c| matches!(c, PathComponent::Normal(_)))
}
