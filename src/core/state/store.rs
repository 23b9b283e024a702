use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::core::error::{LauncherError, LauncherResult};
use crate::core::profile::{Component, GameProfile};

/// Last known state of one (profile, component) pair.
///
/// Unknown fields are ignored on read so newer launchers can add to it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionRecord {
    pub profile: GameProfile,
    pub component: Component,
    #[serde(default)]
    pub local_version: Option<String>,
    /// Remote version seen when the record was last written.
    #[serde(default)]
    pub remote_version: Option<String>,
    #[serde(default)]
    pub verified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrefixState {
    pub root: PathBuf,
    #[serde(default)]
    pub initialized: bool,
    #[serde(default)]
    pub layout_version: u32,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Owns the on-disk version records and prefix markers.
///
/// Layout under `state_dir`:
/// - `versions/<profile>-<component>.json`
/// - `prefixes/<hash of prefix root>.json`
#[derive(Debug, Clone)]
pub struct StateStore {
    state_dir: PathBuf,
}

impl StateStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    fn version_path(&self, profile: GameProfile, component: Component) -> PathBuf {
        self.state_dir
            .join("versions")
            .join(format!("{}-{}.json", profile.id(), component.id()))
    }

    fn prefix_path(&self, root: &Path) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(root.to_string_lossy().as_bytes());
        let key = hex::encode(hasher.finalize());
        self.state_dir
            .join("prefixes")
            .join(format!("{}.json", &key[..16]))
    }

    pub async fn version_record(
        &self,
        profile: GameProfile,
        component: Component,
    ) -> LauncherResult<Option<VersionRecord>> {
        read_json(&self.version_path(profile, component)).await
    }

    /// Persists a newly verified local version for a component.
    pub async fn record_version(
        &self,
        profile: GameProfile,
        component: Component,
        local_version: &str,
        remote_version: Option<&str>,
    ) -> LauncherResult<VersionRecord> {
        let record = VersionRecord {
            profile,
            component,
            local_version: Some(local_version.to_string()),
            remote_version: remote_version.map(str::to_string),
            verified_at: Some(Utc::now()),
        };
        write_json_atomic(&self.version_path(profile, component), &record).await?;
        debug!(
            profile = %profile,
            component = %component,
            version = local_version,
            "Recorded local version"
        );
        Ok(record)
    }

    pub async fn records(&self, profile: GameProfile) -> LauncherResult<Vec<VersionRecord>> {
        let mut out = Vec::new();
        for component in [Component::Game, Component::ModLoader] {
            if let Some(record) = self.version_record(profile, component).await? {
                out.push(record);
            }
        }
        Ok(out)
    }

    pub async fn prefix_state(&self, root: &Path) -> LauncherResult<Option<PrefixState>> {
        read_json(&self.prefix_path(root)).await
    }

    pub async fn is_prefix_initialized(&self, root: &Path) -> LauncherResult<bool> {
        Ok(self
            .prefix_state(root)
            .await?
            .is_some_and(|state| state.initialized))
    }

    pub async fn set_prefix_initialized(
        &self,
        root: &Path,
        initialized: bool,
        layout_version: u32,
    ) -> LauncherResult<()> {
        let state = PrefixState {
            root: root.to_path_buf(),
            initialized,
            layout_version,
            updated_at: Some(Utc::now()),
        };
        write_json_atomic(&self.prefix_path(root), &state).await
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> LauncherResult<Option<T>> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(LauncherError::io(path, source)),
    };

    match serde_json::from_str(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            // A corrupt record is treated as absent; the next write replaces it.
            warn!("Corrupt state file at {:?}: {}", path, e);
            Ok(None)
        }
    }
}

async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> LauncherResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| LauncherError::io(parent, source))?;
    }

    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json)
        .await
        .map_err(|source| LauncherError::io(&tmp, source))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|source| LauncherError::io(path, source))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn version_records_round_trip_per_component() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());

        assert!(store
            .version_record(GameProfile::Ets2, Component::ModLoader)
            .await
            .unwrap()
            .is_none());

        store
            .record_version(GameProfile::Ets2, Component::ModLoader, "5.2", Some("5.2"))
            .await
            .unwrap();

        let record = store
            .version_record(GameProfile::Ets2, Component::ModLoader)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.local_version.as_deref(), Some("5.2"));
        assert!(record.verified_at.is_some());

        // Other pairs are independent.
        assert!(store
            .version_record(GameProfile::Ats, Component::ModLoader)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn records_tolerate_unknown_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let path = store.version_path(GameProfile::Ats, Component::Game);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            r#"{"profile":"ats","component":"game","local_version":"1.49","future":{"x":1}}"#,
        )
        .unwrap();

        let record = store
            .version_record(GameProfile::Ats, Component::Game)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.local_version.as_deref(), Some("1.49"));
        assert_eq!(record.verified_at, None);
    }

    #[tokio::test]
    async fn corrupt_record_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let path = store.version_path(GameProfile::Ets2, Component::Game);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{not json").unwrap();

        assert!(store
            .version_record(GameProfile::Ets2, Component::Game)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn prefix_marker_toggles() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let root = Path::new("/games/prefix");

        assert!(!store.is_prefix_initialized(root).await.unwrap());
        store.set_prefix_initialized(root, false, 1).await.unwrap();
        assert!(!store.is_prefix_initialized(root).await.unwrap());
        store.set_prefix_initialized(root, true, 1).await.unwrap();
        assert!(store.is_prefix_initialized(root).await.unwrap());
    }
}
