use std::ffi::OsString;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::core::error::{LauncherError, LauncherResult};
use crate::core::profile::GameProfile;

pub const PREFIX_LAYOUT_VERSION: u32 = 1;
pub const PREFIX_MARKER_FILE: &str = "convoy-prefix.json";

const WINE_PREFIX_INNER: &str = "pfx";
const SYSTEM32_INNER: &str = "pfx/drive_c/windows/system32";
const USERS_INNER: &str = "pfx/drive_c/users";
const LOCK_STALE_SECS: i64 = 24 * 60 * 60;

/// Written last during initialization; its presence with the current
/// layout version is what makes a root recognizable as ours.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrefixMarker {
    pub layout_version: u32,
    pub profile: GameProfile,
}

/// An isolated Windows-like filesystem root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prefix {
    pub root: PathBuf,
    pub profile: GameProfile,
    pub initialized: bool,
}

impl Prefix {
    pub fn new(root: impl Into<PathBuf>, profile: GameProfile) -> Self {
        Self {
            root: root.into(),
            profile,
            initialized: false,
        }
    }

    /// Value for `WINEPREFIX`.
    pub fn wine_prefix(&self) -> PathBuf {
        self.root.join(WINE_PREFIX_INNER)
    }

    pub fn system32(&self) -> PathBuf {
        self.root.join(SYSTEM32_INNER)
    }

    pub fn marker_path(&self) -> PathBuf {
        self.root.join(PREFIX_MARKER_FILE)
    }

    fn skeleton(&self) -> [PathBuf; 2] {
        [self.root.join(SYSTEM32_INNER), self.root.join(USERS_INNER)]
    }

    /// Looks at what is on disk without changing anything.
    pub async fn inspect(&self) -> LauncherResult<PrefixCondition> {
        let root_meta = match tokio::fs::metadata(&self.root).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(PrefixCondition::Missing)
            }
            Err(source) => return Err(LauncherError::io(&self.root, source)),
        };
        if !root_meta.is_dir() {
            return Err(self.incompatible("path exists and is not a directory"));
        }

        let marker_path = self.marker_path();
        let marker = match tokio::fs::read(&marker_path).await {
            Ok(raw) => Some(serde_json::from_slice::<PrefixMarker>(&raw).map_err(|e| {
                self.incompatible(format!("unreadable layout marker: {e}"))
            })?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(source) => return Err(LauncherError::io(marker_path, source)),
        };

        let Some(marker) = marker else {
            return if dir_is_empty(&self.root).await? {
                Ok(PrefixCondition::Empty)
            } else {
                Err(self.incompatible("directory is not empty and carries no layout marker"))
            };
        };

        if marker.layout_version != PREFIX_LAYOUT_VERSION {
            return Err(self.incompatible(format!(
                "layout version {} (expected {})",
                marker.layout_version, PREFIX_LAYOUT_VERSION
            )));
        }
        if marker.profile != self.profile {
            return Err(self.incompatible(format!(
                "belongs to {} not {}",
                marker.profile.display_name(),
                self.profile.display_name()
            )));
        }

        for dir in self.skeleton() {
            if !tokio::fs::metadata(&dir).await.is_ok_and(|m| m.is_dir()) {
                debug!("Prefix skeleton entry missing: {:?}", dir);
                return Ok(PrefixCondition::Incomplete);
            }
        }
        Ok(PrefixCondition::Ready)
    }

    /// Creates the skeleton, then the marker.
    pub async fn write_layout(&self) -> LauncherResult<()> {
        for dir in self.skeleton() {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|source| LauncherError::io(&dir, source))?;
        }

        let marker = PrefixMarker {
            layout_version: PREFIX_LAYOUT_VERSION,
            profile: self.profile,
        };
        let path = self.marker_path();
        let tmp = path.with_extension("json.tmp");
        let payload = serde_json::to_vec_pretty(&marker)?;
        tokio::fs::write(&tmp, payload)
            .await
            .map_err(|source| LauncherError::io(&tmp, source))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|source| LauncherError::io(&path, source))?;
        info!("Initialized prefix layout at {:?}", self.root);
        Ok(())
    }

    fn incompatible(&self, reason: impl Into<String>) -> LauncherError {
        LauncherError::IncompatiblePrefix {
            root: self.root.clone(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixCondition {
    Missing,
    Empty,
    /// Ours, but the skeleton was damaged or never finished.
    Incomplete,
    Ready,
}

async fn dir_is_empty(path: &Path) -> LauncherResult<bool> {
    let mut entries = tokio::fs::read_dir(path)
        .await
        .map_err(|source| LauncherError::io(path, source))?;
    Ok(entries
        .next_entry()
        .await
        .map_err(|source| LauncherError::io(path, source))?
        .is_none())
}

// ── Lock ────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct LockPayload {
    pid: u32,
    timestamp: i64,
}

/// `<root>.lock`, beside the prefix root so it never lands inside it.
pub fn lock_path_for(root: &Path) -> PathBuf {
    let mut name: OsString = root
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("prefix"));
    name.push(".lock");
    root.with_file_name(name)
}

/// Held for the whole invocation; the file is removed on drop.
#[derive(Debug)]
pub struct PrefixLock {
    path: PathBuf,
}

impl PrefixLock {
    pub async fn acquire(root: &Path) -> LauncherResult<Self> {
        let lock_path = lock_path_for(root);
        if let Some(parent) = lock_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| LauncherError::io(parent, source))?;
        }

        // One retry after clearing a stale lock.
        for _ in 0..2 {
            match tokio::fs::OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&lock_path)
                .await
            {
                Ok(mut file) => {
                    let payload = serde_json::to_vec(&LockPayload {
                        pid: std::process::id(),
                        timestamp: Utc::now().timestamp(),
                    })?;
                    file.write_all(&payload)
                        .await
                        .map_err(|source| LauncherError::io(&lock_path, source))?;
                    debug!("Acquired prefix lock {:?}", lock_path);
                    return Ok(Self { path: lock_path });
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    match read_lock(&lock_path).await {
                        Some(holder) if !is_stale(&holder) => {
                            return Err(LauncherError::PrefixBusy {
                                root: root.to_path_buf(),
                                pid: holder.pid,
                            });
                        }
                        _ => {
                            warn!("Removing stale prefix lock {:?}", lock_path);
                            let _ = tokio::fs::remove_file(&lock_path).await;
                        }
                    }
                }
                Err(source) => return Err(LauncherError::io(&lock_path, source)),
            }
        }

        Err(LauncherError::PrefixBusy {
            root: root.to_path_buf(),
            pid: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PrefixLock {
    fn drop(&mut self) {
        if let Err(source) = std::fs::remove_file(&self.path) {
            warn!("Failed to remove lock {:?}: {}", self.path, source);
        }
    }
}

async fn read_lock(path: &Path) -> Option<LockPayload> {
    let raw = tokio::fs::read(path).await.ok()?;
    serde_json::from_slice(&raw).ok()
}

fn is_stale(holder: &LockPayload) -> bool {
    let expired = Utc::now().timestamp().saturating_sub(holder.timestamp) > LOCK_STALE_SECS;

    #[cfg(target_os = "linux")]
    let dead = !PathBuf::from(format!("/proc/{}", holder.pid)).exists();
    #[cfg(not(target_os = "linux"))]
    let dead = false;

    expired || dead
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_is_a_sibling_of_the_root() {
        assert_eq!(
            lock_path_for(Path::new("/data/Euro Truck Simulator 2/prefix")),
            PathBuf::from("/data/Euro Truck Simulator 2/prefix.lock")
        );
    }

    #[tokio::test]
    async fn fresh_root_goes_from_missing_to_ready() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = Prefix::new(dir.path().join("prefix"), GameProfile::Ets2);

        assert_eq!(prefix.inspect().await.unwrap(), PrefixCondition::Missing);
        prefix.write_layout().await.unwrap();
        assert_eq!(prefix.inspect().await.unwrap(), PrefixCondition::Ready);
        assert!(prefix.system32().is_dir());
    }

    #[tokio::test]
    async fn foreign_content_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("prefix");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("notes.txt"), "mine").unwrap();

        let err = Prefix::new(&root, GameProfile::Ets2).inspect().await.unwrap_err();
        assert!(matches!(err, LauncherError::IncompatiblePrefix { .. }));
        assert!(root.join("notes.txt").exists());
    }

    #[tokio::test]
    async fn other_layout_version_or_profile_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("prefix");
        std::fs::create_dir_all(&root).unwrap();

        std::fs::write(
            root.join(PREFIX_MARKER_FILE),
            r#"{"layout_version": 7, "profile": "ets2"}"#,
        )
        .unwrap();
        let err = Prefix::new(&root, GameProfile::Ets2).inspect().await.unwrap_err();
        assert!(err.to_string().contains("layout version 7"));

        std::fs::write(
            root.join(PREFIX_MARKER_FILE),
            r#"{"layout_version": 1, "profile": "ats"}"#,
        )
        .unwrap();
        let err = Prefix::new(&root, GameProfile::Ets2).inspect().await.unwrap_err();
        assert!(matches!(err, LauncherError::IncompatiblePrefix { .. }));
    }

    #[tokio::test]
    async fn damaged_skeleton_is_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = Prefix::new(dir.path().join("prefix"), GameProfile::Ats);
        prefix.write_layout().await.unwrap();
        std::fs::remove_dir_all(prefix.root.join(USERS_INNER)).unwrap();
        assert_eq!(prefix.inspect().await.unwrap(), PrefixCondition::Incomplete);
    }

    #[tokio::test]
    async fn live_lock_reports_busy_and_is_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("prefix");

        let lock = PrefixLock::acquire(&root).await.unwrap();
        let err = PrefixLock::acquire(&root).await.unwrap_err();
        assert!(matches!(err, LauncherError::PrefixBusy { pid, .. } if pid == std::process::id()));

        let path = lock.path().to_path_buf();
        drop(lock);
        assert!(!path.exists());
        PrefixLock::acquire(&root).await.unwrap();
    }

    #[tokio::test]
    async fn expired_lock_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("prefix");
        std::fs::write(
            lock_path_for(&root),
            format!(r#"{{"pid": {}, "timestamp": 0}}"#, std::process::id()),
        )
        .unwrap();

        let lock = PrefixLock::acquire(&root).await.unwrap();
        assert!(lock.path().exists());
    }
}
