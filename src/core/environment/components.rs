use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::core::checksum::{self, Digest};
use crate::core::downloader::{staging_path_for, DownloadManager, DownloadTask};
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::paths::ResolvedPaths;

use super::prefix::Prefix;

const D3DCOMPILER_FILE: &str = "d3dcompiler_47.dll";
const D3DCOMPILER_URL: &str = "https://github.com/ImagingSIMS/ImagingSIMS/raw/162e4b02445c1fb621ce81c2bdf82a7870a3fd2a/Redist/x64/d3dcompiler_47.dll";
const D3DCOMPILER_MD5: &str = "b2cc65e1930e75f563078c6a20221b37";

const PRESENCE_BRIDGE_FILE: &str = "winediscordipcbridge.exe";
const PRESENCE_BRIDGE_URL: &str = "https://github.com/0e4ef622/wine-discord-ipc-bridge/releases/download/v0.0.2/winediscordipcbridge.exe";
const PRESENCE_BRIDGE_MD5: &str = "a433fb2ec994b664b662e798095f9059";

pub const OVERLAY_RENDERER_INNER: &str = "ubuntu12_64/gameoverlayrenderer.so";

/// A third-party binary fetched from one fixed location and pinned by digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinnedArtifact {
    pub url: String,
    pub digest: Digest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxiliarySources {
    pub d3dcompiler: PinnedArtifact,
    pub presence_bridge: PinnedArtifact,
}

impl AuxiliarySources {
    pub fn pinned() -> LauncherResult<Self> {
        Ok(Self {
            d3dcompiler: PinnedArtifact {
                url: D3DCOMPILER_URL.to_string(),
                digest: Digest::md5(D3DCOMPILER_MD5)?,
            },
            presence_bridge: PinnedArtifact {
                url: PRESENCE_BRIDGE_URL.to_string(),
                digest: Digest::md5(PRESENCE_BRIDGE_MD5)?,
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentStatus {
    /// Installed and verified; the path the launch plan should use.
    Ready(PathBuf),
    Disabled(String),
}

impl ComponentStatus {
    pub fn ready_path(&self) -> Option<&Path> {
        match self {
            ComponentStatus::Ready(path) => Some(path),
            ComponentStatus::Disabled(_) => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ComponentStatus::Ready(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxiliaryReport {
    pub d3dcompiler: ComponentStatus,
    pub presence_bridge: ComponentStatus,
    pub overlay: ComponentStatus,
}

/// Which optional components the user wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentChoice {
    pub d3dcompiler: bool,
    pub presence_bridge: bool,
    pub overlay: bool,
    pub throttle: Option<u64>,
}

/// Installs the optional components. Every failure here is downgraded to
/// `Disabled` with a warning and an advisory.
///
/// `downloads` is `None` when the network must not be used; missing
/// artifacts are then reported as disabled.
pub async fn install_components(
    choice: ComponentChoice,
    sources: &AuxiliarySources,
    paths: &ResolvedPaths,
    prefix: &Prefix,
    downloads: Option<&DownloadManager>,
    advisories: &mut Vec<String>,
) -> LauncherResult<AuxiliaryReport> {
    let d3dcompiler = if choice.d3dcompiler {
        settle(
            "d3dcompiler_47",
            install_d3dcompiler(sources, paths, prefix, downloads, choice.throttle).await,
            advisories,
        )?
    } else {
        ComponentStatus::Disabled("not requested".into())
    };

    let presence_bridge = if choice.presence_bridge {
        let destination = paths.presence_bridge_dir.join(PRESENCE_BRIDGE_FILE);
        settle(
            "presence bridge",
            ensure_artifact(
                &sources.presence_bridge,
                &destination,
                downloads,
                choice.throttle,
            )
            .await
            .map(|()| destination),
            advisories,
        )?
    } else {
        ComponentStatus::Disabled("disabled by user".into())
    };

    let overlay = if choice.overlay {
        overlay_renderer(paths.steam_dir.as_deref())
    } else {
        ComponentStatus::Disabled("disabled by user".into())
    };
    if let ComponentStatus::Disabled(reason) = &overlay {
        debug!("Overlay renderer disabled: {}", reason);
    }

    Ok(AuxiliaryReport {
        d3dcompiler,
        presence_bridge,
        overlay,
    })
}

/// Cancellation still aborts the whole stage; anything else disables the component.
fn settle(
    name: &str,
    outcome: LauncherResult<PathBuf>,
    advisories: &mut Vec<String>,
) -> LauncherResult<ComponentStatus> {
    match outcome {
        Ok(path) => {
            info!("{} ready at {:?}", name, path);
            Ok(ComponentStatus::Ready(path))
        }
        Err(LauncherError::Cancelled) => Err(LauncherError::Cancelled),
        Err(err) => {
            let message = format!("{name} disabled: {err}");
            warn!("{}", message);
            advisories.push(message);
            Ok(ComponentStatus::Disabled(err.to_string()))
        }
    }
}

async fn install_d3dcompiler(
    sources: &AuxiliarySources,
    paths: &ResolvedPaths,
    prefix: &Prefix,
    downloads: Option<&DownloadManager>,
    throttle: Option<u64>,
) -> LauncherResult<PathBuf> {
    let pinned = &sources.d3dcompiler;
    let cached = paths.dlls_dir.join(D3DCOMPILER_FILE);
    ensure_artifact(pinned, &cached, downloads, throttle).await?;

    let installed = prefix.system32().join(D3DCOMPILER_FILE);
    if checksum::is_valid_async(&installed, &pinned.digest).await {
        return Ok(installed);
    }

    // Copy then rename so a reader never sees half a DLL.
    let staging = staging_path_for(&installed);
    tokio::fs::copy(&cached, &staging)
        .await
        .map_err(|source| LauncherError::io(&staging, source))?;
    tokio::fs::rename(&staging, &installed)
        .await
        .map_err(|source| LauncherError::io(&installed, source))?;
    info!("Installed {} into {:?}", D3DCOMPILER_FILE, prefix.system32());
    Ok(installed)
}

/// Leaves `destination` holding the pinned bytes, fetching only if needed.
async fn ensure_artifact(
    pinned: &PinnedArtifact,
    destination: &Path,
    downloads: Option<&DownloadManager>,
    throttle: Option<u64>,
) -> LauncherResult<()> {
    if checksum::is_valid_async(destination, &pinned.digest).await {
        debug!("{:?} already verified", destination);
        return Ok(());
    }
    let Some(downloads) = downloads else {
        return Err(LauncherError::Other(format!(
            "{destination:?} is missing or corrupt and downloads are disabled for this stage"
        )));
    };
    let task = DownloadTask::new(vec![pinned.url.clone()], destination)
        .with_digest(pinned.digest.clone())
        .with_throughput(throttle);
    downloads.fetch(task).await?;
    Ok(())
}

fn overlay_renderer(steam_dir: Option<&Path>) -> ComponentStatus {
    let Some(steam_dir) = steam_dir else {
        return ComponentStatus::Disabled("no Steam installation found".into());
    };
    let shim = steam_dir.join(OVERLAY_RENDERER_INNER);
    if shim.is_file() {
        ComponentStatus::Ready(shim)
    } else {
        ComponentStatus::Disabled(format!("{shim:?} not found"))
    }
}
