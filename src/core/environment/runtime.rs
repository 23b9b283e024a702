// ─── Runtime Selection ───
// Picks the translation layer (and optionally the container runtime)
// once per launch. Later stages match on `RuntimeSelection`; nothing
// downstream re-inspects paths or mode strings.

use std::cmp::Ordering;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::core::config::{LaunchOptions, RuntimeMode};
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::paths::ResolvedPaths;
use crate::core::version::compare_versions;

/// Vendor builds whose `version` name starts with one of these are known
/// to work with the mod loader.
pub const PINNED_VENDOR_SERIES: &[&str] = &["proton-8.0", "proton-9.0"];
pub const MIN_CONTAINER_DEPOT_VERSION: &str = "0.20230101";

const VENDOR_ENTRY_POINT: &str = "proton";
const VENDOR_VERSION_FILE: &str = "version";
const SYSTEM_BINARY: &str = "wine";
const SYSTEM_WINESERVER: &str = "wineserver";
const VENDOR_WINESERVER: &str = "files/bin/wineserver";
const CONTAINER_LAUNCHER: &str = "run";
const CONTAINER_MANIFEST: &str = "VERSIONS.txt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationLayer {
    /// Install directory; for a system build, the directory holding the binary.
    pub root: PathBuf,
    pub entry_point: PathBuf,
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRuntime {
    pub root: PathBuf,
    pub launcher: PathBuf,
    pub depot_version: String,
}

/// The one runtime strategy used for this launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeSelection {
    VendorManaged(TranslationLayer),
    SystemInstalled(TranslationLayer),
    /// A vendor-managed layer executed inside the container runtime.
    Containerized {
        container: ContainerRuntime,
        layer: TranslationLayer,
    },
}

impl RuntimeSelection {
    pub fn layer(&self) -> &TranslationLayer {
        match self {
            RuntimeSelection::VendorManaged(layer)
            | RuntimeSelection::SystemInstalled(layer)
            | RuntimeSelection::Containerized { layer, .. } => layer,
        }
    }

    pub fn is_vendor_layer(&self) -> bool {
        !matches!(self, RuntimeSelection::SystemInstalled(_))
    }

    /// Server binary shipped next to the layer's wine.
    pub fn wineserver(&self) -> PathBuf {
        let layer = self.layer();
        if self.is_vendor_layer() {
            layer.root.join(VENDOR_WINESERVER)
        } else {
            layer.root.join(SYSTEM_WINESERVER)
        }
    }

    pub fn describe(&self) -> String {
        let layer = self.layer();
        let version = layer.version.as_deref().unwrap_or("unknown version");
        match self {
            RuntimeSelection::VendorManaged(_) => {
                format!("vendor build {:?} ({version})", layer.root)
            }
            RuntimeSelection::SystemInstalled(_) => {
                format!("system build {:?}", layer.entry_point)
            }
            RuntimeSelection::Containerized { container, .. } => format!(
                "vendor build {:?} ({version}) in container {:?} ({})",
                layer.root, container.root, container.depot_version
            ),
        }
    }
}

/// Chosen runtime plus the warnings produced while choosing it.
#[derive(Debug, Clone)]
pub struct RuntimeResolution {
    pub selection: RuntimeSelection,
    pub advisories: Vec<String>,
}

/// Resolves the runtime for `options`, searching `search_path` (usually
/// `$PATH`) for a system build.
pub fn resolve_runtime(
    options: &LaunchOptions,
    paths: &ResolvedPaths,
    search_path: Option<&OsStr>,
) -> LauncherResult<RuntimeResolution> {
    let mut advisories = Vec::new();

    let selection = if let Some(explicit) = &options.runtime_path {
        let selection = explicit_runtime(explicit)?;
        if options.runtime_mode == RuntimeMode::Container {
            wrap_in_container(selection, paths, &mut advisories)
        } else {
            selection
        }
    } else {
        match options.runtime_mode {
            RuntimeMode::Vendor => {
                RuntimeSelection::VendorManaged(pinned_vendor_layer(&paths.vendor_layer_dir)?)
            }
            RuntimeMode::System => RuntimeSelection::SystemInstalled(
                system_layer(search_path).ok_or_else(|| {
                    LauncherError::RuntimeNotFound(format!("no `{SYSTEM_BINARY}` on PATH"))
                })?,
            ),
            RuntimeMode::Container => {
                let layer = pinned_vendor_layer(&paths.vendor_layer_dir)?;
                wrap_in_container(RuntimeSelection::VendorManaged(layer), paths, &mut advisories)
            }
            RuntimeMode::Auto => auto_runtime(paths, search_path, &mut advisories)?,
        }
    };

    info!("Runtime: {}", selection.describe());
    Ok(RuntimeResolution {
        selection,
        advisories,
    })
}

fn auto_runtime(
    paths: &ResolvedPaths,
    search_path: Option<&OsStr>,
    advisories: &mut Vec<String>,
) -> LauncherResult<RuntimeSelection> {
    let vendor = inspect_vendor_layer(&paths.vendor_layer_dir);
    if let Some(layer) = vendor.as_ref().filter(|l| is_pinned(l)) {
        return Ok(RuntimeSelection::VendorManaged(layer.clone()));
    }

    if let Some(layer) = system_layer(search_path) {
        advise(
            advisories,
            format!(
                "using system translation layer {:?}; it is not a pinned build and may not work with the mod loader",
                layer.entry_point
            ),
        );
        return Ok(RuntimeSelection::SystemInstalled(layer));
    }

    if let Some(layer) = vendor {
        advise(
            advisories,
            format!(
                "vendor build {:?} ({}) is not one of the pinned series {}",
                layer.root,
                layer.version.as_deref().unwrap_or("unknown version"),
                PINNED_VENDOR_SERIES.join(", ")
            ),
        );
        return Ok(RuntimeSelection::VendorManaged(layer));
    }

    Err(LauncherError::RuntimeNotFound(format!(
        "no vendor build in {:?} and no `{SYSTEM_BINARY}` on PATH",
        paths.vendor_layer_dir
    )))
}

fn explicit_runtime(path: &Path) -> LauncherResult<RuntimeSelection> {
    if path.is_dir() {
        return inspect_vendor_layer(path)
            .map(RuntimeSelection::VendorManaged)
            .ok_or_else(|| {
                LauncherError::RuntimeNotFound(format!(
                    "{path:?} has no executable `{VENDOR_ENTRY_POINT}` entry point"
                ))
            });
    }
    if is_executable(path) {
        let root = path.parent().map(Path::to_path_buf).unwrap_or_default();
        return Ok(RuntimeSelection::SystemInstalled(TranslationLayer {
            root,
            entry_point: path.to_path_buf(),
            version: None,
        }));
    }
    Err(LauncherError::RuntimeNotFound(format!(
        "{path:?} does not exist or is not executable"
    )))
}

fn wrap_in_container(
    selection: RuntimeSelection,
    paths: &ResolvedPaths,
    advisories: &mut Vec<String>,
) -> RuntimeSelection {
    let layer = match selection {
        RuntimeSelection::VendorManaged(layer) => layer,
        other => {
            advise(
                advisories,
                "the container runtime only runs vendor builds; executing directly".to_string(),
            );
            return other;
        }
    };
    match inspect_container(&paths.container_runtime_dir) {
        Ok(container) => RuntimeSelection::Containerized { container, layer },
        Err(reason) => {
            advise(
                advisories,
                format!("container runtime unusable ({reason}); executing directly"),
            );
            RuntimeSelection::VendorManaged(layer)
        }
    }
}

fn pinned_vendor_layer(dir: &Path) -> LauncherResult<TranslationLayer> {
    let layer = inspect_vendor_layer(dir).ok_or_else(|| {
        LauncherError::RuntimeNotFound(format!("no vendor build installed in {dir:?}"))
    })?;
    if !is_pinned(&layer) {
        return Err(LauncherError::RuntimeNotFound(format!(
            "vendor build in {dir:?} ({}) is not one of {}",
            layer.version.as_deref().unwrap_or("unknown version"),
            PINNED_VENDOR_SERIES.join(", ")
        )));
    }
    Ok(layer)
}

fn inspect_vendor_layer(dir: &Path) -> Option<TranslationLayer> {
    let entry_point = dir.join(VENDOR_ENTRY_POINT);
    if !is_executable(&entry_point) {
        return None;
    }
    let version = std::fs::read_to_string(dir.join(VENDOR_VERSION_FILE))
        .ok()
        .and_then(|raw| parse_vendor_version(&raw));
    debug!("Found vendor build at {:?} ({:?})", dir, version);
    Some(TranslationLayer {
        root: dir.to_path_buf(),
        entry_point,
        version,
    })
}

/// `"<timestamp> <name>"` → `name`
fn parse_vendor_version(raw: &str) -> Option<String> {
    let line = raw.lines().next()?.trim();
    let name = line.split_whitespace().nth(1).unwrap_or(line);
    (!name.is_empty()).then(|| name.to_string())
}

fn is_pinned(layer: &TranslationLayer) -> bool {
    layer
        .version
        .as_deref()
        .is_some_and(|v| PINNED_VENDOR_SERIES.iter().any(|series| v.starts_with(series)))
}

fn system_layer(search_path: Option<&OsStr>) -> Option<TranslationLayer> {
    let entry_point = find_on_path(SYSTEM_BINARY, search_path?)?;
    Some(TranslationLayer {
        root: entry_point.parent().map(Path::to_path_buf).unwrap_or_default(),
        entry_point,
        version: None,
    })
}

pub fn find_on_path(name: &str, search_path: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(search_path)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

fn inspect_container(dir: &Path) -> Result<ContainerRuntime, String> {
    let launcher = dir.join(CONTAINER_LAUNCHER);
    if !is_executable(&launcher) {
        return Err(format!("no executable launcher at {launcher:?}"));
    }
    let manifest = dir.join(CONTAINER_MANIFEST);
    let raw = std::fs::read_to_string(&manifest)
        .map_err(|e| format!("cannot read {manifest:?}: {e}"))?;
    let depot_version =
        parse_depot_version(&raw).ok_or_else(|| format!("no depot entry in {manifest:?}"))?;
    if compare_versions(&depot_version, MIN_CONTAINER_DEPOT_VERSION) == Ordering::Less {
        return Err(format!(
            "depot version {depot_version} is older than {MIN_CONTAINER_DEPOT_VERSION}"
        ));
    }
    Ok(ContainerRuntime {
        root: dir.to_path_buf(),
        launcher,
        depot_version,
    })
}

fn parse_depot_version(raw: &str) -> Option<String> {
    raw.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        if fields.next()? != "depot" {
            return None;
        }
        fields.next().map(str::to_string)
    })
}

fn is_executable(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

fn advise(advisories: &mut Vec<String>, message: String) {
    warn!("{}", message);
    advisories.push(message);
}
