use std::ffi::OsStr;

use tracing::{info, instrument};

use crate::core::config::LaunchOptions;
use crate::core::downloader::DownloadManager;
use crate::core::error::LauncherResult;
use crate::core::paths::ResolvedPaths;
use crate::core::profile::GameProfile;
use crate::core::state::StateStore;

use super::components::{install_components, AuxiliaryReport, AuxiliarySources, ComponentChoice};
use super::prefix::{Prefix, PrefixCondition, PREFIX_LAYOUT_VERSION};
use super::runtime::{resolve_runtime, RuntimeResolution, RuntimeSelection};

/// Everything the launch stage needs from a built environment.
#[derive(Debug, Clone)]
pub struct EnvironmentReport {
    pub prefix: Prefix,
    pub selection: RuntimeSelection,
    pub components: AuxiliaryReport,
    pub advisories: Vec<String>,
    /// Whether this run had to write the prefix layout.
    pub prefix_written: bool,
}

pub struct CompatibilityEnvironmentBuilder {
    paths: ResolvedPaths,
    state: StateStore,
    choice: ComponentChoice,
    sources: AuxiliarySources,
    downloads: Option<DownloadManager>,
}

impl CompatibilityEnvironmentBuilder {
    pub fn new(
        options: &LaunchOptions,
        paths: ResolvedPaths,
        state: StateStore,
        sources: AuxiliarySources,
    ) -> Self {
        Self {
            paths,
            state,
            choice: ComponentChoice {
                d3dcompiler: options.native_d3dcompiler,
                presence_bridge: options.presence_bridge,
                overlay: options.overlay,
                throttle: options.throttle,
            },
            sources,
            downloads: None,
        }
    }

    /// Allows missing auxiliary artifacts to be fetched.
    pub fn with_downloads(mut self, downloads: DownloadManager) -> Self {
        self.downloads = Some(downloads);
        self
    }

    pub fn resolve_runtime(
        &self,
        options: &LaunchOptions,
        search_path: Option<&OsStr>,
    ) -> LauncherResult<RuntimeResolution> {
        resolve_runtime(options, &self.paths, search_path)
    }

    /// Validates or creates the prefix, then settles the optional
    /// components. Prefix problems are fatal; component problems are not.
    ///
    /// Running it again over an initialized prefix writes nothing.
    #[instrument(skip(self, selection), fields(prefix = %self.paths.prefix_dir.display()))]
    pub async fn ensure(
        &self,
        profile: GameProfile,
        selection: RuntimeSelection,
    ) -> LauncherResult<EnvironmentReport> {
        let mut prefix = Prefix::new(&self.paths.prefix_dir, profile);
        let condition = prefix.inspect().await?;
        let recorded = self.state.is_prefix_initialized(&prefix.root).await?;

        let prefix_written = if condition == PrefixCondition::Ready && recorded {
            false
        } else {
            info!("Preparing prefix {:?} ({:?})", prefix.root, condition);
            self.state
                .set_prefix_initialized(&prefix.root, false, PREFIX_LAYOUT_VERSION)
                .await?;
            prefix.write_layout().await?;
            self.state
                .set_prefix_initialized(&prefix.root, true, PREFIX_LAYOUT_VERSION)
                .await?;
            true
        };
        prefix.initialized = true;

        let mut advisories = Vec::new();
        let components = install_components(
            self.choice,
            &self.sources,
            &self.paths,
            &prefix,
            self.downloads.as_ref(),
            &mut advisories,
        )
        .await?;

        Ok(EnvironmentReport {
            prefix,
            selection,
            components,
            advisories,
            prefix_written,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::checksum::Digest;
    use crate::core::environment::components::PinnedArtifact;
    use crate::core::environment::runtime::TranslationLayer;
    use crate::core::error::LauncherError;

    fn sources() -> AuxiliarySources {
        let digest = Digest::md5("900150983cd24fb0d6963f7d28e17f72").unwrap();
        AuxiliarySources {
            d3dcompiler: PinnedArtifact {
                url: "http://dll/d3dcompiler_47.dll".into(),
                digest: digest.clone(),
            },
            presence_bridge: PinnedArtifact {
                url: "http://bridge/winediscordipcbridge.exe".into(),
                digest,
            },
        }
    }

    fn selection() -> RuntimeSelection {
        RuntimeSelection::SystemInstalled(TranslationLayer {
            root: "/usr/bin".into(),
            entry_point: "/usr/bin/wine".into(),
            version: None,
        })
    }

    fn builder(dir: &std::path::Path) -> (CompatibilityEnvironmentBuilder, ResolvedPaths, StateStore) {
        let mut options = LaunchOptions::for_game(GameProfile::Ets2);
        options.presence_bridge = false;
        options.overlay = false;
        let paths = ResolvedPaths::under(dir, &options, None);
        let state = StateStore::new(&paths.state_dir);
        (
            CompatibilityEnvironmentBuilder::new(&options, paths.clone(), state.clone(), sources()),
            paths,
            state,
        )
    }

    #[tokio::test]
    async fn first_run_initializes_second_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (builder, paths, state) = builder(dir.path());

        let first = builder.ensure(GameProfile::Ets2, selection()).await.unwrap();
        assert!(first.prefix_written);
        assert!(first.prefix.initialized);
        assert!(state.is_prefix_initialized(&paths.prefix_dir).await.unwrap());

        let marker = first.prefix.marker_path();
        let before = std::fs::metadata(&marker).unwrap().modified().unwrap();
        let second = builder.ensure(GameProfile::Ets2, selection()).await.unwrap();
        assert!(!second.prefix_written);
        assert_eq!(std::fs::metadata(&marker).unwrap().modified().unwrap(), before);
    }

    #[tokio::test]
    async fn interrupted_initialization_is_redone() {
        let dir = tempfile::tempdir().unwrap();
        let (builder, paths, state) = builder(dir.path());
        builder.ensure(GameProfile::Ets2, selection()).await.unwrap();

        // As if the previous run died between marking and finishing.
        state
            .set_prefix_initialized(&paths.prefix_dir, false, PREFIX_LAYOUT_VERSION)
            .await
            .unwrap();
        let report = builder.ensure(GameProfile::Ets2, selection()).await.unwrap();
        assert!(report.prefix_written);
        assert!(state.is_prefix_initialized(&paths.prefix_dir).await.unwrap());
    }

    #[tokio::test]
    async fn foreign_prefix_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let (builder, paths, state) = builder(dir.path());
        std::fs::create_dir_all(&paths.prefix_dir).unwrap();
        std::fs::write(paths.prefix_dir.join("user.reg"), "data").unwrap();

        let err = builder.ensure(GameProfile::Ets2, selection()).await.unwrap_err();
        assert!(matches!(err, LauncherError::IncompatiblePrefix { .. }));
        assert!(state.prefix_state(&paths.prefix_dir).await.unwrap().is_none());
        assert_eq!(std::fs::read_dir(&paths.prefix_dir).unwrap().count(), 1);
    }
}
