// ─── Orchestrator ───
// The stages behind each subcommand. Every stage is sequential and
// consumes the verified output of the one before it; only the download
// batch inside `update` runs concurrently.

use std::ffi::OsString;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::core::cancel::CancelSignal;
use crate::core::checksum;
use crate::core::config::LaunchOptions;
use crate::core::downloader::{ensure_free_space, DownloadManager, DownloadTask, PublishedPath};
use crate::core::environment::{
    AuxiliarySources, CompatibilityEnvironmentBuilder, EnvironmentReport, PrefixLock,
};
use crate::core::error::{ErrorCategory, LauncherError};
use crate::core::http::Transport;
use crate::core::launch::{build_plan, ExitPolicy, LaunchSession, ProcessSupervisor, SessionState};
use crate::core::paths::ResolvedPaths;
use crate::core::profile::Component;
use crate::core::state::{PrefixState, StateStore, VersionRecord};
use crate::core::version::{VersionDecision, VersionDocument, VersionResolver};

/// A failure tagged with the stage it happened in, which decides the
/// process exit code.
#[derive(Debug, Error)]
#[error("{stage:?} stage failed: {source}")]
pub struct StageError {
    pub stage: ErrorCategory,
    #[source]
    pub source: LauncherError,
}

/// Tags errors with `stage`; usable with `map_err` any number of times.
fn in_stage(stage: ErrorCategory) -> impl Fn(LauncherError) -> StageError + Copy {
    move |source| StageError { stage, source }
}

impl StageError {
    pub fn exit_code(&self) -> u8 {
        self.source.category_in(self.stage).exit_code()
    }
}

pub type StageResult<T> = Result<T, StageError>;

#[derive(Debug, Clone, Default)]
pub struct UpdateReport {
    pub decisions: Vec<VersionDecision>,
    pub published: Vec<PublishedPath>,
    /// Mod-loader version recorded by this run, if any.
    pub recorded: Option<String>,
    pub advisories: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LaunchReport {
    pub environment: EnvironmentReport,
    pub session: LaunchSession,
}

impl LaunchReport {
    /// Launch-layer success is 0 even when the game itself failed;
    /// only a cancelled session maps to the cancellation code.
    pub fn exit_code(&self) -> u8 {
        match self.session.state {
            SessionState::Killed => ErrorCategory::Cancelled.exit_code(),
            _ => 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StartReport {
    pub update: Option<UpdateReport>,
    pub launch: LaunchReport,
}

#[derive(Debug, Clone)]
pub struct StatusReport {
    pub records: Vec<VersionRecord>,
    pub prefix_root: std::path::PathBuf,
    pub prefix: Option<PrefixState>,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.records.is_empty() {
            writeln!(f, "No versions recorded")?;
        }
        for record in &self.records {
            writeln!(
                f,
                "{} {}: installed {}, remote {}, verified {}",
                record.profile,
                record.component,
                record.local_version.as_deref().unwrap_or("-"),
                record.remote_version.as_deref().unwrap_or("-"),
                record
                    .verified_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".into())
            )?;
        }
        let initialized = self.prefix.as_ref().is_some_and(|p| p.initialized);
        write!(
            f,
            "prefix {:?}: {}",
            self.prefix_root,
            if initialized { "initialized" } else { "not initialized" }
        )
    }
}

pub struct Orchestrator {
    options: LaunchOptions,
    paths: ResolvedPaths,
    state: StateStore,
    transport: Arc<dyn Transport>,
    sources: AuxiliarySources,
    cancel: CancelSignal,
    search_path: Option<OsString>,
}

impl Orchestrator {
    pub fn new(
        options: LaunchOptions,
        paths: ResolvedPaths,
        transport: Arc<dyn Transport>,
        sources: AuxiliarySources,
        cancel: CancelSignal,
    ) -> Self {
        let state = StateStore::new(&paths.state_dir);
        Self {
            options,
            paths,
            state,
            transport,
            sources,
            cancel,
            search_path: None,
        }
    }

    /// Directories searched for a system translation layer (`$PATH`).
    pub fn with_search_path(mut self, search_path: Option<OsString>) -> Self {
        self.search_path = search_path;
        self
    }

    fn resolver(&self) -> VersionResolver {
        VersionResolver::new(
            self.transport.clone(),
            self.state.clone(),
            self.options.version_url.clone(),
            self.options.game_version.clone(),
        )
    }

    fn downloads(&self) -> DownloadManager {
        DownloadManager::new(self.transport.clone(), self.cancel.clone())
            .with_workers(self.options.workers)
    }

    async fn lock(&self) -> StageResult<PrefixLock> {
        PrefixLock::acquire(&self.paths.prefix_dir)
            .await
            .map_err(in_stage(ErrorCategory::Environment))
    }

    // ── Subcommands ─────────────────────────────────────

    pub async fn update(&self) -> StageResult<UpdateReport> {
        let _lock = self.lock().await?;
        self.update_stage().await
    }

    pub async fn launch(&self) -> StageResult<LaunchReport> {
        let _lock = self.lock().await?;
        self.launch_stage(false).await
    }

    /// Update (unless skipped), build the environment, launch.
    pub async fn start(&self) -> StageResult<StartReport> {
        let _lock = self.lock().await?;
        let update = if self.options.skip_update {
            info!("Skipping update");
            None
        } else {
            Some(self.update_stage().await?)
        };
        let launch = self.launch_stage(true).await?;
        Ok(StartReport { update, launch })
    }

    pub async fn status(&self) -> StageResult<StatusReport> {
        let stage = in_stage(ErrorCategory::Usage);
        let records = self.state.records(self.options.game).await.map_err(stage)?;
        let prefix = self
            .state
            .prefix_state(&self.paths.prefix_dir)
            .await
            .map_err(stage)?;
        Ok(StatusReport {
            records,
            prefix_root: self.paths.prefix_dir.clone(),
            prefix,
        })
    }

    // ── Stages ──────────────────────────────────────────

    #[instrument(skip(self), fields(game = %self.options.game))]
    async fn update_stage(&self) -> StageResult<UpdateReport> {
        let update_err = in_stage(ErrorCategory::Update);
        let profile = self.options.game;
        let resolver = self.resolver();
        let mut report = UpdateReport::default();

        if let Some(advisory) = resolver
            .check_compatibility(profile)
            .await
            .map_err(update_err)?
        {
            report.advisories.push(advisory);
        }

        // Only a build the mod accepts is worth remembering.
        if let Some(game_version) = &self.options.game_version {
            self.remember_game_version(game_version)
                .await
                .map_err(update_err)?;
        }

        let game = resolver
            .resolve(profile, Component::Game)
            .await
            .map_err(update_err)?;
        if game.needs_update {
            if let Some(remote) = &game.remote_version {
                let advisory = format!(
                    "{} {} is supported by the mod; update the game through your store client",
                    profile.display_name(),
                    remote
                );
                warn!("{}", advisory);
                report.advisories.push(advisory);
            }
        }
        report.advisories.extend(game.advisory.clone());
        report.decisions.push(game);

        let mod_loader = resolver
            .resolve(profile, Component::ModLoader)
            .await
            .map_err(update_err)?;
        report.advisories.extend(mod_loader.advisory.clone());
        let needs_update = mod_loader.needs_update;
        report.decisions.push(mod_loader);

        let document = match resolver.document().await {
            Ok(document) => document,
            // No baseline and no document: nothing to download from.
            Err(err) if needs_update => return Err(update_err(err)),
            Err(_) => return Ok(report),
        };

        let tasks = self.plan_mod_files(&document).await;
        if tasks.is_empty() {
            info!("Mod-loader files verified, nothing to download");
        } else {
            report.published = self.fetch_mod_files(tasks).await.map_err(update_err)?;
        }

        if needs_update || !report.published.is_empty() {
            self.state
                .record_version(
                    profile,
                    Component::ModLoader,
                    &document.version,
                    Some(&document.version),
                )
                .await
                .map_err(update_err)?;
            info!("Mod loader {} installed", document.version);
            report.recorded = Some(document.version.clone());
        }
        Ok(report)
    }

    /// One task per applicable file that is missing or fails its digest.
    async fn plan_mod_files(&self, document: &VersionDocument) -> Vec<DownloadTask> {
        let mirrors: Vec<&str> = document
            .mirrors
            .iter()
            .chain(self.options.fallback_mirrors.iter())
            .map(String::as_str)
            .collect();

        let mut tasks = Vec::new();
        for file in document.files_for(self.options.game) {
            let destination = self.paths.mod_dir.join(&file.path);
            if checksum::is_valid_async(&destination, &file.digest).await {
                continue;
            }
            tasks.push(
                DownloadTask::from_mirrors(mirrors.iter().copied(), &file.path, destination)
                    .with_digest(file.digest.clone())
                    .with_throughput(self.options.throttle)
                    .with_size_hint(file.size),
            );
        }
        tasks
    }

    async fn fetch_mod_files(
        &self,
        tasks: Vec<DownloadTask>,
    ) -> Result<Vec<PublishedPath>, LauncherError> {
        tokio::fs::create_dir_all(&self.paths.mod_dir)
            .await
            .map_err(|source| LauncherError::io(&self.paths.mod_dir, source))?;
        let required: u64 = tasks.iter().filter_map(|t| t.size_hint).sum();
        ensure_free_space(&self.paths.mod_dir, required)?;

        let mut published = Vec::new();
        let mut first_error = None;
        for (destination, result) in self.downloads().fetch_all(tasks).await {
            match result {
                Ok(path) => published.push(path),
                Err(err) => {
                    warn!("Failed to install {:?}: {}", destination, err);
                    // Cancellation outranks ordinary failures.
                    if first_error.is_none() || matches!(err, LauncherError::Cancelled) {
                        first_error = Some(err);
                    }
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(published),
        }
    }

    async fn remember_game_version(&self, game_version: &str) -> Result<(), LauncherError> {
        let recorded = self
            .state
            .version_record(self.options.game, Component::Game)
            .await?
            .and_then(|record| record.local_version);
        if recorded.as_deref() != Some(game_version) {
            self.state
                .record_version(self.options.game, Component::Game, game_version, None)
                .await?;
        }
        Ok(())
    }

    async fn prepare_stage(&self, allow_downloads: bool) -> StageResult<EnvironmentReport> {
        let env_err = in_stage(ErrorCategory::Environment);
        let mut builder = CompatibilityEnvironmentBuilder::new(
            &self.options,
            self.paths.clone(),
            self.state.clone(),
            self.sources.clone(),
        );
        if allow_downloads {
            builder = builder.with_downloads(self.downloads());
        }

        let resolution = builder
            .resolve_runtime(&self.options, self.search_path.as_deref())
            .map_err(env_err)?;
        let mut report = builder
            .ensure(self.options.game, resolution.selection)
            .await
            .map_err(env_err)?;
        let mut advisories = resolution.advisories;
        advisories.append(&mut report.advisories);
        report.advisories = advisories;
        Ok(report)
    }

    async fn launch_stage(&self, allow_downloads: bool) -> StageResult<LaunchReport> {
        let environment = self.prepare_stage(allow_downloads).await?;
        if self.cancel.is_cancelled() {
            return Err(StageError {
                stage: ErrorCategory::Cancelled,
                source: LauncherError::Cancelled,
            });
        }

        let plan = build_plan(&self.options, &self.paths, &environment);
        let supervisor = ProcessSupervisor::new(
            ExitPolicy {
                terminate_grace: self.options.terminate_grace,
            },
            self.cancel.clone(),
        );
        let session = supervisor
            .launch(&plan)
            .await
            .map_err(in_stage(ErrorCategory::Launch))?;

        match session.state {
            SessionState::Exited { code } => info!("Game exited with code {}", code),
            SessionState::Crashed { signal } => warn!("Game crashed (signal {:?})", signal),
            other => info!("Game session ended: {:?}", other),
        }
        Ok(LaunchReport {
            environment,
            session,
        })
    }
}
