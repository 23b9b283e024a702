use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::Child;
use tracing::{debug, info, instrument, warn};

use crate::core::cancel::CancelSignal;
use crate::core::error::{LauncherError, LauncherResult};

use super::plan::{CommandSpec, LaunchPlan};
use super::session::{ExitPolicy, LaunchSession, SessionState};

const GROUP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Owns every process of a launch: helper first, then the game, and
/// tears the helper down once the game is gone.
pub struct ProcessSupervisor {
    policy: ExitPolicy,
    cancel: CancelSignal,
}

impl ProcessSupervisor {
    pub fn new(policy: ExitPolicy, cancel: CancelSignal) -> Self {
        Self { policy, cancel }
    }

    /// Runs `plan` to completion. Errors only when the game could not be
    /// started; how it ended is reported in the returned session.
    #[instrument(skip_all, fields(program = %plan.main.program.display()))]
    pub async fn launch(&self, plan: &LaunchPlan) -> LauncherResult<LaunchSession> {
        let mut session = LaunchSession::new(self.policy);

        // Nothing is spawned unless the game itself can start.
        validate(&plan.main)?;

        let mut helper = match &plan.helper {
            Some(spec) => match validate(spec).and_then(|()| spawn(spec)) {
                Ok(child) => {
                    session.helper_pid = child.id();
                    info!("Started presence bridge (pid {:?})", child.id());
                    Some(child)
                }
                Err(err) => {
                    warn!("Presence bridge not started: {}", err);
                    None
                }
            },
            None => None,
        };

        info!("Launching game: {}", plan.main.format_for_logs());
        let mut main = match spawn(&plan.main) {
            Ok(child) => child,
            Err(err) => {
                if let Some(child) = helper.as_mut() {
                    session.helper = Some(
                        terminate(child, session.helper_pid, self.policy.terminate_grace).await,
                    );
                }
                return Err(err);
            }
        };
        session.mark_running(main.id());
        info!(session = %session.id, pid = ?session.main_pid, "Game running");

        let state = tokio::select! {
            status = main.wait() => match status {
                Ok(status) => classify(status),
                Err(err) => {
                    warn!("Lost track of game process: {}", err);
                    SessionState::Crashed { signal: None }
                }
            },
            _ = self.cancel.cancelled() => {
                warn!("Cancellation requested, stopping game");
                terminate(&mut main, session.main_pid, self.policy.terminate_grace).await;
                SessionState::Killed
            }
        };
        session.finish(state);
        info!(session = %session.id, state = ?session.state, "Game ended");

        if let Some(child) = helper.as_mut() {
            let outcome = terminate(child, session.helper_pid, self.policy.terminate_grace).await;
            debug!("Presence bridge ended as {:?}", outcome);
            session.helper = Some(outcome);
        }

        if let Some(spec) = &plan.cleanup {
            self.run_cleanup(spec).await;
        }

        Ok(session)
    }

    /// Best effort; a failing cleanup never changes how the session ended.
    async fn run_cleanup(&self, spec: &CommandSpec) {
        if let Err(err) = validate(spec) {
            warn!("Skipping prefix cleanup: {}", err);
            return;
        }
        info!("Stopping leftover prefix processes: {}", spec.format_for_logs());
        let mut cmd = spec.to_command();
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);
        match tokio::time::timeout(self.policy.terminate_grace, cmd.status()).await {
            Ok(Ok(status)) if status.success() => debug!("Prefix cleanup finished"),
            Ok(Ok(status)) => warn!("Prefix cleanup exited with {}", status),
            Ok(Err(err)) => warn!("Prefix cleanup failed to start: {}", err),
            Err(_) => warn!(
                "Prefix cleanup still running after {:?}, abandoning it",
                self.policy.terminate_grace
            ),
        }
    }
}

fn validate(spec: &CommandSpec) -> LauncherResult<()> {
    let fail = |reason: String| LauncherError::Launch {
        program: spec.program.clone(),
        reason,
    };
    if !is_executable(&spec.program) {
        return Err(fail("missing or not executable".into()));
    }
    if let Some(missing) = spec.requires.iter().find(|path| !path.is_file()) {
        return Err(fail(format!("{missing:?} not found")));
    }
    Ok(())
}

fn spawn(spec: &CommandSpec) -> LauncherResult<Child> {
    let mut cmd = spec.to_command();
    cmd.stdin(Stdio::null());
    cmd.kill_on_drop(true);
    // Own process group, so the translation layer's descendants (the
    // game itself) are reached by the same signal.
    #[cfg(unix)]
    cmd.process_group(0);
    debug!("Command: {:?}", cmd);
    cmd.spawn().map_err(|e| LauncherError::Launch {
        program: spec.program.clone(),
        reason: e.to_string(),
    })
}

fn classify(status: ExitStatus) -> SessionState {
    if let Some(code) = status.code() {
        return SessionState::Exited { code };
    }
    #[cfg(unix)]
    let signal = {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    };
    #[cfg(not(unix))]
    let signal = None;
    SessionState::Crashed { signal }
}

/// SIGTERM to the whole process group, wait up to `grace` for the group
/// to drain, then SIGKILL. A leader that already ended on its own reports
/// how it ended; its leftover descendants are stopped all the same.
async fn terminate(child: &mut Child, pgid: Option<u32>, grace: Duration) -> SessionState {
    let ended = match child.try_wait() {
        Ok(Some(status)) => Some(classify(status)),
        _ => None,
    };

    if let Some(pgid) = pgid {
        if signal_group(pgid, "TERM").await {
            let drained = tokio::time::timeout(grace, async {
                if ended.is_none() {
                    let _ = child.wait().await;
                }
                while signal_group(pgid, "0").await {
                    tokio::time::sleep(GROUP_POLL_INTERVAL).await;
                }
            })
            .await
            .is_ok();
            if !drained {
                warn!("Process group {} ignored SIGTERM for {:?}, killing", pgid, grace);
                signal_group(pgid, "KILL").await;
            }
        }
    }

    if let Some(state) = ended {
        return state;
    }
    if let Ok(Some(_)) = child.try_wait() {
        return SessionState::Killed;
    }
    if let Err(err) = child.kill().await {
        warn!("Failed to kill process: {}", err);
    }
    SessionState::Killed
}

/// `kill -<signal> -- -<pgid>`; true when at least one member was signalled.
async fn signal_group(pgid: u32, signal: &str) -> bool {
    tokio::process::Command::new("kill")
        .arg(format!("-{signal}"))
        .arg("--")
        .arg(format!("-{pgid}"))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}

fn is_executable(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.is_file() && meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        meta.is_file()
    }
}
