// ─── Launch Plan ───
// Turns a built environment into the exact commands and environment
// overlay handed to the supervisor. Variable names here are stable;
// the user-facing table lives in DESIGN.md.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::core::config::{LaunchOptions, RenderingBackend};
use crate::core::environment::{EnvironmentReport, RuntimeSelection};
use crate::core::paths::ResolvedPaths;

const DESKTOP_PROGRAM: &str = "explorer";
const VIRTUAL_DESKTOP_NAME: &str = "convoy";

/// One process to spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    /// Applied on top of the inherited environment.
    pub env: BTreeMap<String, String>,
    pub current_dir: Option<PathBuf>,
    /// Files the runtime will load; checked before anything is spawned.
    pub requires: Vec<PathBuf>,
}

impl CommandSpec {
    pub fn to_command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args);
        cmd.envs(&self.env);
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    /// Copy/paste-able rendering, env overlay first.
    pub fn format_for_logs(&self) -> String {
        let mut parts: Vec<String> = self
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, shell_escape(v)))
            .collect();
        parts.push(shell_escape(&self.program.to_string_lossy()));
        parts.extend(self.args.iter().map(|a| shell_escape(&a.to_string_lossy())));
        parts.join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub main: CommandSpec,
    /// Presence bridge, started before `main` and stopped after it.
    pub helper: Option<CommandSpec>,
    /// Run once everything else is gone; shuts down what is left in the prefix.
    pub cleanup: Option<CommandSpec>,
}

/// Builds the plan for the environment `report` describes.
pub fn build_plan(
    options: &LaunchOptions,
    paths: &ResolvedPaths,
    report: &EnvironmentReport,
) -> LaunchPlan {
    let selection = &report.selection;
    let env = environment_overlay(options, paths, report);

    let (target, mut target_args) = if options.singleplayer {
        (paths.game_executable(options.game), Vec::new())
    } else {
        (
            paths.injector_executable(),
            vec![
                paths.game_dir.clone().into_os_string(),
                paths.mod_dir.clone().into_os_string(),
            ],
        )
    };
    target_args.extend(game_arguments(options).into_iter().map(OsString::from));

    let mut main_requires = vec![target.clone()];
    if !options.singleplayer {
        main_requires.push(paths.game_executable(options.game));
    }

    // The desktop program lives inside the prefix, so it is not a required file.
    let (target, target_args) = match &options.wine_desktop {
        Some(size) => {
            let mut args = vec![
                OsString::from(format!("/desktop={VIRTUAL_DESKTOP_NAME},{size}")),
                target.into_os_string(),
            ];
            args.extend(target_args);
            (PathBuf::from(DESKTOP_PROGRAM), args)
        }
        None => (target, target_args),
    };

    let main = wrap(
        selection,
        &target,
        target_args,
        env.clone(),
        main_requires,
        Some(paths.game_dir.clone()),
    );

    let cleanup = options
        .kill_procs
        .then(|| stop_server(selection, env.clone()));

    let helper = report.components.presence_bridge.ready_path().map(|bridge| {
        let mut helper_env = env;
        // The overlay belongs to the game only.
        helper_env.remove("LD_PRELOAD");
        wrap(
            selection,
            bridge,
            Vec::new(),
            helper_env,
            vec![bridge.to_path_buf()],
            None,
        )
    });

    LaunchPlan {
        main,
        helper,
        cleanup,
    }
}

fn wrap(
    selection: &RuntimeSelection,
    target: &Path,
    target_args: Vec<OsString>,
    env: BTreeMap<String, String>,
    requires: Vec<PathBuf>,
    current_dir: Option<PathBuf>,
) -> CommandSpec {
    let layer = selection.layer();
    let mut direct: Vec<OsString> = Vec::new();
    if selection.is_vendor_layer() {
        direct.push("run".into());
    }
    direct.push(target.as_os_str().to_os_string());
    direct.extend(target_args);

    let (program, args) = match selection {
        RuntimeSelection::VendorManaged(_) | RuntimeSelection::SystemInstalled(_) => {
            (layer.entry_point.clone(), direct)
        }
        RuntimeSelection::Containerized { container, .. } => {
            let mut args: Vec<OsString> =
                vec!["--".into(), layer.entry_point.clone().into_os_string()];
            args.extend(direct);
            (container.launcher.clone(), args)
        }
    };

    CommandSpec {
        program,
        args,
        env,
        current_dir,
        requires,
    }
}

/// `wineserver -k` for the prefix, run with the same layer as the game.
fn stop_server(selection: &RuntimeSelection, mut env: BTreeMap<String, String>) -> CommandSpec {
    env.remove("LD_PRELOAD");
    let server = selection.wineserver();
    let (program, args) = match selection {
        RuntimeSelection::VendorManaged(_) | RuntimeSelection::SystemInstalled(_) => {
            (server, vec![OsString::from("-k")])
        }
        RuntimeSelection::Containerized { container, .. } => (
            container.launcher.clone(),
            vec!["--".into(), server.into_os_string(), "-k".into()],
        ),
    };
    CommandSpec {
        program,
        args,
        env,
        current_dir: None,
        requires: Vec::new(),
    }
}

/// `-rdevice`, fixed flags, then the user's options.
pub fn game_arguments(options: &LaunchOptions) -> Vec<String> {
    let mut args = Vec::new();
    match options.rendering_backend {
        RenderingBackend::Dx11 => args.extend(["-rdevice".to_string(), "dx11".to_string()]),
        RenderingBackend::Gl => args.extend(["-rdevice".to_string(), "gl".to_string()]),
        RenderingBackend::Auto => {}
    }
    args.push("-nointro".to_string());
    args.push("-64bit".to_string());
    args.extend(options.game_options.iter().cloned());
    args
}

pub fn environment_overlay(
    options: &LaunchOptions,
    paths: &ResolvedPaths,
    report: &EnvironmentReport,
) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    let selection = &report.selection;
    let app_id = options.game.steam_app_id().to_string();

    env.insert(
        "WINEPREFIX".to_string(),
        path_str(&report.prefix.wine_prefix()),
    );
    env.insert("SteamAppId".to_string(), app_id.clone());
    env.insert("SteamGameId".to_string(), app_id);
    env.insert(
        "WINEDEBUG".to_string(),
        if options.verbose { "fixme-all" } else { "-all" }.to_string(),
    );

    if selection.is_vendor_layer() {
        let layer_root = &selection.layer().root;
        env.insert(
            "STEAM_COMPAT_DATA_PATH".to_string(),
            path_str(&report.prefix.root),
        );
        env.insert(
            "STEAM_COMPAT_CLIENT_INSTALL_PATH".to_string(),
            path_str(paths.steam_dir.as_deref().unwrap_or(&paths.data_dir)),
        );
        let libs = format!(
            "{}:{}",
            path_str(&layer_root.join("files/lib64")),
            path_str(&layer_root.join("files/lib"))
        );
        env.insert("LD_LIBRARY_PATH".to_string(), append_env_path("LD_LIBRARY_PATH", &libs));
    } else {
        env.insert("WINEARCH".to_string(), "win64".to_string());
    }

    if report.components.d3dcompiler.is_ready() {
        env.insert("WINEDLLOVERRIDES".to_string(), "d3dcompiler_47=n".to_string());
    }
    if options.wined3d {
        env.insert("PROTON_USE_WINED3D".to_string(), "1".to_string());
    }
    if let Some(shim) = report.components.overlay.ready_path() {
        env.insert("LD_PRELOAD".to_string(), append_env_path("LD_PRELOAD", &path_str(shim)));
    }
    if options.verbose {
        env.insert("PROTON_LOG".to_string(), "1".to_string());
    }
    if options.fullscreen_upscaling {
        env.insert("WINE_FULLSCREEN_FSR".to_string(), "1".to_string());
    }
    env
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Prepends `value` to the inherited `var_name` list.
fn append_env_path(var_name: &str, value: &str) -> String {
    match std::env::var(var_name) {
        Ok(existing) if !existing.trim().is_empty() => format!("{value}:{existing}"),
        _ => value.to_string(),
    }
}

fn shell_escape(raw: &str) -> String {
    if raw.is_empty() {
        return "\"\"".to_string();
    }

    if raw
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '/' | ':' | '='))
    {
        return raw.to_string();
    }

    format!("\"{}\"", raw.replace('"', "\\\""))
}
