mod cli;
mod commands;
mod core;

use std::fs::File;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::{LaunchReport, Orchestrator, StageResult, UpdateReport};
use crate::core::auth;
use crate::core::cancel::CancelSignal;
use crate::core::config::{load_layer, LaunchOptions};
use crate::core::environment::AuxiliarySources;
use crate::core::error::{ErrorCategory, LauncherError, LauncherResult};
use crate::core::http::HttpTransport;
use crate::core::launch::SessionState;
use crate::core::paths::ResolvedPaths;
use crate::core::steam;

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let mut options = match load_options(&cli) {
        Ok(options) => options,
        Err(err) => return fail(&err, ErrorCategory::Usage),
    };
    if let Err(err) = init_tracing(&options) {
        return fail(&err, ErrorCategory::Usage);
    }
    info!("convoy {} starting", env!("CARGO_PKG_VERSION"));

    if let Err(err) = apply_login_account(&mut options) {
        return fail(&err, ErrorCategory::Usage);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(source) => return fail(&LauncherError::Other(source.to_string()), ErrorCategory::Usage),
    };
    ExitCode::from(runtime.block_on(dispatch(cli.command, options)))
}

/// defaults < config file < command line
fn load_options(cli: &Cli) -> LauncherResult<LaunchOptions> {
    let mut layer = load_layer(cli.options.config.as_deref())?;
    layer.merge(&cli.options.to_layer());
    Ok(LaunchOptions::from_layer(&layer)?)
}

/// An explicit `--account` wins over the login file. A named login file
/// must be readable; a discovered one is used only if it is.
fn apply_login_account(options: &mut LaunchOptions) -> LauncherResult<()> {
    if options.account.is_some() {
        return Ok(());
    }
    let (login_file, account) = match &options.login_file {
        Some(path) => (path.clone(), auth::read_account(path)?),
        None => {
            let steam_dir = options.steam_dir.clone().or_else(steam::detect_steam_dir);
            let Some(path) = steam::find_login_file(steam_dir.as_deref()) else {
                return Ok(());
            };
            match auth::read_account(&path) {
                Ok(account) => (path, account),
                Err(err) => {
                    warn!("Ignoring login file: {}", err);
                    return Ok(());
                }
            }
        }
    };
    if let Some(account) = &account {
        info!("Using account {} from {:?}", account, login_file);
    }
    options.account = account;
    Ok(())
}

fn init_tracing(options: &LaunchOptions) -> LauncherResult<()> {
    let default_filter = if options.verbose {
        "info,convoy_lib=debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    match &options.log_file {
        Some(path) => {
            let file = File::create(path).map_err(|source| LauncherError::io(path, source))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

async fn dispatch(command: Commands, options: LaunchOptions) -> u8 {
    let cancel = CancelSignal::new();
    cancel.cancel_on_ctrl_c();

    let paths = ResolvedPaths::resolve(&options);
    let transport = match HttpTransport::with_default_client() {
        Ok(transport) => transport,
        Err(err) => return report_error(&err, ErrorCategory::Usage),
    };
    let sources = match AuxiliarySources::pinned() {
        Ok(sources) => sources,
        Err(err) => return report_error(&err, ErrorCategory::Usage),
    };

    let orchestrator = Orchestrator::new(options, paths, Arc::new(transport), sources, cancel)
        .with_search_path(std::env::var_os("PATH"));

    match command {
        Commands::Update => finish(orchestrator.update().await, |report| {
            print_update(report);
            0
        }),
        Commands::Launch => finish(orchestrator.launch().await, |report| {
            print_launch(report);
            report.exit_code()
        }),
        Commands::Start => finish(orchestrator.start().await, |report| {
            if let Some(update) = &report.update {
                print_update(update);
            }
            print_launch(&report.launch);
            report.launch.exit_code()
        }),
        Commands::Status => finish(orchestrator.status().await, |report| {
            println!("{report}");
            0
        }),
    }
}

fn finish<T>(result: StageResult<T>, on_success: impl FnOnce(&T) -> u8) -> u8 {
    match result {
        Ok(report) => on_success(&report),
        Err(err) => report_error(&err.source, err.stage),
    }
}

fn report_error(err: &LauncherError, stage: ErrorCategory) -> u8 {
    error!("{}", err);
    eprintln!("convoy: {err}");
    err.category_in(stage).exit_code()
}

/// Failures before logging is up go straight to stderr.
fn fail(err: &LauncherError, stage: ErrorCategory) -> ExitCode {
    eprintln!("convoy: {err}");
    ExitCode::from(err.category_in(stage).exit_code())
}

fn print_advisories(advisories: &[String]) {
    for advisory in advisories {
        println!("warning: {advisory}");
    }
}

fn print_update(report: &UpdateReport) {
    print_advisories(&report.advisories);
    match &report.recorded {
        Some(version) => println!(
            "Mod loader {} installed ({} files downloaded)",
            version,
            report.published.len()
        ),
        None => println!("Mod loader up to date"),
    }
}

fn print_launch(report: &LaunchReport) {
    print_advisories(&report.environment.advisories);
    match report.session.state {
        SessionState::Exited { code } => println!("Game exited with code {code}"),
        SessionState::Crashed { signal: Some(signal) } => {
            println!("Game was terminated by signal {signal}")
        }
        SessionState::Crashed { signal: None } => println!("Game ended abnormally"),
        SessionState::Killed => println!("Game stopped"),
        SessionState::Created | SessionState::Running => {}
    }
}
