mod actions;
mod classifier;
mod cli;
mod commands;
mod config;
mod delay;
mod error;
mod host;
mod inventory;
mod logging;
mod monitor;
mod paths;
mod restart;
mod startup;
mod status;
mod wizard;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::{error, warn};

use crate::actions::audio::NativeAudio;
use crate::actions::bluetooth::NativeBluetooth;
use crate::actions::device_restart::NativeDeviceRestarter;
use crate::actions::{ActionPipeline, Capabilities};
use crate::cli::{Cli, Command};
use crate::inventory::NativeInventory;
use crate::monitor::DockState;
use crate::paths::AppPaths;

/// Loads the config for a one-shot command, creating the default file on first use.
fn load_config(paths: &AppPaths) -> Result<config::Config> {
    paths.ensure_data_dir()?;
    config::ensure_default_exists(&paths.config_file())?;
    Ok(config::load_lenient(&paths.config_file()))
}

async fn apply_state(paths: &AppPaths, state: DockState, out: &mut std::io::Stdout) -> Result<i32> {
    let config = load_config(paths)?;
    let pipeline = ActionPipeline::new(Capabilities::native());
    commands::apply_state(&pipeline, state, &config, out).await
}

async fn execute(command: Command) -> Result<i32> {
    let paths = AppPaths::from_env()?;
    let mut out = std::io::stdout();

    match command {
        Command::Run => {
            host::run(paths).await?;
            Ok(0)
        }
        Command::Install => {
            startup::install()?;
            println!("Installed: dock-monitor will start at login.");
            Ok(0)
        }
        Command::Uninstall => {
            startup::uninstall()?;
            println!("Uninstalled.");
            Ok(0)
        }
        Command::Detect => {
            paths.ensure_data_dir()?;
            config::ensure_default_exists(&paths.config_file())?;
            wizard::detect::run(
                &NativeInventory,
                &mut std::io::stdin().lock(),
                &mut out,
                &paths.config_file(),
            )
        }
        Command::ListUsb => commands::list_devices(&NativeInventory, &mut out),
        Command::Test => {
            let config = load_config(&paths)?;
            commands::test_docked(&NativeInventory, &config, &mut out)
        }
        Command::Docked => apply_state(&paths, DockState::Docked, &mut out).await,
        Command::Undocked => apply_state(&paths, DockState::Undocked, &mut out).await,
        Command::RestartBt => {
            let adapter = inventory::bluetooth_adapter_instance_id()?;
            commands::restart_bluetooth(&NativeDeviceRestarter, adapter, &mut out)
        }
        Command::ConnectBt { mac } => commands::connect_bluetooth(&NativeBluetooth, &mac, &mut out),
        Command::ListBt => commands::list_bluetooth(&NativeBluetooth, &mut out),
        Command::SetAudio => {
            paths.ensure_data_dir()?;
            config::ensure_default_exists(&paths.config_file())?;
            wizard::audio::run(
                &NativeAudio,
                &mut std::io::stdin().lock(),
                &mut out,
                &paths.config_file(),
            )
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let Some(command) = cli.command else {
        cli::print_help(AppPaths::from_env().ok().as_ref());
        return ExitCode::SUCCESS;
    };

    // ── Logging ───────────────────────────────────────────────────────────────
    // The monitor also logs to a rolling file; the guard must outlive the host.
    let _log_guard = match (&command, AppPaths::from_env()) {
        (Command::Run, Ok(paths)) => match logging::init_with_file(&paths.log_dir()) {
            Ok(guard) => Some(guard),
            Err(e) => {
                logging::init_console();
                warn!("File logging unavailable: {e:#}");
                None
            }
        },
        _ => {
            logging::init_console();
            None
        }
    };

    // ── Dispatch ──────────────────────────────────────────────────────────────
    match execute(command).await {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
