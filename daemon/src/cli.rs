use clap::{CommandFactory, Parser, Subcommand};

use crate::paths::AppPaths;

/// Watches for a docking station and applies per-state device, Bluetooth, audio and
/// display settings.
#[derive(Debug, Parser)]
#[command(name = "dock-monitor", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Run the monitor in the foreground
    Run,
    /// Start the monitor automatically at login
    Install,
    /// Remove the login registration
    Uninstall,
    /// Dock detection wizard: records the dock's VID/PID tokens
    Detect,
    /// Print the ids of all present devices
    ListUsb,
    /// Exit code 0 if docked, 1 if undocked
    Test,
    /// Execute the docked actions from the config once
    Docked,
    /// Execute the undocked actions from the config once
    Undocked,
    /// Restart the Bluetooth adapter
    RestartBt,
    /// Connect a paired Bluetooth device
    ConnectBt {
        /// MAC address, e.g. 80:39:8C:6A:92:D3
        mac: String,
    },
    /// List paired Bluetooth devices
    ListBt,
    /// Choose default audio devices for the docked and undocked profiles
    SetAudio,
}

/// Prints usage followed by the file locations.
pub fn print_help(paths: Option<&AppPaths>) {
    let _ = Cli::command().print_help();
    println!();
    if let Some(paths) = paths {
        println!("Config: {}", paths.config_file().display());
        println!("Data:   {}", paths.data_dir.display());
        println!("Logs:   {}", paths.log_dir().display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Option<Command> {
        Cli::try_parse_from(std::iter::once("dock-monitor").chain(args.iter().copied()))
            .unwrap()
            .command
    }

    #[test]
    fn no_arguments_means_no_command() {
        assert_eq!(parse(&[]), None);
    }

    #[test]
    fn subcommands_are_kebab_case() {
        assert_eq!(parse(&["list-usb"]), Some(Command::ListUsb));
        assert_eq!(parse(&["restart-bt"]), Some(Command::RestartBt));
        assert_eq!(parse(&["set-audio"]), Some(Command::SetAudio));
        assert_eq!(parse(&["list-bt"]), Some(Command::ListBt));
    }

    #[test]
    fn connect_bt_takes_a_mac() {
        assert_eq!(
            parse(&["connect-bt", "80:39:8C:6A:92:D3"]),
            Some(Command::ConnectBt {
                mac: "80:39:8C:6A:92:D3".to_string()
            })
        );
        assert!(Cli::try_parse_from(["dock-monitor", "connect-bt"]).is_err());
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert!(Cli::try_parse_from(["dock-monitor", "frobnicate"]).is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
