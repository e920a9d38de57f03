//! CLI command definitions and handlers

mod config;
mod grab;
mod status;
mod watch;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parse a `YYYY-MM-DD` argument
fn parse_day(s: &str) -> Result<NaiveDate, String> {
    histmine::config::parse_date(s).map_err(|e| e.to_string())
}

/// histmine - mine version-control history into a file event log
#[derive(Parser, Debug)]
#[command(name = "histmine")]
#[command(
    version,
    about = "Mine version-control history into a CSV log of file change events",
    after_help = "\
Examples:
  histmine grab                               Grab the configured range (last 3 months by default)
  histmine grab --from 2024-01-01             Extend the log back to January
  histmine grab --track-size                  Also record lines added/removed per file
  histmine status                             Show what the log covers
  histmine watch                              Grab again whenever HEAD or a branch moves
  histmine config set grab_on_vcs_update true Enable grabbing on repository updates"
)]
pub struct Cli {
    /// Path to repository (default: current directory)
    #[arg(global = true, default_value = ".")]
    pub path: PathBuf,

    /// Log level (error, warn, info, debug, trace); RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "warn", value_parser = ["error", "warn", "info", "debug", "trace"])]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Mine history for a date range into the event log
    ///
    /// Only days not already in the log are mined. Given options are saved
    /// as the repository's settings for later grabs.
    Grab {
        /// First day to include (YYYY-MM-DD)
        #[arg(long, value_parser = parse_day)]
        from: Option<NaiveDate>,

        /// Last day to include (YYYY-MM-DD, default: today)
        #[arg(long, value_parser = parse_day)]
        to: Option<NaiveDate>,

        /// Event log file
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,

        /// Record lines added/removed per file (slower)
        #[arg(long, conflicts_with = "no_track_size")]
        track_size: bool,

        /// Do not record change sizes
        #[arg(long)]
        no_track_size: bool,
    },

    /// Watch the repository and grab after each update, at most once a day
    Watch,

    /// Show the event log location and the history it covers
    Status,

    /// Manage per-repository settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the settings for this repository
    Show,
    /// Print the config file location
    Path,
    /// Set a value
    Set {
        /// Key (output_file_path, from, to, grab_on_vcs_update, grab_change_size_in_lines)
        key: String,
        /// Value to set
        value: String,
    },
}

/// Run the CLI command
pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Some(Commands::Grab {
            from,
            to,
            output,
            track_size,
            no_track_size,
        }) => {
            let track = match (track_size, no_track_size) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            grab::run(
                &cli.path,
                grab::GrabArgs {
                    from,
                    to,
                    output,
                    track_size: track,
                },
            )
        }
        Some(Commands::Watch) => watch::run(&cli.path),
        Some(Commands::Status) | None => status::run(&cli.path),
        Some(Commands::Config { action }) => config::run(&cli.path, action),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_day() {
        assert_eq!(parse_day("2024-02-29"), Ok(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()));
        assert!(parse_day("2023-02-29").is_err());
        assert!(parse_day("last week").is_err());
    }

    #[test]
    fn test_grab_flags() {
        let cli = Cli::try_parse_from(["histmine", "grab", "--from", "2024-01-01", "--track-size"]).unwrap();
        match cli.command {
            Some(Commands::Grab { from, track_size, no_track_size, .. }) => {
                assert_eq!(from, NaiveDate::from_ymd_opt(2024, 1, 1));
                assert!(track_size);
                assert!(!no_track_size);
            }
            other => panic!("unexpected command: {other:?}"),
        }

        assert!(Cli::try_parse_from(["histmine", "grab", "--track-size", "--no-track-size"]).is_err());
        assert!(Cli::try_parse_from(["histmine", "grab", "--from", "01/02/2024"]).is_err());
    }

    #[test]
    fn test_path_is_global() {
        let cli = Cli::try_parse_from(["histmine", "status", "/tmp/repo"]).unwrap();
        assert_eq!(cli.path, PathBuf::from("/tmp/repo"));
        assert_eq!(cli.log_level, "warn");
    }
}
