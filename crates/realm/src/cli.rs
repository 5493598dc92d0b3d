//! Command-line interface for the Realm server.

use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;

/// Command line arguments parsed from user input.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for the data directory
    pub data_dir: Option<PathBuf>,
    /// Log filter used when `RUST_LOG` is not set
    pub log_level: String,
    /// Whether to emit JSON log lines
    pub json_logs: bool,
    /// Exit immediately on fatal errors instead of waiting for a keystroke
    pub non_interactive: bool,
}

impl CliArgs {
    pub fn command() -> Command {
        Command::new("Realm Server")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Game world server")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path")
                    .default_value("config.toml"),
            )
            .arg(
                Arg::new("data-dir")
                    .short('d')
                    .long("data-dir")
                    .value_name("DIR")
                    .help("Data directory (overrides the configuration file)"),
            )
            .arg(
                Arg::new("log-level")
                    .short('l')
                    .long("log-level")
                    .value_name("LEVEL")
                    .help("Log level (trace, debug, info, warn, error)")
                    .default_value("info"),
            )
            .arg(
                Arg::new("json-logs")
                    .long("json-logs")
                    .help("Output logs in JSON format")
                    .action(clap::ArgAction::SetTrue),
            )
            .arg(
                Arg::new("non-interactive")
                    .long("non-interactive")
                    .help("Do not wait for a keystroke after a fatal startup error")
                    .action(clap::ArgAction::SetTrue),
            )
    }

    pub fn parse() -> Self {
        Self::from_matches(&Self::command().get_matches())
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("config.toml")),
            data_dir: matches.get_one::<String>("data-dir").map(PathBuf::from),
            log_level: matches
                .get_one::<String>("log-level")
                .cloned()
                .unwrap_or_else(|| "info".to_string()),
            json_logs: matches.get_flag("json-logs"),
            non_interactive: matches.get_flag("non-interactive"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        let matches = CliArgs::command().try_get_matches_from(args).unwrap();
        CliArgs::from_matches(&matches)
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["realm"]);
        assert_eq!(args.config_path, PathBuf::from("config.toml"));
        assert_eq!(args.data_dir, None);
        assert_eq!(args.log_level, "info");
        assert!(!args.json_logs);
        assert!(!args.non_interactive);
    }

    #[test]
    fn test_overrides() {
        let args = parse(&[
            "realm",
            "--config",
            "/etc/realm.toml",
            "-d",
            "/srv/data",
            "-l",
            "debug",
            "--json-logs",
            "--non-interactive",
        ]);
        assert_eq!(args.config_path, PathBuf::from("/etc/realm.toml"));
        assert_eq!(args.data_dir, Some(PathBuf::from("/srv/data")));
        assert_eq!(args.log_level, "debug");
        assert!(args.json_logs);
        assert!(args.non_interactive);
    }

    #[test]
    fn test_unknown_flag_is_rejected() {
        assert!(CliArgs::command()
            .try_get_matches_from(["realm", "--plugins", "x"])
            .is_err());
    }
}
