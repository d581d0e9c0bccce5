//! Command-line interface handling for the Meridian zone cluster.
//!
//! This module provides command-line argument parsing and CLI interface
//! management using the `clap` crate for robust argument handling.

use clap::{Arg, Command};
use std::path::PathBuf;

/// Command line arguments parsed from user input.
///
/// This structure holds all the command-line options that can be used to
/// override configuration file settings or provide runtime parameters.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for the zone grid, as "COLSxROWS"
    pub grid: Option<String>,
    /// Optional override for the base network port
    pub base_port: Option<u16>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
}

impl CliArgs {
    /// Parses command line arguments using clap.
    ///
    /// Sets up the command-line interface with all available options and
    /// returns a structured representation of the parsed arguments.
    ///
    /// # Returns
    ///
    /// A `CliArgs` instance containing all parsed command-line options.
    pub fn parse() -> Self {
        let matches = Command::new("Meridian Zone Cluster")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Authoritative shard cluster with seamless zone handoff")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path")
                    .default_value("config.toml"),
            )
            .arg(
                Arg::new("grid")
                    .short('g')
                    .long("grid")
                    .value_name("COLSxROWS")
                    .help("Zone grid dimensions (e.g., 2x2)"),
            )
            .arg(
                Arg::new("base-port")
                    .short('p')
                    .long("base-port")
                    .value_name("PORT")
                    .help("Base network port; zone N listens on PORT + N")
                    .value_parser(clap::value_parser!(u16)),
            )
            .arg(
                Arg::new("log-level")
                    .short('l')
                    .long("log-level")
                    .value_name("LEVEL")
                    .help("Log level (trace, debug, info, warn, error)"),
            )
            .arg(
                Arg::new("json-logs")
                    .long("json-logs")
                    .help("Output logs in JSON format")
                    .action(clap::ArgAction::SetTrue),
            )
            .get_matches();

        Self {
            config_path: PathBuf::from(
                matches
                    .get_one::<String>("config")
                    .expect("Default config path should always be set"),
            ),
            grid: matches.get_one::<String>("grid").cloned(),
            base_port: matches.get_one::<u16>("base-port").copied(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
        }
    }

    /// Parses the `--grid` override into column and row counts.
    ///
    /// # Returns
    ///
    /// `Ok(Some((cols, rows)))` when the flag was given and well-formed,
    /// `Ok(None)` when it was absent, or an error string for malformed input.
    pub fn grid_dimensions(&self) -> Result<Option<(u32, u32)>, String> {
        let Some(grid) = &self.grid else {
            return Ok(None);
        };
        let parsed = grid
            .split_once(['x', 'X'])
            .and_then(|(cols, rows)| Some((cols.parse().ok()?, rows.parse().ok()?)));
        match parsed {
            Some((cols, rows)) if cols > 0 && rows > 0 => Ok(Some((cols, rows))),
            _ => Err(format!("Invalid grid dimensions: {grid} (expected COLSxROWS)")),
        }
    }
}
