//! CLI struct definitions for the multiquery command-line interface.

use crate::core::config::{DEFAULT_CONFIG_FILE, DebugFlags, ExcludeFlags, RunOptions};

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "multiquery",
    version = env!("CARGO_PKG_VERSION"),
    about = "Run a named query or query group against every connected collection node and gather the results into one delimited file per query."
)]
pub(crate) struct Cli {
    /// Query type: 's' for a single named query, 'g' for a query group.
    #[clap(short = 't', long = "type", value_enum)]
    pub query_type: QueryType,
    /// Name of the query or query group (case-sensitive).
    #[clap(short = 'n', long = "name")]
    pub name: String,
    /// Log verbose runtime information.
    #[clap(short = 'i', long = "info")]
    pub info: bool,
    /// Debug logging: n (node calls), g (general), d (directory). No letters enables all.
    #[clap(
        short = 'd',
        long = "debug",
        num_args = 0..=1,
        default_missing_value = "",
        value_parser = DebugFlags::parse
    )]
    pub debug: Option<DebugFlags>,
    /// Exclude operations: f (output files). No letters excludes all.
    #[clap(
        short = 'x',
        long = "exclude",
        num_args = 0..=1,
        default_missing_value = "",
        value_parser = ExcludeFlags::parse
    )]
    pub exclude: Option<ExcludeFlags>,
    /// Main configuration file.
    #[clap(long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum QueryType {
    /// A single named query.
    #[value(name = "s")]
    Single,
    /// A named query group.
    #[value(name = "g")]
    Group,
}

impl Cli {
    pub fn is_group(&self) -> bool {
        self.query_type == QueryType::Group
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions::new(
            self.info,
            self.debug.unwrap_or_default(),
            self.exclude.unwrap_or_default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_debug_enables_everything() {
        let cli = Cli::try_parse_from(["multiquery", "-t", "g", "-n", "daily", "-d"]).unwrap();
        assert!(cli.is_group());
        let options = cli.run_options();
        assert_eq!(options.debug, DebugFlags::all());
        assert!(options.verbose);
        assert!(!options.exclude.files);
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
    }

    #[test]
    fn letters_select_components() {
        let cli =
            Cli::try_parse_from(["multiquery", "-t", "s", "-n", "q", "-d", "nd", "-x", "f"]).unwrap();
        assert!(!cli.is_group());
        let options = cli.run_options();
        assert!(options.debug.node && options.debug.directory && !options.debug.general);
        assert!(options.exclude.files);
    }

    #[test]
    fn rejects_unknown_letters_and_types() {
        assert!(Cli::try_parse_from(["multiquery", "-t", "s", "-n", "q", "-d", "z"]).is_err());
        assert!(Cli::try_parse_from(["multiquery", "-t", "x", "-n", "q"]).is_err());
        assert!(Cli::try_parse_from(["multiquery", "-t", "s"]).is_err());
    }
}
