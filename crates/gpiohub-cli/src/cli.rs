//! Command-line arguments.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// GPIO gateway daemon.
#[derive(Debug, Parser)]
#[command(name = "gpiohubd", version, about)]
pub struct Cli {
    /// Configuration file.
    #[arg(short, long, env = "GPIOHUB_CONFIG", default_value = "gpiohub.toml")]
    pub config: PathBuf,

    /// Line backend.
    #[arg(short, long, env = "GPIOHUB_BACKEND", value_enum, default_value_t = BackendKind::Mock)]
    pub backend: BackendKind,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// Simulated board built from the configured pins.
    Mock,
    /// Linux GPIO character devices.
    Gpiod,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["gpiohubd"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("gpiohub.toml"));
        assert_eq!(cli.backend, BackendKind::Mock);
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_flags() {
        let cli = Cli::try_parse_from(["gpiohubd", "-c", "/etc/gpiohub.toml", "-b", "gpiod", "-vv"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/gpiohub.toml"));
        assert_eq!(cli.backend, BackendKind::Gpiod);
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_verify_command() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
