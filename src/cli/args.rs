//! CLI argument definitions using Clap

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::domain::config::EngineConfig;
use crate::domain::session::LocationSnapshot;

/// Continuo - audio journals that survive interruptions
#[derive(Parser, Debug)]
#[command(name = "continuo")]
#[command(version)]
#[command(about = "Records audio journals that survive calls, device loss, and backgrounding")]
#[command(long_about = None)]
pub struct Cli {
    /// Directory for finished recordings
    #[arg(short = 'o', long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// File stem for the finished recording (default: timestamp)
    #[arg(short = 'l', long, value_name = "NAME")]
    pub label: Option<String>,

    /// Geotag the recording, decimal degrees as "lat,lon"
    #[arg(long, value_name = "LAT,LON")]
    pub location: Option<String>,

    /// Hard stop after this long (e.g. 3h, 90m)
    #[arg(long, value_name = "TIME")]
    pub max_duration: Option<String>,

    /// Disable desktop notifications
    #[arg(long)]
    pub no_notify: bool,

    /// Config subcommand
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config action subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Create config file with defaults
    Init,
    /// Set a config value
    Set {
        /// Config key
        key: String,
        /// Config value
        value: String,
    },
    /// Get a config value
    Get {
        /// Config key
        key: String,
    },
    /// List all config values
    List,
    /// Show config file path
    Path,
}

/// Resolved options for a recording run
#[derive(Debug, Clone)]
pub struct RecordOptions {
    pub output_dir: PathBuf,
    pub label: Option<String>,
    pub location: Option<LocationSnapshot>,
    pub notify: bool,
    pub engine: EngineConfig,
}

/// Valid config keys
pub const VALID_CONFIG_KEYS: &[&str] = &[
    "output_dir",
    "notify",
    "tuning.short_call_threshold",
    "tuning.decision_timeout",
    "tuning.mic_poll_interval",
    "tuning.mic_wait_limit",
    "tuning.soft_checkpoint_interval",
    "tuning.hard_checkpoint_interval",
    "tuning.silence_threshold_dbfs",
    "tuning.max_duration",
    "tuning.duration_warning",
    "tuning.storage_warn_mb",
    "tuning.storage_stop_mb",
    "tuning.battery_warn_percent",
    "tuning.battery_stop_percent",
];

/// Check if a config key is valid
pub fn is_valid_config_key(key: &str) -> bool {
    VALID_CONFIG_KEYS.contains(&key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_defaults() {
        let cli = Cli::parse_from(["continuo"]);
        assert!(cli.output_dir.is_none());
        assert!(cli.label.is_none());
        assert!(cli.location.is_none());
        assert!(cli.max_duration.is_none());
        assert!(!cli.no_notify);
        assert!(cli.command.is_none());
    }

    #[test]
    fn cli_parses_output_dir_and_label() {
        let cli = Cli::parse_from(["continuo", "-o", "/tmp/journals", "-l", "standup"]);
        assert_eq!(cli.output_dir, Some(PathBuf::from("/tmp/journals")));
        assert_eq!(cli.label, Some("standup".to_string()));
    }

    #[test]
    fn cli_parses_location() {
        let cli = Cli::parse_from(["continuo", "--location", "59.33,18.07"]);
        assert_eq!(cli.location, Some("59.33,18.07".to_string()));
    }

    #[test]
    fn cli_parses_max_duration() {
        let cli = Cli::parse_from(["continuo", "--max-duration", "90m"]);
        assert_eq!(cli.max_duration, Some("90m".to_string()));
    }

    #[test]
    fn cli_parses_no_notify() {
        let cli = Cli::parse_from(["continuo", "--no-notify"]);
        assert!(cli.no_notify);
    }

    #[test]
    fn cli_parses_config_init() {
        let cli = Cli::parse_from(["continuo", "config", "init"]);
        assert!(matches!(
            cli.command,
            Some(Commands::Config {
                action: ConfigAction::Init
            })
        ));
    }

    #[test]
    fn cli_parses_config_set() {
        let cli = Cli::parse_from(["continuo", "config", "set", "notify", "false"]);
        if let Some(Commands::Config {
            action: ConfigAction::Set { key, value },
        }) = cli.command
        {
            assert_eq!(key, "notify");
            assert_eq!(value, "false");
        } else {
            panic!("Expected Config Set command");
        }
    }

    #[test]
    fn valid_config_keys() {
        assert!(is_valid_config_key("output_dir"));
        assert!(is_valid_config_key("notify"));
        assert!(is_valid_config_key("tuning.decision_timeout"));
        assert!(is_valid_config_key("tuning.battery_stop_percent"));
        assert!(!is_valid_config_key("api_key"));
        assert!(!is_valid_config_key("tuning.bogus"));
    }

    #[test]
    fn verify_cli() {
        // Verify the CLI definition is valid
        Cli::command().debug_assert();
    }
}
