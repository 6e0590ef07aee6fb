//! Continuo CLI entry point

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use continuo::cli::{
    app::{load_merged_config, run_record, EXIT_ERROR, EXIT_USAGE_ERROR},
    args::{Cli, Commands, RecordOptions},
    config_cmd::handle_config_command,
    presenter::Presenter,
};
use continuo::domain::config::{AppConfig, TuningConfig};
use continuo::domain::duration::Duration;
use continuo::domain::session::LocationSnapshot;
use continuo::infrastructure::XdgConfigStore;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    let presenter = Presenter::new();

    // Handle subcommands
    if let Some(Commands::Config { action }) = cli.command {
        let store = XdgConfigStore::new();
        if let Err(e) = handle_config_command(action, &store, &presenter).await {
            presenter.error(&e.to_string());
            return ExitCode::from(EXIT_ERROR);
        }
        return ExitCode::SUCCESS;
    }

    // Parse the location flag before spinning anything up
    let location = match cli.location.as_deref() {
        Some(s) => match s.parse::<LocationSnapshot>() {
            Ok(loc) => Some(loc),
            Err(e) => {
                presenter.error(&e);
                return ExitCode::from(EXIT_USAGE_ERROR);
            }
        },
        None => None,
    };

    // A malformed duration must not fall back to the default silently
    if let Some(spec) = cli.max_duration.as_deref() {
        if let Err(e) = spec.parse::<Duration>() {
            presenter.error(&format!("Invalid duration \"{}\": {}", spec, e));
            return ExitCode::from(EXIT_USAGE_ERROR);
        }
    }

    // Build CLI config from args
    let cli_config = AppConfig {
        output_dir: cli
            .output_dir
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned()),
        notify: if cli.no_notify { Some(false) } else { None },
        tuning: cli.max_duration.clone().map(|d| TuningConfig {
            max_duration: Some(d),
            ..Default::default()
        }),
    };

    // Merge config
    let config = load_merged_config(cli_config).await;

    let engine = config.engine_config();
    if let Err(e) = engine.validate() {
        presenter.error(&e.to_string());
        return ExitCode::from(EXIT_USAGE_ERROR);
    }

    let output_dir = config
        .output_dir
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(default_output_dir);

    let options = RecordOptions {
        output_dir,
        label: cli.label.clone(),
        location,
        notify: config.notify_or_default(),
        engine,
    };

    run_record(options).await
}

/// Recordings land under the user's audio directory unless configured.
fn default_output_dir() -> PathBuf {
    dirs::audio_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("continuo")
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
