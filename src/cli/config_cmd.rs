//! Config command handler

use crate::application::ports::ConfigStore;
use crate::domain::config::TuningConfig;
use crate::domain::duration::Duration;
use crate::domain::error::ConfigError;

use super::args::{is_valid_config_key, ConfigAction, VALID_CONFIG_KEYS};
use super::presenter::Presenter;

/// Handle config subcommand
pub async fn handle_config_command<S: ConfigStore>(
    action: ConfigAction,
    store: &S,
    presenter: &Presenter,
) -> Result<(), ConfigError> {
    match action {
        ConfigAction::Init => handle_init(store, presenter).await,
        ConfigAction::Set { key, value } => handle_set(store, presenter, &key, &value).await,
        ConfigAction::Get { key } => handle_get(store, presenter, &key).await,
        ConfigAction::List => handle_list(store, presenter).await,
        ConfigAction::Path => handle_path(store, presenter),
    }
}

async fn handle_init<S: ConfigStore>(store: &S, presenter: &Presenter) -> Result<(), ConfigError> {
    store.init().await?;
    presenter.success(&format!(
        "Config file created at: {}",
        store.path().display()
    ));
    Ok(())
}

async fn handle_set<S: ConfigStore>(
    store: &S,
    presenter: &Presenter,
    key: &str,
    value: &str,
) -> Result<(), ConfigError> {
    // Validate key
    if !is_valid_config_key(key) {
        return Err(ConfigError::ValidationError {
            key: key.to_string(),
            message: format!("Unknown key. Valid keys: {}", VALID_CONFIG_KEYS.join(", ")),
        });
    }

    // Validate value based on key type
    validate_config_value(key, value)?;

    // Load existing config
    let mut config = store.load().await?;

    // Update the appropriate field
    match key {
        "output_dir" => config.output_dir = Some(value.to_string()),
        "notify" => {
            config.notify = Some(parse_bool(value).map_err(|_| ConfigError::ValidationError {
                key: key.to_string(),
                message: "Value must be 'true' or 'false'".to_string(),
            })?)
        }
        _ => {
            let tuning = config.tuning.get_or_insert_with(TuningConfig::default);
            set_tuning_value(tuning, key, value)?;
        }
    }

    // Reject combinations that would fight each other at runtime
    config.engine_config().validate()?;

    // Save config
    store.save(&config).await?;
    presenter.success(&format!("{} = {}", key, value));

    Ok(())
}

fn set_tuning_value(tuning: &mut TuningConfig, key: &str, value: &str) -> Result<(), ConfigError> {
    let bad_number = || ConfigError::ValidationError {
        key: key.to_string(),
        message: "Value must be a number".to_string(),
    };

    match key {
        "tuning.short_call_threshold" => tuning.short_call_threshold = Some(value.to_string()),
        "tuning.decision_timeout" => tuning.decision_timeout = Some(value.to_string()),
        "tuning.mic_poll_interval" => tuning.mic_poll_interval = Some(value.to_string()),
        "tuning.mic_wait_limit" => tuning.mic_wait_limit = Some(value.to_string()),
        "tuning.soft_checkpoint_interval" => {
            tuning.soft_checkpoint_interval = Some(value.to_string())
        }
        "tuning.hard_checkpoint_interval" => {
            tuning.hard_checkpoint_interval = Some(value.to_string())
        }
        "tuning.max_duration" => tuning.max_duration = Some(value.to_string()),
        "tuning.duration_warning" => tuning.duration_warning = Some(value.to_string()),
        "tuning.silence_threshold_dbfs" => {
            tuning.silence_threshold_dbfs = Some(value.parse().map_err(|_| bad_number())?)
        }
        "tuning.storage_warn_mb" => {
            tuning.storage_warn_mb = Some(value.parse().map_err(|_| bad_number())?)
        }
        "tuning.storage_stop_mb" => {
            tuning.storage_stop_mb = Some(value.parse().map_err(|_| bad_number())?)
        }
        "tuning.battery_warn_percent" => {
            tuning.battery_warn_percent = Some(value.parse().map_err(|_| bad_number())?)
        }
        "tuning.battery_stop_percent" => {
            tuning.battery_stop_percent = Some(value.parse().map_err(|_| bad_number())?)
        }
        _ => {
            return Err(ConfigError::ValidationError {
                key: key.to_string(),
                message: "Unknown tuning key".to_string(),
            })
        }
    }
    Ok(())
}

async fn handle_get<S: ConfigStore>(
    store: &S,
    presenter: &Presenter,
    key: &str,
) -> Result<(), ConfigError> {
    // Validate key
    if !is_valid_config_key(key) {
        return Err(ConfigError::ValidationError {
            key: key.to_string(),
            message: format!("Unknown key. Valid keys: {}", VALID_CONFIG_KEYS.join(", ")),
        });
    }

    let config = store.load().await?;

    let value = match key {
        "output_dir" => config.output_dir.clone(),
        "notify" => config.notify.map(|b| b.to_string()),
        _ => config
            .tuning
            .as_ref()
            .and_then(|t| tuning_value(t, key)),
    };

    match value {
        Some(v) => presenter.output(&v),
        None => presenter.output("(not set)"),
    }

    Ok(())
}

fn tuning_value(tuning: &TuningConfig, key: &str) -> Option<String> {
    match key {
        "tuning.short_call_threshold" => tuning.short_call_threshold.clone(),
        "tuning.decision_timeout" => tuning.decision_timeout.clone(),
        "tuning.mic_poll_interval" => tuning.mic_poll_interval.clone(),
        "tuning.mic_wait_limit" => tuning.mic_wait_limit.clone(),
        "tuning.soft_checkpoint_interval" => tuning.soft_checkpoint_interval.clone(),
        "tuning.hard_checkpoint_interval" => tuning.hard_checkpoint_interval.clone(),
        "tuning.max_duration" => tuning.max_duration.clone(),
        "tuning.duration_warning" => tuning.duration_warning.clone(),
        "tuning.silence_threshold_dbfs" => tuning.silence_threshold_dbfs.map(|v| v.to_string()),
        "tuning.storage_warn_mb" => tuning.storage_warn_mb.map(|v| v.to_string()),
        "tuning.storage_stop_mb" => tuning.storage_stop_mb.map(|v| v.to_string()),
        "tuning.battery_warn_percent" => tuning.battery_warn_percent.map(|v| v.to_string()),
        "tuning.battery_stop_percent" => tuning.battery_stop_percent.map(|v| v.to_string()),
        _ => None,
    }
}

async fn handle_list<S: ConfigStore>(store: &S, presenter: &Presenter) -> Result<(), ConfigError> {
    let config = store.load().await?;

    for key in VALID_CONFIG_KEYS {
        let value = match *key {
            "output_dir" => config.output_dir.clone(),
            "notify" => config.notify.map(|b| b.to_string()),
            _ => config.tuning.as_ref().and_then(|t| tuning_value(t, key)),
        };
        presenter.key_value(key, value.as_deref().unwrap_or("(not set)"));
    }

    Ok(())
}

fn handle_path<S: ConfigStore>(store: &S, presenter: &Presenter) -> Result<(), ConfigError> {
    presenter.output(&store.path().to_string_lossy());
    Ok(())
}

/// Validate a config value based on key type
fn validate_config_value(key: &str, value: &str) -> Result<(), ConfigError> {
    let invalid = |message: String| ConfigError::ValidationError {
        key: key.to_string(),
        message,
    };

    match key {
        "tuning.short_call_threshold"
        | "tuning.decision_timeout"
        | "tuning.mic_poll_interval"
        | "tuning.mic_wait_limit"
        | "tuning.soft_checkpoint_interval"
        | "tuning.hard_checkpoint_interval"
        | "tuning.max_duration"
        | "tuning.duration_warning" => {
            value
                .parse::<Duration>()
                .map_err(|e| invalid(e.to_string()))?;
        }
        "notify" => {
            parse_bool(value)
                .map_err(|_| invalid("Value must be 'true' or 'false'".to_string()))?;
        }
        "tuning.silence_threshold_dbfs" => {
            let level: f32 = value
                .parse()
                .map_err(|_| invalid("Value must be a number".to_string()))?;
            if level > 0.0 {
                return Err(invalid("dBFS levels are zero or negative".to_string()));
            }
        }
        "tuning.storage_warn_mb" | "tuning.storage_stop_mb" => {
            let mb: u64 = value
                .parse()
                .map_err(|_| invalid("Value must be a whole number of megabytes".to_string()))?;
            if mb == 0 {
                return Err(invalid("Value must be at least 1".to_string()));
            }
        }
        "tuning.battery_warn_percent" | "tuning.battery_stop_percent" => {
            let percent: u8 = value
                .parse()
                .map_err(|_| invalid("Value must be a whole number".to_string()))?;
            if percent > 100 {
                return Err(invalid("Value must be between 0 and 100".to_string()));
            }
        }
        _ => {} // output_dir accepts any string
    }
    Ok(())
}

/// Parse a boolean value
fn parse_bool(value: &str) -> Result<bool, ()> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(()),
    }
}
