//! Config command - show or edit configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager};
use crate::error::{StagehandError, StagehandResult};
use crate::ui::{self, UiContext};

const VALID_KEYS: &[&str] = &[
    "general.log_format",
    "stage.build_stage",
    "stage.locks",
    "stage.lock_timeout_secs",
    "stage.checksum",
    "stage.source_cache",
    "stage.cmake_ext_build",
];

/// Execute the config command
pub async fn execute(
    args: ConfigArgs,
    config: &Config,
    manager: &ConfigManager,
) -> StagehandResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config)?,
        Some(ConfigAction::Path) => println!("{}", manager.path().display()),
        Some(ConfigAction::Init { force }) => init_config(manager, force).await?,
        Some(ConfigAction::Set { key, value }) => {
            let mut updated = config.clone();
            set_value(&mut updated, &key, &value)?;
            manager.save(&updated).await?;
            ui::step_ok(&UiContext::detect(), &format!("Set {} = {}", key, value));
        }
    }
    Ok(())
}

fn show_config(config: &Config) -> StagehandResult<()> {
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

async fn init_config(manager: &ConfigManager, force: bool) -> StagehandResult<()> {
    let ctx = UiContext::detect();
    let path = manager.path();

    if path.exists() && !force {
        ui::step_warn_hint(
            &ctx,
            &format!("Config already exists at {}", path.display()),
            "Use --force to overwrite",
        );
        return Ok(());
    }

    manager.save(&Config::default()).await?;
    ui::step_ok_detail(&ctx, "Configuration initialized", &path.display().to_string());
    Ok(())
}

/// Apply a dot-separated `key = value` to `config`
fn set_value(config: &mut Config, key: &str, value: &str) -> StagehandResult<()> {
    let parts: Vec<&str> = key.split('.').collect();
    match parts.as_slice() {
        ["general", "log_format"] => match value {
            "text" | "json" => config.general.log_format = value.to_string(),
            _ => {
                return Err(StagehandError::User(format!(
                    "Invalid log format: {}. Use text or json",
                    value
                )))
            }
        },
        ["stage", "build_stage"] => {
            config.stage.build_stage = value
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        ["stage", "locks"] => config.stage.locks = parse_bool(value)?,
        ["stage", "lock_timeout_secs"] => config.stage.lock_timeout_secs = parse_u64(value)?,
        ["stage", "checksum"] => config.stage.checksum = parse_bool(value)?,
        ["stage", "source_cache"] => config.stage.source_cache = value.to_string(),
        ["stage", "cmake_ext_build"] => config.stage.cmake_ext_build = value.to_string(),
        _ => {
            return Err(StagehandError::User(format!(
                "Unknown config key: {}. Valid keys: {}",
                key,
                VALID_KEYS.join(", ")
            )))
        }
    }
    Ok(())
}

fn parse_bool(value: &str) -> StagehandResult<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(StagehandError::User(format!(
            "Invalid boolean value: {}. Use true/false",
            value
        ))),
    }
}

fn parse_u64(value: &str) -> StagehandResult<u64> {
    value
        .parse()
        .map_err(|_| StagehandError::User(format!("Invalid number: {}", value)))
}
