//! Config command - show or edit configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager};
use crate::error::{XplatError, XplatResult};
use crate::platform::Platform;
use crate::ui::{self, UiContext};
use std::path::PathBuf;

/// Keys accepted by `config set`
const VALID_KEYS: &[&str] = &[
    "general.verbose",
    "general.log_format",
    "engine.state_dir",
    "engine.default_platform",
    "build.parallelism",
    "emulation.enabled",
    "emulation.auto_install",
    "emulation.installer_image",
    "emulation.binfmt_dir",
    "backend.podman_path",
    "registry.kind",
    "registry.local_path",
    "registry.insecure",
    "registry.timeout_secs",
    "cache.gc_days",
];

/// Execute the config command
pub async fn execute(args: ConfigArgs, manager: &ConfigManager, config: &Config) -> XplatResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => println!("{}", toml::to_string_pretty(config)?),
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

async fn init_config(manager: &ConfigManager, force: bool) -> XplatResult<()> {
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

/// Apply a dot-separated key to `config`, validating the value
fn set_value(config: &mut Config, key: &str, value: &str) -> XplatResult<()> {
    let parts: Vec<&str> = key.split('.').collect();

    match parts.as_slice() {
        ["general", "verbose"] => config.general.verbose = parse_bool(value)?,
        ["general", "log_format"] => {
            config.general.log_format = one_of(key, value, &["text", "json"])?;
        }
        ["engine", "state_dir"] => config.engine.state_dir = Some(PathBuf::from(value)),
        ["engine", "default_platform"] => {
            config.engine.default_platform = Some(Platform::parse(value)?.to_string());
        }
        ["build", "parallelism"] => config.build.parallelism = parse_number(value)?,
        ["emulation", "enabled"] => config.emulation.enabled = parse_bool(value)?,
        ["emulation", "auto_install"] => config.emulation.auto_install = parse_bool(value)?,
        ["emulation", "installer_image"] => config.emulation.installer_image = value.to_string(),
        ["emulation", "binfmt_dir"] => config.emulation.binfmt_dir = PathBuf::from(value),
        ["backend", "podman_path"] => config.backend.podman_path = value.to_string(),
        ["registry", "kind"] => config.registry.kind = one_of(key, value, &["local", "http"])?,
        ["registry", "local_path"] => config.registry.local_path = Some(PathBuf::from(value)),
        ["registry", "insecure"] => config.registry.insecure = parse_bool(value)?,
        ["registry", "timeout_secs"] => config.registry.timeout_secs = parse_number(value)?,
        ["cache", "gc_days"] => config.cache.gc_days = parse_number(value)?,
        _ => {
            return Err(XplatError::User(format!(
                "Unknown config key: {} (valid keys: {})",
                key,
                VALID_KEYS.join(", ")
            )))
        }
    }

    Ok(())
}

fn one_of(key: &str, value: &str, allowed: &[&str]) -> XplatResult<String> {
    if allowed.contains(&value) {
        Ok(value.to_string())
    } else {
        Err(XplatError::User(format!(
            "Invalid value for {}: {} (expected one of: {})",
            key,
            value,
            allowed.join(", ")
        )))
    }
}

fn parse_bool(value: &str) -> XplatResult<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(XplatError::User(format!(
            "Invalid boolean value: {}. Use true/false",
            value
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(value: &str) -> XplatResult<T> {
    value
        .parse()
        .map_err(|_| XplatError::User(format!("Invalid number: {}", value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_known_keys() {
        let mut config = Config::default();
        set_value(&mut config, "build.parallelism", "4").unwrap();
        set_value(&mut config, "emulation.auto_install", "yes").unwrap();
        set_value(&mut config, "engine.default_platform", "linux/aarch64").unwrap();

        assert_eq!(config.build.parallelism, 4);
        assert!(config.emulation.auto_install);
        assert_eq!(config.engine.default_platform.as_deref(), Some("linux/arm64"));
    }

    #[test]
    fn set_rejects_bad_input() {
        let mut config = Config::default();
        assert!(set_value(&mut config, "vm.name", "x").is_err());
        assert!(set_value(&mut config, "registry.kind", "s3").is_err());
        assert!(set_value(&mut config, "cache.gc_days", "-1").is_err());

        let err = set_value(&mut config, "engine.default_platform", "windows98").unwrap_err();
        assert!(err.to_string().contains("unknown operating system or architecture"));
    }
}
