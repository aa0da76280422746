use std::path::PathBuf;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use keyward_core::config::Settings;

pub const ENV_PREFIX: &str = "KEYWARD";

pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "keyward", "keyward")
}

/// Directory holding `accounts.json` and the system `config.toml`
pub fn config_dir() -> PathBuf {
    project_dirs()
        .map(|d| d.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("config"))
}

pub fn get_configuration_with_paths(
    current_dir_path: Option<PathBuf>,
    system_config_dir_path: Option<PathBuf>,
) -> Result<Settings, config::ConfigError> {
    let config_directory = current_dir_path.unwrap_or_else(|| {
        std::env::current_dir()
            .map(|p| p.join("config"))
            .unwrap_or_else(|_| PathBuf::from("config"))
    });
    let system_config_dir = system_config_dir_path.unwrap_or_else(config_dir);

    let settings = Config::builder()
        // Provider kinds serialize kebab-case
        .set_default("auth.backend", "offline")?
        .set_default("auth.redirect_port", 48123)?
        .set_default("auth.login_wait_secs", 300)?
        .set_default("network.timeout_secs", 30)?
        .set_default("network.connect_timeout_secs", 10)?
        .set_default("network.refresh_timeout_secs", 15)?
        .set_default("log_level", "info")?
        .add_source(File::from(system_config_dir.join("config.toml")).required(false))
        .add_source(File::from(config_directory.join("config.toml")).required(false))
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()?;

    settings.try_deserialize::<Settings>()
}

pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    get_configuration_with_paths(None, None)
}
