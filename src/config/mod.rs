// Configuration management module
// Handles the TOML configuration file and cache tuning settings

pub mod settings;


pub use settings::{CacheConfig, Config, ConfigError, OllamaConfig};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::config_dir()
}

/// Print `config` as TOML, preceded by the path of its config file
#[inline]
pub fn show_config(config: &Config) -> anyhow::Result<()> {
    let rendered = toml::to_string_pretty(config)?;
    println!("# {}", config.config_file_path().display());
    println!("{}", rendered);
    Ok(())
}
