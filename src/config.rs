use anyhow::{anyhow, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::extractor::DEFAULT_FALLBACK_FORMAT;

/// The structure of our configuration file (config.toml)
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Program used as the extraction tool.
    pub extractor_path: String,
    /// Arguments placed before every extractor invocation, e.g. `["-m", "yt_dlp"]`.
    pub extractor_args: Vec<String>,
    /// Cookie jar handed to the extractor when the file exists.
    pub cookies_path: Option<PathBuf>,
    /// Base64 encoded cookie jar unpacked into `cookies_path` at startup.
    pub cookies_secret_path: Option<PathBuf>,
    /// Selector used when the client asks for none, and for the single retry.
    pub fallback_format: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            extractor_path: "yt-dlp".to_string(),
            extractor_args: Vec::new(),
            cookies_path: Some(env::temp_dir().join("yt-cookies.txt")),
            cookies_secret_path: Some(PathBuf::from("/etc/secrets/COOKIES_BASE64")),
            fallback_format: DEFAULT_FALLBACK_FORMAT.to_string(),
        }
    }
}

impl Config {
    /// `HOST` and `PORT` from the environment take precedence over the file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = env::var("HOST") {
            self.host = host;
        }
        if let Ok(port) = env::var("PORT") {
            match port.parse() {
                Ok(port) => self.port = port,
                Err(_) => tracing::warn!("Ignoring invalid PORT value: {}", port),
            }
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Returns the cross-platform path to the configuration file, creating the directory if needed.
pub async fn get_config_path() -> Result<PathBuf> {
    let project_dirs = ProjectDirs::from("com", "MediaRelay", "media-relay")
        .ok_or_else(|| anyhow!("Could not find a valid home directory to store config"))?;

    let config_dir = project_dirs.config_dir();
    fs::create_dir_all(config_dir).await?;

    Ok(config_dir.join("config.toml"))
}

/// Loads the configuration from the platform config directory.
pub async fn load_config() -> Result<Config> {
    let config_path = get_config_path().await?;
    load_config_from(&config_path).await
}

/// Loads the configuration from `config_path`, writing the defaults there first if it doesn't exist.
pub async fn load_config_from(config_path: &Path) -> Result<Config> {
    if !config_path.exists() {
        tracing::info!(
            "No config file found. Creating a default one at: {}",
            config_path.display()
        );
        let default_config = Config::default();
        save_config_to(&default_config, config_path).await?;
        return Ok(default_config);
    }

    let config_content = fs::read_to_string(config_path).await?;
    let config: Config = toml::from_str(&config_content)
        .map_err(|e| anyhow!("Failed to parse config file at {}: {}", config_path.display(), e))?;

    Ok(config)
}

/// Saves the provided configuration object to `config_path`.
pub async fn save_config_to(config: &Config, config_path: &Path) -> Result<()> {
    let toml_string = toml::to_string_pretty(config)?;
    fs::write(config_path, toml_string).await?;
    Ok(())
}
