use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

pub const DEFAULT_CONFIG_FILE: &str = "portal-sync.json";
pub const DEFAULT_REGISTRY_URL: &str = "https://zenodo.org";
pub const DEFAULT_MAX_RESULTS: usize = 100;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub cache_dir: Option<String>,
    #[serde(default)]
    pub datasets_dir: Option<String>,
    #[serde(default)]
    pub log_dir: Option<String>,
    #[serde(default)]
    pub registry: Option<RegistryEntry>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RegistryEntry {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub max_results: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub force: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub base_url: String,
    pub query: String,
    pub max_results: usize,
    pub timeout: Option<Duration>,
    pub force: bool,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_REGISTRY_URL.to_string(),
            query: String::new(),
            max_results: DEFAULT_MAX_RESULTS,
            timeout: None,
            force: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub cache_dir: Utf8PathBuf,
    pub datasets_dir: Utf8PathBuf,
    pub log_dir: Utf8PathBuf,
    pub registry: RegistrySettings,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, SyncError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| SyncError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| SyncError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, SyncError> {
        let cache_dir = match config.cache_dir {
            Some(dir) => Utf8PathBuf::from(dir),
            None => default_cache_dir()?,
        };
        let datasets_dir = config
            .datasets_dir
            .map(Utf8PathBuf::from)
            .unwrap_or_else(|| Utf8PathBuf::from("projects"));
        let log_dir = config
            .log_dir
            .map(Utf8PathBuf::from)
            .unwrap_or_else(|| Utf8PathBuf::from("logs"));

        let defaults = RegistrySettings::default();
        let registry = match config.registry {
            Some(entry) => {
                let max_results = entry.max_results.unwrap_or(defaults.max_results);
                if max_results == 0 {
                    return Err(SyncError::ConfigParse(
                        "registry.max_results must be at least 1".to_string(),
                    ));
                }
                RegistrySettings {
                    base_url: entry
                        .base_url
                        .map(|url| url.trim_end_matches('/').to_string())
                        .unwrap_or(defaults.base_url),
                    query: entry.query.unwrap_or(defaults.query),
                    max_results,
                    timeout: entry.timeout_secs.map(Duration::from_secs),
                    force: entry.force.unwrap_or(defaults.force),
                }
            }
            None => defaults,
        };

        Ok(ResolvedConfig {
            cache_dir,
            datasets_dir,
            log_dir,
            registry,
        })
    }
}

pub fn default_cache_dir() -> Result<Utf8PathBuf, SyncError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(
                dirs.home_dir()
                    .join(".cache")
                    .join("portal-sync")
                    .join("descriptors"),
            )
            .ok()
        })
        .ok_or_else(|| SyncError::Filesystem("unable to resolve cache directory".to_string()))
}
