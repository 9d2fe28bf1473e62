use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{fs, path::PathBuf};
use tracing::debug;

use super::report::BackfillPolicy;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AbstractApiConfig {
    #[serde(default = "default_abstract_api_url")]
    pub base_url: String,
    pub api_key: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProvidersConfig {
    pub abstract_api: AbstractApiConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_rates_ttl_secs")]
    pub rates_ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_report_ttl_secs")]
    pub report_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            rates_ttl_secs: default_rates_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            report_ttl_secs: default_report_ttl_secs(),
        }
    }
}

impl CacheConfig {
    pub fn rates_ttl(&self) -> Duration {
        Duration::from_secs(self.rates_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn report_ttl(&self) -> Duration {
        Duration::from_secs(self.report_ttl_secs)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RefreshConfig {
    #[serde(default = "default_refresh_interval_secs")]
    pub interval_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        RefreshConfig {
            interval_secs: default_refresh_interval_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BackfillConfig {
    #[serde(default = "default_backfill_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_backfill_max_dates")]
    pub max_dates: usize,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        BackfillConfig {
            delay_ms: default_backfill_delay_ms(),
            max_dates: default_backfill_max_dates(),
        }
    }
}

impl From<&BackfillConfig> for BackfillPolicy {
    fn from(config: &BackfillConfig) -> Self {
        BackfillPolicy {
            delay: Duration::from_millis(config.delay_ms),
            max_dates: config.max_dates,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_base_currency")]
    pub base_currency: String,
    #[serde(default = "default_currencies")]
    pub currencies: Vec<String>,
    pub data_path: Option<String>,
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub backfill: BackfillConfig,
}

fn default_abstract_api_url() -> String {
    "https://exchange-rates.abstractapi.com".to_string()
}

fn default_base_currency() -> String {
    "RUB".to_string()
}

fn default_currencies() -> Vec<String> {
    vec!["USD".to_string(), "EUR".to_string(), "CNY".to_string()]
}

fn default_rates_ttl_secs() -> u64 {
    30 * 24 * 60 * 60
}

fn default_sweep_interval_secs() -> u64 {
    60 * 60
}

fn default_report_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_refresh_interval_secs() -> u64 {
    5
}

fn default_backfill_delay_ms() -> u64 {
    1000
}

fn default_backfill_max_dates() -> usize {
    30
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("dev", "finbot", "finbot")
            .context("Could not determine project directories")
    }

    pub fn default_config_path() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.config_dir().join("config.yaml"))
    }

    pub fn default_data_path(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.data_path {
            return Ok(PathBuf::from(custom_path));
        }
        Ok(Self::project_dirs()?.data_dir().to_path_buf())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh.interval_secs)
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }
}
