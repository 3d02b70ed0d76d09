//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

/// gapfill configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub lookup: LookupConfig,
    #[serde(default)]
    pub cost: CostConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Settings for the external knowledge source and the batch runner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    #[serde(skip)]
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    pub max_tokens: usize,
    /// Per-call timeout
    pub timeout_secs: u64,
    /// Hard ceiling on facilities enriched per request
    pub ceiling: usize,
    /// Worker-pool size for concurrent external calls
    pub concurrency: usize,
    /// Estimated cost of one external call in USD
    pub unit_cost_usd: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupConfig {
    pub page_size: u32,
    pub max_page_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostConfig {
    pub daily_limit_usd: f64,
    pub alert_threshold: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Facility database; defaults to `<config_dir>/gapfill/gapfill.db`
    pub database_path: Option<PathBuf>,
    /// Enrichment cache database; defaults to the facility database
    pub cache_path: Option<PathBuf>,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "sonar".to_string(),
            base_url: "https://api.perplexity.ai".to_string(),
            temperature: 0.1,
            max_tokens: 800,
            timeout_secs: 20,
            ceiling: 5,
            concurrency: 3,
            unit_cost_usd: 0.005,
        }
    }
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            page_size: 10,
            max_page_size: 100,
        }
    }
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            daily_limit_usd: 5.0,
            alert_threshold: 0.8,
        }
    }
}

impl EnrichmentConfig {
    pub fn resolved_api_key(&self) -> anyhow::Result<Option<String>> {
        self.enforce_env_only()?;

        Ok(env::var("GAPFILL_API_KEY")
            .or_else(|_| env::var("PERPLEXITY_API_KEY"))
            .ok())
    }

    pub fn redacted_api_key(&self) -> anyhow::Result<Option<String>> {
        self.resolved_api_key().map(|opt| {
            opt.map(|key| {
                if key.len() <= 4 {
                    "***".to_string()
                } else {
                    let suffix = &key[key.len() - 4..];
                    format!("***{}", suffix)
                }
            })
        })
    }

    pub fn enforce_env_only(&self) -> anyhow::Result<()> {
        if self.api_key.is_some() {
            return Err(anyhow!(
                "Knowledge source API keys must be provided via environment variables, not stored in configuration"
            ));
        }
        Ok(())
    }
}

impl StorageConfig {
    /// Resolved facility database path
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(crate::storage::database::default_database_path)
    }

    /// Resolved cache database path
    pub fn cache_path(&self) -> PathBuf {
        self.cache_path
            .clone()
            .unwrap_or_else(|| self.database_path())
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("GAPFILL_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("gapfill")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or return defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.enrichment.enforce_env_only()?;
        if self.enrichment.concurrency == 0 {
            return Err(anyhow!("enrichment.concurrency must be at least 1"));
        }
        if self.lookup.page_size == 0 || self.lookup.page_size > self.lookup.max_page_size {
            return Err(anyhow!(
                "lookup.page_size must be between 1 and lookup.max_page_size ({})",
                self.lookup.max_page_size
            ));
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            "enrichment.model" => Ok(self.enrichment.model.clone()),
            "enrichment.base_url" => Ok(self.enrichment.base_url.clone()),
            "enrichment.temperature" => Ok(self.enrichment.temperature.to_string()),
            "enrichment.max_tokens" => Ok(self.enrichment.max_tokens.to_string()),
            "enrichment.timeout_secs" => Ok(self.enrichment.timeout_secs.to_string()),
            "enrichment.ceiling" => Ok(self.enrichment.ceiling.to_string()),
            "enrichment.concurrency" => Ok(self.enrichment.concurrency.to_string()),
            "enrichment.unit_cost_usd" => Ok(self.enrichment.unit_cost_usd.to_string()),

            "lookup.page_size" => Ok(self.lookup.page_size.to_string()),
            "lookup.max_page_size" => Ok(self.lookup.max_page_size.to_string()),

            "cost.daily_limit_usd" => Ok(self.cost.daily_limit_usd.to_string()),
            "cost.alert_threshold" => Ok(self.cost.alert_threshold.to_string()),

            "storage.database_path" => Ok(self.storage.database_path().display().to_string()),
            "storage.cache_path" => Ok(self.storage.cache_path().display().to_string()),

            "enrichment.api_key" | "api_key" => match self.enrichment.redacted_api_key()? {
                Some(redacted) => Ok(redacted),
                None => Ok(
                    "(not set - use GAPFILL_API_KEY or PERPLEXITY_API_KEY env var)".to_string(),
                ),
            },

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `gapfill config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "enrichment.model" => {
                self.enrichment.model = value.to_string();
            }
            "enrichment.base_url" => {
                if !value.starts_with("http://") && !value.starts_with("https://") {
                    return Err(anyhow!("Base URL must start with http:// or https://"));
                }
                self.enrichment.base_url = value.trim_end_matches('/').to_string();
            }
            "enrichment.temperature" => {
                let temp: f32 = value
                    .parse()
                    .with_context(|| format!("Invalid temperature value: {}", value))?;
                if !(0.0..=2.0).contains(&temp) {
                    return Err(anyhow!("Temperature must be between 0.0 and 2.0"));
                }
                self.enrichment.temperature = temp;
            }
            "enrichment.max_tokens" => {
                self.enrichment.max_tokens = value
                    .parse()
                    .with_context(|| format!("Invalid max_tokens value: {}", value))?;
            }
            "enrichment.timeout_secs" => {
                let secs: u64 = value
                    .parse()
                    .with_context(|| format!("Invalid timeout_secs value: {}", value))?;
                if secs == 0 {
                    return Err(anyhow!("Timeout must be at least 1 second"));
                }
                self.enrichment.timeout_secs = secs;
            }
            "enrichment.ceiling" => {
                self.enrichment.ceiling = value
                    .parse()
                    .with_context(|| format!("Invalid ceiling value: {}", value))?;
            }
            "enrichment.concurrency" => {
                let workers: usize = value
                    .parse()
                    .with_context(|| format!("Invalid concurrency value: {}", value))?;
                if workers == 0 {
                    return Err(anyhow!("Concurrency must be at least 1"));
                }
                self.enrichment.concurrency = workers;
            }
            "enrichment.unit_cost_usd" => {
                let cost: f64 = value
                    .parse()
                    .with_context(|| format!("Invalid unit_cost_usd value: {}", value))?;
                if cost < 0.0 {
                    return Err(anyhow!("Unit cost must be non-negative"));
                }
                self.enrichment.unit_cost_usd = cost;
            }

            "lookup.page_size" => {
                let size: u32 = value
                    .parse()
                    .with_context(|| format!("Invalid page_size value: {}", value))?;
                if size == 0 || size > self.lookup.max_page_size {
                    return Err(anyhow!(
                        "Page size must be between 1 and {}",
                        self.lookup.max_page_size
                    ));
                }
                self.lookup.page_size = size;
            }
            "lookup.max_page_size" => {
                let size: u32 = value
                    .parse()
                    .with_context(|| format!("Invalid max_page_size value: {}", value))?;
                if size < self.lookup.page_size {
                    return Err(anyhow!(
                        "Max page size must be at least lookup.page_size ({})",
                        self.lookup.page_size
                    ));
                }
                self.lookup.max_page_size = size;
            }

            "cost.daily_limit_usd" => {
                let limit: f64 = value
                    .parse()
                    .with_context(|| format!("Invalid daily_limit_usd value: {}", value))?;
                if limit < 0.0 {
                    return Err(anyhow!("Daily limit must be non-negative"));
                }
                self.cost.daily_limit_usd = limit;
            }
            "cost.alert_threshold" => {
                let threshold: f64 = value
                    .parse()
                    .with_context(|| format!("Invalid alert_threshold value: {}", value))?;
                if !(0.0..=1.0).contains(&threshold) {
                    return Err(anyhow!("Alert threshold must be between 0.0 and 1.0"));
                }
                self.cost.alert_threshold = threshold;
            }

            "storage.database_path" => {
                self.storage.database_path = Some(PathBuf::from(value));
            }
            "storage.cache_path" => {
                self.storage.cache_path = Some(PathBuf::from(value));
            }

            "enrichment.api_key" | "api_key" => {
                return Err(anyhow!(
                    "API keys cannot be stored in configuration for security. \
                     Set the GAPFILL_API_KEY or PERPLEXITY_API_KEY environment variable instead."
                ));
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `gapfill config list` to see available keys.",
                    key
                ));
            }
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let keys = vec![
            "enrichment.model",
            "enrichment.base_url",
            "enrichment.temperature",
            "enrichment.max_tokens",
            "enrichment.timeout_secs",
            "enrichment.ceiling",
            "enrichment.concurrency",
            "enrichment.unit_cost_usd",
            "enrichment.api_key",
            "lookup.page_size",
            "lookup.max_page_size",
            "cost.daily_limit_usd",
            "cost.alert_threshold",
            "storage.database_path",
            "storage.cache_path",
        ];

        keys.into_iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}
