use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tagcore::{fragment_from_json, FilterOptions, RuleKind, RuleSet};
use tokio::fs::try_exists;

pub const DEFAULT_MAX_INPUT_BYTES: u64 = 10 * 1024 * 1024; // 10MB
const MAX_INPUT_BYTES_CEILING: u64 = 1024 * 1024 * 1024; // 1GB

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Start from the built-in allow list before applying `allow`/`deny`.
    #[serde(default = "default_true")]
    pub use_default_rules: bool,
    /// Allow rules, tag → attribute → values. Kept untyped so shape
    /// errors can be reported with their path.
    #[serde(default)]
    pub allow: Option<Value>,
    #[serde(default)]
    pub deny: Option<Value>,
    #[serde(default)]
    pub filter: FilterOptions,
    #[serde(default = "default_max_input_bytes")]
    pub max_input_bytes: u64,
}

fn default_true() -> bool {
    true
}

fn default_max_input_bytes() -> u64 {
    DEFAULT_MAX_INPUT_BYTES
}

impl Default for Config {
    fn default() -> Self {
        Self {
            use_default_rules: true,
            allow: None,
            deny: None,
            filter: FilterOptions::default(),
            max_input_bytes: DEFAULT_MAX_INPUT_BYTES,
        }
    }
}

impl Config {
    /// Loads the config from the resolved config path, falling back to
    /// defaults when there is none.
    pub async fn load() -> Result<Self> {
        match Self::config_path() {
            Some(config_path) => Self::load_from(&config_path).await,
            None => {
                log::info!("No config directory available, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub async fn load_from(config_path: &Path) -> Result<Self> {
        if !try_exists(config_path).await? {
            log::info!(
                "Config file does not exist, using defaults: {}",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(config_path)
            .await
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        if content.trim().is_empty() {
            log::warn!("Config file is empty, using defaults");
            return Ok(Self::default());
        }

        match serde_json::from_str::<Self>(&content) {
            Ok(mut config) => {
                config.validate()?;
                log::info!("Successfully loaded config from: {}", config_path.display());
                Ok(config)
            }
            Err(json_err) => {
                log::error!("Failed to parse config file: {}", json_err);

                // Backup broken config
                let backup_path = config_path.with_extension("bak");
                if let Err(e) = tokio::fs::copy(config_path, &backup_path).await {
                    log::warn!("Failed to backup broken config: {}", e);
                } else {
                    log::info!("Backed up broken config to: {}", backup_path.display());
                }

                Ok(Self::default())
            }
        }
    }

    /// Writes the config to the resolved config path and returns it.
    pub async fn save(&self) -> Result<PathBuf> {
        let config_path = Self::config_path()
            .ok_or_else(|| anyhow::anyhow!("Could not determine a config directory"))?;
        self.save_to(&config_path).await?;
        Ok(config_path)
    }

    pub async fn save_to(&self, config_path: &Path) -> Result<()> {
        // Validate before saving
        let mut config_to_save = self.clone();
        config_to_save.validate()?;

        if let Some(parent) = config_path.parent() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
            log::debug!("Config directory exists or was created: {}", parent.display());
        }

        let content =
            serde_json::to_string_pretty(&config_to_save).context("Failed to serialize config")?;
        tokio::fs::write(config_path, content)
            .await
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        log::info!("Successfully saved config to: {}", config_path.display());
        Ok(())
    }

    /// Validates configuration values. Out-of-range limits are fixed in
    /// place; malformed rules are an error.
    pub fn validate(&mut self) -> Result<()> {
        if self.max_input_bytes == 0 || self.max_input_bytes > MAX_INPUT_BYTES_CEILING {
            log::warn!(
                "Invalid max_input_bytes: {}, using default",
                self.max_input_bytes
            );
            self.max_input_bytes = DEFAULT_MAX_INPUT_BYTES;
        }

        self.build_rules()?;
        Ok(())
    }

    /// Builds the rule set described by this config.
    pub fn build_rules(&self) -> Result<RuleSet> {
        let mut rules = if self.use_default_rules {
            RuleSet::with_defaults()
        } else {
            RuleSet::new()
        };

        if let Some(allow) = &self.allow {
            let fragment = fragment_from_json(RuleKind::Allow, allow)?;
            rules.allow(Some(&fragment))?;
        }
        if let Some(deny) = &self.deny {
            let fragment = fragment_from_json(RuleKind::Deny, deny)?;
            rules.deny(Some(&fragment))?;
        }

        Ok(rules)
    }

    pub fn config_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("TAGFILTER_CONFIG_PATH") {
            return Some(PathBuf::from(path));
        }

        if let Ok(dir) = std::env::var("TAGFILTER_CONFIG_DIR") {
            return Some(PathBuf::from(dir).join("config.json"));
        }

        ProjectDirs::from("com", "tagfilter", "tagfilter")
            .map(|dirs| dirs.config_dir().join("config.json"))
    }
}
