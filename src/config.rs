use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::core::matcher::DEFAULT_THRESHOLD;
use crate::core::schema::DEFAULT_MAX_COLUMN_VALUES;
use crate::core::session::DEFAULT_MAX_ATTEMPTS;

pub const CONFIG_FILE: &str = "tabletalk.toml";

/// One named environment: where its data lives.
#[derive(Debug, Clone, Deserialize)]
pub struct Environment {
    pub database: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Fuzzy-recovery knobs. The defaults are inherited heuristics, not tuned
/// truths; they exist in config precisely so deployments can adjust them.
#[derive(Debug, Clone, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_threshold")]
    pub threshold: u32,
    #[serde(default = "default_max_column_values")]
    pub max_column_values: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            threshold: default_threshold(),
            max_column_values: default_max_column_values(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_environment_name")]
    pub default_environment: String,
    pub environments: HashMap<String, Environment>,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_threshold() -> u32 {
    DEFAULT_THRESHOLD
}

fn default_max_column_values() -> usize {
    DEFAULT_MAX_COLUMN_VALUES
}

fn default_environment_name() -> String {
    "local".to_string()
}

impl Config {
    pub fn parse(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text).context("invalid configuration")?;
        if config.environments.is_empty() {
            bail!("configuration declares no [environments.*] section");
        }
        Ok(config)
    }

    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => discover_config_path()
                .context("no tabletalk.toml found; pass --config or create one")?,
        };
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&text)
    }

    /// The environment selected by `--env`, or the configured default.
    pub fn environment(&self, name: Option<&str>) -> Result<&Environment> {
        let name = name.unwrap_or(&self.default_environment);
        self.environments
            .get(name)
            .with_context(|| format!("environment '{}' not found in configuration", name))
    }

    pub fn api_key(&self) -> Result<String> {
        std::env::var(&self.llm.api_key_env)
            .with_context(|| format!("environment variable {} is not set", self.llm.api_key_env))
    }
}

fn discover_config_path() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILE);
    if local.exists() {
        return Some(local);
    }
    let fallback = dirs::config_dir()?.join("tabletalk").join("config.toml");
    fallback.exists().then_some(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_fills_defaults() {
        let config = Config::parse(
            "[environments.local]\n\
             database = \"rentals.db\"\n",
        )
        .unwrap();
        assert_eq!(config.default_environment, "local");
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.recovery.max_attempts, 3);
        assert_eq!(config.recovery.threshold, 50);
        assert_eq!(config.recovery.max_column_values, 500);
        assert_eq!(
            config.environment(None).unwrap().database,
            PathBuf::from("rentals.db")
        );
    }

    #[test]
    fn named_environments_are_selectable() {
        let config = Config::parse(
            "default_environment = \"prod\"\n\
             [environments.prod]\n\
             database = \"/srv/data/prod.db\"\n\
             [environments.staging]\n\
             database = \"/srv/data/staging.db\"\n\
             [recovery]\n\
             max_attempts = 5\n",
        )
        .unwrap();
        assert_eq!(
            config.environment(Some("staging")).unwrap().database,
            PathBuf::from("/srv/data/staging.db")
        );
        assert_eq!(config.recovery.max_attempts, 5);
        assert!(config.environment(Some("missing")).is_err());
    }

    #[test]
    fn empty_environments_are_rejected() {
        assert!(Config::parse("default_environment = \"local\"\n").is_err());
    }
}
