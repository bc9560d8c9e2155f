//! Configuration types and loading
//!
//! YAML config with a fallback chain: explicit path, `.prospectd.yml` in
//! the working directory, `~/.config/prospectd/prospectd.yml`, then
//! defaults. Validation happens at load time; a bad config never reaches a
//! run.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::ingest::{DeepComments, FilterConfig, SnippetValidationConfig};
use crate::llm::{CompletionClient, OpenAiClient};
use crate::research::ResearchConfig;

/// Invalid configuration; raised at validation time, never during a run
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("API key environment variable {0} is not set")]
    MissingApiKey(String),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Currently only the OpenAI-compatible wire format is supported
    pub provider: String,
    pub model: String,
    pub api_key_env: String,
    pub base_url: String,
    /// Model used by the ingestion extractor
    pub extraction_model: String,
    /// Model used for complexity classification
    pub complexity_model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: "https://api.openai.com".to_string(),
            extraction_model: "gpt-4o".to_string(),
            complexity_model: "gpt-4o-mini".to_string(),
        }
    }
}

impl LlmConfig {
    /// Build a completion client for the configured provider
    pub fn create_client(&self) -> Result<Arc<dyn CompletionClient>, ConfigError> {
        if self.provider != "openai" {
            return Err(ConfigError::Invalid(format!(
                "Unknown LLM provider: '{}'. Supported: openai",
                self.provider
            )));
        }
        let api_key =
            std::env::var(&self.api_key_env).map_err(|_| ConfigError::MissingApiKey(self.api_key_env.clone()))?;
        let client = OpenAiClient::new(&self.model, api_key, &self.base_url)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(Arc::new(client))
    }
}

/// Ingestion scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub data_dir: PathBuf,
    pub parallel_workers: usize,
    pub max_documents: u64,
    pub max_cost_usd: Option<f64>,
    pub deep_comments: DeepComments,
    pub saturation_window: usize,
    pub saturation_threshold: f64,
    pub saturation_min_entities: usize,
    pub saturation_signal_diversity_threshold: f64,
    pub saturation_empty_extractions_limit: usize,
    pub breaker_failure_threshold: u32,
    pub breaker_recovery_timeout_s: f64,
    pub filter: FilterConfig,
    pub snippet_validation: SnippetValidationConfig,
    pub extraction_model: String,
    pub complexity_model: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/sessions"),
            parallel_workers: 4,
            max_documents: 100,
            max_cost_usd: None,
            deep_comments: DeepComments::Auto,
            saturation_window: 5,
            saturation_threshold: 0.2,
            saturation_min_entities: 10,
            saturation_signal_diversity_threshold: 0.5,
            saturation_empty_extractions_limit: 5,
            breaker_failure_threshold: 5,
            breaker_recovery_timeout_s: 60.0,
            filter: FilterConfig::default(),
            snippet_validation: SnippetValidationConfig::default(),
            extraction_model: "gpt-4o".to_string(),
            complexity_model: "gpt-4o-mini".to_string(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub research: ResearchConfig,
    pub ingest: IngestConfig,
}

impl Config {
    /// Load configuration with the fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self, ConfigError> {
        if let Some(path) = config_path {
            let config = Self::load_from_file(path)?;
            config.validate()?;
            return Ok(config);
        }

        let local_config = PathBuf::from(".prospectd.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => {
                    config.validate()?;
                    return Ok(config);
                }
                Err(e) => warn!("Failed to load config from {}: {e}", local_config.display()),
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("prospectd").join("prospectd.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => {
                        config.validate()?;
                        return Ok(config);
                    }
                    Err(e) => warn!("Failed to load config from {}: {e}", user_config.display()),
                }
            }
        }

        info!("No config file found, using defaults");
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::Read {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;
        let config: Self = serde_yaml::from_str(&content)?;
        info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Reject invalid values before any run starts
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.research.max_workers == 0 {
            return Err(ConfigError::Invalid("research.max_workers must be > 0".to_string()));
        }
        if self.research.worker_timeout_s <= 0.0 {
            return Err(ConfigError::Invalid("research.worker_timeout_s must be > 0".to_string()));
        }
        let mode = self.research.coverage_mode.to_lowercase();
        if mode != "warn" && mode != "error" {
            return Err(ConfigError::Invalid(format!(
                "research.coverage_mode must be 'warn' or 'error', got '{}'",
                self.research.coverage_mode
            )));
        }
        if self.ingest.parallel_workers == 0 {
            return Err(ConfigError::Invalid("ingest.parallel_workers must be > 0".to_string()));
        }
        if !(0.0..=1.0).contains(&self.ingest.saturation_threshold) {
            return Err(ConfigError::Invalid(
                "ingest.saturation_threshold must be within [0, 1]".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.ingest.saturation_signal_diversity_threshold) {
            return Err(ConfigError::Invalid(
                "ingest.saturation_signal_diversity_threshold must be within [0, 1]".to_string(),
            ));
        }
        if self.ingest.saturation_window == 0 {
            return Err(ConfigError::Invalid("ingest.saturation_window must be > 0".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_invalid_coverage_mode_rejected() {
        let mut config = Config::default();
        config.research.coverage_mode = "panic".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_saturation_threshold_rejected() {
        let mut config = Config::default();
        config.ingest.saturation_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_round_trip() {
        let yaml = "
llm:
  model: gpt-4o-mini
research:
  max_workers: 3
  enable_deep_read: true
  coverage_mode: error
ingest:
  parallel_workers: 2
  saturation_threshold: 0.3
";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.research.max_workers, 3);
        assert!(config.research.enable_deep_read);
        assert_eq!(config.ingest.parallel_workers, 2);
        // Unspecified fields keep their defaults
        assert_eq!(config.ingest.max_documents, 100);
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let config = LlmConfig {
            provider: "carrier-pigeon".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.create_client(), Err(ConfigError::Invalid(_))));
    }
}
