//! Configuration for the review engine
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables
//! 3. Config file (~/.config/cr/config.toml)
//! 4. Default values

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Hard ceiling on the iteration budget, regardless of configuration.
pub const MAX_ITERATION_CAP: u32 = 20;

/// LLM driver configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Gemini API key; required to run against the real driver
    pub api_key: Option<String>,
    /// Model used by the controller loop
    pub main_model: String,
    /// Model used for nested `llm_query` calls and suggestions
    pub sub_model: String,
    /// API base override, mainly for tests
    pub api_base: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            main_model: "gemini-3-pro-preview".to_string(),
            sub_model: "gemini-3-flash-preview".to_string(),
            api_base: None,
        }
    }
}

/// Controller loop budgets
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RlmConfig {
    /// Iteration budget per session (clamped to [`MAX_ITERATION_CAP`])
    pub max_iterations: u32,
    /// Total LLM calls per session, nested queries included
    pub max_llm_calls: u32,
    /// Aggregate token ceiling per session
    pub max_tokens: u64,
    /// Session-wide deadline in seconds
    pub deadline_secs: u64,
}

impl Default for RlmConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_llm_calls: 25,
            max_tokens: 1_000_000,
            deadline_secs: 600,
        }
    }
}

/// Sandbox executor limits
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Per-execution wall clock in seconds
    pub timeout_secs: u64,
    /// Stdout cap in bytes; excess is truncated with a marker
    pub max_stdout_bytes: usize,
    /// `llm_query` calls allowed per execution
    pub max_llm_queries: u32,
    /// Interpreter command for the guest process
    pub python_command: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_stdout_bytes: 32 * 1024,
            max_llm_queries: 4,
            python_command: "python3".to_string(),
        }
    }
}

/// Provider credentials and endpoints
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub github_token: Option<String>,
    pub github_api_base: Option<String>,
    pub gitlab_token: Option<String>,
    pub gitlab_api_base: Option<String>,
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub rlm: RlmConfig,
    pub sandbox: SandboxConfig,
    pub providers: ProviderConfig,
    /// Artifact cache byte budget (0 means the gateway default of 256 MiB)
    pub cache_bytes: u64,
}

impl Config {
    /// Load configuration from the default file location plus environment.
    pub fn load() -> Result<Self> {
        let mut config = match Self::default_config_path() {
            Some(path) if path.exists() => Self::load_from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env();
        config.clamp();
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(Error::Io)?;
        toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("failed to parse config: {e}")))
    }

    /// Get the default config file path (`~/.config/cr/config.toml`).
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("cr").join("config.toml"))
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            if !key.trim().is_empty() {
                self.llm.api_key = Some(key.trim().to_string());
            }
        }
        if let Ok(model) = std::env::var("CR_MAIN_MODEL") {
            self.llm.main_model = model;
        }
        if let Ok(model) = std::env::var("CR_SUB_MODEL") {
            self.llm.sub_model = model;
        }
        if let Ok(token) = std::env::var("GITHUB_TOKEN") {
            self.providers.github_token = Some(token);
        }
        if let Ok(base) = std::env::var("GITHUB_API_BASE") {
            self.providers.github_api_base = Some(base);
        }
        if let Ok(token) = std::env::var("GITLAB_TOKEN") {
            self.providers.gitlab_token = Some(token);
        }
        if let Ok(base) = std::env::var("GITLAB_API_BASE") {
            self.providers.gitlab_api_base = Some(base);
        }
        if let Some(n) = env_parse("RLM_MAX_ITERATIONS") {
            self.rlm.max_iterations = n;
        }
        if let Some(n) = env_parse("RLM_MAX_LLM_CALLS") {
            self.rlm.max_llm_calls = n;
        }
        if let Some(n) = env_parse("RLM_MAX_TOKENS") {
            self.rlm.max_tokens = n;
        }
        if let Some(n) = env_parse("RLM_DEADLINE_SEC") {
            self.rlm.deadline_secs = n;
        }
        if let Some(n) = env_parse("SANDBOX_TIMEOUT_SEC") {
            self.sandbox.timeout_secs = n;
        }
        if let Some(n) = env_parse("CACHE_BYTES") {
            self.cache_bytes = n;
        }
    }

    /// Enforce hard limits on configured values.
    pub fn clamp(&mut self) {
        self.rlm.max_iterations = self.rlm.max_iterations.clamp(1, MAX_ITERATION_CAP);
    }

    /// Gateway construction options derived from this config.
    pub fn gateway_config(&self) -> cr_providers::GatewayConfig {
        cr_providers::GatewayConfig {
            github_api_base: self.providers.github_api_base.clone(),
            github_token: self.providers.github_token.clone(),
            gitlab_api_base: self.providers.gitlab_api_base.clone(),
            gitlab_token: self.providers.gitlab_token.clone(),
            cache_bytes: self.cache_bytes,
            max_file_bytes: 0,
        }
    }

    /// The LLM API key, or a configuration error naming the variable.
    pub fn require_api_key(&self) -> Result<&str> {
        self.llm
            .api_key
            .as_deref()
            .ok_or_else(|| Error::Config("GEMINI_API_KEY is not set".to_string()))
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.rlm.max_iterations, 10);
        assert_eq!(config.rlm.max_llm_calls, 25);
        assert_eq!(config.rlm.deadline_secs, 600);
        assert_eq!(config.sandbox.timeout_secs, 30);
        assert_eq!(config.sandbox.max_stdout_bytes, 32 * 1024);
        assert_eq!(config.sandbox.max_llm_queries, 4);
        assert!(config.llm.api_key.is_none());
    }

    #[test]
    fn test_clamp_iteration_budget() {
        let mut config = Config::default();
        config.rlm.max_iterations = 100;
        config.clamp();
        assert_eq!(config.rlm.max_iterations, MAX_ITERATION_CAP);

        config.rlm.max_iterations = 0;
        config.clamp();
        assert_eq!(config.rlm.max_iterations, 1);
    }

    #[test]
    fn test_parse_toml() {
        let parsed: Config = toml::from_str(
            r#"
            cache_bytes = 1024

            [llm]
            main_model = "gemini-custom"

            [rlm]
            max_iterations = 5
            "#,
        )
        .unwrap();
        assert_eq!(parsed.llm.main_model, "gemini-custom");
        assert_eq!(parsed.rlm.max_iterations, 5);
        assert_eq!(parsed.cache_bytes, 1024);
        // Untouched sections keep defaults.
        assert_eq!(parsed.sandbox.timeout_secs, 30);
    }

    #[test]
    fn test_require_api_key() {
        let mut config = Config::default();
        assert!(config.require_api_key().is_err());
        config.llm.api_key = Some("k".into());
        assert_eq!(config.require_api_key().unwrap(), "k");
    }
}
