use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::{ParleyError, Result};
use crate::providers::ProviderKind;
use crate::retry::RetryPolicy;

/// Main configuration structure for Parley
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Provider selection override
    #[serde(default)]
    pub provider: ProviderSelection,
    /// OpenAI-style primary provider settings
    #[serde(default)]
    pub openai: ProviderSection,
    /// Perplexity-style secondary provider settings
    #[serde(default)]
    pub perplexity: ProviderSection,
    /// Web search settings
    #[serde(default)]
    pub search: SearchConfig,
    /// Delegated backend settings
    #[serde(default)]
    pub backend: BackendConfig,
    /// Retry/backoff settings
    #[serde(default)]
    pub retry: RetryConfig,
    /// Chat HTTP service settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Explicit provider override (`openai` or `perplexity`)
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProviderSelection {
    #[serde(default)]
    pub name: Option<String>,
}

/// Per-provider settings as written in the config file.
///
/// Every field is optional; unset fields fall back to the defaults of the
/// provider the section belongs to (see [`Config::provider_config`]).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProviderSection {
    /// API key (normally supplied through the environment)
    #[serde(default)]
    pub api_key: Option<String>,
    /// Environment variable name for the API key
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Default model identifier
    #[serde(default)]
    pub model: Option<String>,
    /// API root, e.g. "https://api.openai.com/v1"
    #[serde(default)]
    pub base_url: Option<String>,
    /// Request timeout in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Token ceiling for completions
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Sampling temperature
    #[serde(default)]
    pub temperature: Option<f32>,
}

/// Fully resolved, immutable settings for one provider
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub api_key_env: String,
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn has_credential(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }
}

const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
const OPENAI_MODEL: &str = "gpt-4o-mini";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OPENAI_MAX_TOKENS: u32 = 1000;

const PERPLEXITY_API_KEY_ENV: &str = "PERPLEXITY_API_KEY";
const PERPLEXITY_MODEL: &str = "llama-3.1-sonar-large-128k-online";
const PERPLEXITY_BASE_URL: &str = "https://api.perplexity.ai";
const PERPLEXITY_MAX_TOKENS: u32 = 2048;

const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 60;
const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Web search configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    /// Global switch; when false `use_search` requests are ignored
    #[serde(default = "default_search_enabled")]
    pub enabled: bool,
    /// Search API key (normally supplied through the environment)
    #[serde(default)]
    pub api_key: Option<String>,
    /// Environment variable name for the search API key
    #[serde(default = "default_search_api_key_env")]
    pub api_key_env: String,
    /// Search API root
    #[serde(default = "default_search_base_url")]
    pub base_url: String,
    /// Request timeout in seconds
    #[serde(default = "default_search_timeout_secs")]
    pub timeout_secs: u64,
    /// Result cap sent with each search request
    #[serde(default = "default_search_max_results")]
    pub max_results: usize,
    /// Number of results folded into the system prompt
    #[serde(default = "default_search_top_results")]
    pub top_results: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: default_search_enabled(),
            api_key: None,
            api_key_env: default_search_api_key_env(),
            base_url: default_search_base_url(),
            timeout_secs: default_search_timeout_secs(),
            max_results: default_search_max_results(),
            top_results: default_search_top_results(),
        }
    }
}

fn default_search_enabled() -> bool {
    true
}

fn default_search_api_key_env() -> String {
    "TAVILY_API_KEY".to_string()
}

fn default_search_base_url() -> String {
    "https://api.tavily.com".to_string()
}

fn default_search_timeout_secs() -> u64 {
    10
}

fn default_search_max_results() -> usize {
    5
}

fn default_search_top_results() -> usize {
    3
}

/// Delegated backend configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Base URL of a Parley-compatible chat service; when set, provider
    /// calls are bypassed and requests are forwarded to `{base_url}/chat`
    #[serde(default)]
    pub base_url: Option<String>,
    /// Request timeout in seconds
    #[serde(default = "default_backend_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: default_backend_timeout_secs(),
        }
    }
}

fn default_backend_timeout_secs() -> u64 {
    20
}

/// Retry and backoff configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Attempts for provider calls
    #[serde(default = "default_provider_max_attempts")]
    pub max_attempts: u32,
    /// Base backoff for provider calls in milliseconds
    #[serde(default = "default_provider_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Attempts for search requests
    #[serde(default = "default_search_max_attempts")]
    pub search_max_attempts: u32,
    /// Base backoff for search requests in milliseconds
    #[serde(default = "default_search_base_delay_ms")]
    pub search_base_delay_ms: u64,
    /// Attempts for delegated backend requests
    #[serde(default = "default_backend_max_attempts")]
    pub backend_max_attempts: u32,
    /// Base backoff for delegated backend requests in milliseconds
    #[serde(default = "default_backend_base_delay_ms")]
    pub backend_base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_provider_max_attempts(),
            base_delay_ms: default_provider_base_delay_ms(),
            search_max_attempts: default_search_max_attempts(),
            search_base_delay_ms: default_search_base_delay_ms(),
            backend_max_attempts: default_backend_max_attempts(),
            backend_base_delay_ms: default_backend_base_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn provider_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms))
    }

    pub fn search_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.search_max_attempts,
            Duration::from_millis(self.search_base_delay_ms),
        )
    }

    pub fn backend_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.backend_max_attempts,
            Duration::from_millis(self.backend_base_delay_ms),
        )
    }
}

fn default_provider_max_attempts() -> u32 {
    3
}

fn default_provider_base_delay_ms() -> u64 {
    2000
}

fn default_search_max_attempts() -> u32 {
    2
}

fn default_search_base_delay_ms() -> u64 {
    1000
}

fn default_backend_max_attempts() -> u32 {
    3
}

fn default_backend_base_delay_ms() -> u64 {
    1500
}

/// Chat HTTP service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "127.0.0.1:8000")
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Origins allowed by CORS
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    /// Whole-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            allowed_origins: default_allowed_origins(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_allowed_origins() -> Vec<String> {
    vec!["http://localhost:3000".to_string()]
}

fn default_request_timeout_secs() -> u64 {
    240
}

/// Log output configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// EnvFilter directive used when RUST_LOG is not set
    #[serde(default)]
    pub level: Option<String>,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Config {
    /// Load configuration from an explicit path or the default locations,
    /// then apply environment overrides and validate.
    pub fn load(config_path: Option<&Path>) -> Result<Config> {
        let mut config = match config_path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_paths = [
                    dirs::home_dir().map(|h| h.join(".parley").join("config.toml")),
                    dirs::config_dir().map(|c| c.join("parley").join("config.toml")),
                    Some(PathBuf::from("config.toml")),
                ];

                match default_paths.iter().flatten().find(|p| p.exists()) {
                    Some(path) => Self::from_file(path)?,
                    None => {
                        tracing::info!("No config file found, using defaults");
                        Config::default()
                    }
                }
            }
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Config> {
        tracing::info!("Loading config from: {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|e| {
            ParleyError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        toml::from_str(&content)
            .map_err(|e| ParleyError::Config(format!("Failed to parse config: {e}")))
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup. Empty values are ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(name) = get("LLM_PROVIDER") {
            self.provider.name = Some(name);
        }

        let openai_key_env = self.provider_config(ProviderKind::OpenAi).api_key_env;
        if let Some(key) = get(&openai_key_env) {
            self.openai.api_key = Some(key);
        }
        if let Some(model) = get("OPENAI_MODEL") {
            self.openai.model = Some(model);
        }
        if let Some(url) = get("OPENAI_BASE_URL") {
            self.openai.base_url = Some(url);
        }

        let perplexity_key_env = self.provider_config(ProviderKind::Perplexity).api_key_env;
        if let Some(key) = get(&perplexity_key_env) {
            self.perplexity.api_key = Some(key);
        }
        if let Some(model) = get("PERPLEXITY_MODEL") {
            self.perplexity.model = Some(model);
        }
        if let Some(url) = get("PERPLEXITY_BASE_URL") {
            self.perplexity.base_url = Some(url);
        }

        if let Some(key) = get(&self.search.api_key_env) {
            self.search.api_key = Some(key);
        }
        if let Some(enabled) = get("ENABLE_SEARCH").and_then(|v| parse_bool(&v)) {
            self.search.enabled = enabled;
        }

        if let Some(url) = get("BACKEND_URL") {
            self.backend.base_url = Some(url);
        }

        if let Some(level) = get("LOG_LEVEL") {
            self.logging.level = Some(level);
        }
        if let Some(json) = get("LOG_JSON").and_then(|v| parse_bool(&v)) {
            self.logging.json = json;
        }
    }

    /// Resolve the effective settings for one provider, filling unset
    /// fields with that provider's defaults
    pub fn provider_config(&self, kind: ProviderKind) -> ProviderConfig {
        let (section, key_env, model, base_url, max_tokens) = match kind {
            ProviderKind::OpenAi => (
                &self.openai,
                OPENAI_API_KEY_ENV,
                OPENAI_MODEL,
                OPENAI_BASE_URL,
                OPENAI_MAX_TOKENS,
            ),
            ProviderKind::Perplexity => (
                &self.perplexity,
                PERPLEXITY_API_KEY_ENV,
                PERPLEXITY_MODEL,
                PERPLEXITY_BASE_URL,
                PERPLEXITY_MAX_TOKENS,
            ),
        };

        ProviderConfig {
            api_key: section.api_key.clone().filter(|k| !k.trim().is_empty()),
            api_key_env: section
                .api_key_env
                .clone()
                .unwrap_or_else(|| key_env.to_string()),
            model: section.model.clone().unwrap_or_else(|| model.to_string()),
            base_url: section
                .base_url
                .clone()
                .unwrap_or_else(|| base_url.to_string()),
            timeout_secs: section.timeout_secs.unwrap_or(DEFAULT_PROVIDER_TIMEOUT_SECS),
            max_tokens: section.max_tokens.unwrap_or(max_tokens),
            temperature: section.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        }
    }

    /// Longest a direct (non-delegated) reply can take when every search and
    /// provider attempt times out, backoff included
    pub fn worst_case_reply_time(&self) -> Duration {
        let search = if self.search.enabled {
            let policy = self.retry.search_policy();
            Duration::from_secs(self.search.timeout_secs)
                .saturating_mul(policy.max_attempts.max(1))
                .saturating_add(policy.total_backoff())
        } else {
            Duration::ZERO
        };

        let policy = self.retry.provider_policy();
        let provider = ProviderKind::ALL
            .into_iter()
            .map(|kind| self.provider_config(kind).timeout())
            .max()
            .unwrap_or_default()
            .saturating_mul(policy.max_attempts.max(1))
            .saturating_add(policy.total_backoff());

        search.saturating_add(provider)
    }

    /// Check that every configured URL is an absolute http(s) URL
    pub fn validate(&self) -> Result<()> {
        for kind in ProviderKind::ALL {
            validate_url(&format!("{kind}.base_url"), &self.provider_config(kind).base_url)?;
        }
        validate_url("search.base_url", &self.search.base_url)?;
        if let Some(ref url) = self.backend.base_url {
            validate_url("backend.base_url", url)?;
        }
        Ok(())
    }
}

fn validate_url(field: &str, value: &str) -> Result<()> {
    let url = Url::parse(value)
        .map_err(|e| ParleyError::Config(format!("Invalid URL for {field} '{value}': {e}")))?;

    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(ParleyError::Config(format!(
            "Unsupported URL scheme '{scheme}' for {field}: only http and https are allowed"
        )));
    }

    Ok(())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
