//! Configuration loading, validation, and management for streamloop.
//!
//! Loads configuration from `~/.streamloop/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use streamloop_core::{AgentConfig, DEFAULT_MAX_ITERATIONS, DEFAULT_MAX_TOKENS, ToolDefinition};
use streamloop_telemetry::ModelPricing;

/// Which vendor wire format to speak.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Anthropic,
    /// OpenAI or any Chat Completions compatible server
    #[serde(alias = "openai-compat")]
    OpenAi,
    Gemini,
}

impl ProviderKind {
    /// Model used when the config names none.
    pub fn default_model(self) -> &'static str {
        match self {
            Self::Anthropic => "claude-sonnet-4-20250514",
            Self::OpenAi => "gpt-4o",
            Self::Gemini => "gemini-2.5-flash",
        }
    }

    /// The vendor's conventional API key variable.
    pub fn api_key_env(self) -> &'static str {
        match self {
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Gemini => "GEMINI_API_KEY",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::Gemini => "gemini",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "openai" | "openai-compat" => Ok(Self::OpenAi),
            "gemini" | "google" => Ok(Self::Gemini),
            other => Err(ConfigError::ValidationError(format!(
                "unknown provider '{other}' (expected anthropic, openai or gemini)"
            ))),
        }
    }
}

/// The root configuration structure.
///
/// Maps directly to `~/.streamloop/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Vendor to talk to
    #[serde(default)]
    pub provider: ProviderKind,

    /// Model id; the provider's default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Override the vendor endpoint (proxies, compatible servers)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// API key; environment variables fill this when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Loop limits
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Custom model pricing overrides (model name → pricing)
    #[serde(default)]
    pub custom_pricing: HashMap<String, ModelPricing>,
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}
fn default_request_timeout() -> u64 {
    300
}
fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("max_tokens", &self.max_tokens)
            .field("system_prompt", &self.system_prompt)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("budget", &self.budget)
            .field("custom_pricing", &self.custom_pricing)
            .finish()
    }
}

/// Per-invocation limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Halt once cumulative input + output tokens exceed this
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_budget: Option<u64>,

    /// Halt once cumulative spend exceeds this many USD
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_budget_usd: Option<f64>,

    /// Maximum provider calls per invocation
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            token_budget: None,
            cost_budget_usd: None,
            max_iterations: default_max_iterations(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.streamloop/config.toml).
    ///
    /// Environment variables override the file:
    /// - `STREAMLOOP_PROVIDER`, `STREAMLOOP_MODEL`, `STREAMLOOP_BASE_URL`
    /// - `STREAMLOOP_API_KEY`, then the provider's own key variable
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup` (normally `std::env::var`).
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(provider) = lookup("STREAMLOOP_PROVIDER") {
            self.provider = provider.parse()?;
        }
        if let Some(model) = lookup("STREAMLOOP_MODEL") {
            self.model = Some(model);
        }
        if let Some(base_url) = lookup("STREAMLOOP_BASE_URL") {
            self.base_url = Some(base_url);
        }
        if self.api_key.is_none() {
            self.api_key = lookup("STREAMLOOP_API_KEY").or_else(|| lookup(self.provider.api_key_env()));
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".streamloop")
    }

    /// The model to request, falling back to the provider default.
    pub fn effective_model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_tokens == 0 {
            return Err(ConfigError::ValidationError("max_tokens must be >= 1".into()));
        }

        if self.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "request_timeout_secs must be >= 1".into(),
            ));
        }

        if self.budget.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "budget.max_iterations must be >= 1".into(),
            ));
        }

        if self.budget.token_budget == Some(0) {
            return Err(ConfigError::ValidationError(
                "budget.token_budget must be > 0 when set".into(),
            ));
        }

        if let Some(usd) = self.budget.cost_budget_usd {
            if !usd.is_finite() || usd <= 0.0 {
                return Err(ConfigError::ValidationError(
                    "budget.cost_budget_usd must be a positive number when set".into(),
                ));
            }
        }

        for (model, pricing) in &self.custom_pricing {
            if pricing.input_per_m < 0.0 || pricing.output_per_m < 0.0 {
                return Err(ConfigError::ValidationError(format!(
                    "custom_pricing.{model}: prices must not be negative"
                )));
            }
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// The read-only loop configuration for one invocation.
    pub fn agent_config(&self, tools: Vec<ToolDefinition>) -> AgentConfig {
        AgentConfig {
            model: self.effective_model().to_string(),
            tools,
            system_prompt: self.system_prompt.clone(),
            max_tokens: self.max_tokens,
            token_budget: self.budget.token_budget,
            cost_budget_usd: self.budget.cost_budget_usd,
            max_iterations: self.budget.max_iterations,
        }
    }

    /// Generate a default config TOML string (for the `config` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            model: None,
            base_url: None,
            api_key: None,
            max_tokens: default_max_tokens(),
            system_prompt: None,
            request_timeout_secs: default_request_timeout(),
            budget: BudgetConfig::default(),
            custom_pricing: HashMap::new(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert_eq!(config.provider, ProviderKind::Anthropic);
        assert_eq!(config.effective_model(), "claude-sonnet-4-20250514");
        assert_eq!(config.budget.max_iterations, 200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.provider, config.provider);
        assert_eq!(parsed.budget, config.budget);
    }

    #[test]
    fn parses_full_file() {
        let toml_str = r#"
provider = "gemini"
model = "gemini-2.5-pro"
max_tokens = 2048
system_prompt = "You are terse."

[budget]
token_budget = 50000
cost_budget_usd = 0.25
max_iterations = 20

[custom_pricing."my-finetune"]
input_per_m = 1.0
output_per_m = 2.0
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.provider, ProviderKind::Gemini);
        assert_eq!(config.effective_model(), "gemini-2.5-pro");
        assert_eq!(config.budget.token_budget, Some(50000));
        assert_eq!(config.budget.max_iterations, 20);
        assert_eq!(
            config.custom_pricing["my-finetune"],
            ModelPricing::new(1.0, 2.0)
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_iterations_rejected() {
        let config = AppConfig {
            budget: BudgetConfig {
                max_iterations: 0,
                ..BudgetConfig::default()
            },
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn non_positive_budgets_rejected() {
        let mut config = AppConfig::default();
        config.budget.token_budget = Some(0);
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.budget.cost_budget_usd = Some(-1.0);
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.budget.cost_budget_usd = Some(f64::NAN);
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_max_tokens_rejected() {
        let config = AppConfig {
            max_tokens: 0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.provider, ProviderKind::Anthropic);
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "provider = \"openai\"\nmodel = \"gpt-4o-mini\"").unwrap();
        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.provider, ProviderKind::OpenAi);
        assert_eq!(config.effective_model(), "gpt-4o-mini");
    }

    #[test]
    fn invalid_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "provider = \"carrier-pigeon\"").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn invalid_values_in_file_fail_validation() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[budget]\nmax_iterations = 0").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn env_overrides_provider_and_model() {
        let mut config = AppConfig::default();
        config
            .apply_env_overrides(env(&[
                ("STREAMLOOP_PROVIDER", "openai"),
                ("STREAMLOOP_MODEL", "gpt-4.1"),
                ("STREAMLOOP_BASE_URL", "http://localhost:11434/v1"),
            ]))
            .unwrap();
        assert_eq!(config.provider, ProviderKind::OpenAi);
        assert_eq!(config.effective_model(), "gpt-4.1");
        assert_eq!(config.base_url.as_deref(), Some("http://localhost:11434/v1"));
    }

    #[test]
    fn api_key_precedence() {
        let mut config = AppConfig::default();
        config
            .apply_env_overrides(env(&[
                ("STREAMLOOP_API_KEY", "generic"),
                ("ANTHROPIC_API_KEY", "vendor"),
            ]))
            .unwrap();
        assert_eq!(config.api_key.as_deref(), Some("generic"));

        let mut config = AppConfig::default();
        config
            .apply_env_overrides(env(&[("ANTHROPIC_API_KEY", "vendor")]))
            .unwrap();
        assert_eq!(config.api_key.as_deref(), Some("vendor"));

        let mut config = AppConfig {
            api_key: Some("from-file".into()),
            ..AppConfig::default()
        };
        config
            .apply_env_overrides(env(&[("STREAMLOOP_API_KEY", "generic")]))
            .unwrap();
        assert_eq!(config.api_key.as_deref(), Some("from-file"));
    }

    #[test]
    fn vendor_key_follows_overridden_provider() {
        let mut config = AppConfig::default();
        config
            .apply_env_overrides(env(&[
                ("STREAMLOOP_PROVIDER", "gemini"),
                ("ANTHROPIC_API_KEY", "wrong"),
                ("GEMINI_API_KEY", "right"),
            ]))
            .unwrap();
        assert_eq!(config.api_key.as_deref(), Some("right"));
    }

    #[test]
    fn unknown_provider_in_env_is_error() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env_overrides(env(&[("STREAMLOOP_PROVIDER", "carrier-pigeon")]))
            .unwrap_err();
        assert!(err.to_string().contains("carrier-pigeon"));
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = AppConfig {
            api_key: Some("sk-very-secret".into()),
            ..AppConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-very-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn agent_config_carries_limits() {
        let mut config = AppConfig::default();
        config.budget.token_budget = Some(100);
        config.budget.cost_budget_usd = Some(0.5);
        config.system_prompt = Some("sys".into());

        let tools = vec![ToolDefinition {
            name: "runjs".into(),
            description: "Run JavaScript".into(),
            parameters: serde_json::json!({"type": "object"}),
        }];
        let agent = config.agent_config(tools);
        assert_eq!(agent.model, "claude-sonnet-4-20250514");
        assert_eq!(agent.tools.len(), 1);
        assert_eq!(agent.token_budget, Some(100));
        assert_eq!(agent.cost_budget_usd, Some(0.5));
        assert_eq!(agent.system_prompt.as_deref(), Some("sys"));
        assert_eq!(agent.max_iterations, 200);
    }

    #[test]
    fn provider_kind_parsing() {
        assert_eq!("OpenAI".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAi);
        assert_eq!("google".parse::<ProviderKind>().unwrap(), ProviderKind::Gemini);
        assert!("nope".parse::<ProviderKind>().is_err());
        assert_eq!(ProviderKind::Gemini.to_string(), "gemini");
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("anthropic"));
        assert!(toml_str.contains("max_iterations = 200"));
    }
}
