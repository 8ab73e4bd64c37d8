//! Configuration loading, validation, and management for Weaver.
//!
//! Loads configuration from `~/.weaver/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use weaver_core::provider::{LlmConfig, DEFAULT_BASE_URL, DEFAULT_MODEL};

/// The root configuration structure.
///
/// Maps directly to `~/.weaver/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Chat-completion endpoint and credentials
    #[serde(default)]
    pub llm: LlmSettings,

    /// ReAct loop limits and compaction
    #[serde(default)]
    pub engine: EngineSettings,

    /// Session persistence
    #[serde(default)]
    pub store: StoreSettings,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.into()
}
fn default_model() -> String {
    DEFAULT_MODEL.into()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    8192
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmSettings")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl LlmSettings {
    /// The credential triple handed to the LLM adapter.
    pub fn to_llm_config(&self) -> LlmConfig {
        LlmConfig {
            api_key: self.api_key.clone().filter(|k| !k.is_empty()),
            base_url: Some(self.base_url.clone()).filter(|u| !u.is_empty()),
            model: Some(self.model.clone()).filter(|m| !m.is_empty()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Upper bound on ReAct iterations per run
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Deadline for each LLM call and each tool execution
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,

    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: usize,

    #[serde(default = "default_keep_recent")]
    pub keep_recent: usize,

    /// Event channel capacity
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_max_steps() -> u32 {
    20
}
fn default_step_timeout_secs() -> u64 {
    60
}
fn default_compaction_threshold() -> usize {
    40
}
fn default_keep_recent() -> usize {
    10
}
fn default_event_buffer() -> usize {
    32
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            step_timeout_secs: default_step_timeout_secs(),
            compaction_threshold: default_compaction_threshold(),
            keep_recent: default_keep_recent(),
            event_buffer: default_event_buffer(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// "memory" or "sqlite"
    #[serde(default = "default_store_backend")]
    pub backend: String,

    /// SQLite database path (`~` expands to the home directory)
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_backend() -> String {
    "sqlite".into()
}
fn default_store_path() -> String {
    "~/.weaver/sessions.db".into()
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: default_store_path(),
        }
    }
}

impl StoreSettings {
    /// The database path with a leading `~` expanded.
    pub fn resolved_path(&self) -> PathBuf {
        match self.path.strip_prefix("~/") {
            Some(rest) => dirs_home().join(rest),
            None => PathBuf::from(&self.path),
        }
    }
}

const API_KEY_VARS: &[&str] = &["WEAVER_API_KEY", "OPENAI_API_KEY", "AI_OPENAI_API_KEY"];
const BASE_URL_VARS: &[&str] = &["WEAVER_BASE_URL", "OPENAI_BASE_URL", "LLM_BASE_URL"];
const MODEL_VARS: &[&str] = &["WEAVER_MODEL", "AGENT_LLM_MODEL", "OPENAI_MODEL"];

impl AppConfig {
    /// Load configuration from the default path (~/.weaver/config.toml).
    ///
    /// Environment variables override the file (first non-empty wins):
    /// - API key: `WEAVER_API_KEY`, `OPENAI_API_KEY`, `AI_OPENAI_API_KEY`
    /// - Base URL: `WEAVER_BASE_URL`, `OPENAI_BASE_URL`, `LLM_BASE_URL`
    /// - Model: `WEAVER_MODEL`, `AGENT_LLM_MODEL`, `OPENAI_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.validate()?;
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

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let first = |names: &[&str]| {
            names
                .iter()
                .find_map(|n| lookup(n).filter(|v| !v.trim().is_empty()))
        };

        if let Some(key) = first(API_KEY_VARS) {
            self.llm.api_key = Some(key);
        }
        if let Some(url) = first(BASE_URL_VARS) {
            self.llm.base_url = url;
        }
        if let Some(model) = first(MODEL_VARS) {
            self.llm.model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".weaver")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::ValidationError(
                "llm.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.engine.max_steps > 1000 {
            return Err(ConfigError::ValidationError(
                "engine.max_steps must be at most 1000".into(),
            ));
        }
        if self.engine.step_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "engine.step_timeout_secs must be > 0".into(),
            ));
        }
        if self.engine.event_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "engine.event_buffer must be > 0".into(),
            ));
        }
        if self.engine.keep_recent >= self.engine.compaction_threshold {
            return Err(ConfigError::ValidationError(
                "engine.keep_recent must be smaller than engine.compaction_threshold".into(),
            ));
        }
        if !matches!(self.store.backend.as_str(), "memory" | "sqlite") {
            return Err(ConfigError::ValidationError(format!(
                "store.backend must be \"memory\" or \"sqlite\", got \"{}\"",
                self.store.backend
            )));
        }
        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.llm.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    /// Generate a default config TOML string (for `config init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
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
    use std::collections::HashMap;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.engine.max_steps, 20);
        assert_eq!(config.engine.step_timeout_secs, 60);
        assert_eq!(config.engine.compaction_threshold, 40);
        assert_eq!(config.engine.keep_recent, 10);
        assert_eq!(config.engine.event_buffer, 32);
        assert_eq!(config.llm.max_tokens, 8192);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.llm.model, config.llm.model);
        assert_eq!(parsed.engine.max_steps, config.engine.max_steps);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[engine]\nmax_steps = 5\n\n[store]\nbackend = \"memory\"\n").unwrap();
        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.engine.max_steps, 5);
        assert_eq!(config.engine.keep_recent, 10);
        assert_eq!(config.store.backend, "memory");
        assert_eq!(config.llm.model, "gpt-4o");
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[engine\nmax_steps = ").unwrap();
        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = AppConfig::default();
        config.llm.temperature = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn keep_recent_must_fit_under_threshold() {
        let mut config = AppConfig::default();
        config.engine.keep_recent = 40;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_backend_rejected() {
        let mut config = AppConfig::default();
        config.store.backend = "redis".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        let config = result.unwrap();
        assert_eq!(config.llm.base_url, "https://api.openai.com/v1");
    }

    #[test]
    fn env_overrides_follow_priority() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("OPENAI_API_KEY", "sk-openai"),
            ("AI_OPENAI_API_KEY", "sk-other"),
            ("LLM_BASE_URL", "http://localhost:11434/v1"),
            ("AGENT_LLM_MODEL", "qwen2.5"),
            ("OPENAI_MODEL", "gpt-4o-mini"),
        ]);
        let mut config = AppConfig::default();
        config.apply_env_overrides(|n| vars.get(n).map(|v| v.to_string()));
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-openai"));
        assert_eq!(config.llm.base_url, "http://localhost:11434/v1");
        assert_eq!(config.llm.model, "qwen2.5");
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let mut config = AppConfig::default();
        config.apply_env_overrides(|n| (n == "WEAVER_API_KEY").then(|| "  ".to_string()));
        assert!(!config.has_api_key());
    }

    #[test]
    fn debug_redacts_api_key() {
        let mut config = AppConfig::default();
        config.llm.api_key = Some("sk-very-secret".into());
        let out = format!("{config:?}");
        assert!(!out.contains("sk-very-secret"));
        assert!(out.contains("[REDACTED]"));
    }

    #[test]
    fn llm_config_conversion_drops_empty_values() {
        let mut settings = LlmSettings::default();
        settings.api_key = Some(String::new());
        let cfg = settings.to_llm_config();
        assert!(cfg.api_key.is_none());
        assert_eq!(cfg.model.as_deref(), Some("gpt-4o"));
    }

    #[test]
    fn store_path_expands_home() {
        let settings = StoreSettings::default();
        assert!(settings.resolved_path().ends_with(".weaver/sessions.db"));
        let absolute = StoreSettings { backend: "sqlite".into(), path: "/var/lib/weaver.db".into() };
        assert_eq!(absolute.resolved_path(), PathBuf::from("/var/lib/weaver.db"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("max_steps = 20"));
        assert!(toml_str.contains("gpt-4o"));
    }
}
