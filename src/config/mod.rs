//! Layered configuration: TOML file, then environment overrides.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PalaverError, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o";

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful personal assistant. \
Be concise. Use the available tools when they help, and store durable facts \
about the user in memory.";

const DEFAULT_CONFIG_TEMPLATE: &str = r#"# palaver configuration

[provider]
# OpenAI-compatible chat completions endpoint.
base_url = "https://api.openai.com/v1"
# Prefer setting OPENAI_API_KEY in the environment over writing it here.
api_key = ""
model = "gpt-4o"
# max_tokens = 4096

[agent]
# system_prompt = "You are a helpful personal assistant."
max_iterations = 25
subagent_max_iterations = 10
render_interval_ms = 500

[channel]
# Senders allowed to talk to the agent. Empty allows everyone.
# Entries may be an id, a username, or "id|username".
allow_from = []
"#;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: Option<u32>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub system_prompt: String,
    pub max_iterations: u32,
    pub subagent_max_iterations: u32,
    pub render_interval_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_iterations: crate::session::DEFAULT_MAX_ITERATIONS,
            subagent_max_iterations: crate::subagent::DEFAULT_MAX_ITERATIONS,
            render_interval_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ChannelConfig {
    pub allow_from: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderConfig,
    pub agent: AgentConfig,
    pub channel: ChannelConfig,
}

impl Config {
    /// Load from the default path with `.env` and environment overrides
    /// applied. A missing file yields the defaults.
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let mut config = match config_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading config");
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw)
            .map_err(|err| PalaverError::Configuration(format!("{}: {err}", path.display())))
    }

    /// Environment overrides, highest precedence. `lookup` abstracts the
    /// process environment so the layering is testable.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("PALAVER_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
            self.provider.api_key = key;
        }
        if let Some(url) = lookup("PALAVER_BASE_URL") {
            self.provider.base_url = url;
        }
        if let Some(model) = lookup("PALAVER_MODEL") {
            self.provider.model = model;
        }
        if let Some(cap) = lookup("PALAVER_MAX_ITERATIONS").and_then(|v| v.parse().ok()) {
            self.agent.max_iterations = cap;
        }
    }

    /// Fail fast on settings the runtime cannot work without.
    pub fn validate(&self) -> Result<()> {
        if self.provider.api_key.is_empty() {
            return Err(PalaverError::Configuration(
                "no API key configured; set OPENAI_API_KEY or [provider].api_key".to_string(),
            ));
        }
        if self.provider.base_url.is_empty() {
            return Err(PalaverError::Configuration(
                "[provider].base_url must not be empty".to_string(),
            ));
        }
        if self.agent.max_iterations == 0 {
            return Err(PalaverError::Configuration(
                "[agent].max_iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Write a commented default config, refusing to clobber an existing one.
    /// Returns the path written.
    pub fn init() -> Result<PathBuf> {
        let path = config_path().ok_or_else(|| {
            PalaverError::Configuration("cannot determine config directory".to_string())
        })?;
        if path.exists() {
            return Err(PalaverError::Configuration(format!(
                "config already exists at {}",
                path.display()
            )));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, DEFAULT_CONFIG_TEMPLATE)?;
        Ok(path)
    }
}

/// `$PALAVER_CONFIG`, or the platform config dir.
pub fn config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("PALAVER_CONFIG") {
        return Some(PathBuf::from(path));
    }
    ProjectDirs::from("", "", "palaver").map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Where the memory database lives.
pub fn data_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "palaver").map(|dirs| dirs.data_dir().to_path_buf())
}
