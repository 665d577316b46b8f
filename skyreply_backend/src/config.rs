use anyhow::Result;
use serde::Deserialize;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Clone, Deserialize)]
pub struct BotConfig {
    // Bluesky account the bot posts as
    #[serde(default)]
    pub handle: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_service_url")]
    pub service_url: String,

    // LLM configuration (OpenAI-compatible chat completions)
    #[serde(default = "default_llm_url")]
    pub llm_api_url: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default)]
    pub llm_api_key: Option<String>,
    #[serde(default)]
    pub llm_organization: Option<String>,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    // Polling
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

fn default_service_url() -> String {
    "https://bsky.social".to_string()
}

fn default_llm_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4".to_string()
}

fn default_system_prompt() -> String {
    "Reply friendly in 280 characters or less. No @mentions.".to_string()
}

fn default_poll_interval() -> u64 {
    30
}

fn default_http_timeout() -> u64 {
    60
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            handle: String::new(),
            password: String::new(),
            service_url: default_service_url(),
            llm_api_url: default_llm_url(),
            llm_model: default_llm_model(),
            llm_api_key: None,
            llm_organization: None,
            system_prompt: default_system_prompt(),
            poll_interval_secs: default_poll_interval(),
            http_timeout_secs: default_http_timeout(),
        }
    }
}

// Credentials never reach the logs.
impl fmt::Debug for BotConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotConfig")
            .field("handle", &self.handle)
            .field("password", &redact(&self.password))
            .field("service_url", &self.service_url)
            .field("llm_api_url", &self.llm_api_url)
            .field("llm_model", &self.llm_model)
            .field("llm_api_key", &self.llm_api_key.as_deref().map(redact))
            .field("llm_organization", &self.llm_organization)
            .field("system_prompt", &self.system_prompt)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .finish()
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        ""
    } else {
        "<redacted>"
    }
}

impl BotConfig {
    /// Get the directory containing the executable
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    /// Get the path to the config file (relative to executable)
    pub fn config_path() -> PathBuf {
        Self::get_base_dir().join("skyreply_config.toml")
    }

    /// Load config from skyreply_config.toml (next to executable), then
    /// layer environment variables on top.
    pub fn load() -> Self {
        let mut config = Self::load_from_path(&Self::config_path());
        config.apply_env_overrides();
        config
    }

    /// Read a TOML config file, falling back to defaults when it is missing
    /// or unparsable.
    pub fn load_from_path(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<BotConfig>(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {:?}", path);
                    config
                }
                Err(e) => {
                    tracing::error!("Failed to parse {:?}: {}", path, e);
                    Self::default()
                }
            },
            Err(_) => {
                tracing::debug!("No config file at {:?}, using defaults + env vars", path);
                Self::default()
            }
        }
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(handle) = lookup("HANDLE") {
            self.handle = handle.trim().to_string();
        }

        if let Some(password) = lookup("PASSWORD") {
            self.password = password;
        }

        if let Some(url) = lookup("BSKY_SERVICE_URL") {
            if !url.trim().is_empty() {
                self.service_url = url.trim().trim_end_matches('/').to_string();
            }
        }

        if let Some(url) = lookup("LLM_API_URL") {
            if !url.trim().is_empty() {
                self.llm_api_url = url.trim().trim_end_matches('/').to_string();
            }
        }

        if let Some(model) = lookup("LLM_MODEL") {
            if !model.trim().is_empty() {
                self.llm_model = model;
            }
        }

        if let Some(key) = lookup("OPENAI_API_KEY") {
            if !key.trim().is_empty() {
                self.llm_api_key = Some(key);
            }
        }

        if let Some(org) = lookup("OPENAI_ORGANIZATION") {
            if !org.trim().is_empty() {
                self.llm_organization = Some(org);
            }
        }

        if let Some(prompt) = lookup("BOT_SYSTEM_PROMPT") {
            if !prompt.trim().is_empty() {
                self.system_prompt = prompt;
            }
        }

        if let Some(interval) = lookup("BOT_POLL_INTERVAL_SECS") {
            if let Ok(seconds) = interval.trim().parse() {
                self.poll_interval_secs = seconds;
            }
        }

        if let Some(timeout) = lookup("BOT_HTTP_TIMEOUT_SECS") {
            if let Ok(seconds) = timeout.trim().parse() {
                self.http_timeout_secs = seconds;
            }
        }
    }

    /// Credentials are required to log in; without them the bot cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.handle.trim().is_empty() {
            anyhow::bail!("HANDLE is not set");
        }
        if self.password.is_empty() {
            anyhow::bail!("PASSWORD is not set");
        }
        if self.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be greater than zero");
        }
        Ok(())
    }
}
