// src/config.rs
use crate::error::Result;
use anyhow::{anyhow, Context};
use std::path::PathBuf;
use std::str::FromStr;
use std::{env, fmt};

pub const APP_DIR: &str = "shell-chat";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    /// Any endpoint speaking the OpenAI chat completions API.
    OpenAi,
    Ollama,
}

impl LlmProvider {
    pub fn get_provider_name(&self) -> &str {
        match self {
            LlmProvider::OpenAi => "OpenAI",
            LlmProvider::Ollama => "Ollama",
        }
    }
}

impl FromStr for LlmProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" | "openai_compatible" => Ok(LlmProvider::OpenAi),
            "ollama" => Ok(LlmProvider::Ollama),
            other => Err(anyhow!("Unknown provider '{}'. Available: openai, ollama", other)),
        }
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get_provider_name())
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // General
    pub active_provider: LlmProvider,
    pub request_timeout: u64,
    pub prettify_markdown: bool,

    // OpenAI-compatible
    pub openai_api_key: Option<String>,
    pub api_base_url: String,
    pub default_model: String,

    // Ollama specific
    pub ollama_base_url: String,
    pub default_ollama_model: String,

    // Chat history
    pub chat_cache_path: PathBuf,
    pub chat_cache_length: usize,

    // Shell integration
    pub default_execute_shell_cmd: bool,
    pub shell_interaction: bool,
    pub os_name: String,
    pub shell_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            active_provider: LlmProvider::OpenAi,
            request_timeout: 60,
            prettify_markdown: true,
            openai_api_key: None,
            api_base_url: "https://api.openai.com/v1".to_string(),
            default_model: "gpt-4o-mini".to_string(),
            ollama_base_url: "http://localhost:11434".to_string(),
            default_ollama_model: "llama3".to_string(),
            chat_cache_path: default_config_dir().join("chat_cache"),
            chat_cache_length: 100,
            default_execute_shell_cmd: false,
            shell_interaction: true,
            os_name: "auto".to_string(),
            shell_name: "auto".to_string(),
        }
    }
}

/// `<config dir>/shell-chat`, falling back to the working directory.
pub fn default_config_dir() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(APP_DIR);
    path
}

impl Config {
    /// Reads the process environment; `.env` is loaded by `main` beforehand.
    pub fn load() -> Result<Self> {
        let config = Config::from_lookup(|key| env::var(key).ok())?;
        if config.active_provider == LlmProvider::OpenAi && config.openai_api_key.is_none() {
            eprintln!("Warning: OPENAI_API_KEY environment variable not set.");
        }
        Ok(config)
    }

    /// Builds a config from defaults overridden by whatever `lookup` returns.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(v) = lookup("LLM_PROVIDER") {
            config.active_provider = v.parse()?;
        }
        if let Some(v) = lookup("REQUEST_TIMEOUT") {
            config.request_timeout = parse_value("REQUEST_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("PRETTIFY_MARKDOWN") {
            config.prettify_markdown = parse_bool("PRETTIFY_MARKDOWN", &v)?;
        }

        config.openai_api_key = lookup("OPENAI_API_KEY").filter(|k| !k.is_empty());
        if let Some(v) = lookup("API_BASE_URL") {
            config.api_base_url = v;
        }
        if let Some(v) = lookup("DEFAULT_MODEL") {
            config.default_model = v;
        }

        if let Some(v) = lookup("OLLAMA_BASE_URL") {
            config.ollama_base_url = v;
        }
        if let Some(v) = lookup("OLLAMA_MODEL") {
            config.default_ollama_model = v;
        }

        if let Some(v) = lookup("CHAT_CACHE_PATH") {
            config.chat_cache_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("CHAT_CACHE_LENGTH") {
            config.chat_cache_length = parse_value("CHAT_CACHE_LENGTH", &v)?;
        }

        if let Some(v) = lookup("DEFAULT_EXECUTE_SHELL_CMD") {
            config.default_execute_shell_cmd = parse_bool("DEFAULT_EXECUTE_SHELL_CMD", &v)?;
        }
        if let Some(v) = lookup("SHELL_INTERACTION") {
            config.shell_interaction = parse_bool("SHELL_INTERACTION", &v)?;
        }
        if let Some(v) = lookup("OS_NAME") {
            config.os_name = v;
        }
        if let Some(v) = lookup("SHELL_NAME") {
            config.shell_name = v;
        }

        Ok(config)
    }

    // Helper to get the currently active model name
    pub fn get_active_model_name(&self) -> &str {
        match self.active_provider {
            LlmProvider::OpenAi => &self.default_model,
            LlmProvider::Ollama => &self.default_ollama_model,
        }
    }

    pub fn get_active_api_key(&self) -> Option<&str> {
        match self.active_provider {
            LlmProvider::OpenAi => self.openai_api_key.as_deref(),
            LlmProvider::Ollama => None,
        }
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse::<T>()
        .with_context(|| format!("Invalid value '{}' for {}", raw, key))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!("Invalid boolean '{}' for {}", raw, key)),
    }
}
