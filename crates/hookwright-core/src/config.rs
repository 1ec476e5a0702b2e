use std::{fs, path::Path, time::Duration};

use anyhow::{anyhow, Context, Result};
use hookwright_provider::{
    HttpBackend, DEFAULT_BOOKMARK_PATH, DEFAULT_HOOKS_PATH, DEFAULT_STREAM_PATH,
};
use serde::{Deserialize, Serialize};

use crate::SessionOptions;

pub const MAIN_CONFIG_FILE: &str = "main.yaml";

fn default_stream_path() -> String {
    DEFAULT_STREAM_PATH.to_string()
}

fn default_bookmark_path() -> String {
    DEFAULT_BOOKMARK_PATH.to_string()
}

fn default_hooks_path() -> String {
    DEFAULT_HOOKS_PATH.to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_token: String,
    #[serde(default = "default_stream_path")]
    pub stream_path: String,
    #[serde(default = "default_bookmark_path")]
    pub bookmark_path: String,
    #[serde(default = "default_hooks_path")]
    pub hooks_path: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Unset means the stream may stay quiet indefinitely.
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Also write a daily rolling log under `<config-root>/logs`.
    #[serde(default = "default_true")]
    pub file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_true(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookwrightConfig {
    pub backend: BackendConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl HookwrightConfig {
    pub fn build_backend(&self) -> HttpBackend {
        let backend = &self.backend;
        HttpBackend::with_timeouts(
            backend.base_url.clone(),
            Duration::from_secs(backend.connect_timeout_secs),
            Duration::from_secs(backend.request_timeout_secs),
        )
        .with_api_token(backend.api_token.clone())
        .with_paths(
            backend.stream_path.clone(),
            backend.bookmark_path.clone(),
            backend.hooks_path.clone(),
        )
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            idle_timeout: self.generation.idle_timeout_secs.map(Duration::from_secs),
        }
    }
}

pub fn resolve_env_var(raw: &str) -> String {
    let mut output = String::new();
    let mut rest = raw;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);

        let candidate = &rest[start + 2..];
        let Some(end) = candidate.find('}') else {
            output.push_str(&rest[start..]);
            return output;
        };

        let key = &candidate[..end];
        output.push_str(&std::env::var(key).unwrap_or_default());
        rest = &candidate[end + 1..];
    }

    output.push_str(rest);
    output
}

pub fn load_config(root: &Path) -> Result<HookwrightConfig> {
    let mut config: HookwrightConfig = read_yaml_file(&root.join(MAIN_CONFIG_FILE))?;
    resolve_config_env(&mut config);
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &HookwrightConfig) -> Result<()> {
    let backend = &config.backend;
    let base_url = backend.base_url.trim();
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        return Err(anyhow!(
            "backend.base_url must start with http:// or https://: {:?}",
            backend.base_url
        ));
    }

    for (name, path) in [
        ("stream_path", &backend.stream_path),
        ("bookmark_path", &backend.bookmark_path),
        ("hooks_path", &backend.hooks_path),
    ] {
        if !path.starts_with('/') {
            return Err(anyhow!("backend.{name} must start with '/': {path:?}"));
        }
    }

    if backend.connect_timeout_secs == 0 || backend.request_timeout_secs == 0 {
        return Err(anyhow!("backend timeouts must be greater than zero"));
    }
    if config.generation.idle_timeout_secs == Some(0) {
        return Err(anyhow!("generation.idle_timeout_secs must be greater than zero"));
    }
    if config.logging.level.trim().is_empty() {
        return Err(anyhow!("logging.level must not be empty"));
    }

    Ok(())
}

fn read_yaml_file<T>(path: &Path) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse yaml file: {}", path.display()))
}

fn resolve_config_env(config: &mut HookwrightConfig) {
    let backend = &mut config.backend;
    backend.base_url = resolve_env_var(&backend.base_url);
    backend.api_token = resolve_env_var(&backend.api_token);
    backend.stream_path = resolve_env_var(&backend.stream_path);
    backend.bookmark_path = resolve_env_var(&backend.bookmark_path);
    backend.hooks_path = resolve_env_var(&backend.hooks_path);
    config.logging.level = resolve_env_var(&config.logging.level);
}
