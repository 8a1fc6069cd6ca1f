use crate::error::{BridgeError, Result};
use crate::transport::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Extra model aliases, merged over the built-in table.
    #[serde(default)]
    pub models: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub base_url: String,
    /// Inline key; takes precedence over `api_key_env`.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_request_secs")]
    pub request_secs: u64,
    #[serde(default = "default_connect_secs")]
    pub connect_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, first try included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_max_event_bytes")]
    pub max_event_bytes: usize,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_allow_origins")]
    pub allow_origins: Vec<String>,
    #[serde(default = "default_allow_methods")]
    pub allow_methods: Vec<String>,
    #[serde(default = "default_allow_headers")]
    pub allow_headers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,
    #[serde(default = "default_max_tokens_ceiling")]
    pub max_tokens_ceiling: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8082
}

fn default_api_key_env() -> String {
    "NEW_API_KEY".to_string()
}

fn default_request_secs() -> u64 {
    30
}

fn default_connect_secs() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_max_event_bytes() -> usize {
    1024 * 1024
}

fn default_channel_capacity() -> usize {
    64
}

fn default_true() -> bool {
    true
}

fn default_allow_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_allow_methods() -> Vec<String> {
    ["GET", "POST", "PUT", "DELETE", "OPTIONS"]
        .iter()
        .map(ToString::to_string)
        .collect()
}

fn default_allow_headers() -> Vec<String> {
    ["Content-Type", "Authorization", "X-API-Key", "anthropic-version"]
        .iter()
        .map(ToString::to_string)
        .collect()
}

fn default_max_request_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_max_tokens_ceiling() -> u64 {
    200_000
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: None,
            api_key_env: default_api_key_env(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: default_request_secs(),
            connect_secs: default_connect_secs(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_event_bytes: default_max_event_bytes(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_origins: default_allow_origins(),
            allow_methods: default_allow_methods(),
            allow_headers: default_allow_headers(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_request_bytes: default_max_request_bytes(),
            max_tokens_ceiling: default_max_tokens_ceiling(),
        }
    }
}

impl BridgeConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file, then apply environment overrides.
    /// Priority: CLI arg > CWD > XDG config > home dir > built-in defaults.
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = explicit_path {
            Self::load(path)?
        } else {
            match config_search_paths().into_iter().find(|p| p.exists()) {
                Some(candidate) => {
                    tracing::info!(path = %candidate.display(), "Loading config");
                    Self::load(&candidate)?
                }
                None => {
                    tracing::info!("No config file found, using defaults and environment");
                    Self::default()
                }
            }
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply `NEW_API*` / `PROXY_*` overrides. Values that fail to parse are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("NEW_API").filter(|v| !v.is_empty()) {
            self.backend.base_url = url;
        }
        if let Some(key) = lookup("NEW_API_KEY").filter(|v| !v.is_empty()) {
            self.backend.api_key = Some(key);
        }
        if let Some(host) = lookup("PROXY_HOST").filter(|v| !v.is_empty()) {
            self.listen.host = host;
        }
        if let Some(port) = lookup("PROXY_PORT").and_then(|v| v.parse().ok()) {
            self.listen.port = port;
        }
        if let Some(secs) = lookup("PROXY_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.timeouts.request_secs = secs;
        }
        if let Some(size) = lookup("PROXY_MAX_REQUEST_SIZE").and_then(|v| v.parse().ok()) {
            self.limits.max_request_bytes = size;
        }
        if let Some(cors) = lookup("PROXY_ENABLE_CORS").and_then(|v| v.parse().ok()) {
            self.cors.enabled = cors;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.backend.base_url.trim().is_empty() {
            return Err(BridgeError::config(
                "backend base_url is required (set [backend].base_url or NEW_API)",
            ));
        }
        self.resolve_api_key()?;
        if self.listen.port == 0 {
            return Err(BridgeError::config("listen port must be non-zero"));
        }
        if self.timeouts.request_secs == 0 || self.timeouts.connect_secs == 0 {
            return Err(BridgeError::config("timeouts must be positive"));
        }
        if self.retry.max_attempts == 0 {
            return Err(BridgeError::config("retry.max_attempts must be at least 1"));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(BridgeError::config(
                "retry.base_delay_ms cannot exceed retry.max_delay_ms",
            ));
        }
        if self.limits.max_request_bytes == 0 || self.limits.max_tokens_ceiling == 0 {
            return Err(BridgeError::config("limits must be positive"));
        }
        if self.stream.max_event_bytes == 0 || self.stream.channel_capacity == 0 {
            return Err(BridgeError::config("stream limits must be positive"));
        }
        Ok(())
    }

    /// Resolve the API key: inline value first, then the configured environment variable.
    pub fn resolve_api_key(&self) -> Result<String> {
        if let Some(key) = self.backend.api_key.as_ref().filter(|k| !k.is_empty()) {
            return Ok(key.clone());
        }
        std::env::var(&self.backend.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                BridgeError::config(format!(
                    "no API key: set [backend].api_key or the '{}' environment variable",
                    self.backend.api_key_env
                ))
            })
    }

    #[must_use]
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen.host, self.listen.port)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.request_secs)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.connect_secs)
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(self.retry.max_attempts)
            .with_base_delay(Duration::from_millis(self.retry.base_delay_ms))
            .with_max_delay(Duration::from_millis(self.retry.max_delay_ms))
    }
}

#[must_use]
pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("claude-bridge.toml")];

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        paths.push(PathBuf::from(xdg).join("claude-bridge").join("config.toml"));
    }
    if let Some(home) = home_dir() {
        paths.push(home.join(".config").join("claude-bridge").join("config.toml"));
        paths.push(home.join(".claude-bridge.toml"));
    }

    paths
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
