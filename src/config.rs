use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Log directives used when `RUST_LOG` is unset or does not parse
pub const DEFAULT_LOG_FILTER: &str = "babyshield_chat=info,tower_http=info";

/// Load `.env` variables. Already-set variables win. Lookup order:
/// 1) BABYSHIELD_ENV_FILE if set
/// 2) ./.env
/// 3) ../.env (repo root when running from crate dir)
pub fn load_env_files() {
    if let Ok(env_path) = std::env::var("BABYSHIELD_ENV_FILE") {
        let _ = dotenvy::from_path(env_path);
    } else {
        let _ = dotenvy::from_path(".env");
        if std::env::var("OPENAI_API_KEY").is_err() && std::env::var("BS_LLM_ENDPOINT").is_err() {
            let _ = dotenvy::from_path("../.env");
        }
    }
}

pub fn log_filter(rust_log: Option<&str>) -> tracing_subscriber::EnvFilter {
    rust_log
        .and_then(|directives| tracing_subscriber::EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Main configuration structure loaded from babyshield.toml and environment variables
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub chat: ChatConfig,
    pub breaker: BreakerSettings,
    pub llm: LlmConfig,
    /// Runtime configuration loaded from environment variables
    #[serde(skip)]
    pub runtime: RuntimeConfig,
}

/// Per-stage budgets for a conversation turn, in seconds
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChatConfig {
    pub router_timeout_sec: f64,
    pub tool_timeout_sec: f64,
    pub synth_timeout_sec: f64,
    /// p95 target for the whole turn
    pub total_budget_sec: f64,
    /// Below this the LLM classification is treated as unclear
    pub min_confidence: f64,
    pub worker_pool_size: usize,
    pub scan_cache_capacity: usize,
    /// JSON object of scan id to scan, loaded into the in-process store at startup
    pub scan_seed_path: Option<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            router_timeout_sec: 0.3,
            tool_timeout_sec: 2.0,
            synth_timeout_sec: 1.5,
            total_budget_sec: 2.8,
            min_confidence: 0.5,
            worker_pool_size: 32,
            scan_cache_capacity: 1024,
            scan_seed_path: None,
        }
    }
}

impl ChatConfig {
    pub fn router_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.router_timeout_sec)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.tool_timeout_sec)
    }

    pub fn synth_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.synth_timeout_sec)
    }

    pub fn total_budget(&self) -> Duration {
        Duration::from_secs_f64(self.total_budget_sec)
    }
}

/// Circuit breaker thresholds shared by every guarded dependency
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub threshold: u32,
    pub window_sec: u64,
    pub cooldown_sec: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            threshold: 5,
            window_sec: 60,
            cooldown_sec: 120,
        }
    }
}

/// Language model endpoint and model names
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LlmConfig {
    pub endpoint: String,
    pub classify_model: String,
    pub synth_model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com".to_string(),
            classify_model: "gpt-4o-mini".to_string(),
            synth_model: "gpt-4o-mini".to_string(),
            api_key: None,
        }
    }
}

/// Runtime configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub http_bind: std::net::SocketAddr,
    /// Global kill switch for the chat endpoints
    pub chat_enabled: bool,
    /// Percentage of users (0-100) that get chat
    pub chat_rollout_pct: u8,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            http_bind: std::net::SocketAddr::from(([127, 0, 0, 1], 8001)),
            chat_enabled: true,
            chat_rollout_pct: 100,
        }
    }
}

impl Config {
    /// Load configuration from TOML file and environment variables
    /// Uses BABYSHIELD_CONFIG environment variable or defaults to "babyshield.toml"
    pub fn load() -> anyhow::Result<Self> {
        load_env_files();

        let config_path = std::env::var("BABYSHIELD_CONFIG")
            .unwrap_or_else(|_| "babyshield.toml".to_string());

        let mut config = Self::from_file(&config_path)?;
        config.apply_env_overrides();
        config.runtime = RuntimeConfig::load_from_env();
        config.validate()?;
        Ok(config)
    }

    /// Read the TOML file, falling back to defaults when it does not exist
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(toml::from_str(&content)?),
            Err(_) => {
                tracing::warn!("Config file {} not found, using defaults", path);
                Ok(Self::default())
            }
        }
    }

    /// Apply env-first overrides on top of the file values
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse::<f64>("ROUTER_TIMEOUT_SEC") {
            self.chat.router_timeout_sec = v;
        }
        if let Some(v) = env_parse::<f64>("TOOL_TIMEOUT_SEC") {
            self.chat.tool_timeout_sec = v;
        }
        if let Some(v) = env_parse::<f64>("SYNTH_TIMEOUT_SEC") {
            self.chat.synth_timeout_sec = v;
        }
        if let Some(v) = env_parse::<f64>("TOTAL_BUDGET_SEC") {
            self.chat.total_budget_sec = v;
        }
        if let Some(v) = env_parse::<usize>("BS_WORKER_POOL_SIZE") {
            self.chat.worker_pool_size = v;
        }
        if let Some(v) = env_parse::<usize>("BS_SCAN_CACHE_CAPACITY") {
            self.chat.scan_cache_capacity = v;
        }
        if let Ok(path) = std::env::var("BS_SCAN_SEED") {
            self.chat.scan_seed_path = Some(path);
        }

        if let Some(v) = env_parse::<u32>("BS_BREAKER_THRESHOLD") {
            self.breaker.threshold = v;
        }
        if let Some(v) = env_parse::<u64>("BS_BREAKER_WINDOW_SEC") {
            self.breaker.window_sec = v;
        }
        if let Some(v) = env_parse::<u64>("BS_BREAKER_COOLDOWN_SEC") {
            self.breaker.cooldown_sec = v;
        }

        if let Ok(endpoint) = std::env::var("BS_LLM_ENDPOINT") {
            self.llm.endpoint = endpoint;
        }
        if let Ok(model) = std::env::var("BS_LLM_CLASSIFY_MODEL") {
            self.llm.classify_model = model;
        }
        if let Ok(model) = std::env::var("BS_LLM_SYNTH_MODEL") {
            self.llm.synth_model = model;
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.llm.api_key = Some(key);
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let chat = &self.chat;
        for (name, value) in [
            ("router_timeout_sec", chat.router_timeout_sec),
            ("tool_timeout_sec", chat.tool_timeout_sec),
            ("synth_timeout_sec", chat.synth_timeout_sec),
            ("total_budget_sec", chat.total_budget_sec),
        ] {
            if !value.is_finite() || value <= 0.0 {
                anyhow::bail!("{} must be > 0, got {}", name, value);
            }
            if value > chat.total_budget_sec {
                anyhow::bail!(
                    "{} ({}) exceeds total_budget_sec ({})",
                    name,
                    value,
                    chat.total_budget_sec
                );
            }
        }
        if !(0.0..=1.0).contains(&chat.min_confidence) {
            anyhow::bail!("min_confidence must be between 0.0 and 1.0");
        }
        if chat.worker_pool_size == 0 {
            anyhow::bail!("worker_pool_size must be at least 1");
        }
        if self.breaker.threshold == 0 {
            anyhow::bail!("breaker threshold must be at least 1");
        }
        if self.runtime.chat_rollout_pct > 100 {
            anyhow::bail!("BS_CHAT_ROLLOUT_PCT must be between 0 and 100");
        }
        Ok(())
    }
}

impl RuntimeConfig {
    /// Load runtime configuration from environment variables
    pub fn load_from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("BS_HTTP_BIND")
            && let Ok(bind) = v.parse::<std::net::SocketAddr>()
        {
            cfg.http_bind = bind;
        }
        if let Ok(enabled) = std::env::var("BS_CHAT_ENABLED") {
            cfg.chat_enabled = !(enabled == "0" || enabled.eq_ignore_ascii_case("false"));
        }
        if let Some(pct) = env_parse::<u8>("BS_CHAT_ROLLOUT_PCT") {
            cfg.chat_rollout_pct = pct.min(100);
        }

        cfg
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chat.router_timeout(), Duration::from_millis(300));
        assert_eq!(config.breaker.threshold, 5);
        assert_eq!(config.breaker.cooldown_sec, 120);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[chat]\nsynth_timeout_sec = 1.0\n\n[breaker]\nthreshold = 3"
        )
        .unwrap();

        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.chat.synth_timeout_sec, 1.0);
        assert_eq!(config.chat.tool_timeout_sec, 2.0);
        assert_eq!(config.breaker.threshold, 3);
        assert_eq!(config.breaker.window_sec, 60);
    }

    #[test]
    fn test_log_filter_falls_back_to_default() {
        assert!(tracing_subscriber::EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
        let default = log_filter(None).to_string();
        assert!(default.contains("babyshield_chat=info"), "{default}");
        assert_eq!(log_filter(Some("debug")).to_string(), "debug");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = Config::from_file("/nonexistent/babyshield.toml").unwrap();
        assert_eq!(config.chat.total_budget_sec, 2.8);
    }

    #[test]
    fn test_validate_rejects_stage_over_total() {
        let mut config = Config::default();
        config.chat.synth_timeout_sec = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        let mut config = Config::default();
        config.breaker.threshold = 0;
        assert!(config.validate().is_err());
    }
}
