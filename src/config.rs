use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, env, fs, path::Path};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default, rename = "rate-limit")]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServerConfig {
    #[serde(default = "default_http_bind")]
    pub bind: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_rpm")]
    pub requests_per_minute: u32,
    #[serde(default = "default_exempt_path_prefixes")]
    pub exempt_path_prefixes: Vec<String>,
    #[serde(default = "default_bucket_ttl")]
    pub bucket_ttl_secs: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// 0 disables the ceiling
    #[serde(default = "default_max_buckets")]
    pub max_buckets: usize,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AuthConfig {
    /// Bearer token -> user name. Stands in for JWT verification in
    /// development and tests.
    #[serde(default)]
    pub tokens: HashMap<String, String>,
}

// Defaults
fn default_http_bind() -> String { "0.0.0.0:8080".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_true() -> bool { true }
fn default_rpm() -> u32 { 10 }
fn default_bucket_ttl() -> u64 { 600 }
fn default_sweep_interval() -> u64 { 300 }
fn default_max_buckets() -> usize { 100_000 }
fn default_shutdown_grace() -> u64 { 5 }
fn default_exempt_path_prefixes() -> Vec<String> {
    ["/", "/health", "/metrics", "/docs", "/swagger", "/api-docs", "/v3/api-docs"]
        .iter()
        .map(|p| p.to_string())
        .collect()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_http_bind(),
            log_level: default_log_level(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: default_rpm(),
            exempt_path_prefixes: default_exempt_path_prefixes(),
            bucket_ttl_secs: default_bucket_ttl(),
            sweep_interval_secs: default_sweep_interval(),
            max_buckets: default_max_buckets(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

impl RateLimitConfig {
    /// Whether `path` bypasses admission control. A bare `/` entry exempts
    /// only the root path, not everything under it.
    pub fn is_exempt(&self, path: &str) -> bool {
        self.exempt_path_prefixes.iter().any(|prefix| {
            if prefix == "/" {
                path == "/"
            } else {
                path.starts_with(prefix.as_str())
            }
        })
    }

    fn validate(&self) -> Result<()> {
        if self.requests_per_minute == 0 {
            anyhow::bail!("rate-limit.requests-per-minute must be greater than 0");
        }
        if self.sweep_interval_secs == 0 {
            anyhow::bail!("rate-limit.sweep-interval-secs must be greater than 0");
        }
        if self.bucket_ttl_secs < 60 {
            tracing::warn!(
                "rate-limit.bucket-ttl-secs is {}s, shorter than the refill window; \
                 idle callers may get a fresh quota early",
                self.bucket_ttl_secs
            );
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from file and environment. A missing file means defaults.
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let config_path = env::var("TURNSTILE_CONFIG").ok().or_else(|| {
            let home_config = format!(
                "{}/.config/turnstile/config.toml",
                env::var("HOME").unwrap_or_default()
            );
            let locations = [
                "./turnstile.toml",
                "./config.toml",
                "/etc/turnstile/config.toml",
                home_config.as_str(),
            ];

            locations
                .iter()
                .find(|path| Path::new(path).exists())
                .map(|path| path.to_string())
        });

        let Some(config_path) = config_path else {
            tracing::debug!("No config file found, using defaults");
            let config = Config::default();
            config.rate_limit.validate()?;
            return Ok(config);
        };

        let config_content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;

        Self::from_toml(&config_content)
            .with_context(|| format!("Invalid config file: {}", config_path))
    }

    /// Parse and validate a TOML document, substituting `${VAR}` references first
    pub fn from_toml(content: &str) -> Result<Self> {
        let content = Self::substitute_env_vars(content);

        let config: Config = toml::from_str(&content).context("Failed to parse TOML")?;
        config.rate_limit.validate()?;

        Ok(config)
    }

    /// Substitute ${VAR_NAME} with environment variable values
    fn substitute_env_vars(content: &str) -> String {
        let mut result = content.to_string();
        let mut pos = 0;

        // Substituted values are not rescanned
        while let Some(offset) = result[pos..].find("${") {
            let start = pos + offset;
            if let Some(end) = result[start..].find('}') {
                let var_name = &result[start + 2..start + end];
                let value = env::var(var_name).unwrap_or_default();
                result.replace_range(start..start + end + 1, &value);
                pos = start + value.len();
            } else {
                break;
            }
        }

        result
    }
}
