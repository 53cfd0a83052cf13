//! Application settings and configuration
//!
//! This module provides configuration management for the application,
//! loading settings from environment variables with sensible defaults.

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;

/// Application environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[value(alias = "dev")]
    Development,
    #[value(alias = "stage")]
    Staging,
    #[value(alias = "prod")]
    Production,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Staging => write!(f, "staging"),
            Environment::Production => write!(f, "production"),
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Development
    }
}

impl std::str::FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "staging" | "stage" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            _ => anyhow::bail!(
                "Invalid environment: {}. Expected: development, staging, or production",
                s
            ),
        }
    }
}

/// Daily quota configuration per caller tier
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuotaConfig {
    /// Requests per day for anonymous (IP-identified) callers
    pub anonymous_daily_limit: u32,
    /// Requests per day for GitHub-authenticated callers
    pub authenticated_daily_limit: u32,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            anonymous_daily_limit: 5,
            authenticated_daily_limit: 25,
        }
    }
}

/// Aggregate spend cap configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BudgetConfig {
    /// Daily spend cap across all callers, in USD. Zero disables the cap.
    pub daily_cap_usd: f64,
    /// Estimated cost per 1K tokens, in USD
    pub cost_per_1k_tokens_usd: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_cap_usd: 10.0,
            cost_per_1k_tokens_usd: 0.001,
        }
    }
}

impl BudgetConfig {
    /// Daily cap in fixed-point micro-dollars
    pub fn cap_micros(&self) -> i64 {
        (self.daily_cap_usd * 1_000_000.0) as i64
    }

    /// Cost rate per 1K tokens in fixed-point micro-dollars
    pub fn rate_micros_per_1k(&self) -> i64 {
        (self.cost_per_1k_tokens_usd * 1_000_000.0) as i64
    }
}

/// Upstream backend configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// Model served through the proxy
    pub model: String,
    /// Named API keys, primary first. Up to three are read from the
    /// environment; order is the configuration order, not a priority.
    #[serde(skip_serializing)]
    pub api_keys: Vec<(String, String)>,
    /// Base URL override (for tests and regional endpoints)
    pub base_url: Option<String>,
    /// Per-attempt deadline for upstream calls
    pub timeout_seconds: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            model: "gemini-1.5-flash".to_string(),
            api_keys: Vec::new(),
            base_url: None,
            timeout_seconds: 60,
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    // App settings
    pub app_name: String,
    pub app_version: String,
    pub environment: Environment,
    pub log_level: String,

    // Server settings
    pub host: String,
    pub port: u16,
    /// Externally reachable base URL, used to build OAuth redirect URIs
    pub public_base_url: String,

    // Shared coordination store
    pub store_url: Option<String>,

    // Upstream backend
    pub upstream: UpstreamConfig,

    // Quotas and budget
    pub quota: QuotaConfig,
    pub budget: BudgetConfig,

    // GitHub OAuth
    pub github_client_id: Option<String>,
    #[serde(skip_serializing)]
    pub github_client_secret: Option<String>,

    // Alerting
    pub alert_webhook_url: Option<String>,

    // Optional external analytics sink
    pub analytics_sink_url: Option<String>,
    #[serde(skip_serializing)]
    pub analytics_sink_key: Option<String>,

    // Sessions
    pub session_ttl_days: i64,

    // Request validation
    pub max_prompt_chars: usize,
}

impl Settings {
    /// Load settings from environment variables with defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists (ignored in production typically)
        dotenvy::dotenv().ok();

        let host = env_or_default("HOST", "0.0.0.0");
        let port: u16 = env_or_default("PORT", "8000")
            .parse()
            .context("Invalid PORT value")?;

        let settings = Self {
            app_name: env_or_default("APP_NAME", "rocket-community-proxy"),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: env_or_default("ENVIRONMENT", "development")
                .parse()
                .unwrap_or_default(),
            log_level: env_or_default("LOG_LEVEL", "info"),

            public_base_url: env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| format!("http://{}:{}", host, port)),
            host,
            port,

            store_url: env::var("STORE_URL").ok(),

            upstream: UpstreamConfig {
                model: env_or_default("GEMINI_MODEL", "gemini-1.5-flash"),
                api_keys: Self::load_upstream_keys(),
                base_url: env::var("GEMINI_BASE_URL").ok(),
                timeout_seconds: env_or_default("UPSTREAM_TIMEOUT_SECONDS", "60")
                    .parse()
                    .unwrap_or(60),
            },

            quota: QuotaConfig {
                anonymous_daily_limit: env_or_default("ANON_DAILY_LIMIT", "5")
                    .parse()
                    .unwrap_or(5),
                authenticated_daily_limit: env_or_default("AUTH_DAILY_LIMIT", "25")
                    .parse()
                    .unwrap_or(25),
            },

            budget: BudgetConfig {
                daily_cap_usd: env_or_default("DAILY_BUDGET_USD", "10.0")
                    .parse()
                    .unwrap_or(10.0),
                cost_per_1k_tokens_usd: env_or_default("COST_PER_1K_TOKENS_USD", "0.001")
                    .parse()
                    .unwrap_or(0.001),
            },

            github_client_id: env::var("GITHUB_CLIENT_ID").ok(),
            github_client_secret: env::var("GITHUB_CLIENT_SECRET").ok(),

            alert_webhook_url: env::var("ALERT_WEBHOOK_URL").ok(),

            analytics_sink_url: env::var("ANALYTICS_SINK_URL").ok(),
            analytics_sink_key: env::var("ANALYTICS_SINK_KEY").ok(),

            session_ttl_days: env_or_default("SESSION_TTL_DAYS", "30")
                .parse()
                .unwrap_or(30),

            max_prompt_chars: env_or_default("MAX_PROMPT_CHARS", "32000")
                .parse()
                .unwrap_or(32_000),
        };

        settings.validate()?;

        Ok(settings)
    }

    /// Read the fixed credential slots: primary plus two fallbacks.
    fn load_upstream_keys() -> Vec<(String, String)> {
        let mut keys = Vec::new();
        for (slot, var) in [
            ("primary", "GEMINI_API_KEY"),
            ("fallback1", "GEMINI_API_KEY_FALLBACK1"),
            ("fallback2", "GEMINI_API_KEY_FALLBACK2"),
        ] {
            if let Ok(value) = env::var(var) {
                if !value.trim().is_empty() {
                    keys.push((slot.to_string(), value));
                }
            }
        }
        keys
    }

    /// Validate settings
    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("Port cannot be 0");
        }

        if self.quota.anonymous_daily_limit == 0 {
            anyhow::bail!("ANON_DAILY_LIMIT must be > 0");
        }
        if self.quota.authenticated_daily_limit == 0 {
            anyhow::bail!("AUTH_DAILY_LIMIT must be > 0");
        }

        if self.upstream.timeout_seconds == 0 {
            anyhow::bail!("UPSTREAM_TIMEOUT_SECONDS must be > 0");
        }

        if self.budget.daily_cap_usd < 0.0 {
            anyhow::bail!("DAILY_BUDGET_USD cannot be negative");
        }

        if self.max_prompt_chars == 0 {
            anyhow::bail!("MAX_PROMPT_CHARS must be > 0");
        }

        // OAuth needs both halves of the client credential
        if self.github_client_id.is_some() != self.github_client_secret.is_some() {
            anyhow::bail!("GITHUB_CLIENT_ID and GITHUB_CLIENT_SECRET must be set together");
        }

        if self.environment == Environment::Production && self.upstream.api_keys.is_empty() {
            tracing::warn!("Running in production with no upstream API keys configured!");
        }
        if self.environment == Environment::Production && self.store_url.is_none() {
            tracing::warn!(
                "Running in production without STORE_URL; quotas will not be shared across instances!"
            );
        }

        Ok(())
    }

    /// Check if running in development mode
    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }

    /// Check if running in production mode
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Get the server address string
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// OAuth callback URL derived from the public base URL
    pub fn oauth_redirect_uri(&self) -> String {
        format!(
            "{}/auth/callback",
            self.public_base_url.trim_end_matches('/')
        )
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: "rocket-community-proxy".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: Environment::Development,
            log_level: "info".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8000,
            public_base_url: "http://0.0.0.0:8000".to_string(),
            store_url: None,
            upstream: UpstreamConfig::default(),
            quota: QuotaConfig::default(),
            budget: BudgetConfig::default(),
            github_client_id: None,
            github_client_secret: None,
            alert_webhook_url: None,
            analytics_sink_url: None,
            analytics_sink_key: None,
            session_ttl_days: 30,
            max_prompt_chars: 32_000,
        }
    }
}

/// Helper function to get environment variable with default
fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.app_name, "rocket-community-proxy");
        assert_eq!(settings.port, 8000);
        assert_eq!(settings.quota.anonymous_daily_limit, 5);
        assert_eq!(settings.quota.authenticated_daily_limit, 25);
        assert_eq!(settings.upstream.model, "gemini-1.5-flash");
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!(
            "development".parse::<Environment>().unwrap(),
            Environment::Development
        );
        assert_eq!("dev".parse::<Environment>().unwrap(), Environment::Development);
        assert_eq!(
            "production".parse::<Environment>().unwrap(),
            Environment::Production
        );
        assert_eq!("prod".parse::<Environment>().unwrap(), Environment::Production);
    }

    #[test]
    fn test_budget_fixed_point() {
        let budget = BudgetConfig {
            daily_cap_usd: 10.0,
            cost_per_1k_tokens_usd: 0.001,
        };
        assert_eq!(budget.cap_micros(), 10_000_000);
        assert_eq!(budget.rate_micros_per_1k(), 1_000);
    }

    #[test]
    fn test_server_addr() {
        let settings = Settings::default();
        assert_eq!(settings.server_addr(), "0.0.0.0:8000");
    }

    #[test]
    fn test_oauth_redirect_uri_strips_trailing_slash() {
        let settings = Settings {
            public_base_url: "https://api.rocket-cli.dev/".to_string(),
            ..Default::default()
        };
        assert_eq!(
            settings.oauth_redirect_uri(),
            "https://api.rocket-cli.dev/auth/callback"
        );
    }
}
