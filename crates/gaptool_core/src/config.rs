use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = "gaptool/0.2";
pub const DEFAULT_QUERY_ENDPOINT: &str = "https://searchconsole.googleapis.com/webmasters/v3";
pub const DEFAULT_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const DEFAULT_SCOPE: &str = "https://www.googleapis.com/auth/webmasters.readonly";
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:8501";
pub const DEFAULT_SUGGEST_ENDPOINT: &str = "https://api.openai.com/v1";
pub const DEFAULT_SUGGEST_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_SUGGEST_API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct GapToolConfig {
    #[serde(default)]
    pub analytics: AnalyticsSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub suggest: SuggestSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct AnalyticsSection {
    pub site_url: Option<String>,
    pub endpoint: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct AuthSection {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub auth_url: Option<String>,
    pub token_url: Option<String>,
    pub redirect_uri: Option<String>,
    pub scope: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct SuggestSection {
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub api_key_env: Option<String>,
}

impl GapToolConfig {
    /// Resolve the analytics site URL: env GAPTOOL_SITE_URL > config > None.
    pub fn site_url(&self) -> Option<String> {
        if let Ok(value) = env::var("GAPTOOL_SITE_URL") {
            let trimmed = value.trim().to_string();
            if !trimmed.is_empty() {
                return Some(trimmed);
            }
        }
        self.analytics.site_url.clone()
    }
}

/// Load and parse a GapToolConfig from a TOML file. Returns default if the file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<GapToolConfig> {
    if !config_path.exists() {
        return Ok(GapToolConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: GapToolConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

/// Runtime settings for the analytics query client: env > config > default.
#[derive(Debug, Clone)]
pub struct AnalyticsClientConfig {
    pub endpoint: String,
    pub site_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl AnalyticsClientConfig {
    pub fn from_config(config: &GapToolConfig) -> Self {
        Self {
            endpoint: env_value(
                "GAPTOOL_QUERY_ENDPOINT",
                config
                    .analytics
                    .endpoint
                    .as_deref()
                    .unwrap_or(DEFAULT_QUERY_ENDPOINT),
            ),
            site_url: config.site_url().unwrap_or_default(),
            user_agent: env_value(
                "GAPTOOL_USER_AGENT",
                config
                    .analytics
                    .user_agent
                    .as_deref()
                    .unwrap_or(DEFAULT_USER_AGENT),
            ),
            timeout_ms: env_value_u64("GAPTOOL_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_ms: env_value_u64("GAPTOOL_RATE_LIMIT_MS", 300),
            max_retries: env_value_usize("GAPTOOL_HTTP_RETRIES", 2),
            retry_delay_ms: env_value_u64("GAPTOOL_HTTP_RETRY_DELAY_MS", 500),
        }
    }
}

/// Settings for the authorization-code and refresh exchanges.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub auth_url: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scope: String,
    pub timeout_ms: u64,
}

impl OAuthConfig {
    pub fn from_config(config: &GapToolConfig) -> Self {
        Self {
            auth_url: env_value(
                "GAPTOOL_AUTH_URL",
                config.auth.auth_url.as_deref().unwrap_or(DEFAULT_AUTH_URL),
            ),
            token_url: env_value(
                "GAPTOOL_TOKEN_URL",
                config
                    .auth
                    .token_url
                    .as_deref()
                    .unwrap_or(DEFAULT_TOKEN_URL),
            ),
            client_id: env_value(
                "GAPTOOL_CLIENT_ID",
                config.auth.client_id.as_deref().unwrap_or(""),
            ),
            client_secret: env_value(
                "GAPTOOL_CLIENT_SECRET",
                config.auth.client_secret.as_deref().unwrap_or(""),
            ),
            redirect_uri: env_value(
                "GAPTOOL_REDIRECT_URI",
                config
                    .auth
                    .redirect_uri
                    .as_deref()
                    .unwrap_or(DEFAULT_REDIRECT_URI),
            ),
            scope: env_value(
                "GAPTOOL_SCOPE",
                config.auth.scope.as_deref().unwrap_or(DEFAULT_SCOPE),
            ),
            timeout_ms: env_value_u64("GAPTOOL_HTTP_TIMEOUT_MS", 30_000),
        }
    }

    pub fn ensure_complete(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.client_id.is_empty() {
            missing.push("client_id (GAPTOOL_CLIENT_ID or [auth].client_id)");
        }
        if self.client_secret.is_empty() {
            missing.push("client_secret (GAPTOOL_CLIENT_SECRET or [auth].client_secret)");
        }
        if !missing.is_empty() {
            bail!("incomplete auth configuration, missing: {}", missing.join(", "));
        }
        Ok(())
    }
}

/// Settings for the copy-suggestion endpoint.
#[derive(Debug, Clone)]
pub struct SuggestConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key_env: String,
    pub timeout_ms: u64,
}

impl SuggestConfig {
    pub fn from_config(config: &GapToolConfig) -> Self {
        Self {
            endpoint: env_value(
                "GAPTOOL_SUGGEST_ENDPOINT",
                config
                    .suggest
                    .endpoint
                    .as_deref()
                    .unwrap_or(DEFAULT_SUGGEST_ENDPOINT),
            ),
            model: env_value(
                "GAPTOOL_SUGGEST_MODEL",
                config
                    .suggest
                    .model
                    .as_deref()
                    .unwrap_or(DEFAULT_SUGGEST_MODEL),
            ),
            api_key_env: config
                .suggest
                .api_key_env
                .clone()
                .unwrap_or_else(|| DEFAULT_SUGGEST_API_KEY_ENV.to_string()),
            timeout_ms: env_value_u64("GAPTOOL_HTTP_TIMEOUT_MS", 30_000),
        }
    }
}

pub fn render_default_config() -> String {
    format!(
        "# gaptool runtime configuration (materialized by `gaptool init`)\n\
         \n\
         [analytics]\n\
         # site_url = \"https://example.com/\"\n\
         # endpoint = \"{DEFAULT_QUERY_ENDPOINT}\"\n\
         # user_agent = \"{DEFAULT_USER_AGENT}\"\n\
         \n\
         [auth]\n\
         # client_id = \"...\"\n\
         # client_secret = \"...\"\n\
         # auth_url = \"{DEFAULT_AUTH_URL}\"\n\
         # token_url = \"{DEFAULT_TOKEN_URL}\"\n\
         # redirect_uri = \"{DEFAULT_REDIRECT_URI}\"\n\
         # scope = \"{DEFAULT_SCOPE}\"\n\
         \n\
         [suggest]\n\
         # endpoint = \"{DEFAULT_SUGGEST_ENDPOINT}\"\n\
         # model = \"{DEFAULT_SUGGEST_MODEL}\"\n\
         # api_key_env = \"{DEFAULT_SUGGEST_API_KEY_ENV}\"\n"
    )
}

pub(crate) fn env_value(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => default.to_string(),
    }
}

pub(crate) fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

pub(crate) fn env_value_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}
