//! Configuration types, built from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::LlmConfig;

const DEFAULT_AUTHORITY_URL: &str = "https://login.microsoftonline.com";
const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";
const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Largest accepted fetch window (7 days).
const MAX_LOOKBACK_MINUTES: i64 = 7 * 24 * 60;

/// OAuth client registration and mail API endpoints.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: SecretString,
    /// Directory (identity tenant) the authority URL is scoped to.
    pub directory_id: String,
    pub redirect_uri: String,
    pub authority_url: String,
    pub graph_base_url: String,
    /// Timeout applied to every outbound request.
    pub http_timeout: Duration,
}

/// Ingestion scheduler configuration.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Period between ticks.
    pub poll_interval: Duration,
    /// Receipt-time window requested from the provider on each fetch.
    pub lookback_minutes: i64,
    /// Tenants processed at once. 1 keeps tenants strictly sequential.
    pub max_concurrent_tenants: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            lookback_minutes: 5,
            max_concurrent_tenants: 1,
        }
    }
}

/// Full process configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Symmetric key for the credential vault (raw or base64).
    pub encryption_key: SecretString,
    pub oauth: OAuthConfig,
    pub ingest: IngestConfig,
    pub llm: LlmConfig,
    pub db_path: PathBuf,
    pub http_port: u16,
    /// Where the OAuth callback redirects the browser when done.
    pub frontend_url: String,
    /// `from` address recorded on manually submitted tasks.
    pub panel_sender: String,
    /// Directory for rolling log files; stderr only when unset.
    pub log_dir: Option<PathBuf>,
    /// Tenant created at startup if no tenant with this name exists.
    pub bootstrap_tenant: Option<String>,
}

impl AppConfig {
    /// Build config from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let http_timeout = Duration::from_secs(env.parse_or("MAIL_TASKS_HTTP_TIMEOUT_SECS", 30));

        let oauth = OAuthConfig {
            client_id: env.required("MAIL_TASKS_OAUTH_CLIENT_ID")?,
            client_secret: SecretString::from(env.required("MAIL_TASKS_OAUTH_CLIENT_SECRET")?),
            directory_id: env.or("MAIL_TASKS_OAUTH_TENANT_ID", "common"),
            redirect_uri: env.or(
                "MAIL_TASKS_OAUTH_REDIRECT_URI",
                "http://localhost:8080/api/auth/callback",
            ),
            authority_url: trim_slash(env.or("MAIL_TASKS_AUTHORITY_URL", DEFAULT_AUTHORITY_URL)),
            graph_base_url: trim_slash(env.or("MAIL_TASKS_GRAPH_BASE_URL", DEFAULT_GRAPH_BASE_URL)),
            http_timeout,
        };

        let defaults = IngestConfig::default();
        let ingest = IngestConfig {
            poll_interval: Duration::from_secs(
                env.parse_or("MAIL_TASKS_POLL_INTERVAL_SECS", defaults.poll_interval.as_secs())
                    .max(1),
            ),
            lookback_minutes: env
                .parse_or("MAIL_TASKS_LOOKBACK_MINUTES", defaults.lookback_minutes)
                .clamp(1, MAX_LOOKBACK_MINUTES),
            max_concurrent_tenants: env
                .parse_or(
                    "MAIL_TASKS_MAX_CONCURRENT_TENANTS",
                    defaults.max_concurrent_tenants,
                )
                .max(1),
        };

        let llm = LlmConfig {
            api_key: SecretString::from(env.required("OPENAI_API_KEY")?),
            model: env.or("MAIL_TASKS_MODEL", DEFAULT_MODEL),
            base_url: trim_slash(env.or("MAIL_TASKS_LLM_BASE_URL", DEFAULT_LLM_BASE_URL)),
            timeout: http_timeout,
        };

        Ok(Self {
            encryption_key: SecretString::from(env.required("MAIL_TASKS_ENCRYPTION_KEY")?),
            oauth,
            ingest,
            llm,
            db_path: PathBuf::from(env.or("MAIL_TASKS_DB_PATH", "./data/mail-tasks.db")),
            http_port: env.parse_or("MAIL_TASKS_HTTP_PORT", 8080),
            frontend_url: trim_slash(env.or("MAIL_TASKS_FRONTEND_URL", "http://localhost:5173")),
            panel_sender: env.or("MAIL_TASKS_PANEL_SENDER", "panel@mailtasks.ai"),
            log_dir: env.optional("MAIL_TASKS_LOG_DIR").map(PathBuf::from),
            bootstrap_tenant: env.optional("MAIL_TASKS_BOOTSTRAP_TENANT"),
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.optional(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    /// Unparseable values fall back to the default.
    fn parse_or<T: FromStr>(&self, key: &str, default: T) -> T {
        match self.optional(key) {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::warn!(key, value = %raw, "Ignoring invalid config value");
                default
            }),
            None => default,
        }
    }
}

fn trim_slash(s: String) -> String {
    s.trim_end_matches('/').to_string()
}
