//! Configuration management for ProspectForge services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// External research webhooks
    pub webhooks: WebhookConfig,

    /// Orchestrator behaviour
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Realtime notification bridge
    #[serde(default)]
    pub realtime: RealtimeConfig,

    /// Enrichment (Clay) webhook
    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    /// Request identity configuration
    #[serde(default)]
    pub auth: AuthConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL (for writes)
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Run embedded migrations on startup
    #[serde(default = "default_enabled")]
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebhookConfig {
    /// Stage-1 (company research) job URL
    pub company_research_url: String,

    /// Stage-2 (prospect research) job URL
    pub prospect_research_url: String,

    /// Request timeout in seconds. The backing AI jobs are slow.
    #[serde(default = "default_webhook_timeout")]
    pub timeout_secs: u64,

    /// How long the stage-1 callback waits for the stage-2 auto-trigger
    /// to be accepted before answering
    #[serde(default = "default_auto_trigger_wait")]
    pub auto_trigger_wait_secs: u64,

    /// Optional shared secret sent as `X-Webhook-Secret`
    pub shared_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrchestratorConfig {
    /// Companies researched at once within a batch (1 = strictly sequential)
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Move `awaiting_callback` entries to `error` after this many seconds.
    /// Unset means entries wait for a manual retry.
    pub stale_after_secs: Option<u64>,

    /// Window in which a callback reuses a record created synchronously
    #[serde(default = "default_dedupe_window")]
    pub dedupe_window_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RealtimeConfig {
    /// Bridge Postgres NOTIFY events onto the in-process event bus
    #[serde(default = "default_enabled")]
    pub listen: bool,

    /// Broadcast channel capacity
    #[serde(default = "default_event_capacity")]
    pub capacity: usize,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EnrichmentConfig {
    /// Enrichment (Clay) table webhook URL; enrichment is disabled when unset
    pub clay_webhook_url: Option<String>,

    /// Optional API key sent as `x-clay-webhook-auth`
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Header carrying the acting user's id
    #[serde(default = "default_user_header")]
    pub user_header: String,

    /// Request ID header name
    #[serde(default = "default_request_id_header")]
    pub request_id_header: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level or filter directive (debug, info, prospectforge=debug, ...)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Callback requests per second
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 30 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_webhook_timeout() -> u64 { 1800 }
fn default_auto_trigger_wait() -> u64 { 10 }
fn default_max_concurrency() -> usize { 1 }
fn default_dedupe_window() -> u64 { 900 }
fn default_event_capacity() -> usize { 1024 }
fn default_user_header() -> String { "X-User-ID".to_string() }
fn default_request_id_header() -> String { "X-Request-ID".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "prospectforge".to_string() }
fn default_rate_limit() -> u32 { 50 }
fn default_burst() -> u32 { 100 }
fn default_enabled() -> bool { true }

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            stale_after_secs: None,
            dedupe_window_secs: default_dedupe_window(),
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            listen: default_enabled(),
            capacity: default_event_capacity(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            user_header: default_user_header(),
            request_id_header: default_request_id_header(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rate_limit(),
            burst: default_burst(),
            enabled: default_enabled(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with defaults
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__WEBHOOKS__TIMEOUT_SECS=600
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    /// Get the read database URL (falls back to primary)
    pub fn read_database_url(&self) -> &str {
        self.database.read_url.as_deref().unwrap_or(&self.database.url)
    }
}

impl WebhookConfig {
    /// Webhook request timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Auto-trigger wait as Duration
    pub fn auto_trigger_wait(&self) -> Duration {
        Duration::from_secs(self.auto_trigger_wait_secs)
    }
}

impl OrchestratorConfig {
    pub fn stale_after(&self) -> Option<Duration> {
        self.stale_after_secs.map(Duration::from_secs)
    }

    pub fn dedupe_window(&self) -> Duration {
        Duration::from_secs(self.dedupe_window_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
                request_timeout_secs: default_request_timeout(),
                shutdown_timeout_secs: default_shutdown_timeout(),
            },
            database: DatabaseConfig {
                url: "postgres://localhost/prospectforge".to_string(),
                read_url: None,
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
                run_migrations: default_enabled(),
            },
            webhooks: WebhookConfig {
                company_research_url: "http://localhost:5678/webhook/company-research".to_string(),
                prospect_research_url: "http://localhost:5678/webhook/prospect-research".to_string(),
                timeout_secs: default_webhook_timeout(),
                auto_trigger_wait_secs: default_auto_trigger_wait(),
                shared_secret: None,
            },
            orchestrator: OrchestratorConfig::default(),
            realtime: RealtimeConfig::default(),
            enrichment: EnrichmentConfig::default(),
            auth: AuthConfig::default(),
            observability: ObservabilityConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}
