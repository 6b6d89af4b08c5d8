use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the gallery service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Object storage configuration
    pub s3: S3Config,
    /// Database configuration
    pub database: DatabaseConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// Credential verification and admin allow-list
    pub auth: AuthConfig,
    /// Submission limits
    #[serde(default)]
    pub submission: SubmissionConfig,
    /// Pagination limits for list endpoints
    #[serde(default)]
    pub listing: ListingConfig,
    /// Outbound e-mail notifications
    #[serde(default)]
    pub notifications: NotificationConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Object storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Bucket holding gallery images
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, hosted storage gateways)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Base URL under which objects are publicly served.
    /// Derived from endpoint/bucket/region when unset.
    pub public_base_url: Option<String>,
    /// Concurrent deletes when removing several keys
    #[serde(default = "default_delete_concurrency")]
    pub delete_concurrency: usize,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins (empty = any)
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

/// Bearer credential verification
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HS256 secret shared with the identity provider
    pub jwt_secret: String,
    /// Expected `aud` claim, if the provider sets one
    pub jwt_audience: Option<String>,
    /// Contact addresses allowed to moderate
    #[serde(default)]
    pub admin_emails: Vec<String>,
}

/// Limits applied to `POST /photos`
#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionConfig {
    /// Maximum number of files per submission
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    /// Per-file size ceiling in bytes
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: usize,
}

/// Pagination limits
#[derive(Debug, Clone, Deserialize)]
pub struct ListingConfig {
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,
}

/// Outbound e-mail configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    /// Send e-mails at all
    #[serde(default)]
    pub enabled: bool,
    /// Sender address
    #[serde(default = "default_from_email")]
    pub from_email: String,
    /// SES region, falls back to the S3 region
    pub region: Option<String>,
    /// Base URL of the admin console, linked from admin e-mails
    pub admin_console_url: Option<String>,
}

// Default value functions
fn default_service_name() -> String {
    "gallery-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_delete_concurrency() -> usize {
    4
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_max_files() -> usize {
    10
}

fn default_max_file_bytes() -> usize {
    10 * 1024 * 1024 // 10MB
}

fn default_page_size() -> u32 {
    20
}

fn default_max_page_size() -> u32 {
    100
}

fn default_from_email() -> String {
    "gallery@localhost".to_string()
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .set_default("service.name", "gallery-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            .add_source(config::File::with_name("config/gallery").required(false))
            .add_source(config::File::with_name("/etc/scout-gallery/gallery").required(false))
            // GALLERY__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("GALLERY")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("auth.admin_emails")
                    .with_list_parse_key("api.cors_origins")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }
}

impl DatabaseConfig {
    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get idle timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl SubmissionConfig {
    /// Every file at the ceiling plus 1MB for the text fields and multipart framing
    pub fn body_limit(&self) -> usize {
        self.max_files
            .saturating_mul(self.max_file_bytes)
            .saturating_add(1024 * 1024)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
        }
    }
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            max_files: default_max_files(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            from_email: default_from_email(),
            region: None,
            admin_console_url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        assert_eq!(default_max_files(), 10);
        assert_eq!(default_max_file_bytes(), 10 * 1024 * 1024);
        assert_eq!(default_page_size(), 20);
        assert!(default_page_size() <= default_max_page_size());
    }

    #[test]
    fn test_submission_body_limit() {
        let submission = SubmissionConfig {
            max_files: 2,
            max_file_bytes: 100,
        };
        assert_eq!(submission.body_limit(), 200 + 1024 * 1024);
    }

    #[test]
    fn test_deserialize_minimal_config() {
        let raw = serde_json::json!({
            "s3": { "bucket": "gallery" },
            "database": { "url": "postgres://localhost/gallery" },
            "auth": {
                "jwt_secret": "secret",
                "admin_emails": ["leader@example.org"]
            }
        });

        let config: Config = serde_json::from_value(raw).unwrap();
        assert_eq!(config.s3.region, "us-east-1");
        assert_eq!(config.api.port, 8080);
        assert_eq!(config.submission.max_files, 10);
        assert!(config.database.run_migrations);
        assert!(!config.notifications.enabled);
        assert_eq!(config.auth.admin_emails, vec!["leader@example.org"]);
    }
}
