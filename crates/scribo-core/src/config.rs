//! Configuration module
//!
//! Configuration is read once from the environment (with `.env` support through
//! `dotenvy`). Every value has a documented default except the ones that only make
//! sense per deployment (storage location, SMTP credentials, admin recipients).

use std::env;
use std::time::Duration;

use crate::models::{NotificationChannelKind, PriorityPolicy};
use crate::storage_types::StorageBackend;
use crate::validation::SubmissionLimits;

// Common constants
const SERVER_PORT: u16 = 4000;
const MAX_CONNECTIONS: u32 = 10;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const MAX_FILE_SIZE_MB: usize = 50;
const MAX_FILES_PER_SUBMISSION: usize = 20;
const DIRECT_TIMEOUT_SECS: u64 = 30;
const POLL_INTERVAL_MS: u64 = 1000;
const MAX_POLL_ERRORS: u32 = 5;
const MAX_POLL_DURATION_SECS: u64 = 300;
const QUEUE_MAX_WORKERS: usize = 4;
const QUEUE_MAX_ATTEMPTS: u32 = 5;
const QUEUE_BASE_BACKOFF_MS: u64 = 1000;
const QUEUE_MAX_BACKOFF_SECS: u64 = 30;
const QUEUE_ATTEMPT_TIMEOUT_SECS: u64 = 30;
const QUEUE_RETENTION_SECS: u64 = 600;
const QUEUE_REAP_INTERVAL_SECS: u64 = 60;
const HIGH_PRIORITY_FILE_THRESHOLD: usize = 5;
const MEDIUM_PRIORITY_FILE_THRESHOLD: usize = 2;
const SMTP_PORT: u16 = 587;

/// Log output format
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Server, logging and persistence settings
#[derive(Clone, Debug)]
pub struct BaseConfig {
    pub server_port: u16,
    pub environment: String,
    pub log_format: LogFormat,
    /// PostgreSQL connection string. `None` runs the service on in-memory stores.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
}

/// Submission pipeline configuration
#[derive(Clone, Debug)]
pub struct SubmissionConfig {
    pub base: BaseConfig,
    // Storage configuration
    pub storage_backend: StorageBackend,
    pub local_storage_path: Option<String>,
    pub local_storage_base_url: Option<String>,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>, // Custom endpoint for S3-compatible providers (MinIO, etc.)
    // Upload limits
    pub max_file_size_bytes: usize,
    pub max_files_per_submission: usize,
    // Orchestrator
    pub direct_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub max_poll_errors: u32,
    pub max_poll_duration_secs: u64,
    // Durable queue
    pub queue_max_workers: usize,
    pub queue_max_attempts: u32,
    pub queue_base_backoff_ms: u64,
    pub queue_max_backoff_secs: u64,
    pub queue_attempt_timeout_secs: u64,
    /// How long terminal entries stay queryable before the reaper purges them.
    pub queue_retention_secs: u64,
    pub queue_reap_interval_secs: u64,
    // Notifications
    pub notification_channels: Vec<NotificationChannelKind>,
    pub high_priority_file_threshold: usize,
    pub medium_priority_file_threshold: usize,
    pub admin_emails: Vec<String>,
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from: Option<String>,
    pub smtp_tls: bool,
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Box<SubmissionConfig>);

impl Config {
    fn inner(&self) -> &SubmissionConfig {
        &self.0
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        let config = SubmissionConfig::from_env()?;
        Ok(Config(Box::new(config)))
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.inner().validate()
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        let env = self.inner().base.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn environment(&self) -> &str {
        &self.inner().base.environment
    }

    pub fn server_port(&self) -> u16 {
        self.inner().base.server_port
    }

    pub fn log_format(&self) -> LogFormat {
        self.inner().base.log_format
    }

    pub fn database_url(&self) -> Option<&str> {
        self.inner().base.database_url.as_deref()
    }

    pub fn db_max_connections(&self) -> u32 {
        self.inner().base.db_max_connections
    }

    pub fn db_timeout_seconds(&self) -> u64 {
        self.inner().base.db_timeout_seconds
    }

    pub fn storage_backend(&self) -> StorageBackend {
        self.inner().storage_backend
    }

    pub fn local_storage_path(&self) -> Option<&str> {
        self.inner().local_storage_path.as_deref()
    }

    pub fn local_storage_base_url(&self) -> Option<&str> {
        self.inner().local_storage_base_url.as_deref()
    }

    pub fn s3_bucket(&self) -> Option<&str> {
        self.inner().s3_bucket.as_deref()
    }

    pub fn s3_region(&self) -> Option<&str> {
        self.inner().s3_region.as_deref()
    }

    pub fn s3_endpoint(&self) -> Option<&str> {
        self.inner().s3_endpoint.as_deref()
    }

    pub fn max_file_size_bytes(&self) -> usize {
        self.inner().max_file_size_bytes
    }

    pub fn max_files_per_submission(&self) -> usize {
        self.inner().max_files_per_submission
    }

    pub fn submission_limits(&self) -> SubmissionLimits {
        SubmissionLimits {
            max_files: self.inner().max_files_per_submission,
            max_file_size_bytes: self.inner().max_file_size_bytes,
        }
    }

    pub fn direct_timeout(&self) -> Duration {
        Duration::from_secs(self.inner().direct_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.inner().poll_interval_ms)
    }

    pub fn max_poll_errors(&self) -> u32 {
        self.inner().max_poll_errors
    }

    pub fn max_poll_duration(&self) -> Duration {
        Duration::from_secs(self.inner().max_poll_duration_secs)
    }

    pub fn queue_max_workers(&self) -> usize {
        self.inner().queue_max_workers
    }

    pub fn queue_max_attempts(&self) -> u32 {
        self.inner().queue_max_attempts
    }

    pub fn queue_base_backoff(&self) -> Duration {
        Duration::from_millis(self.inner().queue_base_backoff_ms)
    }

    pub fn queue_max_backoff(&self) -> Duration {
        Duration::from_secs(self.inner().queue_max_backoff_secs)
    }

    pub fn queue_attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.inner().queue_attempt_timeout_secs)
    }

    pub fn queue_retention(&self) -> Duration {
        Duration::from_secs(self.inner().queue_retention_secs)
    }

    pub fn queue_reap_interval(&self) -> Duration {
        Duration::from_secs(self.inner().queue_reap_interval_secs)
    }

    pub fn notification_channels(&self) -> &[NotificationChannelKind] {
        &self.inner().notification_channels
    }

    pub fn priority_policy(&self) -> PriorityPolicy {
        PriorityPolicy {
            high_threshold: self.inner().high_priority_file_threshold,
            medium_threshold: self.inner().medium_priority_file_threshold,
        }
    }

    pub fn admin_emails(&self) -> &[String] {
        &self.inner().admin_emails
    }

    pub fn smtp_host(&self) -> Option<&str> {
        self.inner().smtp_host.as_deref()
    }

    pub fn smtp_port(&self) -> u16 {
        self.inner().smtp_port
    }

    pub fn smtp_user(&self) -> Option<&str> {
        self.inner().smtp_user.as_deref()
    }

    pub fn smtp_password(&self) -> Option<&str> {
        self.inner().smtp_password.as_deref()
    }

    pub fn smtp_from(&self) -> Option<&str> {
        self.inner().smtp_from.as_deref()
    }

    pub fn smtp_tls(&self) -> bool {
        self.inner().smtp_tls
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_list(key: &str) -> Vec<String> {
    env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl SubmissionConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let log_format = match env::var("LOG_FORMAT")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        let base = BaseConfig {
            server_port: env::var("PORT")
                .unwrap_or_else(|_| SERVER_PORT.to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number"))?,
            environment,
            log_format,
            database_url: env_opt("DATABASE_URL"),
            db_max_connections: env_or("DB_MAX_CONNECTIONS", MAX_CONNECTIONS),
            db_timeout_seconds: env_or("DB_TIMEOUT_SECONDS", CONNECTION_TIMEOUT_SECS),
        };

        let storage_backend = match env_opt("STORAGE_BACKEND") {
            Some(value) => value.parse::<StorageBackend>()?,
            None => StorageBackend::Local,
        };

        let notification_channels = match env_opt("NOTIFICATION_CHANNELS") {
            Some(_) => env_list("NOTIFICATION_CHANNELS")
                .iter()
                .map(|s| s.parse::<NotificationChannelKind>())
                .collect::<Result<Vec<_>, _>>()?,
            None => vec![NotificationChannelKind::InApp],
        };

        let config = SubmissionConfig {
            base,
            storage_backend,
            local_storage_path: env_opt("LOCAL_STORAGE_PATH"),
            local_storage_base_url: env_opt("LOCAL_STORAGE_BASE_URL"),
            s3_bucket: env_opt("S3_BUCKET"),
            s3_region: env_opt("S3_REGION").or_else(|| env_opt("AWS_REGION")),
            s3_endpoint: env_opt("S3_ENDPOINT"),
            max_file_size_bytes: env_or("MAX_FILE_SIZE_MB", MAX_FILE_SIZE_MB) * 1024 * 1024,
            max_files_per_submission: env_or("MAX_FILES_PER_SUBMISSION", MAX_FILES_PER_SUBMISSION),
            direct_timeout_secs: env_or("DIRECT_TIMEOUT_SECS", DIRECT_TIMEOUT_SECS),
            poll_interval_ms: env_or("POLL_INTERVAL_MS", POLL_INTERVAL_MS),
            max_poll_errors: env_or("MAX_POLL_ERRORS", MAX_POLL_ERRORS),
            max_poll_duration_secs: env_or("MAX_POLL_DURATION_SECS", MAX_POLL_DURATION_SECS),
            queue_max_workers: env_or("QUEUE_MAX_WORKERS", QUEUE_MAX_WORKERS),
            queue_max_attempts: env_or("QUEUE_MAX_ATTEMPTS", QUEUE_MAX_ATTEMPTS),
            queue_base_backoff_ms: env_or("QUEUE_BASE_BACKOFF_MS", QUEUE_BASE_BACKOFF_MS),
            queue_max_backoff_secs: env_or("QUEUE_MAX_BACKOFF_SECS", QUEUE_MAX_BACKOFF_SECS),
            queue_attempt_timeout_secs: env_or(
                "QUEUE_ATTEMPT_TIMEOUT_SECS",
                QUEUE_ATTEMPT_TIMEOUT_SECS,
            ),
            queue_retention_secs: env_or("QUEUE_RETENTION_SECS", QUEUE_RETENTION_SECS),
            queue_reap_interval_secs: env_or("QUEUE_REAP_INTERVAL_SECS", QUEUE_REAP_INTERVAL_SECS),
            notification_channels,
            high_priority_file_threshold: env_or(
                "HIGH_PRIORITY_FILE_THRESHOLD",
                HIGH_PRIORITY_FILE_THRESHOLD,
            ),
            medium_priority_file_threshold: env_or(
                "MEDIUM_PRIORITY_FILE_THRESHOLD",
                MEDIUM_PRIORITY_FILE_THRESHOLD,
            ),
            admin_emails: env_list("ADMIN_EMAILS"),
            smtp_host: env_opt("SMTP_HOST"),
            smtp_port: env_or("SMTP_PORT", SMTP_PORT),
            smtp_user: env_opt("SMTP_USER"),
            smtp_password: env_opt("SMTP_PASSWORD"),
            smtp_from: env_opt("SMTP_FROM"),
            smtp_tls: env_or("SMTP_TLS", true),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        match self.storage_backend {
            StorageBackend::S3 => {
                if self.s3_bucket.is_none() {
                    anyhow::bail!("S3_BUCKET must be set when STORAGE_BACKEND=s3");
                }
                if self.s3_region.is_none() {
                    anyhow::bail!("S3_REGION or AWS_REGION must be set when STORAGE_BACKEND=s3");
                }
            }
            StorageBackend::Local => {
                if self.local_storage_path.is_none() || self.local_storage_base_url.is_none() {
                    anyhow::bail!(
                        "LOCAL_STORAGE_PATH and LOCAL_STORAGE_BASE_URL must be set when STORAGE_BACKEND=local"
                    );
                }
            }
            StorageBackend::Memory => {}
        }

        if self
            .notification_channels
            .contains(&NotificationChannelKind::Email)
        {
            if self.smtp_host.is_none() || self.smtp_from.is_none() {
                anyhow::bail!("SMTP_HOST and SMTP_FROM must be set when the email channel is enabled");
            }
            if self.admin_emails.is_empty() {
                anyhow::bail!("ADMIN_EMAILS must list at least one address when the email channel is enabled");
            }
        }

        if self.queue_max_attempts == 0 {
            anyhow::bail!("QUEUE_MAX_ATTEMPTS must be at least 1");
        }
        if self.queue_max_workers == 0 {
            anyhow::bail!("QUEUE_MAX_WORKERS must be at least 1");
        }
        if self.poll_interval_ms == 0 {
            anyhow::bail!("POLL_INTERVAL_MS must be greater than 0");
        }
        if self.max_files_per_submission == 0 || self.max_file_size_bytes == 0 {
            anyhow::bail!("MAX_FILES_PER_SUBMISSION and MAX_FILE_SIZE_MB must be greater than 0");
        }
        if self.medium_priority_file_threshold > self.high_priority_file_threshold {
            anyhow::bail!(
                "MEDIUM_PRIORITY_FILE_THRESHOLD cannot exceed HIGH_PRIORITY_FILE_THRESHOLD"
            );
        }

        Ok(())
    }
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            base: BaseConfig {
                server_port: SERVER_PORT,
                environment: "development".to_string(),
                log_format: LogFormat::Pretty,
                database_url: None,
                db_max_connections: MAX_CONNECTIONS,
                db_timeout_seconds: CONNECTION_TIMEOUT_SECS,
            },
            storage_backend: StorageBackend::Memory,
            local_storage_path: None,
            local_storage_base_url: None,
            s3_bucket: None,
            s3_region: None,
            s3_endpoint: None,
            max_file_size_bytes: MAX_FILE_SIZE_MB * 1024 * 1024,
            max_files_per_submission: MAX_FILES_PER_SUBMISSION,
            direct_timeout_secs: DIRECT_TIMEOUT_SECS,
            poll_interval_ms: POLL_INTERVAL_MS,
            max_poll_errors: MAX_POLL_ERRORS,
            max_poll_duration_secs: MAX_POLL_DURATION_SECS,
            queue_max_workers: QUEUE_MAX_WORKERS,
            queue_max_attempts: QUEUE_MAX_ATTEMPTS,
            queue_base_backoff_ms: QUEUE_BASE_BACKOFF_MS,
            queue_max_backoff_secs: QUEUE_MAX_BACKOFF_SECS,
            queue_attempt_timeout_secs: QUEUE_ATTEMPT_TIMEOUT_SECS,
            queue_retention_secs: QUEUE_RETENTION_SECS,
            queue_reap_interval_secs: QUEUE_REAP_INTERVAL_SECS,
            notification_channels: vec![NotificationChannelKind::InApp],
            high_priority_file_threshold: HIGH_PRIORITY_FILE_THRESHOLD,
            medium_priority_file_threshold: MEDIUM_PRIORITY_FILE_THRESHOLD,
            admin_emails: Vec::new(),
            smtp_host: None,
            smtp_port: SMTP_PORT,
            smtp_user: None,
            smtp_password: None,
            smtp_from: None,
            smtp_tls: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid_and_bounded() {
        let config = Config(Box::default());
        config.validate().expect("default config validates");
        assert_eq!(config.queue_max_attempts(), 5);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.priority_policy(), PriorityPolicy::default());
        assert_eq!(
            config.notification_channels(),
            &[NotificationChannelKind::InApp]
        );
    }

    #[test]
    fn email_channel_requires_smtp_and_recipients() {
        let mut inner = SubmissionConfig {
            notification_channels: vec![NotificationChannelKind::Email],
            ..Default::default()
        };
        assert!(inner.validate().is_err());

        inner.smtp_host = Some("smtp.example.com".into());
        inner.smtp_from = Some("noreply@example.com".into());
        assert!(inner.validate().is_err());

        inner.admin_emails = vec!["admin@example.com".into()];
        assert!(inner.validate().is_ok());
    }

    #[test]
    fn s3_backend_requires_bucket_and_region() {
        let mut inner = SubmissionConfig {
            storage_backend: StorageBackend::S3,
            ..Default::default()
        };
        assert!(inner.validate().is_err());
        inner.s3_bucket = Some("submissions".into());
        inner.s3_region = Some("eu-west-1".into());
        assert!(inner.validate().is_ok());
    }

    #[test]
    fn zero_attempts_rejected() {
        let inner = SubmissionConfig {
            queue_max_attempts: 0,
            ..Default::default()
        };
        assert!(inner.validate().is_err());
    }
}
