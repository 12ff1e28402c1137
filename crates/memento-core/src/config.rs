//! Process configuration resolved from environment variables.
//!
//! Every knob has a documented default; unknown variables are ignored and
//! out-of-range values clamp to their documented range instead of failing
//! startup.

use std::path::PathBuf;
use std::time::Duration;

use crate::backup::RetentionPolicy;
use crate::enrichment::PipelineConfig;
use crate::llm::LlmConfig;

/// Deployment security posture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecurityMode {
    #[default]
    Development,
    Production,
}

/// Full process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Database file path; `None` uses the platform data directory
    pub db_path: Option<PathBuf>,
    /// External migration directory; `None` uses the embedded schema
    pub migrations_dir: Option<PathBuf>,

    pub llm: LlmConfig,
    pub pipeline: PipelineConfig,

    pub decay_half_life_days: f64,
    pub decay_interval: Duration,

    pub backup_enabled: bool,
    pub backup_dir: Option<PathBuf>,
    pub backup_interval: Duration,
    pub verify_backups: bool,
    pub retention: RetentionPolicy,

    pub security_mode: SecurityMode,
    /// Required when `security_mode` is production
    pub api_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6363,
            db_path: None,
            migrations_dir: None,
            llm: LlmConfig::default(),
            pipeline: PipelineConfig::default(),
            decay_half_life_days: 30.0,
            decay_interval: Duration::from_secs(6 * 3600),
            backup_enabled: true,
            backup_dir: None,
            backup_interval: Duration::from_secs(3600),
            verify_backups: true,
            retention: RetentionPolicy::default(),
            security_mode: SecurityMode::Development,
            api_token: None,
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    env_string(key).map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

impl Config {
    /// Resolve configuration from `MEMENTO_*` environment variables.
    ///
    /// In production mode a missing API token is the one startup error.
    pub fn from_env() -> crate::error::Result<Self> {
        let mut config = Self::default();

        if let Some(host) = env_string("MEMENTO_HOST") {
            config.host = host;
        }
        if let Some(port) = env_parse::<u16>("MEMENTO_PORT") {
            config.port = port;
        }
        if let Some(dir) = env_string("MEMENTO_DATA_DIR") {
            // The env var names the containing directory.
            config.db_path = Some(PathBuf::from(dir).join("memento.db"));
        }
        if let Some(dir) = env_string("MEMENTO_MIGRATIONS_DIR") {
            config.migrations_dir = Some(PathBuf::from(dir));
        }

        if let Some(url) = env_string("MEMENTO_LLM_URL") {
            config.llm.base_url = url;
        }
        if let Some(model) = env_string("MEMENTO_LLM_MODEL") {
            config.llm.model = model;
        }
        if let Some(model) = env_string("MEMENTO_EMBEDDING_MODEL") {
            config.llm.embedding_model = model;
        }

        if let Some(workers) = env_parse::<usize>("MEMENTO_WORKERS") {
            config.pipeline.num_workers = workers.clamp(1, 32);
        }
        if let Some(size) = env_parse::<usize>("MEMENTO_QUEUE_SIZE") {
            config.pipeline.queue_size = size.clamp(1, 10_000);
        }
        if let Some(retries) = env_parse::<i64>("MEMENTO_MAX_RETRIES") {
            config.pipeline.max_retries = retries.clamp(0, 10);
        }
        if let Some(secs) = env_parse::<u64>("MEMENTO_LLM_TIMEOUT_SECS") {
            config.pipeline.llm_deadline = Duration::from_secs(secs.clamp(1, 600));
        }

        if let Some(days) = env_parse::<f64>("MEMENTO_DECAY_HALF_LIFE_DAYS") {
            config.decay_half_life_days = days.clamp(1.0, 3650.0);
        }
        if let Some(secs) = env_parse::<u64>("MEMENTO_DECAY_INTERVAL_SECS") {
            config.decay_interval = Duration::from_secs(secs.clamp(60, 7 * 86_400));
        }

        if let Some(enabled) = env_bool("MEMENTO_BACKUP_ENABLED") {
            config.backup_enabled = enabled;
        }
        if let Some(dir) = env_string("MEMENTO_BACKUP_DIR") {
            config.backup_dir = Some(PathBuf::from(dir));
        }
        if let Some(secs) = env_parse::<u64>("MEMENTO_BACKUP_INTERVAL_SECS") {
            config.backup_interval = Duration::from_secs(secs.clamp(60, 30 * 86_400));
        }
        if let Some(verify) = env_bool("MEMENTO_VERIFY_BACKUPS") {
            config.verify_backups = verify;
        }
        if let Some(n) = env_parse::<usize>("MEMENTO_RETENTION_HOURLY") {
            config.retention.hourly = n.min(1000);
        }
        if let Some(n) = env_parse::<usize>("MEMENTO_RETENTION_DAILY") {
            config.retention.daily = n.min(1000);
        }
        if let Some(n) = env_parse::<usize>("MEMENTO_RETENTION_WEEKLY") {
            config.retention.weekly = n.min(1000);
        }
        if let Some(n) = env_parse::<usize>("MEMENTO_RETENTION_MONTHLY") {
            config.retention.monthly = n.min(1000);
        }

        if let Some(mode) = env_string("MEMENTO_SECURITY_MODE") {
            config.security_mode = match mode.to_lowercase().as_str() {
                "production" => SecurityMode::Production,
                _ => SecurityMode::Development,
            };
        }
        config.api_token = env_string("MEMENTO_API_TOKEN");

        if config.security_mode == SecurityMode::Production && config.api_token.is_none() {
            return Err(crate::error::Error::InvalidInput(
                "MEMENTO_API_TOKEN is required in production mode".to_string(),
            ));
        }

        Ok(config)
    }
}
