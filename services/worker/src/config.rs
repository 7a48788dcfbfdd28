use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::processor::ProcessorSettings;
use crate::worker_loop::PoolSettings;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub model_store_root: String,
    pub trainer_command: String,

    pub worker_id: String,
    pub train_workers: usize,
    pub delete_workers: usize,
    pub poll_interval: Duration,

    pub visibility_timeout: Duration,
    pub processing_timeout: Duration,
    pub max_dequeue_count: u32,
    pub min_successful_lines: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = get("DATABASE_URL")?;
        let trainer_command = get("TRAINER_COMMAND")?;
        let model_store_root = std::env::var("MODEL_STORE_ROOT").unwrap_or_else(|_| "data/models".to_string());

        let worker_id = std::env::var("WORKER_ID")
            .or_else(|_| std::env::var("HOSTNAME"))
            .unwrap_or_else(|_| "model-worker".to_string());

        let train_workers = parse_or("TRAIN_WORKERS", 2usize)?;
        let delete_workers = parse_or("DELETE_WORKERS", 1usize)?;
        let poll_interval = Duration::from_millis(parse_or("POLL_INTERVAL_MS", 5000u64)?);
        let visibility_timeout = Duration::from_secs(parse_or("VISIBILITY_TIMEOUT_SECS", 3600u64)?);
        let processing_timeout = Duration::from_secs(parse_or("PROCESSING_TIMEOUT_SECS", 3300u64)?);
        let max_dequeue_count = parse_or("MAX_DEQUEUE_COUNT", 5u32)?;
        let min_successful_lines = parse_or("MIN_SUCCESSFUL_LINES", 1u64)?;

        let cfg = Self {
            database_url,
            model_store_root,
            trainer_command,
            worker_id,
            train_workers,
            delete_workers,
            poll_interval,
            visibility_timeout,
            processing_timeout,
            max_dequeue_count,
            min_successful_lines,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Fail fast, fail loud.
    pub fn validate(&self) -> Result<()> {
        if !self.database_url.starts_with("postgres://") && !self.database_url.starts_with("postgresql://") {
            bail!("DATABASE_URL must start with postgres:// or postgresql://");
        }
        if self.trainer_command.trim().is_empty() {
            bail!("TRAINER_COMMAND must not be empty");
        }
        if self.train_workers == 0 || self.delete_workers == 0 {
            bail!("TRAIN_WORKERS and DELETE_WORKERS must be at least 1");
        }
        // The registry lease runs for the processing timeout; a redelivery
        // must never find it still held.
        if self.processing_timeout >= self.visibility_timeout {
            bail!("PROCESSING_TIMEOUT_SECS must be shorter than VISIBILITY_TIMEOUT_SECS");
        }
        if self.max_dequeue_count == 0 {
            bail!("MAX_DEQUEUE_COUNT must be at least 1");
        }
        Ok(())
    }

    pub fn processor_settings(&self) -> ProcessorSettings {
        ProcessorSettings {
            worker_id: self.worker_id.clone(),
            visibility_timeout: self.visibility_timeout,
            processing_timeout: self.processing_timeout,
            max_dequeue_count: self.max_dequeue_count,
            min_successful_lines: self.min_successful_lines,
        }
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            train_workers: self.train_workers,
            delete_workers: self.delete_workers,
            poll_interval: self.poll_interval,
        }
    }
}

fn get(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Missing required env var: {key}"))
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(v) => v.trim().parse().with_context(|| format!("Invalid value for {key}: {v:?}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AppConfig {
        AppConfig {
            database_url: "postgres://localhost/models".into(),
            model_store_root: "data/models".into(),
            trainer_command: "python3 workers/trainer.py".into(),
            worker_id: "w1".into(),
            train_workers: 2,
            delete_workers: 1,
            poll_interval: Duration::from_millis(5000),
            visibility_timeout: Duration::from_secs(3600),
            processing_timeout: Duration::from_secs(3300),
            max_dequeue_count: 5,
            min_successful_lines: 1,
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        config().validate().unwrap();
    }

    #[test]
    fn test_processing_timeout_must_be_shorter_than_visibility() {
        let mut cfg = config();
        cfg.processing_timeout = cfg.visibility_timeout;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_worker_counts_must_be_positive() {
        let mut cfg = config();
        cfg.delete_workers = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_settings_carry_through() {
        let cfg = config();
        let p = cfg.processor_settings();
        assert_eq!(p.worker_id, "w1");
        assert_eq!(p.processing_timeout, Duration::from_secs(3300));
        assert_eq!(cfg.pool_settings().train_workers, 2);
    }
}
