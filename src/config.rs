use anyhow::Context;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::models::Quota;

/// Knobs of one synchronizer.
#[derive(Clone, Debug)]
pub struct SyncSettings {
    pub page_size: usize,
    /// Hard per-request ceiling enforced by the history source.
    pub max_batch_size: usize,
    pub delta_interval: Duration,
    /// Delay after mount before the first delta poll.
    pub delta_grace: Duration,
    pub resync_retry: Duration,
    /// Consecutive failed resyncs before the driver stops retrying; `None` retries forever.
    pub max_resync_attempts: Option<u32>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            page_size: 20,
            max_batch_size: 100,
            delta_interval: Duration::from_secs(5),
            delta_grace: Duration::from_secs(15),
            resync_retry: Duration::from_secs(3),
            max_resync_attempts: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub subject_address: String,
    pub subject_context: String,
    pub history_source_url: Option<String>,
    pub db_path: String,
    pub server_bind_address: String,
    pub quota: Quota,
    pub sync: SyncSettings,
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenv::dotenv().ok();
        let defaults = SyncSettings::default();
        Ok(Self {
            subject_address: env::var("SUBJECT_ADDRESS").context("SUBJECT_ADDRESS must be set")?,
            subject_context: env::var("SUBJECT_CONTEXT").unwrap_or_else(|_| "perp".to_string()),
            history_source_url: env::var("HISTORY_SOURCE_URL").ok(),
            db_path: env::var("DB_PATH").unwrap_or_else(|_| "./db".to_string()),
            server_bind_address: env::var("SERVER_BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            quota: match optional::<usize>("MAX_ALLOWED_RECORDS")? {
                Some(max) => Quota::limited(max),
                None => Quota::unlimited(),
            },
            sync: SyncSettings {
                page_size: optional("PAGE_SIZE")?.unwrap_or(defaults.page_size),
                max_batch_size: optional("MAX_BATCH_SIZE")?.unwrap_or(defaults.max_batch_size),
                delta_interval: optional("DELTA_INTERVAL_SECS")?
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.delta_interval),
                delta_grace: optional("DELTA_GRACE_SECS")?
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.delta_grace),
                resync_retry: optional("RESYNC_RETRY_SECS")?
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.resync_retry),
                max_resync_attempts: optional("MAX_RESYNC_ATTEMPTS")?,
            },
        })
    }
}

fn optional<T>(name: &str) -> Result<Option<T>, anyhow::Error>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{} is not a valid value: {:?}", name, raw)),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_parses_and_reports_the_variable() {
        env::set_var("PHS_TEST_PAGE_SIZE", "25");
        assert_eq!(optional::<usize>("PHS_TEST_PAGE_SIZE").unwrap(), Some(25));

        env::set_var("PHS_TEST_BAD", "lots");
        let err = optional::<usize>("PHS_TEST_BAD").unwrap_err();
        assert!(err.to_string().contains("PHS_TEST_BAD"));

        assert_eq!(optional::<u32>("PHS_TEST_UNSET").unwrap(), None);
    }
}
