use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub outbox_dir: PathBuf,
    pub sender: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub notifier: NotifierConfig,
    pub import_timeout: Option<Duration>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let url = std::env::var("DATABASE_URL")
            .context("DATABASE_URL must be set to a Postgres instance")?;
        let max_connections = parse_var("DATABASE_MAX_CONNECTIONS")?.unwrap_or(5);
        let acquire_timeout =
            Duration::from_secs(parse_var("DATABASE_ACQUIRE_TIMEOUT_SECS")?.unwrap_or(30));
        let import_timeout = parse_var::<u64>("IMPORT_TIMEOUT_SECS")?.map(Duration::from_secs);

        let notifier = NotifierConfig {
            outbox_dir: std::env::var("WARNING_OUTBOX_DIR")
                .unwrap_or_else(|_| "outbox".into())
                .into(),
            sender: std::env::var("WARNING_SENDER")
                .unwrap_or_else(|_| "attendance@localhost".into()),
        };

        Ok(Self {
            database: DatabaseConfig {
                url,
                max_connections,
                acquire_timeout,
            },
            notifier,
            import_timeout,
        })
    }
}

fn parse_var<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("{name} has invalid value `{value}`")),
        Err(_) => Ok(None),
    }
}
