use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};

use agora_db::DbOptions;

/// Process settings, read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub db_readers: usize,
    pub query_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3002,
            db_path: PathBuf::from("agora.db"),
            db_readers: 4,
            query_timeout: Duration::from_millis(5000),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = lookup("AGORA_HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("AGORA_PORT") {
            config.port = port
                .parse()
                .with_context(|| format!("AGORA_PORT is not a valid port: {port:?}"))?;
        }
        if let Some(path) = lookup("AGORA_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(readers) = lookup("AGORA_DB_READERS") {
            config.db_readers = readers
                .parse()
                .with_context(|| format!("AGORA_DB_READERS is not a number: {readers:?}"))?;
            if config.db_readers == 0 {
                bail!("AGORA_DB_READERS must be at least 1");
            }
        }
        if let Some(ms) = lookup("AGORA_QUERY_TIMEOUT_MS") {
            let ms: u64 = ms
                .parse()
                .with_context(|| format!("AGORA_QUERY_TIMEOUT_MS is not a number: {ms:?}"))?;
            if ms == 0 {
                bail!("AGORA_QUERY_TIMEOUT_MS must be positive");
            }
            config.query_timeout = Duration::from_millis(ms);
        }

        Ok(config)
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }

    pub fn db_options(&self) -> DbOptions {
        DbOptions {
            readers: self.db_readers,
            query_timeout: self.query_timeout,
        }
    }
}
