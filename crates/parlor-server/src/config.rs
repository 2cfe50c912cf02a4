use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};

/// Secrets shipped in sample `.env` files. Refused at startup.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    /// Notification service endpoint; notifications are only logged when unset
    pub notify_url: Option<String>,
    pub bus_capacity: usize,
    pub loader_ttl: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.into());

        let jwt_secret = lookup("PARLOR_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("PARLOR_JWT_SECRET is unset or still a placeholder; set it in your .env file");
        }

        let port = var("PARLOR_PORT", "3000").parse().context("PARLOR_PORT")?;
        let bus_capacity = var("PARLOR_BUS_CAPACITY", "1024")
            .parse()
            .context("PARLOR_BUS_CAPACITY")?;
        let loader_ttl_ms: u64 = var("PARLOR_LOADER_TTL_MS", "2000")
            .parse()
            .context("PARLOR_LOADER_TTL_MS")?;

        Ok(Self {
            host: var("PARLOR_HOST", "0.0.0.0"),
            port,
            db_path: PathBuf::from(var("PARLOR_DB_PATH", "parlor.db")),
            jwt_secret,
            notify_url: lookup("PARLOR_NOTIFY_URL").filter(|url| !url.is_empty()),
            bus_capacity,
            loader_ttl: Duration::from_millis(loader_ttl_ms),
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}
