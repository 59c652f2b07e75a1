use std::time::Duration;

use anyhow::{Context, Result};

const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 3600;

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub database_url: String,
    pub redis_url: String,
    pub http_addr: String,
    /// Employees allowed to post payments and trigger schedule refreshes.
    pub ledger_admin_ids: Vec<String>,
    pub refresh_interval: Duration,
}

impl ServiceConfig {
    pub fn from_env(default_http_addr: &str) -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is required")?;
        let redis_url = std::env::var("REDIS_URL").context("REDIS_URL is required")?;
        let http_addr =
            std::env::var("HTTP_ADDR").unwrap_or_else(|_| default_http_addr.to_string());
        let ledger_admin_ids =
            parse_admin_ids(&std::env::var("LEDGER_ADMIN_IDS").unwrap_or_default());

        Ok(Self {
            database_url,
            redis_url,
            http_addr,
            ledger_admin_ids,
            refresh_interval: Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS),
        })
    }

    pub fn worker_from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is required")?;
        let redis_url = std::env::var("REDIS_URL").context("REDIS_URL is required")?;
        let refresh_interval = match std::env::var("REFRESH_INTERVAL_SECS") {
            Ok(raw) => parse_interval(&raw)?,
            Err(_) => Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS),
        };

        Ok(Self {
            database_url,
            redis_url,
            http_addr: String::new(),
            ledger_admin_ids: Vec::new(),
            refresh_interval,
        })
    }

    pub fn is_ledger_admin(&self, employee_id: &str) -> bool {
        self.ledger_admin_ids.iter().any(|id| id == employee_id)
    }
}

fn parse_admin_ids(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_interval(raw: &str) -> Result<Duration> {
    let secs: u64 = raw
        .trim()
        .parse()
        .with_context(|| format!("REFRESH_INTERVAL_SECS must be a whole number, got {raw}"))?;
    if secs == 0 {
        anyhow::bail!("REFRESH_INTERVAL_SECS must be greater than zero");
    }
    Ok(Duration::from_secs(secs))
}
