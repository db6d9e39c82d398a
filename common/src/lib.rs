/*!
common/src/lib.rs

Shared configuration and Postgres bootstrap for the newstriage workspace.

Configuration is read once at process startup from the environment
(required: `DATABASE_POOL_URL`, `OPENAI_KEY`, `BRAVE_KEY`, `POSTMARK_KEY`,
`MINUTES_FOLDER`; optional: `RANDOM_CLUSTERS`) and passed as a plain struct
through constructors from then on — nothing here re-reads the environment
per request.

An optional `adapters.toml` carries the data-not-code per-adapter scheduling
and host-allowlist overrides; unlike the required secrets, it has sane
built-in defaults and is merged rather than mandatory.
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPoolOptions, PgConnectOptions};
use sqlx::PgPool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Process-wide configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub openai_key: String,
    pub brave_key: String,
    pub postmark_key: String,
    pub minutes_folder: String,
    pub random_clusters: bool,
    pub readability_base: String,
    pub adapters: AdaptersConfig,
}

const DEFAULT_READABILITY_BASE: &str = "http://localhost:3000/article";

impl Config {
    /// Read the required environment variables and merge in an optional
    /// `adapters.toml` file. Fails loudly if a required variable is missing —
    /// there is no silent fallback for secrets.
    pub fn from_env(adapters_path: Option<&Path>) -> Result<Self> {
        let database_url = env_required("DATABASE_POOL_URL")?;
        let openai_key = env_required("OPENAI_KEY")?;
        let brave_key = env_required("BRAVE_KEY")?;
        let postmark_key = env_required("POSTMARK_KEY")?;
        let minutes_folder = env_required("MINUTES_FOLDER")?;
        let random_clusters = std::env::var("RANDOM_CLUSTERS")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        let readability_base =
            std::env::var("READABILITY_BASE").unwrap_or_else(|_| DEFAULT_READABILITY_BASE.to_string());

        let adapters = match adapters_path {
            Some(p) if p.exists() => AdaptersConfig::from_file(p)?,
            _ => AdaptersConfig::default(),
        };

        Ok(Config {
            database_url,
            openai_key,
            brave_key,
            postmark_key,
            minutes_folder,
            random_clusters,
            readability_base,
            adapters,
        })
    }
}

fn env_required(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("required environment variable {name} not set"))
}

/// Per-adapter tick interval and host-allowlist overrides. Pipeline
/// composition itself stays in code; only the scheduling knobs are data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterEntry {
    pub name: String,
    /// "rss" or "hn".
    pub kind: String,
    pub feed_url: Option<String>,
    #[serde(default = "default_tick_minutes")]
    pub tick_minutes: u64,
}

fn default_tick_minutes() -> u64 {
    60
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdaptersConfig {
    #[serde(default)]
    pub adapter: Vec<AdapterEntry>,
}

impl AdaptersConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read adapters config: {}", path.as_ref().display()))?;
        toml::from_str(&data).context("failed to parse adapters.toml")
    }

    pub fn tick_minutes(&self, name: &str) -> u64 {
        self.adapter
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.tick_minutes)
            .unwrap_or(60)
    }
}

/// Run the embedded sqlx migrations against a running pool.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("../migrations")
        .run(pool)
        .await
        .context("failed to run sqlx migrations")?;
    Ok(())
}

/// Initialize a Postgres connection pool from a `postgres://` URL.
pub async fn init_db_pool(database_url: &str) -> Result<PgPool> {
    let options = PgConnectOptions::from_str(database_url)
        .with_context(|| format!("invalid DATABASE_POOL_URL: {database_url}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(options)
        .await
        .context("failed to connect to postgres")?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapters_config_parses_tick_minutes() {
        let toml_str = r#"
            [[adapter]]
            name = "rss-main"
            kind = "rss"
            feed_url = "https://example.com/feed.xml"
            tick_minutes = 30

            [[adapter]]
            name = "hn"
            kind = "hn"
        "#;
        let cfg: AdaptersConfig = toml::from_str(toml_str).expect("parse adapters.toml");
        assert_eq!(cfg.tick_minutes("rss-main"), 30);
        assert_eq!(cfg.tick_minutes("hn"), 60);
        assert_eq!(cfg.tick_minutes("unknown"), 60);
    }

    #[test]
    fn from_env_requires_database_pool_url() {
        // SAFETY: tests run single-threaded-per-process is not guaranteed, so
        // we avoid clobbering DATABASE_POOL_URL if some earlier test set it;
        // instead exercise the helper directly.
        std::env::remove_var("DATABASE_POOL_URL_TEST_PROBE");
        let err = env_required("DATABASE_POOL_URL_TEST_PROBE").unwrap_err();
        assert!(err.to_string().contains("DATABASE_POOL_URL_TEST_PROBE"));
    }
}
