//! Client configuration.
//!
//! [`Config`] is a key-value store backed by SQLite. [`Settings`] is the
//! resolved view a client is built from: stored values win, then the
//! environment, then built-in defaults.

use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OptionalExtension, params};

use crate::consts::{
    DEFAULT_ENDPOINT, DEFAULT_POLL_INTERVAL, ENV_ACCESS_TOKEN, ENV_ENDPOINT, default_db_path,
};
use crate::orchestrator::OrchestratorConfig;

pub const KEY_ENDPOINT: &str = "endpoint";
pub const KEY_ACCESS_TOKEN: &str = "access_token";
pub const KEY_POLL_INTERVAL_SECS: &str = "poll_interval_secs";
pub const KEY_MAX_POLLS: &str = "max_polls";
pub const KEY_RUN_TIMEOUT_SECS: &str = "run_timeout_secs";

/// Stored client settings, one row per key, in a small SQLite file.
pub struct Config {
    conn: Mutex<Connection>,
}

impl Config {
    /// Open the store at `~/.matrix-driver/config.db`, creating the
    /// directory on first use.
    pub fn open_default() -> Result<Self> {
        let Some(path) = default_db_path() else {
            bail!("cannot locate a home directory for the settings database");
        };
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Self::open(&path)
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open settings database {}", path.display()))?;
        Self::init(conn)
    }

    /// A throwaway store, for tests and one-off clients.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().context("failed to open settings database")?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS settings (
                name  TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        )
        .context("failed to create settings table")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn get(&self, name: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM settings WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("failed to read setting `{name}`"))?;
        Ok(value)
    }

    /// Store a value, replacing any previous one.
    pub fn set(&self, name: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            "INSERT OR REPLACE INTO settings (name, value) VALUES (?1, ?2)",
            params![name, value],
        )
        .with_context(|| format!("failed to store setting `{name}`"))?;
        Ok(())
    }

    /// Forget a value. Unknown names are ignored.
    pub fn remove(&self, name: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute("DELETE FROM settings WHERE name = ?1", params![name])
            .with_context(|| format!("failed to remove setting `{name}`"))?;
        Ok(())
    }

    fn get_parsed<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: std::str::FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        self.get(key)?
            .map(|raw| {
                raw.trim()
                    .parse::<T>()
                    .with_context(|| format!("invalid value for config key `{key}`: {raw:?}"))
            })
            .transpose()
    }
}

/// Everything needed to talk to the API and pace a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub endpoint: String,
    pub access_token: String,
    pub poll_interval: Duration,
    pub max_polls: Option<usize>,
    pub run_timeout: Option<Duration>,
}

impl Settings {
    /// Resolve settings from the store and the process environment.
    pub fn resolve(store: &Config) -> Result<Self> {
        Self::resolve_with(store, |name| std::env::var(name).ok())
    }

    /// Resolve settings with an explicit environment lookup.
    pub fn resolve_with<F>(store: &Config, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |name: &str| env(name).filter(|value| !value.is_empty());

        let endpoint = store
            .get(KEY_ENDPOINT)?
            .or_else(|| env(ENV_ENDPOINT))
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());

        let Some(access_token) = store.get(KEY_ACCESS_TOKEN)?.or_else(|| env(ENV_ACCESS_TOKEN))
        else {
            bail!("no Corellium access token found. Store `{KEY_ACCESS_TOKEN}` or set {ENV_ACCESS_TOKEN}.");
        };

        let poll_interval = store
            .get_parsed::<u64>(KEY_POLL_INTERVAL_SECS)?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_POLL_INTERVAL);
        if poll_interval.is_zero() {
            bail!("`{KEY_POLL_INTERVAL_SECS}` must be at least 1");
        }

        let max_polls = store.get_parsed::<usize>(KEY_MAX_POLLS)?.filter(|n| *n > 0);
        let run_timeout = store
            .get_parsed::<u64>(KEY_RUN_TIMEOUT_SECS)?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        Ok(Self {
            endpoint,
            access_token,
            poll_interval,
            max_polls,
            run_timeout,
        })
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            poll_interval: self.poll_interval,
            max_polls: self.max_polls,
            run_timeout: self.run_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem_config() -> Config {
        Config::open_in_memory().unwrap()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn get_returns_none_for_missing_key() {
        let config = mem_config();
        assert!(config.get("nonexistent").unwrap().is_none());
    }

    #[test]
    fn set_overwrites_existing() {
        let config = mem_config();
        config.set(KEY_ENDPOINT, "https://old.example/").unwrap();
        config.set(KEY_ENDPOINT, "https://new.example/").unwrap();
        assert_eq!(
            config.get(KEY_ENDPOINT).unwrap().unwrap(),
            "https://new.example/"
        );
    }

    #[test]
    fn remove_deletes_key() {
        let config = mem_config();
        config.set(KEY_ACCESS_TOKEN, "tok").unwrap();
        config.remove(KEY_ACCESS_TOKEN).unwrap();
        assert!(config.get(KEY_ACCESS_TOKEN).unwrap().is_none());
    }

    #[test]
    fn remove_nonexistent_is_ok() {
        let config = mem_config();
        config.remove("nonexistent").unwrap();
    }

    #[test]
    fn persists_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config-test.db");

        {
            let config = Config::open(&path).unwrap();
            config.set(KEY_ACCESS_TOKEN, "persisted").unwrap();
        }

        {
            let config = Config::open(&path).unwrap();
            assert_eq!(config.get(KEY_ACCESS_TOKEN).unwrap().unwrap(), "persisted");
        }
    }

    #[test]
    fn resolve_uses_defaults_with_stored_token() {
        let config = mem_config();
        config.set(KEY_ACCESS_TOKEN, "tok").unwrap();

        let settings = Settings::resolve_with(&config, no_env).unwrap();
        assert_eq!(settings.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(settings.access_token, "tok");
        assert_eq!(settings.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(settings.max_polls, None);
        assert_eq!(settings.run_timeout, None);
    }

    #[test]
    fn resolve_falls_back_to_env() {
        let config = mem_config();
        let settings = Settings::resolve_with(&config, |name| match name {
            ENV_ACCESS_TOKEN => Some("env-tok".to_string()),
            ENV_ENDPOINT => Some("https://onsite.example/".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(settings.access_token, "env-tok");
        assert_eq!(settings.endpoint, "https://onsite.example/");
    }

    #[test]
    fn stored_values_win_over_env() {
        let config = mem_config();
        config.set(KEY_ACCESS_TOKEN, "stored").unwrap();
        let settings =
            Settings::resolve_with(&config, |_| Some("from-env".to_string())).unwrap();
        assert_eq!(settings.access_token, "stored");
    }

    #[test]
    fn missing_token_is_an_error() {
        let config = mem_config();
        let err = Settings::resolve_with(&config, |_| Some(String::new())).unwrap_err();
        assert!(err.to_string().contains("access token"));
    }

    #[test]
    fn pacing_keys_are_parsed() {
        let config = mem_config();
        config.set(KEY_ACCESS_TOKEN, "tok").unwrap();
        config.set(KEY_POLL_INTERVAL_SECS, "2").unwrap();
        config.set(KEY_MAX_POLLS, "30").unwrap();
        config.set(KEY_RUN_TIMEOUT_SECS, "600").unwrap();

        let settings = Settings::resolve_with(&config, no_env).unwrap();
        let orchestrator = settings.orchestrator_config();
        assert_eq!(orchestrator.poll_interval, Duration::from_secs(2));
        assert_eq!(orchestrator.max_polls, Some(30));
        assert_eq!(orchestrator.run_timeout, Some(Duration::from_secs(600)));
    }

    #[test]
    fn invalid_number_names_the_key() {
        let config = mem_config();
        config.set(KEY_ACCESS_TOKEN, "tok").unwrap();
        config.set(KEY_MAX_POLLS, "lots").unwrap();

        let err = Settings::resolve_with(&config, no_env).unwrap_err();
        assert!(err.to_string().contains(KEY_MAX_POLLS));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let config = mem_config();
        config.set(KEY_ACCESS_TOKEN, "tok").unwrap();
        config.set(KEY_POLL_INTERVAL_SECS, "0").unwrap();
        assert!(Settings::resolve_with(&config, no_env).is_err());
    }
}
