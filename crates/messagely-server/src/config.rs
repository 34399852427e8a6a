use std::fmt;
use std::path::PathBuf;

use anyhow::{Context, Result};

use messagely_db::PasswordConfig;

/// Secrets that only exist so a dev checkout starts without a `.env`.
const PLACEHOLDER_SECRETS: &[&str] = &["dev-secret-change-me", "change-me-to-a-random-string"];

/// Process-wide settings, read once at startup.
#[derive(Clone)]
pub struct Config {
    pub secret_key: String,
    pub password: PasswordConfig,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("secret_key", &"<redacted>")
            .field("password", &self.password)
            .field("db_path", &self.db_path)
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secret_key = lookup("MESSAGELY_SECRET_KEY").unwrap_or_else(|| "dev-secret-change-me".into());

        let cost = match lookup("MESSAGELY_PASSWORD_COST") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("MESSAGELY_PASSWORD_COST is not a number: {}", raw))?,
            None => PasswordConfig::DEFAULT_COST,
        };

        let password = PasswordConfig::new(cost);
        password
            .validate()
            .with_context(|| format!("MESSAGELY_PASSWORD_COST {} is not a usable work factor", cost))?;

        let db_path = lookup("MESSAGELY_DB_PATH").unwrap_or_else(|| "messagely.db".into()).into();
        let host = lookup("MESSAGELY_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = lookup("MESSAGELY_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("MESSAGELY_PORT is not a valid port")?;

        Ok(Self {
            secret_key,
            password,
            db_path,
            host,
            port,
        })
    }

    pub fn has_placeholder_secret(&self) -> bool {
        self.secret_key.is_empty() || PLACEHOLDER_SECRETS.contains(&self.secret_key.as_str())
    }
}
