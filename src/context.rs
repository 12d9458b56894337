use std::env;

use chrono::Duration;
use thiserror::Error;

use crate::auth::Auth;
use crate::chats::{ChatService, Chats};
use crate::database;
use crate::error::AppError;
use crate::users::{UserService, Users};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("environment variable {0} is not set")]
    Missing(&'static str),
    #[error("environment variable {0} is invalid: {1}")]
    Invalid(&'static str, String),
}

fn env_bool<T: AsRef<str>>(s: T) -> bool {
    let s = s.as_ref().trim();
    !(s.is_empty() || s == "0" || s.to_ascii_lowercase() == "false")
}

/// Settings read from the environment (and `.env`) at startup.
#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub secret: String,
    pub password_salt: String,
    pub port: u16,
    pub debug: bool,
    pub pool_size: usize,
    pub token_ttl: Duration,
    pub log_file: String,
}

impl Config {
    pub fn from_env() -> Result<Config, ConfigError> {
        Config::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let required = |key: &'static str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .ok_or(ConfigError::Missing(key))
        };
        let parsed = |key: &'static str, default: u64, range: std::ops::RangeInclusive<u64>| match lookup(key) {
            None => Ok(default),
            Some(value) => value
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|n| range.contains(n))
                .ok_or(ConfigError::Invalid(key, value)),
        };

        let ttl_hours = parsed("TOKEN_TTL_HOURS", 12, 1..=24 * 365)?;
        Ok(Config {
            database_url: required("DATABASE_URL")?,
            secret: required("SECRET")?,
            password_salt: required("PASSWORD_SALT")?,
            port: parsed("PORT", 8080, 1..=u16::MAX as u64)? as u16,
            debug: lookup("DEBUG").map(env_bool).unwrap_or(false),
            pool_size: parsed("DATABASE_POOL_SIZE", 8, 1..=256)? as usize,
            token_ttl: Duration::hours(ttl_hours as i64),
            log_file: lookup("LOG_FILE")
                .map(|path| path.trim().to_string())
                .filter(|path| !path.is_empty())
                .unwrap_or_else(|| "server.log".to_string()),
        })
    }
}

/// The two capabilities the HTTP layer is built on, constructed independently.
pub struct AppContext {
    pub users: Box<dyn Users>,
    pub chats: Box<dyn Chats>,
}

impl AppContext {
    pub async fn new(config: &Config) -> Result<AppContext, AppError> {
        let pool = database::connect_pool(&config.database_url, config.pool_size).await?;
        let auth = Auth::new(&config.secret, &config.password_salt, config.token_ttl);
        Ok(AppContext {
            users: Box::new(UserService::new(pool.clone(), auth)),
            chats: Box::new(ChatService::new(pool)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&'static str, &str)]) -> impl Fn(&'static str) -> Option<String> {
        let vars: HashMap<&'static str, String> = vars.iter().map(|(k, v)| (*k, v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn config_defaults() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/messenger"),
            ("SECRET", "secret"),
            ("PASSWORD_SALT", "salt"),
        ]))
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.pool_size, 8);
        assert!(!config.debug);
        assert_eq!(config.token_ttl, Duration::hours(12));
        assert_eq!(config.log_file, "server.log");
    }

    #[test]
    fn config_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/messenger"),
            ("SECRET", "secret"),
            ("PASSWORD_SALT", "salt"),
            ("PORT", "3000"),
            ("DEBUG", "true"),
            ("TOKEN_TTL_HOURS", "1"),
            ("LOG_FILE", "/var/log/messenger.log"),
        ]))
        .unwrap();
        assert_eq!(config.log_file, "/var/log/messenger.log");
        assert_eq!(config.port, 3000);
        assert!(config.debug);
        assert_eq!(config.token_ttl, Duration::hours(1));
    }

    #[test]
    fn config_errors() {
        let missing = Config::from_lookup(lookup(&[("DATABASE_URL", "postgres://localhost/messenger")]));
        assert_eq!(missing.err(), Some(ConfigError::Missing("SECRET")));

        let blank_salt = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/messenger"),
            ("SECRET", "secret"),
            ("PASSWORD_SALT", "  "),
        ]));
        assert_eq!(blank_salt.err(), Some(ConfigError::Missing("PASSWORD_SALT")));

        let bad_port = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/messenger"),
            ("SECRET", "secret"),
            ("PASSWORD_SALT", "salt"),
            ("PORT", "http"),
        ]));
        assert_eq!(bad_port.err(), Some(ConfigError::Invalid("PORT", "http".to_string())));
    }

    #[test]
    fn env_bool_test() {
        assert!(env_bool("1"));
        assert!(env_bool("yes"));
        assert!(!env_bool("FALSE"));
        assert!(!env_bool(" "));
    }
}
