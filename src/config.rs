// src/config.rs

use std::{env, net::SocketAddr, path::PathBuf, str::FromStr};

use dotenvy::dotenv;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    /// Session lifetime in seconds.
    pub jwt_expiration: u64,
    pub bind_addr: SocketAddr,
    pub rust_log: String,
    pub log_dir: PathBuf,
    /// Root directory for uploaded objects.
    pub storage_dir: PathBuf,
    /// Prefix used to build public object URLs, without trailing slash.
    pub public_base_url: String,
    pub max_upload_bytes: usize,
    /// Default feed window when the client does not pass `limit`.
    pub feed_page_size: i64,
    pub cors_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();

        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://suedit.db?mode=rwc".to_string());

        let jwt_secret = env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;

        let public_base_url = env::var("PUBLIC_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:3000".to_string());
        if url::Url::parse(&public_base_url).is_err() {
            return Err(ConfigError::Invalid {
                key: "PUBLIC_BASE_URL",
                value: public_base_url,
            });
        }

        let cors_origins = env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173,http://127.0.0.1:5173".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            database_url,
            jwt_secret,
            jwt_expiration: parse_var("JWT_EXPIRATION", 7 * 24 * 60 * 60)?,
            bind_addr: parse_var("BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 3000)))?,
            rust_log: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            log_dir: env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string()).into(),
            storage_dir: env::var("STORAGE_DIR")
                .unwrap_or_else(|_| "storage".to_string())
                .into(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            max_upload_bytes: parse_var("MAX_UPLOAD_BYTES", 5 * 1024 * 1024)?,
            feed_page_size: parse_var("FEED_PAGE_SIZE", 10)?,
            cors_origins,
        })
    }
}

fn parse_var<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        Err(_) => Ok(default),
    }
}
