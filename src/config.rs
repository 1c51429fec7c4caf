//! Configuration management for the upload server

use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Default chunk size limit: 16MB
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Default merged file size limit: 10GB
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024 * 1024;

/// Default limit on chunks per file
pub const DEFAULT_MAX_CHUNKS: usize = 10_000;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub limits: LimitsConfig,
    pub sessions: SessionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root directory holding `files/` and `chunks/`
    pub upload_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    pub max_chunk_size: usize,
    pub max_file_size: u64,
    /// Highest chunk count accepted for one file
    pub max_chunks: usize,
    /// Concurrent `/upload` requests before the server answers 503
    pub max_concurrent_uploads: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub ttl_hours: i64,
    pub cleanup_interval_secs: u64,
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            storage: StorageConfig {
                upload_dir: PathBuf::from("./target"),
            },
            database: DatabaseConfig {
                url: "sqlite:./target/uploads.db".to_string(),
            },
            limits: LimitsConfig {
                max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
                max_file_size: DEFAULT_MAX_FILE_SIZE,
                max_chunks: DEFAULT_MAX_CHUNKS,
                max_concurrent_uploads: 16,
            },
            sessions: SessionConfig {
                ttl_hours: 24,
                cleanup_interval_secs: 300,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        Ok(Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port: parse_var("SERVER_PORT", defaults.server.port)?,
            },
            storage: StorageConfig {
                upload_dir: env::var("UPLOAD_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.storage.upload_dir),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or(defaults.database.url),
            },
            limits: LimitsConfig {
                max_chunk_size: parse_var("MAX_CHUNK_SIZE", defaults.limits.max_chunk_size)?,
                max_file_size: parse_var("MAX_FILE_SIZE", defaults.limits.max_file_size)?,
                max_chunks: parse_var("MAX_CHUNKS", defaults.limits.max_chunks)?,
                max_concurrent_uploads: parse_var(
                    "MAX_CONCURRENT_UPLOADS",
                    defaults.limits.max_concurrent_uploads,
                )?,
            },
            sessions: SessionConfig {
                ttl_hours: parse_var("SESSION_TTL_HOURS", defaults.sessions.ttl_hours)?,
                cleanup_interval_secs: parse_var(
                    "CLEANUP_INTERVAL_SECS",
                    defaults.sessions.cleanup_interval_secs,
                )?,
            },
        })
    }

    /// Build a configuration rooted at `upload_dir`, keeping the ledger next to it
    pub fn with_upload_dir(upload_dir: impl Into<PathBuf>) -> Self {
        let upload_dir = upload_dir.into();
        let url = format!("sqlite://{}", upload_dir.join("uploads.db").display());

        Config {
            storage: StorageConfig { upload_dir },
            database: DatabaseConfig { url },
            ..Config::default()
        }
    }
}

fn parse_var<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_original_layout() {
        let config = Config::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.storage.upload_dir, PathBuf::from("./target"));
        assert_eq!(config.limits.max_chunk_size, 16 * 1024 * 1024);
        assert_eq!(config.limits.max_chunks, 10_000);
    }

    #[test]
    fn test_with_upload_dir_places_ledger_inside() {
        let config = Config::with_upload_dir("/tmp/uploads");
        assert_eq!(config.storage.upload_dir, PathBuf::from("/tmp/uploads"));
        assert_eq!(config.database.url, "sqlite:///tmp/uploads/uploads.db");
    }

    #[test]
    fn test_parse_var_rejects_garbage() {
        env::set_var("CHUNKED_UPLOAD_TEST_PORT", "not-a-port");
        let result: Result<u16, _> = parse_var("CHUNKED_UPLOAD_TEST_PORT", 3000);
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
        env::remove_var("CHUNKED_UPLOAD_TEST_PORT");

        let fallback: u16 = parse_var("CHUNKED_UPLOAD_TEST_UNSET", 3000).unwrap();
        assert_eq!(fallback, 3000);
    }
}
