use serde::{Deserialize, Serialize};

use crate::services::user_aggregator::DEFAULT_USER_CACHE_TTL_HOURS;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub user_service: UserServiceConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub env: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserServiceConfig {
    /// Base URL of the authoritative user service.
    pub base_url: String,
    /// Per-request timeout in seconds; exceeding it is treated like any
    /// other remote failure.
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Freshness window for synced user records, in hours.
    pub user_ttl_hours: i64,
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Config {
            app: AppConfig {
                env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
                port: std::env::var("APP_PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()?,
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")?,
                max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()?,
            },
            user_service: UserServiceConfig {
                base_url: std::env::var("USER_SERVICE_URL")
                    .unwrap_or_else(|_| "http://localhost:8081".to_string()),
                timeout_secs: std::env::var("USER_SERVICE_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()?,
            },
            cache: CacheConfig {
                user_ttl_hours: std::env::var("USER_CACHE_TTL_HOURS")
                    .unwrap_or_else(|_| DEFAULT_USER_CACHE_TTL_HOURS.to_string())
                    .parse()?,
            },
        })
    }
}
