use anyhow::anyhow;
use dotenvy::dotenv;
use secrecy::Secret;
use std::env;

use service_core::error::AppError;

#[derive(Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub service_name: String,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let host = env::var("INVOICING_SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("INVOICING_SERVICE_PORT")
            .unwrap_or_else(|_| "3007".to_string())
            .parse()
            .map_err(|e| AppError::ConfigError(anyhow!("Invalid INVOICING_SERVICE_PORT: {}", e)))?;

        let db_url = env::var("INVOICING_DATABASE_URL")
            .map_err(|_| AppError::ConfigError(anyhow!("INVOICING_DATABASE_URL must be set")))?;
        let max_connections = env::var("INVOICING_DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .map_err(|e| {
                AppError::ConfigError(anyhow!("Invalid INVOICING_DATABASE_MAX_CONNECTIONS: {}", e))
            })?;
        let min_connections = env::var("INVOICING_DATABASE_MIN_CONNECTIONS")
            .unwrap_or_else(|_| "1".to_string())
            .parse()
            .map_err(|e| {
                AppError::ConfigError(anyhow!("Invalid INVOICING_DATABASE_MIN_CONNECTIONS: {}", e))
            })?;

        Ok(Self {
            server: ServerConfig { host, port },
            database: DatabaseConfig {
                url: Secret::new(db_url),
                max_connections,
                min_connections,
            },
            service_name: "invoicing-service".to_string(),
        })
    }
}
