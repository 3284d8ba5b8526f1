//! Configuration management for the pharmacy backend
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Configuration files (config/development.toml, config/production.toml)
//! 3. Environment variable overrides with PHARMACY__ prefix

use std::path::PathBuf;

use config::{ConfigError, Environment, File};
use serde::Deserialize;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// JWT authentication configuration
    pub jwt: JwtConfig,

    /// Pharmacy identity printed on documents
    pub company: CompanyConfig,

    /// Where rendered PDFs and file logs are written
    pub storage: StorageConfig,

    /// Account created on first boot when the user table is empty
    pub admin: AdminConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server port
    pub port: u16,

    /// Server host
    pub host: String,

    /// Public base URL, used to build artifact links
    pub public_host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct JwtConfig {
    /// Secret key for signing JWT tokens
    pub secret: String,

    /// Token lifetime in seconds
    pub expiry_seconds: i64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CompanyConfig {
    pub name: String,
    pub address: String,
    pub phone: String,
    pub whatsapp: String,
    pub logo_url: String,
    pub slogan: String,
    pub business_registration_number: String,
    pub pharmacist: String,
    pub pharmacist_license_number: String,
    pub main_doctor: String,
    pub main_doctor_license_number: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Root of `pdf/` and `log/`
    pub static_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AdminConfig {
    pub initial_name: String,

    /// Empty skips the bootstrap
    pub initial_password: String,
}

impl StorageConfig {
    pub fn pdf_dir(&self) -> PathBuf {
        self.static_dir.join("pdf")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.static_dir.join("log")
    }
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let environment =
            std::env::var("PHARMACY_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let config = config::Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("server.port", 19230)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.public_host", "http://localhost:19230")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("jwt.expiry_seconds", 43200)?
            .set_default("storage.static_dir", "static")?
            .set_default("admin.initial_name", "admin")?
            .set_default("admin.initial_password", "")?
            .set_default("company.name", "")?
            .set_default("company.address", "")?
            .set_default("company.phone", "")?
            .set_default("company.whatsapp", "")?
            .set_default("company.logo_url", "")?
            .set_default("company.slogan", "")?
            .set_default("company.business_registration_number", "")?
            .set_default("company.pharmacist", "")?
            .set_default("company.pharmacist_license_number", "")?
            .set_default("company.main_doctor", "")?
            .set_default("company.main_doctor_license_number", "")?
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Override with environment variables (PHARMACY__ prefix)
            .add_source(
                Environment::with_prefix("PHARMACY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 19230,
            host: "0.0.0.0".to_string(),
            public_host: "http://localhost:19230".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_paths() {
        let storage = StorageConfig {
            static_dir: PathBuf::from("static"),
        };
        assert_eq!(storage.pdf_dir(), PathBuf::from("static/pdf"));
        assert_eq!(storage.log_dir(), PathBuf::from("static/log"));
    }

    #[test]
    fn test_server_defaults() {
        let server = ServerConfig::default();
        assert_eq!(server.port, 19230);
        assert_eq!(server.host, "0.0.0.0");
    }
}
