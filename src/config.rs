//! Environment-driven configuration.

use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub secret_key: String,
    pub algorithm: String,
    pub access_token_expire_minutes: i64,
    pub refresh_token_expire_days: i64,
    /// Enables the traffic-aware external provider when set.
    pub google_maps_api_key: Option<String>,
    /// Enables the local routing provider when set; otherwise it is skipped.
    pub osrm_base_url: Option<String>,
    pub bind_address: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL").ok(),
            secret_key: env::var("SECRET_KEY").unwrap_or_else(|_| "dev-secret".to_string()),
            algorithm: env::var("ALGORITHM").unwrap_or_else(|_| "HS256".to_string()),
            access_token_expire_minutes: env::var("ACCESS_TOKEN_EXPIRE_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            refresh_token_expire_days: env::var("REFRESH_TOKEN_EXPIRE_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(7),
            google_maps_api_key: env::var("GOOGLE_MAPS_API_KEY").ok().filter(|k| !k.is_empty()),
            osrm_base_url: env::var("OSRM_BASE_URL").ok().filter(|u| !u.is_empty()),
            bind_address: env::var("RUTEO_BIND").unwrap_or_else(|_| "0.0.0.0:8000".to_string()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            secret_key: "dev-secret".to_string(),
            algorithm: "HS256".to_string(),
            access_token_expire_minutes: 30,
            refresh_token_expire_days: 7,
            google_maps_api_key: None,
            osrm_base_url: None,
            bind_address: "0.0.0.0:8000".to_string(),
        }
    }
}
