use std::env;

use crate::client::models::session::DEFAULT_SEARCH_RADIUS_M;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub places_api_key: String,
    pub places_base_url: String,
    pub http_timeout_secs: u64,
    pub default_search_radius_m: u32,
    pub link_base: String,
    pub log_level: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:data/ritrovo.db?mode=rwc".to_string()),
            places_api_key: env::var("PLACES_API_KEY").unwrap_or_default(),
            places_base_url: env::var("PLACES_BASE_URL").unwrap_or_else(|_| {
                "https://maps.googleapis.com/maps/api/place/nearbysearch/json".to_string()
            }),
            http_timeout_secs: env::var("HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            default_search_radius_m: env::var("DEFAULT_SEARCH_RADIUS_M")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_SEARCH_RADIUS_M),
            link_base: env::var("APP_LINK_BASE")
                .unwrap_or_else(|_| "https://ritrovo.app/join".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        }
    }
}
