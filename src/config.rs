use std::env;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub api_base: String,
    pub api_token: Option<String>,
    pub routing_host: String,
    pub route_timeout: Duration,
    pub poll_interval: Duration,
    pub session_idle_timeout: Duration,
    pub map: MapSettings,
    pub event_buffer_size: usize,
}

#[derive(Debug, Clone)]
pub struct MapSettings {
    pub init_delay: Duration,
    pub initial_zoom: u8,
    pub viewport: (u32, u32),
    pub tile_url: String,
    pub fallback_tile_url: String,
}

impl Default for MapSettings {
    fn default() -> Self {
        Self {
            init_delay: Duration::from_millis(500),
            initial_zoom: 13,
            viewport: (800, 400),
            tile_url: "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png".to_string(),
            fallback_tile_url: "https://{s}.tile.openstreetmap.fr/osmfr/{z}/{x}/{y}.png"
                .to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        let map_defaults = MapSettings::default();

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            api_base: env::var("API_BASE")
                .unwrap_or_else(|_| "http://localhost:5000/api".to_string()),
            api_token: env::var("API_TOKEN").ok().filter(|t| !t.trim().is_empty()),
            routing_host: env::var("ROUTING_HOST")
                .unwrap_or_else(|_| "https://router.project-osrm.org".to_string()),
            route_timeout: Duration::from_millis(parse_or_default("ROUTE_TIMEOUT_MS", 10_000)?),
            poll_interval: Duration::from_millis(parse_or_default("POLL_INTERVAL_MS", 5_000)?),
            session_idle_timeout: Duration::from_millis(parse_or_default(
                "SESSION_IDLE_TIMEOUT_MS",
                60_000,
            )?),
            map: MapSettings {
                init_delay: Duration::from_millis(parse_or_default("MAP_INIT_DELAY_MS", 500)?),
                initial_zoom: parse_or_default("MAP_INITIAL_ZOOM", map_defaults.initial_zoom)?,
                viewport: match env::var("MAP_VIEWPORT") {
                    Ok(raw) => parse_viewport(&raw)?,
                    Err(_) => map_defaults.viewport,
                },
                tile_url: env::var("TILE_URL").unwrap_or(map_defaults.tile_url),
                fallback_tile_url: env::var("FALLBACK_TILE_URL")
                    .unwrap_or(map_defaults.fallback_tile_url),
            },
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 64)?,
        })
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}

fn parse_viewport(raw: &str) -> Result<(u32, u32), AppError> {
    let invalid = || AppError::Internal(format!("invalid MAP_VIEWPORT: {raw}, expected WxH"));

    let (width, height) = raw.trim().split_once(['x', 'X']).ok_or_else(invalid)?;
    let width = width.trim().parse::<u32>().map_err(|_| invalid())?;
    let height = height.trim().parse::<u32>().map_err(|_| invalid())?;
    Ok((width, height))
}
