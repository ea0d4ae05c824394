use std::env;
use std::time::Duration;

use crate::distance::matrix::DEFAULT_MAX_ORIGINS;
use crate::error::AppError;

/// Timing and sizing of the driver search.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub offer_timeout: Duration,
    pub radius_km: f64,
    pub retry_interval: Duration,
    pub max_search_time: Duration,
    pub max_queue_size: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            offer_timeout: Duration::from_secs(10),
            radius_km: 2.0,
            retry_interval: Duration::from_secs(15),
            max_search_time: Duration::from_secs(180),
            max_queue_size: 10,
        }
    }
}

/// Throttling thresholds for in-transit ETA refreshes.
#[derive(Debug, Clone)]
pub struct RouteRecalcConfig {
    pub min_interval: Duration,
    pub min_distance_moved_meters: f64,
    pub min_eta_change_minutes: i32,
}

impl Default for RouteRecalcConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(30),
            min_distance_moved_meters: 200.0,
            min_eta_change_minutes: 2,
        }
    }
}

const DEFAULT_DISTANCE_API_URL: &str = "https://maps.googleapis.com/maps/api/distancematrix";

#[derive(Debug, Clone)]
pub struct DistanceConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub max_origins_per_request: usize,
    /// Upper bound on one provider request, so a stalled provider falls
    /// through to the straight-line estimate.
    pub request_timeout: Duration,
}

impl Default for DistanceConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_DISTANCE_API_URL.to_string(),
            api_key: None,
            max_origins_per_request: DEFAULT_MAX_ORIGINS,
            request_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub event_buffer_size: usize,
    pub reconcile_interval: Duration,
    pub dispatch: DispatchConfig,
    pub route: RouteRecalcConfig,
    pub distance: DistanceConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let dispatch = DispatchConfig {
            offer_timeout: Duration::from_secs(parse_or_default("OFFER_TIMEOUT_SECS", 10)?),
            radius_km: parse_or_default("SEARCH_RADIUS_KM", 2.0)?,
            retry_interval: Duration::from_secs(parse_or_default("RETRY_INTERVAL_SECS", 15)?),
            max_search_time: Duration::from_secs(parse_or_default("MAX_SEARCH_TIME_SECS", 180)?),
            max_queue_size: parse_or_default("MAX_QUEUE_SIZE", 10)?,
        };

        let route = RouteRecalcConfig {
            min_interval: Duration::from_secs(parse_or_default("ROUTE_MIN_INTERVAL_SECS", 30)?),
            min_distance_moved_meters: parse_or_default("ROUTE_MIN_DISTANCE_METERS", 200.0)?,
            min_eta_change_minutes: parse_or_default("ROUTE_MIN_ETA_CHANGE_MINS", 2)?,
        };

        let distance = DistanceConfig {
            api_url: env::var("DISTANCE_API_URL")
                .unwrap_or_else(|_| DEFAULT_DISTANCE_API_URL.to_string()),
            api_key: env::var("DISTANCE_API_KEY").ok().filter(|key| !key.is_empty()),
            max_origins_per_request: parse_or_default("DISTANCE_MAX_ORIGINS", DEFAULT_MAX_ORIGINS)?,
            request_timeout: Duration::from_millis(parse_or_default("DISTANCE_TIMEOUT_MS", 5_000)?),
        };

        if distance.request_timeout.is_zero() {
            return Err(AppError::Internal("DISTANCE_TIMEOUT_MS must be > 0".to_string()));
        }

        if dispatch.max_queue_size == 0 {
            return Err(AppError::Internal("MAX_QUEUE_SIZE must be > 0".to_string()));
        }

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 256)?,
            reconcile_interval: Duration::from_secs(parse_or_default("RECONCILE_INTERVAL_SECS", 30)?),
            dispatch,
            route,
            distance,
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
