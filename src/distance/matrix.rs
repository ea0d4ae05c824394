use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use serde::Deserialize;
use tracing::debug;

use crate::distance::{DistanceError, DistanceProvider, RouteEstimate};
use crate::models::driver::GeoPoint;

pub const DEFAULT_MAX_ORIGINS: usize = 25;

/// Client for a Google-style distance matrix endpoint (`/json?origins=..`).
pub struct DistanceMatrixClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    max_origins_per_request: usize,
}

#[derive(Debug, Deserialize)]
struct MatrixResponse {
    status: String,
    #[serde(default)]
    rows: Vec<MatrixRow>,
}

#[derive(Debug, Deserialize)]
struct MatrixRow {
    elements: Vec<MatrixElement>,
}

#[derive(Debug, Deserialize)]
struct MatrixElement {
    status: String,
    distance: Option<MatrixValue>,
    duration: Option<MatrixValue>,
}

#[derive(Debug, Deserialize)]
struct MatrixValue {
    value: f64,
}

impl DistanceMatrixClient {
    /// Every request, including each chunk of a batch, is cut off after
    /// `request_timeout`.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        max_origins: usize,
        request_timeout: Duration,
    ) -> Result<Self, DistanceError> {
        let http = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
            max_origins_per_request: max_origins.max(1),
        })
    }

    async fn fetch_chunk(
        &self,
        origins: &[GeoPoint],
        destination: GeoPoint,
    ) -> Result<Vec<RouteEstimate>, DistanceError> {
        let url = format!("{}/json", self.base_url.trim_end_matches('/'));
        let response: MatrixResponse = self
            .http
            .get(&url)
            .query(&[
                ("origins", join_points(origins)),
                ("destinations", format_point(&destination)),
                ("mode", "driving".to_string()),
                ("key", self.api_key.clone()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        debug!(origins = origins.len(), status = %response.status, "distance matrix response");
        parse_matrix(response, origins.len())
    }
}

#[async_trait]
impl DistanceProvider for DistanceMatrixClient {
    async fn route(
        &self,
        origin: GeoPoint,
        destination: GeoPoint,
    ) -> Result<RouteEstimate, DistanceError> {
        let mut estimates = self.fetch_chunk(&[origin], destination).await?;
        estimates
            .pop()
            .ok_or_else(|| DistanceError::InvalidResponse("empty matrix".to_string()))
    }

    async fn routes_from(
        &self,
        origins: &[GeoPoint],
        destination: GeoPoint,
    ) -> Result<Vec<RouteEstimate>, DistanceError> {
        if origins.is_empty() {
            return Ok(Vec::new());
        }

        let chunks = origins
            .chunks(self.max_origins_per_request)
            .map(|chunk| self.fetch_chunk(chunk, destination));

        // try_join_all keeps chunk order, so flattening preserves input order.
        let results = try_join_all(chunks).await?;
        Ok(results.into_iter().flatten().collect())
    }
}

fn format_point(point: &GeoPoint) -> String {
    format!("{:.6},{:.6}", point.lat, point.lng)
}

fn join_points(points: &[GeoPoint]) -> String {
    points.iter().map(format_point).collect::<Vec<_>>().join("|")
}

fn parse_matrix(
    response: MatrixResponse,
    expected: usize,
) -> Result<Vec<RouteEstimate>, DistanceError> {
    if response.status != "OK" {
        return Err(DistanceError::Provider(response.status));
    }

    if response.rows.len() != expected {
        return Err(DistanceError::InvalidResponse(format!(
            "expected {expected} rows, got {}",
            response.rows.len()
        )));
    }

    response
        .rows
        .into_iter()
        .map(|row| {
            let element = row
                .elements
                .into_iter()
                .next()
                .ok_or_else(|| DistanceError::InvalidResponse("row without elements".to_string()))?;

            if element.status != "OK" {
                return Err(DistanceError::Provider(element.status));
            }

            match (element.distance, element.duration) {
                (Some(distance), Some(duration)) => Ok(RouteEstimate {
                    distance_km: distance.value / 1_000.0,
                    eta_minutes: (duration.value / 60.0).ceil() as i32,
                }),
                _ => Err(DistanceError::InvalidResponse(
                    "element missing distance or duration".to_string(),
                )),
            }
        })
        .collect()
}
