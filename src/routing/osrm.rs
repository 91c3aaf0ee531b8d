use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::models::position::GeoPoint;
use crate::models::route::{RouteLeg, RoutePath};
use crate::observability::metrics::Metrics;
use crate::routing::RouteProvider;

#[derive(Debug, Deserialize)]
struct OsrmResponse {
    code: Option<String>,
    message: Option<String>,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    geometry: Option<OsrmGeometry>,
}

#[derive(Debug, Deserialize)]
struct OsrmGeometry {
    #[serde(default)]
    coordinates: Vec<[f64; 2]>,
}

pub struct OsrmRouter {
    http: Client,
    host: String,
    timeout: Duration,
    metrics: Option<Metrics>,
}

impl OsrmRouter {
    pub fn new(host: &str, timeout: Duration) -> Result<Self, FetchError> {
        let http = Client::builder()
            .build()
            .map_err(|err| FetchError::Transport(format!("failed to build http client: {err}")))?;

        Ok(Self {
            http,
            host: host.trim_end_matches('/').to_string(),
            timeout,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn route_url(&self, start: &GeoPoint, end: &GeoPoint) -> String {
        format!(
            "{}/route/v1/driving/{},{};{},{}?overview=full&geometries=geojson",
            self.host, start.lng, start.lat, end.lng, end.lat
        )
    }

    async fn fetch(&self, start: &GeoPoint, end: &GeoPoint) -> Result<RoutePath, FetchError> {
        let url = self.route_url(start, end);

        let request = async {
            let response = self
                .http
                .get(&url)
                .send()
                .await
                .map_err(|err| FetchError::Transport(err.to_string()))?;

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|err| FetchError::Transport(err.to_string()))?;
            if !status.is_success() {
                debug!(status = status.as_u16(), body = %body, "routing service error body");
                return Err(FetchError::Status(status.as_u16()));
            }
            Ok(body)
        };

        let body = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| FetchError::Timeout)??;

        let parsed: OsrmResponse =
            serde_json::from_str(&body).map_err(|err| FetchError::Decode(err.to_string()))?;
        geometry_to_path(parsed)
    }

    fn record(&self, leg: RouteLeg, outcome: &str, started: Instant) {
        if let Some(metrics) = &self.metrics {
            metrics
                .route_requests_total
                .with_label_values(&[leg.as_str(), outcome])
                .inc();
            metrics
                .route_latency_seconds
                .with_label_values(&[leg.as_str()])
                .observe(started.elapsed().as_secs_f64());
        }
    }
}

fn geometry_to_path(response: OsrmResponse) -> Result<RoutePath, FetchError> {
    if response.code.as_deref() != Some("Ok") {
        return Err(FetchError::Decode(format!(
            "routing code {:?}: {}",
            response.code,
            response.message.unwrap_or_default()
        )));
    }

    let coordinates = response
        .routes
        .into_iter()
        .next()
        .and_then(|route| route.geometry)
        .map(|geometry| geometry.coordinates)
        .filter(|coordinates| !coordinates.is_empty())
        .ok_or_else(|| FetchError::Decode("no route geometry".to_string()))?;

    Ok(RoutePath(
        coordinates
            .into_iter()
            .map(|[lng, lat]| GeoPoint::new(lat, lng))
            .collect(),
    ))
}

#[async_trait]
impl RouteProvider for OsrmRouter {
    async fn compute_route(
        &self,
        leg: RouteLeg,
        start: Option<GeoPoint>,
        end: Option<GeoPoint>,
    ) -> Option<RoutePath> {
        let (start, end) = match (start, end) {
            (Some(start), Some(end)) if start.is_valid() && end.is_valid() => (start, end),
            _ => {
                warn!(leg = leg.as_str(), ?start, ?end, "invalid coordinates for routing");
                return None;
            }
        };

        let started = Instant::now();
        match self.fetch(&start, &end).await {
            Ok(path) => {
                debug!(leg = leg.as_str(), points = path.points().len(), "route found");
                self.record(leg, "ok", started);
                Some(path)
            }
            Err(err) => {
                warn!(
                    leg = leg.as_str(),
                    start = %start.label(),
                    end = %end.label(),
                    error = %err,
                    "routing failed, no route for leg"
                );
                let outcome = match err {
                    FetchError::Timeout => "timeout",
                    _ => "error",
                };
                self.record(leg, outcome, started);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn router(server: &MockServer) -> OsrmRouter {
        OsrmRouter::new(&server.uri(), Duration::from_millis(300)).unwrap()
    }

    fn manila() -> Option<GeoPoint> {
        Some(GeoPoint::new(14.60, 120.98))
    }

    fn cubao() -> Option<GeoPoint> {
        Some(GeoPoint::new(14.61, 120.99))
    }

    #[tokio::test]
    async fn swaps_coordinates_into_lat_lng_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/route/v1/driving/120.98,14.6;120.99,14.61"))
            .and(query_param("overview", "full"))
            .and(query_param("geometries", "geojson"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": "Ok",
                "routes": [{ "geometry": { "coordinates": [[120.98, 14.60], [120.99, 14.61]] } }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let path = router(&server)
            .compute_route(RouteLeg::ToDropoff, manila(), cubao())
            .await
            .unwrap();

        assert_eq!(
            path.points(),
            &[GeoPoint::new(14.60, 120.98), GeoPoint::new(14.61, 120.99)]
        );
    }

    #[tokio::test]
    async fn missing_points_short_circuit_without_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let router = router(&server);
        let nan = Some(GeoPoint::new(f64::NAN, 120.98));

        assert!(router.compute_route(RouteLeg::ToDropoff, None, cubao()).await.is_none());
        assert!(router.compute_route(RouteLeg::ToDropoff, manila(), None).await.is_none());
        assert!(router.compute_route(RouteLeg::ToPickup, None, None).await.is_none());
        assert!(router.compute_route(RouteLeg::ToPickup, nan, cubao()).await.is_none());
    }

    #[tokio::test]
    async fn timeout_yields_no_route() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "code": "Ok", "routes": [] }))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let path = router(&server)
            .compute_route(RouteLeg::ToDropoff, manila(), cubao())
            .await;
        assert!(path.is_none());
    }

    #[tokio::test]
    async fn server_error_yields_no_route() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let path = router(&server)
            .compute_route(RouteLeg::ToDropoff, manila(), cubao())
            .await;
        assert!(path.is_none());
    }

    #[tokio::test]
    async fn non_ok_code_yields_no_route() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": "NoRoute",
                "message": "Impossible route between points",
                "routes": [{ "geometry": { "coordinates": [[120.98, 14.60], [120.99, 14.61]] } }]
            })))
            .mount(&server)
            .await;

        let path = router(&server)
            .compute_route(RouteLeg::ToPickup, manila(), cubao())
            .await;
        assert!(path.is_none());
    }

    #[tokio::test]
    async fn malformed_or_empty_routes_yield_no_route() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/route/v1/driving/120.98,14.6;120.99,14.61"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/route/v1/driving/120.99,14.61;120.98,14.6"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": "Ok", "routes": [] })))
            .mount(&server)
            .await;

        let router = router(&server);
        assert!(router.compute_route(RouteLeg::ToDropoff, manila(), cubao()).await.is_none());
        assert!(router.compute_route(RouteLeg::ToDropoff, cubao(), manila()).await.is_none());
    }
}
