use serde_json::Value;
use tracing::{debug, info, warn};

use crate::backend::BackendClient;
use crate::error::{FetchError, ResolveError};
use crate::models::assignment::Assignment;
use crate::observability::metrics::Metrics;

#[derive(Debug, Clone, PartialEq)]
pub struct ResolveRequest {
    pub courier_id: Option<String>,
    pub assignment_id: Option<String>,
    pub role: String,
}

impl ResolveRequest {
    pub fn new(courier_id: Option<&str>, assignment_id: Option<&str>, role: &str) -> Self {
        let clean = |raw: Option<&str>| {
            raw.map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        Self {
            courier_id: clean(courier_id),
            assignment_id: clean(assignment_id),
            role: role.trim().to_lowercase(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    ById { assignment_id: String },
    ActiveAlias { path: Vec<String> },
    ListActive { courier_id: String },
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::ById { .. } => "by_id",
            Strategy::ActiveAlias { .. } => "active_alias",
            Strategy::ListActive { .. } => "list_active",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StrategyError {
    // Authoritative: stops the pipeline.
    NotFound,
    NoMatch,
    Transient(String),
}

pub fn validate_courier_id(raw: &str) -> Result<(), ResolveError> {
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() && value > 0.0 => Ok(()),
        _ => Err(ResolveError::InvalidIdentifier(raw.to_string())),
    }
}

pub fn plan(request: &ResolveRequest) -> Result<Vec<Strategy>, ResolveError> {
    if let Some(courier_id) = &request.courier_id {
        validate_courier_id(courier_id)?;
    }

    let mut strategies = Vec::new();
    if let Some(assignment_id) = &request.assignment_id {
        strategies.push(Strategy::ById {
            assignment_id: assignment_id.clone(),
        });
    }
    if let Some(courier_id) = &request.courier_id {
        strategies.extend(
            BackendClient::active_alias_paths(courier_id)
                .into_iter()
                .map(|path| Strategy::ActiveAlias { path }),
        );
        strategies.push(Strategy::ListActive {
            courier_id: courier_id.clone(),
        });
    }
    Ok(strategies)
}

pub async fn first_success<F, Fut>(
    strategies: Vec<Strategy>,
    mut attempt: F,
) -> Result<Assignment, ResolveError>
where
    F: FnMut(Strategy) -> Fut,
    Fut: std::future::Future<Output = Result<Assignment, StrategyError>>,
{
    let mut last_transient = None;
    let mut answered = false;

    for strategy in strategies {
        let name = strategy.name();
        match attempt(strategy).await {
            Ok(assignment) => {
                debug!(strategy = name, assignment_id = ?assignment.id, "assignment resolved");
                return Ok(assignment);
            }
            Err(StrategyError::NotFound) => {
                info!(strategy = name, "backend reports no active assignment");
                return Err(ResolveError::NotFound);
            }
            Err(StrategyError::NoMatch) => {
                debug!(strategy = name, "strategy found nothing usable");
                answered = true;
            }
            Err(StrategyError::Transient(reason)) => {
                warn!(strategy = name, reason = %reason, "strategy failed, trying next");
                last_transient = Some(reason);
            }
        }
    }

    match last_transient {
        Some(reason) if !answered => Err(ResolveError::Unavailable(reason)),
        _ => Err(ResolveError::NotFound),
    }
}

pub struct AssignmentResolver {
    backend: BackendClient,
    metrics: Metrics,
}

impl AssignmentResolver {
    pub fn new(backend: BackendClient, metrics: Metrics) -> Self {
        Self { backend, metrics }
    }

    pub async fn resolve(&self, request: &ResolveRequest) -> Result<Assignment, ResolveError> {
        let outcome = match plan(request) {
            Ok(strategies) => {
                first_success(strategies, |strategy| self.attempt(strategy, &request.role)).await
            }
            Err(err) => Err(err),
        };

        let label = match &outcome {
            Ok(_) => "found",
            Err(ResolveError::InvalidIdentifier(_)) => "invalid",
            Err(ResolveError::NotFound) => "not_found",
            Err(ResolveError::Unavailable(_)) => "unavailable",
        };
        self.metrics.resolutions_total.with_label_values(&[label]).inc();
        outcome
    }

    async fn attempt(&self, strategy: Strategy, role: &str) -> Result<Assignment, StrategyError> {
        match strategy {
            Strategy::ById { assignment_id } => {
                let path = BackendClient::assignment_by_id_path(&assignment_id);
                match self.backend.get_json(&path, Some(role)).await {
                    Ok(payload) => Assignment::from_payload(&payload).ok_or(StrategyError::NoMatch),
                    Err(FetchError::NotFound) => Err(StrategyError::NoMatch),
                    Err(err) => Err(StrategyError::Transient(err.to_string())),
                }
            }
            Strategy::ActiveAlias { path } => match self.backend.get_json(&path, Some(role)).await {
                Ok(payload) => Assignment::from_payload(&payload).ok_or(StrategyError::NoMatch),
                Err(FetchError::NotFound) => Err(StrategyError::NotFound),
                Err(err) => Err(StrategyError::Transient(err.to_string())),
            },
            Strategy::ListActive { courier_id } => {
                let path = BackendClient::courier_assignments_path(&courier_id);
                match self.backend.get_json(&path, Some(role)).await {
                    Ok(payload) => pick_trackable(&payload),
                    Err(FetchError::NotFound) => Err(StrategyError::NoMatch),
                    Err(err) => Err(StrategyError::Transient(err.to_string())),
                }
            }
        }
    }
}

fn pick_trackable(payload: &Value) -> Result<Assignment, StrategyError> {
    let list = crate::models::normalize::unwrap_envelope(payload)
        .as_array()
        .ok_or_else(|| StrategyError::Transient("assignment list is not an array".to_string()))?;

    list.iter()
        .filter_map(Assignment::from_payload)
        .find(|assignment| assignment.status.is_some_and(|status| status.is_trackable()))
        .ok_or(StrategyError::NoMatch)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::models::assignment::AssignmentStatus;

    fn resolver(server: &MockServer) -> AssignmentResolver {
        let backend = BackendClient::new(&format!("{}/api", server.uri()), None).unwrap();
        AssignmentResolver::new(backend, Metrics::new())
    }

    #[test]
    fn invalid_courier_ids_are_rejected() {
        for raw in ["0", "-3", "abc", "NaN", "inf", "1e999"] {
            let request = ResolveRequest::new(Some(raw), None, "admin");
            assert!(
                matches!(plan(&request), Err(ResolveError::InvalidIdentifier(_))),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn plan_orders_strategies() {
        let request = ResolveRequest::new(Some("7"), Some("42"), "Admin");
        let strategies = plan(&request).unwrap();

        assert_eq!(request.role, "admin");
        assert_eq!(strategies.len(), 5);
        assert_eq!(strategies[0].name(), "by_id");
        assert!(strategies[1..4].iter().all(|s| s.name() == "active_alias"));
        assert_eq!(strategies[4].name(), "list_active");
    }

    #[test]
    fn blank_identifiers_are_treated_as_absent() {
        let request = ResolveRequest::new(Some("  "), Some(""), "admin");
        assert_eq!(request.courier_id, None);
        assert!(plan(&request).unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_identifier_makes_no_network_calls() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let outcome = resolver(&server)
            .resolve(&ResolveRequest::new(Some("-1"), Some("42"), "admin"))
            .await;
        assert_eq!(outcome, Err(ResolveError::InvalidIdentifier("-1".to_string())));
    }

    #[tokio::test]
    async fn by_id_wins_when_payload_has_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/delivery-assignments/42"))
            .and(query_param("role", "auditor"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "assignment_id": 42, "status": "IN_PROGRESS" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let assignment = resolver(&server)
            .resolve(&ResolveRequest::new(Some("7"), Some("42"), "Auditor"))
            .await
            .unwrap();
        assert_eq!(assignment.id.as_deref(), Some("42"));
        assert_eq!(assignment.status, Some(AssignmentStatus::InProgress));
    }

    #[tokio::test]
    async fn alias_404_stops_search_before_list_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/delivery-assignments/personnel/7/active"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/assignments/active/7"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/personnel/7/active-assignments"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/delivery-assignments/personnel/7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "assignment_id": 1, "status": "ASSIGNED" }
            ])))
            .expect(0)
            .mount(&server)
            .await;

        let outcome = resolver(&server)
            .resolve(&ResolveRequest::new(Some("7"), None, "admin"))
            .await;
        assert_eq!(outcome, Err(ResolveError::NotFound));
    }

    #[tokio::test]
    async fn list_fallback_picks_first_trackable() {
        let server = MockServer::start().await;
        for alias in [
            "/api/delivery-assignments/personnel/7/active",
            "/api/assignments/active/7",
            "/api/personnel/7/active-assignments",
        ] {
            Mock::given(method("GET"))
                .and(path(alias))
                .respond_with(ResponseTemplate::new(503))
                .expect(1)
                .mount(&server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/api/delivery-assignments/personnel/7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    { "assignment_id": 1, "status": "COMPLETED" },
                    { "assignment_id": 2, "status": "PENDING" },
                    { "assignment_id": 3, "status": "IN_PROGRESS" },
                    { "assignment_id": 4, "status": "ASSIGNED" }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let assignment = resolver(&server)
            .resolve(&ResolveRequest::new(Some("7"), None, "admin"))
            .await
            .unwrap();
        assert_eq!(assignment.id.as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn unusable_alias_payload_falls_through_to_next_alias() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/delivery-assignments/personnel/7/active"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": null })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/assignments/active/7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "AssignmentID": 9, "status": "ASSIGNED"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let assignment = resolver(&server)
            .resolve(&ResolveRequest::new(Some("7"), None, "admin"))
            .await
            .unwrap();
        assert_eq!(assignment.id.as_deref(), Some("9"));
    }

    #[tokio::test]
    async fn all_transient_failures_report_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .expect(5)
            .mount(&server)
            .await;

        let outcome = resolver(&server)
            .resolve(&ResolveRequest::new(Some("7"), Some("42"), "admin"))
            .await;
        assert!(matches!(outcome, Err(ResolveError::Unavailable(_))));
    }

    #[tokio::test]
    async fn resolution_is_repeatable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/delivery-assignments/personnel/7/active"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "assignment_id": 5, "status": "ASSIGNED"
            })))
            .expect(2)
            .mount(&server)
            .await;

        let resolver = resolver(&server);
        let request = ResolveRequest::new(Some("7"), None, "logistics");
        let first = resolver.resolve(&request).await.unwrap();
        let second = resolver.resolve(&request).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn combinator_short_circuits_on_not_found() {
        let strategies = vec![
            Strategy::ActiveAlias { path: vec!["a".to_string()] },
            Strategy::ActiveAlias { path: vec!["b".to_string()] },
            Strategy::ListActive { courier_id: "7".to_string() },
        ];
        let mut attempted = Vec::new();

        let outcome = first_success(strategies, |strategy| {
            attempted.push(strategy.clone());
            async move {
                match strategy {
                    Strategy::ActiveAlias { path } if path[0] == "a" => {
                        Err(StrategyError::Transient("reset".to_string()))
                    }
                    Strategy::ActiveAlias { .. } => Err(StrategyError::NotFound),
                    _ => Err(StrategyError::NoMatch),
                }
            }
        })
        .await;

        assert_eq!(outcome, Err(ResolveError::NotFound));
        assert_eq!(attempted.len(), 2);
    }
}
