use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::models::position::Position;

pub const ACTIVE_ASSIGNMENT_ALIASES: [&[&str]; 3] = [
    &["delivery-assignments", "personnel", "{id}", "active"],
    &["assignments", "active", "{id}"],
    &["personnel", "{id}", "active-assignments"],
];

#[derive(Debug, Clone)]
pub struct BackendClient {
    http: Client,
    base_url: Url,
    token: Option<String>,
}

impl BackendClient {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, FetchError> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|err| FetchError::Transport(format!("invalid backend url {base_url}: {err}")))?;
        if base_url.cannot_be_a_base() {
            return Err(FetchError::Transport(format!(
                "backend url {base_url} cannot carry a path"
            )));
        }

        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| FetchError::Transport(format!("failed to build http client: {err}")))?;

        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    pub fn assignment_by_id_path(assignment_id: &str) -> Vec<String> {
        vec!["delivery-assignments".to_string(), assignment_id.to_string()]
    }

    pub fn courier_assignments_path(courier_id: &str) -> Vec<String> {
        vec![
            "delivery-assignments".to_string(),
            "personnel".to_string(),
            courier_id.to_string(),
        ]
    }

    pub fn active_alias_paths(courier_id: &str) -> Vec<Vec<String>> {
        ACTIVE_ASSIGNMENT_ALIASES
            .iter()
            .map(|template| {
                template
                    .iter()
                    .map(|segment| match *segment {
                        "{id}" => courier_id.to_string(),
                        literal => literal.to_string(),
                    })
                    .collect()
            })
            .collect()
    }

    pub fn latest_location_path(assignment_id: &str) -> Vec<String> {
        vec![
            "delivery-locations".to_string(),
            "latest".to_string(),
            assignment_id.to_string(),
        ]
    }

    fn url(&self, segments: &[String], role: Option<&str>) -> Result<Url, FetchError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| FetchError::Transport("backend url cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        if let Some(role) = role {
            url.query_pairs_mut().append_pair("role", role);
        }
        Ok(url)
    }

    pub async fn get_json(&self, segments: &[String], role: Option<&str>) -> Result<Value, FetchError> {
        let url = self.url(segments, role)?;
        debug!(url = %url, "backend GET");

        let mut request = self.http.get(url.clone());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|err| FetchError::Transport(err.to_string()))?;

        let status = response.status();
        match status {
            StatusCode::NOT_FOUND => return Err(FetchError::NotFound),
            StatusCode::UNAUTHORIZED => {
                warn!(url = %url, "backend rejected credentials");
                return Err(FetchError::Unauthorized);
            }
            s if !s.is_success() => return Err(FetchError::Status(s.as_u16())),
            _ => {}
        }

        let body = response
            .text()
            .await
            .map_err(|err| FetchError::Transport(err.to_string()))?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&body).map_err(|err| FetchError::Decode(err.to_string()))
    }
}

#[async_trait]
pub trait LocationSource: Send + Sync {
    async fn latest_fix(&self, assignment_id: &str) -> Result<Option<Position>, FetchError>;
}

#[async_trait]
impl LocationSource for BackendClient {
    async fn latest_fix(&self, assignment_id: &str) -> Result<Option<Position>, FetchError> {
        match self
            .get_json(&Self::latest_location_path(assignment_id), None)
            .await
        {
            Ok(payload) => Ok(Position::from_payload(&payload)),
            Err(FetchError::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }
}
