use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ResolveError;
use crate::map::MapSnapshot;
use crate::models::assignment::Assignment;
use crate::models::position::Position;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackingRequest {
    #[serde(default)]
    pub courier_id: Option<String>,
    #[serde(default)]
    pub assignment_id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub embedded: bool,
    #[serde(default)]
    pub role: String,
}

impl TrackingRequest {
    pub fn display_name(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or("Unknown")
    }

    pub fn status_chip(&self) -> &str {
        self.status
            .as_deref()
            .filter(|status| !status.trim().is_empty())
            .unwrap_or("assigned")
    }

    pub fn full_map_link(&self) -> Option<String> {
        let courier_id = self.courier_id.as_deref()?.trim();
        if courier_id.is_empty() {
            return None;
        }
        let mut url = Url::parse("http://dashboard.local/delivery-tracking/").ok()?;
        url.path_segments_mut().ok()?.pop_if_empty().push(courier_id);
        url.query_pairs_mut()
            .append_pair("name", self.display_name())
            .append_pair("status", self.status_chip());

        Some(format!("{}?{}", url.path(), url.query().unwrap_or_default()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Chrome {
    Standalone {
        display_name: String,
        courier_id: Option<String>,
        status_chip: String,
        role: String,
        back_navigation: bool,
    },
    Embedded {
        close_action: bool,
        full_map_link: Option<String>,
    },
}

impl Chrome {
    pub fn for_request(request: &TrackingRequest) -> Self {
        if request.embedded {
            Chrome::Embedded {
                close_action: true,
                full_map_link: request.full_map_link(),
            }
        } else {
            Chrome::Standalone {
                display_name: request.display_name().to_string(),
                courier_id: request.courier_id.clone(),
                status_chip: request.status_chip().to_string(),
                role: request.role.clone(),
                back_navigation: true,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MapPanel {
    WaitingForLocation,
    Live(MapSnapshot),
    Unavailable { message: String, retry: bool },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemLine {
    pub name: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssignmentDetails {
    pub assignment_id: Option<String>,
    pub status: String,
    pub from: String,
    pub to: String,
    pub items: Vec<ItemLine>,
}

impl From<&Assignment> for AssignmentDetails {
    fn from(assignment: &Assignment) -> Self {
        Self {
            assignment_id: assignment.id.clone(),
            status: assignment.status_label(),
            from: assignment.from.display_name().to_string(),
            to: assignment.to.display_name().to_string(),
            items: assignment
                .items
                .iter()
                .map(|item| ItemLine {
                    name: item.name.clone(),
                    quantity: item.quantity,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Phase {
    Loading,
    NotFound {
        title: String,
        message: String,
        suggestions: Vec<String>,
        retry: bool,
    },
    Tracking {
        details: AssignmentDetails,
        assignment: Box<Assignment>,
        position: Option<Position>,
        dropoff_distance_km: Option<f64>,
        map: MapPanel,
    },
}

impl Phase {
    pub fn not_found(err: &ResolveError, request: &TrackingRequest) -> Self {
        let message = match err {
            ResolveError::NotFound => format!(
                "No active delivery assignment found for {} from your role.",
                request.display_name()
            ),
            other => other.to_string(),
        };

        Phase::NotFound {
            title: "Delivery Assignment Not Found".to_string(),
            message,
            suggestions: err.suggestions(&request.role),
            retry: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackingView {
    pub session_id: Uuid,
    pub chrome: Chrome,
    #[serde(flatten)]
    pub phase: Phase,
    pub updated_at: DateTime<Utc>,
}

impl TrackingView {
    pub fn new(session_id: Uuid, request: &TrackingRequest, phase: Phase) -> Self {
        Self {
            session_id,
            chrome: Chrome::for_request(request),
            phase,
            updated_at: Utc::now(),
        }
    }
}
