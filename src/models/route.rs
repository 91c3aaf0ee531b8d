use serde::{Deserialize, Serialize};

use crate::geo::path_length_km;
use crate::models::position::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteLeg {
    ToDropoff,
    ToPickup,
}

impl RouteLeg {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteLeg::ToDropoff => "to_dropoff",
            RouteLeg::ToPickup => "to_pickup",
        }
    }

    pub fn style(&self) -> RouteStyle {
        match self {
            RouteLeg::ToDropoff => RouteStyle {
                color: "blue",
                weight: 6,
                opacity: 0.8,
                dash_array: None,
            },
            RouteLeg::ToPickup => RouteStyle {
                color: "green",
                weight: 4,
                opacity: 0.7,
                dash_array: Some("8, 8"),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RouteStyle {
    pub color: &'static str,
    pub weight: u8,
    pub opacity: f32,
    pub dash_array: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoutePath(pub Vec<GeoPoint>);

impl RoutePath {
    pub fn points(&self) -> &[GeoPoint] {
        &self.0
    }

    // A path needs at least two points to be drawn.
    pub fn is_drawable(&self) -> bool {
        self.0.len() >= 2
    }

    pub fn length_km(&self) -> f64 {
        path_length_km(&self.0)
    }
}
