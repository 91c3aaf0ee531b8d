use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::normalize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite() && self.lng.is_finite()
    }

    pub fn label(&self) -> String {
        format!("{:.6}, {:.6}", self.lat, self.lng)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub point: GeoPoint,
    pub accuracy: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Position {
    pub fn at(point: GeoPoint) -> Self {
        Self {
            point,
            accuracy: None,
            timestamp: None,
        }
    }

    pub fn from_payload(payload: &Value) -> Option<Self> {
        let body = normalize::unwrap_envelope(payload);
        let lat = normalize::number(body, &["latitude", "lat"])?;
        let lng = normalize::number(body, &["longitude", "lng"])?;

        Some(Self {
            point: GeoPoint::new(lat, lng),
            accuracy: normalize::number(body, &["accuracy"]),
            timestamp: normalize::timestamp(body, &["recorded_at", "reported_at", "created_at"]),
        })
    }
}
