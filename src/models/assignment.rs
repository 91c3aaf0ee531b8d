use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::normalize;
use crate::models::position::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Cancelled,
}

impl AssignmentStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().replace([' ', '-'], "_").as_str() {
            "PENDING" => Some(Self::Pending),
            "ASSIGNED" => Some(Self::Assigned),
            "IN_PROGRESS" => Some(Self::InProgress),
            "COMPLETED" => Some(Self::Completed),
            "CANCELLED" | "CANCELED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Assigned => "ASSIGNED",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn before_pickup(&self) -> bool {
        matches!(self, Self::Pending | Self::Assigned)
    }

    pub fn is_trackable(&self) -> bool {
        matches!(self, Self::Assigned | Self::InProgress)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EndpointKind {
    Office,
    Branch { branch_id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    #[serde(flatten)]
    pub kind: EndpointKind,
    pub name: Option<String>,
    pub coords: Option<GeoPoint>,
}

impl Endpoint {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Office")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Party {
    pub id: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CargoItem {
    pub item_id: Option<String>,
    pub name: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: Option<String>,
    pub status: Option<AssignmentStatus>,
    pub assignment_type: Option<String>,
    pub from: Endpoint,
    pub to: Endpoint,
    pub courier: Party,
    pub assigned_by: Party,
    pub items: Vec<CargoItem>,
    pub amount: Option<f64>,
    pub capital_or_balance: Option<String>,
    pub notes: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub pickup_verified_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl Assignment {
    pub fn from_payload(payload: &Value) -> Option<Self> {
        let body = normalize::unwrap_envelope(payload);
        if !body.is_object() {
            return None;
        }

        let id = normalize::text(body, &["assignment_id", "AssignmentID", "assignmentId", "id"]);
        let raw_status = normalize::text(body, &["status", "Status", "DropOffStatus"]);
        if id.is_none() && raw_status.is_none() {
            return None;
        }

        Some(Self {
            id,
            status: raw_status.as_deref().and_then(AssignmentStatus::parse),
            assignment_type: normalize::text(
                body,
                &["assignment_type", "AssignmentType", "assignmentType"],
            ),
            from: endpoint(body, Side::From),
            to: endpoint(body, Side::To),
            courier: Party {
                id: normalize::text(body, &["assigned_to", "AssignedTo", "assignedTo"]),
                name: normalize::text(body, &["driver_name", "assigned_to_name"]),
            },
            assigned_by: Party {
                id: normalize::text(body, &["assigned_by", "AssignedBy", "assignedBy"]),
                name: normalize::text(body, &["assigned_by_username", "assigned_by_name"]),
            },
            items: body
                .get("items")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .enumerate()
                        .filter_map(|(idx, item)| cargo_item(idx, item))
                        .collect()
                })
                .unwrap_or_default(),
            amount: normalize::number(body, &["amount"]),
            capital_or_balance: normalize::text(body, &["capital_or_balance"]),
            notes: normalize::text(body, &["notes"]),
            created_at: normalize::timestamp(body, &["created_at"]),
            updated_at: normalize::timestamp(body, &["updated_at"]),
            due_date: normalize::timestamp(body, &["due_date"]),
            pickup_verified_at: normalize::timestamp(body, &["pickup_verified_at"]),
            delivered_at: normalize::timestamp(body, &["delivered_at"]),
        })
    }

    pub fn origin(&self) -> Option<GeoPoint> {
        self.from.coords
    }

    pub fn destination(&self) -> Option<GeoPoint> {
        self.to.coords
    }

    pub fn before_pickup(&self) -> bool {
        self.status.is_some_and(|status| status.before_pickup())
    }

    pub fn status_label(&self) -> String {
        self.status
            .map(|status| status.as_str().replacen('_', " ", 1))
            .unwrap_or_else(|| "UNKNOWN".to_string())
    }
}

#[derive(Clone, Copy)]
enum Side {
    From,
    To,
}

impl Side {
    fn keys(self) -> EndpointKeys {
        match self {
            Side::From => EndpointKeys {
                id: &["from_branch_id", "fromBranchId", "from_branch"],
                name: &["from_branch_name", "FromBranchName", "fromBranchName"],
                coords: "from_location_coords",
                lat: "from_branch_lat",
                lng: "from_branch_lng",
            },
            Side::To => EndpointKeys {
                id: &["to_branch_id", "toBranchId", "to_branch"],
                name: &["to_branch_name", "ToBranchName", "toBranchName"],
                coords: "to_location_coords",
                lat: "to_branch_lat",
                lng: "to_branch_lng",
            },
        }
    }
}

struct EndpointKeys {
    id: &'static [&'static str],
    name: &'static [&'static str],
    coords: &'static str,
    lat: &'static str,
    lng: &'static str,
}

fn endpoint(body: &Value, side: Side) -> Endpoint {
    let keys = side.keys();

    let kind = match normalize::text(body, keys.id) {
        Some(branch_id) => EndpointKind::Branch { branch_id },
        None => EndpointKind::Office,
    };

    let explicit = normalize::field(body, &[keys.coords]).and_then(|coords| {
        let lat = normalize::number(coords, &["lat", "latitude"])?;
        let lng = normalize::number(coords, &["lng", "longitude"])?;
        Some(GeoPoint::new(lat, lng))
    });
    let branch = || {
        let lat = normalize::number(body, &[keys.lat])?;
        let lng = normalize::number(body, &[keys.lng])?;
        Some(GeoPoint::new(lat, lng))
    };

    Endpoint {
        kind,
        name: normalize::text(body, keys.name),
        coords: explicit.or_else(branch),
    }
}

fn cargo_item(idx: usize, item: &Value) -> Option<CargoItem> {
    if !item.is_object() {
        return None;
    }

    let quantity = normalize::number(item, &["quantity", "qty"])
        .filter(|qty| *qty >= 1.0)
        .map(|qty| qty as u32)
        .unwrap_or(1);

    Some(CargoItem {
        item_id: normalize::text(item, &["item_id", "id"]),
        name: normalize::text(item, &["name", "item_name"])
            .unwrap_or_else(|| format!("Item {}", idx + 1)),
        quantity,
    })
}
