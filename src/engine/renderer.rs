use tracing::debug;

use crate::error::MapError;
use crate::map::MapView;
use crate::models::assignment::Assignment;
use crate::models::position::Position;
use crate::models::route::{RouteLeg, RoutePath};
use crate::routing::RouteProvider;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoutePlan {
    // Sequence number of the triggering fix.
    pub generation: u64,
    pub to_dropoff: Option<RoutePath>,
    pub to_pickup: Option<RoutePath>,
    pub pickup_requested: bool,
}

pub async fn plan_routes(
    router: &dyn RouteProvider,
    assignment: &Assignment,
    position: Option<&Position>,
    generation: u64,
) -> RoutePlan {
    let Some(current) = position.map(|p| p.point) else {
        return RoutePlan {
            generation,
            ..RoutePlan::default()
        };
    };

    let to_dropoff = match assignment.destination() {
        Some(destination) => {
            router
                .compute_route(RouteLeg::ToDropoff, Some(current), Some(destination))
                .await
        }
        None => None,
    };

    let pickup_requested = assignment.before_pickup() && assignment.origin().is_some();
    let to_pickup = if pickup_requested {
        router
            .compute_route(RouteLeg::ToPickup, Some(current), assignment.origin())
            .await
    } else {
        None
    };

    RoutePlan {
        generation,
        to_dropoff,
        to_pickup,
        pickup_requested,
    }
}

pub fn apply_routes(map: &mut MapView, plan: RoutePlan) -> Result<(), MapError> {
    debug!(
        generation = plan.generation,
        dropoff = plan.to_dropoff.is_some(),
        pickup = plan.to_pickup.is_some(),
        "applying route plan"
    );
    map.replace_routes(plan.to_dropoff, plan.to_pickup)
}
