pub mod osrm;

use async_trait::async_trait;

use crate::models::position::GeoPoint;
use crate::models::route::{RouteLeg, RoutePath};

pub use osrm::OsrmRouter;

#[async_trait]
pub trait RouteProvider: Send + Sync {
    async fn compute_route(
        &self,
        leg: RouteLeg,
        start: Option<GeoPoint>,
        end: Option<GeoPoint>,
    ) -> Option<RoutePath>;
}
