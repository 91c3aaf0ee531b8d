pub mod scene;

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::MapSettings;
use crate::error::{MapError, SurfaceError};
use crate::models::assignment::{Assignment, AssignmentStatus};
use crate::models::position::{GeoPoint, Position};
use crate::models::route::{RouteLeg, RoutePath, RouteStyle};

pub use scene::{SceneSnapshot, SceneSurface};

pub type LayerId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerRole {
    Current,
    Pickup,
    Dropoff,
}

impl MarkerRole {
    pub fn color(&self) -> &'static str {
        match self {
            MarkerRole::Current => "blue",
            MarkerRole::Pickup => "green",
            MarkerRole::Dropoff => "red",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerSpec {
    pub role: MarkerRole,
    pub color: &'static str,
    pub position: GeoPoint,
    pub title: String,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolylineSpec {
    pub leg: RouteLeg,
    pub points: Vec<GeoPoint>,
    pub style: RouteStyle,
}

pub trait MapSurface: Send {
    fn set_view(&mut self, center: GeoPoint, zoom: u8) -> Result<(), SurfaceError>;
    fn pan_to(&mut self, center: GeoPoint) -> Result<(), SurfaceError>;
    fn zoom_by(&mut self, delta: i8) -> Result<(), SurfaceError>;
    fn set_tiles(&mut self, url: &str) -> Result<(), SurfaceError>;
    fn add_marker(&mut self, marker: MarkerSpec) -> Result<LayerId, SurfaceError>;
    fn move_marker(&mut self, id: LayerId, position: GeoPoint) -> Result<(), SurfaceError>;
    fn add_polyline(&mut self, line: PolylineSpec) -> Result<LayerId, SurfaceError>;
    fn remove_layer(&mut self, id: LayerId) -> Result<(), SurfaceError>;
    fn dispose(&mut self);
    fn snapshot(&self) -> SceneSnapshot;
}

pub type SurfaceFactory = Arc<dyn Fn(&MapSettings) -> Box<dyn MapSurface> + Send + Sync>;

pub fn scene_factory() -> SurfaceFactory {
    Arc::new(|settings: &MapSettings| {
        Box::new(SceneSurface::new(settings.viewport)) as Box<dyn MapSurface>
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteSummary {
    pub leg: RouteLeg,
    pub points: usize,
    pub length_km: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapSnapshot {
    pub scene: SceneSnapshot,
    pub routes: Vec<RouteSummary>,
    pub fallback_tiles: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapControl {
    CenterOnPickup,
    Recenter,
    ZoomIn,
    ZoomOut,
    TileError,
}

impl MapControl {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "center-pickup" => Some(Self::CenterOnPickup),
            "recenter" => Some(Self::Recenter),
            "zoom-in" => Some(Self::ZoomIn),
            "zoom-out" => Some(Self::ZoomOut),
            "tile-error" => Some(Self::TileError),
            _ => None,
        }
    }
}

#[derive(Default)]
struct Overlay {
    layer: Option<LayerId>,
    summary: Option<RouteSummary>,
}

pub struct MapView {
    settings: MapSettings,
    factory: SurfaceFactory,
    surface: Option<Box<dyn MapSurface>>,
    current_marker: Option<LayerId>,
    pickup_marker: Option<LayerId>,
    dropoff_marker: Option<LayerId>,
    route_to_dropoff: Overlay,
    route_to_pickup: Overlay,
    fallback_tiles: bool,
    unavailable: bool,
}

impl MapView {
    pub fn new(settings: MapSettings, factory: SurfaceFactory) -> Self {
        Self {
            settings,
            factory,
            surface: None,
            current_marker: None,
            pickup_marker: None,
            dropoff_marker: None,
            route_to_dropoff: Overlay::default(),
            route_to_pickup: Overlay::default(),
            fallback_tiles: false,
            unavailable: false,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.surface.is_some()
    }

    // Sticky until dispose.
    pub fn is_unavailable(&self) -> bool {
        self.unavailable
    }

    fn guarded<T>(
        &mut self,
        op: impl FnOnce(&mut dyn MapSurface) -> Result<T, SurfaceError>,
    ) -> Result<T, MapError> {
        if self.unavailable {
            return Err(MapError::Unavailable);
        }
        let surface = self.surface.as_deref_mut().ok_or(MapError::NotInitialized)?;

        match op(surface) {
            Ok(value) => Ok(value),
            Err(SurfaceError::Positioning) => {
                warn!("map widget positioning fault, map marked unavailable");
                self.unavailable = true;
                Err(MapError::Unavailable)
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn initial_target(assignment: &Assignment, current: &Position) -> GeoPoint {
        match assignment.status {
            Some(AssignmentStatus::Assigned | AssignmentStatus::Pending) => {
                assignment.origin().unwrap_or(current.point)
            }
            Some(AssignmentStatus::InProgress) => assignment.destination().unwrap_or(current.point),
            _ => current.point,
        }
    }

    pub fn initialize(&mut self, assignment: &Assignment, current: &Position) -> Result<(), MapError> {
        if self.surface.is_some() {
            return Ok(());
        }
        if self.unavailable {
            return Err(MapError::Unavailable);
        }

        self.surface = Some((self.factory)(&self.settings));
        if let Err(err) = self.place_initial(assignment, current) {
            // A half-built widget would pass for initialized; start over on the next fix.
            if let Some(mut surface) = self.surface.take() {
                surface.dispose();
            }
            self.current_marker = None;
            self.pickup_marker = None;
            self.dropoff_marker = None;
            return Err(err);
        }
        Ok(())
    }

    fn place_initial(&mut self, assignment: &Assignment, current: &Position) -> Result<(), MapError> {
        let target = Self::initial_target(assignment, current);
        let zoom = self.settings.initial_zoom;
        let tiles = self.settings.tile_url.clone();
        self.guarded(|surface| {
            surface.set_view(target, zoom)?;
            surface.set_tiles(&tiles)
        })?;

        self.current_marker = Some(self.guarded(|surface| {
            surface.add_marker(MarkerSpec {
                role: MarkerRole::Current,
                color: MarkerRole::Current.color(),
                position: current.point,
                title: "Current Location".to_string(),
                detail: Some(current.point.label()),
            })
        })?);

        if let Some(origin) = assignment.origin() {
            let name = assignment.from.name.clone().unwrap_or_else(|| "Pickup Point".to_string());
            self.pickup_marker = Some(self.guarded(|surface| {
                surface.add_marker(MarkerSpec {
                    role: MarkerRole::Pickup,
                    color: MarkerRole::Pickup.color(),
                    position: origin,
                    title: "Pickup Location".to_string(),
                    detail: Some(format!("{name}\n{}", origin.label())),
                })
            })?);
        }

        if let Some(destination) = assignment.destination() {
            let name = assignment.to.name.clone().unwrap_or_else(|| "Dropoff Point".to_string());
            self.dropoff_marker = Some(self.guarded(|surface| {
                surface.add_marker(MarkerSpec {
                    role: MarkerRole::Dropoff,
                    color: MarkerRole::Dropoff.color(),
                    position: destination,
                    title: "Dropoff Location".to_string(),
                    detail: Some(format!("{name}\n{}", destination.label())),
                })
            })?);
        }

        debug!(lat = target.lat, lng = target.lng, zoom, "map initialized");
        Ok(())
    }

    pub fn update_current(&mut self, current: &Position) -> Result<(), MapError> {
        let point = current.point;
        let marker = self.current_marker;
        self.guarded(|surface| {
            if let Some(id) = marker {
                surface.move_marker(id, point)?;
            }
            surface.pan_to(point)
        })
    }

    pub fn replace_routes(
        &mut self,
        dropoff: Option<RoutePath>,
        pickup: Option<RoutePath>,
    ) -> Result<(), MapError> {
        self.clear_routes()?;
        self.route_to_dropoff = self.draw_route(RouteLeg::ToDropoff, dropoff)?;
        self.route_to_pickup = self.draw_route(RouteLeg::ToPickup, pickup)?;
        Ok(())
    }

    fn draw_route(&mut self, leg: RouteLeg, path: Option<RoutePath>) -> Result<Overlay, MapError> {
        let Some(path) = path.filter(RoutePath::is_drawable) else {
            debug!(leg = leg.as_str(), "no route drawn for leg");
            return Ok(Overlay::default());
        };

        let summary = RouteSummary {
            leg,
            points: path.points().len(),
            length_km: path.length_km(),
        };
        let layer = self.guarded(|surface| {
            surface.add_polyline(PolylineSpec {
                leg,
                points: path.0,
                style: leg.style(),
            })
        })?;

        Ok(Overlay {
            layer: Some(layer),
            summary: Some(summary),
        })
    }

    pub fn clear_routes(&mut self) -> Result<(), MapError> {
        let layers = [
            self.route_to_dropoff.layer.take(),
            self.route_to_pickup.layer.take(),
        ];
        self.route_to_dropoff = Overlay::default();
        self.route_to_pickup = Overlay::default();

        for layer in layers.into_iter().flatten() {
            match self.guarded(|surface| surface.remove_layer(layer)) {
                Ok(()) | Err(MapError::Surface(_)) | Err(MapError::NotInitialized) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    pub fn control(
        &mut self,
        control: MapControl,
        assignment: Option<&Assignment>,
        current: Option<&Position>,
    ) -> Result<(), MapError> {
        match control {
            MapControl::CenterOnPickup => match assignment.and_then(Assignment::origin) {
                Some(origin) => {
                    let zoom = self.settings.initial_zoom;
                    self.guarded(|surface| surface.set_view(origin, zoom))
                }
                None => Ok(()),
            },
            MapControl::Recenter => match current {
                Some(position) => {
                    let point = position.point;
                    self.guarded(|surface| surface.pan_to(point))
                }
                None => Ok(()),
            },
            MapControl::ZoomIn => self.guarded(|surface| surface.zoom_by(1)),
            MapControl::ZoomOut => self.guarded(|surface| surface.zoom_by(-1)),
            MapControl::TileError => self.switch_to_fallback_tiles(),
        }
    }

    fn switch_to_fallback_tiles(&mut self) -> Result<(), MapError> {
        if self.fallback_tiles {
            return Ok(());
        }
        warn!("primary tiles failed, switching to fallback server");
        let url = self.settings.fallback_tile_url.clone();
        self.guarded(|surface| surface.set_tiles(&url))?;
        self.fallback_tiles = true;
        Ok(())
    }

    pub fn dispose(&mut self) {
        if let Some(mut surface) = self.surface.take() {
            surface.dispose();
            debug!("map disposed");
        }
        self.current_marker = None;
        self.pickup_marker = None;
        self.dropoff_marker = None;
        self.route_to_dropoff = Overlay::default();
        self.route_to_pickup = Overlay::default();
        self.fallback_tiles = false;
        self.unavailable = false;
    }

    pub fn snapshot(&self) -> Option<MapSnapshot> {
        let surface = self.surface.as_ref()?;
        let routes = [&self.route_to_dropoff, &self.route_to_pickup]
            .into_iter()
            .filter_map(|overlay| overlay.summary.clone())
            .collect();

        Some(MapSnapshot {
            scene: surface.snapshot(),
            routes,
            fallback_tiles: self.fallback_tiles,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use serde_json::json;

    use super::*;
    use crate::map::scene::SceneLayer;

    pub(crate) fn assignment(status: &str) -> Assignment {
        Assignment::from_payload(&json!({
            "assignment_id": 42,
            "status": status,
            "from_branch_name": "Quiapo",
            "from_location_coords": { "lat": 14.60, "lng": 120.98 },
            "to_location_coords": { "lat": 14.65, "lng": 121.00 }
        }))
        .unwrap()
    }

    pub(crate) fn current() -> Position {
        Position::at(GeoPoint::new(14.61, 120.99))
    }

    fn view() -> MapView {
        MapView::new(MapSettings::default(), scene_factory())
    }

    fn path(points: &[(f64, f64)]) -> RoutePath {
        RoutePath(points.iter().map(|&(lat, lng)| GeoPoint::new(lat, lng)).collect())
    }

    fn polylines(view: &MapView) -> Vec<PolylineSpec> {
        view.snapshot()
            .unwrap()
            .scene
            .layers
            .into_values()
            .filter_map(|layer| match layer {
                SceneLayer::Polyline(line) => Some(line),
                SceneLayer::Marker(_) => None,
            })
            .collect()
    }

    struct Flaky {
        inner: SceneSurface,
        broken: Arc<AtomicBool>,
        tiles_broken: Arc<AtomicBool>,
    }

    impl MapSurface for Flaky {
        fn set_view(&mut self, center: GeoPoint, zoom: u8) -> Result<(), SurfaceError> {
            self.inner.set_view(center, zoom)
        }
        fn pan_to(&mut self, center: GeoPoint) -> Result<(), SurfaceError> {
            self.inner.pan_to(center)
        }
        fn zoom_by(&mut self, delta: i8) -> Result<(), SurfaceError> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(SurfaceError::Positioning);
            }
            self.inner.zoom_by(delta)
        }
        fn set_tiles(&mut self, url: &str) -> Result<(), SurfaceError> {
            if self.tiles_broken.load(Ordering::SeqCst) {
                return Err(SurfaceError::Disposed);
            }
            self.inner.set_tiles(url)
        }
        fn add_marker(&mut self, marker: MarkerSpec) -> Result<LayerId, SurfaceError> {
            self.inner.add_marker(marker)
        }
        fn move_marker(&mut self, id: LayerId, position: GeoPoint) -> Result<(), SurfaceError> {
            self.inner.move_marker(id, position)
        }
        fn add_polyline(&mut self, line: PolylineSpec) -> Result<LayerId, SurfaceError> {
            self.inner.add_polyline(line)
        }
        fn remove_layer(&mut self, id: LayerId) -> Result<(), SurfaceError> {
            self.inner.remove_layer(id)
        }
        fn dispose(&mut self) {
            self.inner.dispose()
        }
        fn snapshot(&self) -> SceneSnapshot {
            self.inner.snapshot()
        }
    }

    #[test]
    fn initializes_once_with_three_markers_centered_on_pickup() {
        let mut view = view();
        view.initialize(&assignment("ASSIGNED"), &current()).unwrap();
        view.initialize(&assignment("IN_PROGRESS"), &current()).unwrap();

        let snapshot = view.snapshot().unwrap();
        let scene_view = snapshot.scene.view.unwrap();
        assert_eq!(scene_view.center, GeoPoint::new(14.60, 120.98));
        assert_eq!(scene_view.zoom, 13);
        assert_eq!(snapshot.scene.layers.len(), 3);
        assert_eq!(
            snapshot.scene.tile_url.as_deref(),
            Some(MapSettings::default().tile_url.as_str())
        );
    }

    #[test]
    fn initial_target_follows_status() {
        let here = current();
        assert_eq!(
            MapView::initial_target(&assignment("IN_PROGRESS"), &here),
            GeoPoint::new(14.65, 121.00)
        );
        assert_eq!(MapView::initial_target(&assignment("COMPLETED"), &here), here.point);
    }

    #[test]
    fn update_moves_marker_and_pans() {
        let mut view = view();
        view.initialize(&assignment("IN_PROGRESS"), &current()).unwrap();

        let next = Position::at(GeoPoint::new(14.63, 121.0));
        view.update_current(&next).unwrap();

        let snapshot = view.snapshot().unwrap();
        assert_eq!(snapshot.scene.view.unwrap().center, next.point);
        let moved = snapshot.scene.layers.values().any(|layer| {
            matches!(layer, SceneLayer::Marker(m) if m.role == MarkerRole::Current && m.position == next.point)
        });
        assert!(moved);
    }

    #[test]
    fn replacing_routes_is_idempotent_and_skips_trivial_paths() {
        let mut view = view();
        view.initialize(&assignment("ASSIGNED"), &current()).unwrap();

        let dropoff = path(&[(14.61, 120.99), (14.63, 121.0), (14.65, 121.0)]);
        let pickup = path(&[(14.61, 120.99), (14.60, 120.98)]);
        view.replace_routes(Some(dropoff.clone()), Some(pickup.clone())).unwrap();
        view.replace_routes(Some(dropoff), Some(pickup)).unwrap();

        let lines = polylines(&view);
        assert_eq!(lines.len(), 2);
        let primary = lines.iter().find(|l| l.leg == RouteLeg::ToDropoff).unwrap();
        let secondary = lines.iter().find(|l| l.leg == RouteLeg::ToPickup).unwrap();
        assert!(primary.style.weight > secondary.style.weight);
        assert!(secondary.style.dash_array.is_some());

        view.replace_routes(Some(path(&[(14.61, 120.99)])), None).unwrap();
        assert!(polylines(&view).is_empty());
        assert!(view.snapshot().unwrap().routes.is_empty());
    }

    fn flaky_view(broken: &Arc<AtomicBool>, tiles_broken: &Arc<AtomicBool>) -> MapView {
        let broken = broken.clone();
        let tiles_broken = tiles_broken.clone();
        let factory: SurfaceFactory = Arc::new(move |settings: &MapSettings| {
            Box::new(Flaky {
                inner: SceneSurface::new(settings.viewport),
                broken: broken.clone(),
                tiles_broken: tiles_broken.clone(),
            }) as Box<dyn MapSurface>
        });
        MapView::new(MapSettings::default(), factory)
    }

    #[test]
    fn failed_initialization_leaves_map_uninitialized() {
        let broken = Arc::new(AtomicBool::new(false));
        let tiles_broken = Arc::new(AtomicBool::new(true));
        let mut view = flaky_view(&broken, &tiles_broken);

        assert!(matches!(
            view.initialize(&assignment("ASSIGNED"), &current()),
            Err(MapError::Surface(_))
        ));
        assert!(!view.is_initialized());
        assert!(!view.is_unavailable());
        assert!(view.snapshot().is_none());
        assert_eq!(view.update_current(&current()), Err(MapError::NotInitialized));

        tiles_broken.store(false, Ordering::SeqCst);
        view.initialize(&assignment("ASSIGNED"), &current()).unwrap();
        assert_eq!(view.snapshot().unwrap().scene.layers.len(), 3);
    }

    #[test]
    fn positioning_fault_marks_map_unavailable_until_disposed() {
        let broken = Arc::new(AtomicBool::new(false));
        let mut view = flaky_view(&broken, &Arc::new(AtomicBool::new(false)));
        view.initialize(&assignment("ASSIGNED"), &current()).unwrap();

        broken.store(true, Ordering::SeqCst);
        assert_eq!(view.control(MapControl::ZoomIn, None, None), Err(MapError::Unavailable));
        assert!(view.is_unavailable());
        assert_eq!(view.update_current(&current()), Err(MapError::Unavailable));

        broken.store(false, Ordering::SeqCst);
        view.dispose();
        assert!(!view.is_unavailable());
        assert!(view.snapshot().is_none());
        view.initialize(&assignment("ASSIGNED"), &current()).unwrap();
        assert!(view.control(MapControl::ZoomIn, None, None).is_ok());
    }

    #[test]
    fn fallback_tiles_switch_once() {
        let mut view = view();
        view.initialize(&assignment("ASSIGNED"), &current()).unwrap();
        view.control(MapControl::TileError, None, None).unwrap();
        view.control(MapControl::TileError, None, None).unwrap();

        let snapshot = view.snapshot().unwrap();
        assert!(snapshot.fallback_tiles);
        assert_eq!(
            snapshot.scene.tile_url.as_deref(),
            Some(MapSettings::default().fallback_tile_url.as_str())
        );
    }

    #[test]
    fn controls_before_initialization_report_not_initialized() {
        let mut view = view();
        assert_eq!(
            view.control(MapControl::ZoomOut, None, None),
            Err(MapError::NotInitialized)
        );
        assert!(view.clear_routes().is_ok());
    }
}
