use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::SurfaceError;
use crate::map::{LayerId, MapSurface, MarkerSpec, PolylineSpec};
use crate::models::position::GeoPoint;

const MIN_ZOOM: u8 = 1;
const MAX_ZOOM: u8 = 19;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneView {
    pub center: GeoPoint,
    pub zoom: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SceneLayer {
    Marker(MarkerSpec),
    Polyline(PolylineSpec),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneSnapshot {
    pub viewport: (u32, u32),
    pub view: Option<SceneView>,
    pub tile_url: Option<String>,
    pub layers: BTreeMap<LayerId, SceneLayer>,
}

#[derive(Debug)]
pub struct SceneSurface {
    viewport: (u32, u32),
    view: Option<SceneView>,
    tile_url: Option<String>,
    layers: BTreeMap<LayerId, SceneLayer>,
    next_id: LayerId,
    disposed: bool,
}

impl SceneSurface {
    pub fn new(viewport: (u32, u32)) -> Self {
        Self {
            viewport,
            view: None,
            tile_url: None,
            layers: BTreeMap::new(),
            next_id: 1,
            disposed: false,
        }
    }

    #[cfg(test)]
    fn resize(&mut self, viewport: (u32, u32)) {
        self.viewport = viewport;
    }

    fn measured(&self) -> Result<(), SurfaceError> {
        if self.disposed {
            return Err(SurfaceError::Disposed);
        }
        if self.viewport.0 == 0 || self.viewport.1 == 0 {
            return Err(SurfaceError::Positioning);
        }
        Ok(())
    }

    fn insert(&mut self, layer: SceneLayer) -> Result<LayerId, SurfaceError> {
        if self.disposed {
            return Err(SurfaceError::Disposed);
        }
        let id = self.next_id;
        self.next_id += 1;
        self.layers.insert(id, layer);
        Ok(id)
    }
}

impl MapSurface for SceneSurface {
    fn set_view(&mut self, center: GeoPoint, zoom: u8) -> Result<(), SurfaceError> {
        self.measured()?;
        self.view = Some(SceneView {
            center,
            zoom: zoom.clamp(MIN_ZOOM, MAX_ZOOM),
        });
        Ok(())
    }

    fn pan_to(&mut self, center: GeoPoint) -> Result<(), SurfaceError> {
        self.measured()?;
        let view = self.view.as_mut().ok_or(SurfaceError::Positioning)?;
        view.center = center;
        Ok(())
    }

    fn zoom_by(&mut self, delta: i8) -> Result<(), SurfaceError> {
        self.measured()?;
        let view = self.view.as_mut().ok_or(SurfaceError::Positioning)?;
        let zoom = (view.zoom as i16 + delta as i16).clamp(MIN_ZOOM as i16, MAX_ZOOM as i16);
        view.zoom = zoom as u8;
        Ok(())
    }

    fn set_tiles(&mut self, url: &str) -> Result<(), SurfaceError> {
        if self.disposed {
            return Err(SurfaceError::Disposed);
        }
        self.tile_url = Some(url.to_string());
        Ok(())
    }

    fn add_marker(&mut self, marker: MarkerSpec) -> Result<LayerId, SurfaceError> {
        self.insert(SceneLayer::Marker(marker))
    }

    fn move_marker(&mut self, id: LayerId, position: GeoPoint) -> Result<(), SurfaceError> {
        match self.layers.get_mut(&id) {
            Some(SceneLayer::Marker(marker)) => {
                marker.position = position;
                Ok(())
            }
            _ => Err(SurfaceError::UnknownLayer(id)),
        }
    }

    fn add_polyline(&mut self, line: PolylineSpec) -> Result<LayerId, SurfaceError> {
        self.insert(SceneLayer::Polyline(line))
    }

    fn remove_layer(&mut self, id: LayerId) -> Result<(), SurfaceError> {
        self.layers
            .remove(&id)
            .map(|_| ())
            .ok_or(SurfaceError::UnknownLayer(id))
    }

    fn dispose(&mut self) {
        self.layers.clear();
        self.view = None;
        self.disposed = true;
    }

    fn snapshot(&self) -> SceneSnapshot {
        SceneSnapshot {
            viewport: self.viewport,
            view: self.view.clone(),
            tile_url: self.tile_url.clone(),
            layers: self.layers.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::MarkerRole;

    #[test]
    fn zero_sized_container_raises_positioning_fault() {
        let mut surface = SceneSurface::new((0, 400));
        assert_eq!(
            surface.set_view(GeoPoint::new(14.6, 120.98), 13),
            Err(SurfaceError::Positioning)
        );

        surface.resize((800, 400));
        assert!(surface.set_view(GeoPoint::new(14.6, 120.98), 13).is_ok());
    }

    #[test]
    fn zoom_is_clamped() {
        let mut surface = SceneSurface::new((800, 400));
        surface.set_view(GeoPoint::new(14.6, 120.98), 18).unwrap();
        surface.zoom_by(5).unwrap();
        assert_eq!(surface.snapshot().view.unwrap().zoom, MAX_ZOOM);
    }

    #[test]
    fn layers_are_tracked_by_id() {
        let mut surface = SceneSurface::new((800, 400));
        let id = surface
            .add_marker(MarkerSpec {
                role: MarkerRole::Current,
                color: MarkerRole::Current.color(),
                position: GeoPoint::new(14.6, 120.98),
                title: "Current Location".to_string(),
                detail: None,
            })
            .unwrap();

        surface.move_marker(id, GeoPoint::new(14.7, 121.0)).unwrap();
        assert_eq!(surface.snapshot().layers.len(), 1);

        surface.remove_layer(id).unwrap();
        assert_eq!(surface.remove_layer(id), Err(SurfaceError::UnknownLayer(id)));
        assert!(surface.snapshot().layers.is_empty());
    }
}
