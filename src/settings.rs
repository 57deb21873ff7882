//! Session-scoped read model of the organizational boundary and default map
//! center, kept current from pushed settings documents.

use crate::store::{HazardStore, SettingsDocument};
use crate::types::LatLng;
use geo::{Contains, MultiPolygon};
use geojson::{GeoJson, Geometry, JsonValue, Value};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Used until a settings document provides a center.
pub const FALLBACK_CENTER: LatLng = LatLng {
    lat: 10.3157,
    lng: 123.8854,
};

#[derive(Debug, thiserror::Error)]
pub enum BoundaryError {
    #[error("boundary is not valid GeoJSON: {0}")]
    Parse(String),
    #[error("boundary must be a Polygon or MultiPolygon, found {0}")]
    NotAPolygon(&'static str),
    #[error("boundary geometry could not be converted: {0}")]
    Conversion(String),
}

/// A validated boundary polygon. Only constructible from a Polygon or
/// MultiPolygon (bare, in a Feature, or the first such Feature of a
/// FeatureCollection).
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryPolygon {
    geometry: Geometry,
    shape: MultiPolygon<f64>,
}

impl BoundaryPolygon {
    pub fn from_json(value: &JsonValue) -> Result<Self, BoundaryError> {
        let geojson = match value {
            JsonValue::String(raw) => raw.parse::<GeoJson>(),
            other => GeoJson::try_from(other.clone()),
        }
        .map_err(|e| BoundaryError::Parse(e.to_string()))?;

        let geometry = match geojson {
            GeoJson::Geometry(geometry) => geometry,
            GeoJson::Feature(feature) => feature
                .geometry
                .ok_or(BoundaryError::NotAPolygon("Feature without geometry"))?,
            GeoJson::FeatureCollection(fc) => fc
                .features
                .into_iter()
                .filter_map(|f| f.geometry)
                .find(|g| matches!(g.value, Value::Polygon(_) | Value::MultiPolygon(_)))
                .ok_or(BoundaryError::NotAPolygon("FeatureCollection without polygons"))?,
        };

        let shape = match geometry.value.clone() {
            Value::Polygon(_) | Value::MultiPolygon(_) => {
                let geo_geom: geo::Geometry<f64> = geometry
                    .value
                    .clone()
                    .try_into()
                    .map_err(|e| BoundaryError::Conversion(format!("{:?}", e)))?;
                match geo_geom {
                    geo::Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
                    geo::Geometry::MultiPolygon(mp) => mp,
                    _ => return Err(BoundaryError::NotAPolygon("non-polygon geometry")),
                }
            }
            other => return Err(BoundaryError::NotAPolygon(geometry_type(&other))),
        };

        Ok(Self { geometry, shape })
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn contains(&self, point: LatLng) -> bool {
        self.shape.contains(&point.to_point())
    }
}

fn geometry_type(value: &Value) -> &'static str {
    match value {
        Value::Point(_) => "Point",
        Value::MultiPoint(_) => "MultiPoint",
        Value::LineString(_) => "LineString",
        Value::MultiLineString(_) => "MultiLineString",
        Value::Polygon(_) => "Polygon",
        Value::MultiPolygon(_) => "MultiPolygon",
        Value::GeometryCollection(_) => "GeometryCollection",
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundarySettings {
    pub polygon: Option<BoundaryPolygon>,
    pub default_center: LatLng,
}

impl BoundarySettings {
    pub fn empty(default_center: LatLng) -> Self {
        Self {
            polygon: None,
            default_center,
        }
    }

    /// Builds a snapshot from a stored document. An invalid boundary is
    /// dropped with a warning rather than rejecting the whole document.
    pub fn from_document(doc: &SettingsDocument, fallback_center: LatLng) -> Self {
        let polygon = match doc.boundary.as_ref().filter(|b| !b.is_null()) {
            Some(raw) => match BoundaryPolygon::from_json(raw) {
                Ok(polygon) => Some(polygon),
                Err(e) => {
                    warn!("Ignoring boundary from settings: {}", e);
                    None
                }
            },
            None => None,
        };
        let default_center = doc
            .default_center
            .filter(LatLng::is_valid)
            .unwrap_or(fallback_center);
        Self {
            polygon,
            default_center,
        }
    }
}

/// Holds the current [`BoundarySettings`] for one session.
///
/// Updates replace the whole snapshot behind an `Arc`, so a reader holding a
/// snapshot always sees a boundary and center from the same document.
pub struct BoundaryCenterSync {
    current: Arc<RwLock<Arc<BoundarySettings>>>,
    fallback_center: LatLng,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl BoundaryCenterSync {
    pub fn new(fallback_center: LatLng) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(BoundarySettings::empty(fallback_center)))),
            fallback_center,
            listener: Mutex::new(None),
        }
    }

    pub fn snapshot(&self) -> Arc<BoundarySettings> {
        match self.current.read() {
            Ok(current) => Arc::clone(&current),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn current_boundary(&self) -> Option<BoundaryPolygon> {
        self.snapshot().polygon.clone()
    }

    pub fn current_center(&self) -> LatLng {
        self.snapshot().default_center
    }

    /// False when no boundary is configured.
    pub fn contains(&self, point: LatLng) -> bool {
        self.snapshot()
            .polygon
            .as_ref()
            .is_some_and(|polygon| polygon.contains(point))
    }

    /// Replaces the snapshot with one built from `doc` (last write wins).
    pub fn apply(&self, doc: &SettingsDocument) {
        replace(
            &self.current,
            BoundarySettings::from_document(doc, self.fallback_center),
        );
    }

    pub fn is_active(&self) -> bool {
        self.listener
            .lock()
            .map(|listener| listener.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    /// Starts applying documents pushed on `updates`. Replaces any previous
    /// subscription. Must be called inside a tokio runtime.
    pub fn activate(&self, mut updates: mpsc::Receiver<SettingsDocument>) {
        let current = Arc::clone(&self.current);
        let fallback = self.fallback_center;
        let handle = tokio::spawn(async move {
            while let Some(doc) = updates.recv().await {
                replace(&current, BoundarySettings::from_document(&doc, fallback));
                debug!("Boundary settings updated");
            }
            debug!("Settings update channel closed");
        });

        if let Ok(mut listener) = self.listener.lock() {
            if let Some(previous) = listener.replace(handle) {
                previous.abort();
            }
        }
        info!("Boundary sync activated");
    }

    /// Stops receiving updates and frees the boundary polygon.
    pub fn deactivate(&self) {
        if let Ok(mut listener) = self.listener.lock() {
            if let Some(handle) = listener.take() {
                handle.abort();
            }
        }
        replace(&self.current, BoundarySettings::empty(self.fallback_center));
        info!("Boundary sync deactivated");
    }
}

impl Drop for BoundaryCenterSync {
    fn drop(&mut self) {
        if let Ok(mut listener) = self.listener.lock() {
            if let Some(handle) = listener.take() {
                handle.abort();
            }
        }
    }
}

fn replace(current: &RwLock<Arc<BoundarySettings>>, next: BoundarySettings) {
    let next = Arc::new(next);
    match current.write() {
        Ok(mut slot) => *slot = next,
        Err(poisoned) => *poisoned.into_inner() = next,
    }
}

/// Polls the store's settings document and pushes it whenever it changes.
/// Ends when the receiving side is dropped.
pub async fn poll_settings(
    store: Arc<dyn HazardStore>,
    updates: mpsc::Sender<SettingsDocument>,
    every: Duration,
) {
    let mut last: Option<SettingsDocument> = None;
    let mut ticker = tokio::time::interval(every);

    loop {
        ticker.tick().await;
        match store.fetch_settings().await {
            Ok(Some(doc)) if last.as_ref() != Some(&doc) => {
                if updates.send(doc.clone()).await.is_err() {
                    break;
                }
                last = Some(doc);
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to fetch settings: {}", e),
        }
        if updates.is_closed() {
            break;
        }
    }
}
