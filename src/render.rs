use crate::cluster::Cluster;
use crate::loader::{LayerLoad, LayerWarning};
use crate::settings::BoundarySettings;
use crate::style::{styler_for, LayerStyler};
use crate::types::{HazardFeature, HazardKind, IncidentRecord, LatLng, LegendDescriptor};
use geojson::{Feature, FeatureCollection, Geometry, JsonValue};
use rayon::prelude::*;
use serde::Serialize;

/// A hazard layer with a `style` object (and a `susceptibility` label where
/// classified) merged into every feature's properties.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StyledLayer {
    #[serde(rename = "type")]
    pub kind: HazardKind,
    pub description: String,
    pub legend: Option<LegendDescriptor>,
    pub features: FeatureCollection,
    pub warnings: Vec<LayerWarning>,
}

pub fn styled_layer(load: &LayerLoad) -> StyledLayer {
    let layer = &load.layer;
    let styler = styler_for(layer);

    let features: Vec<Feature> = layer
        .features
        .par_iter()
        .map(|feature| styled_feature(feature, &styler))
        .collect();

    StyledLayer {
        kind: layer.kind,
        description: layer.description.clone(),
        legend: layer.legend.clone(),
        features: FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        },
        warnings: load.warnings.clone(),
    }
}

fn styled_feature(feature: &HazardFeature, styler: &LayerStyler) -> Feature {
    let (style, level) = styler.style(feature);
    let mut properties = feature.properties.clone();
    if let Ok(style) = serde_json::to_value(style) {
        properties.insert("style".to_string(), style);
    }
    if let Some(level) = level {
        properties.insert("susceptibility".to_string(), JsonValue::from(level.label()));
    }

    Feature {
        bbox: None,
        geometry: Some(feature.geometry.clone()),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

/// Aggregate marker for the map.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterMarker {
    pub lat: f64,
    pub lng: f64,
    pub count: usize,
    pub accidents: Vec<IncidentRecord>,
}

pub fn cluster_markers(clusters: Vec<Cluster>) -> Vec<ClusterMarker> {
    clusters
        .into_iter()
        .map(|cluster| ClusterMarker {
            lat: cluster.centroid.lat,
            lng: cluster.centroid.lng,
            count: cluster.count,
            accidents: cluster.members,
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsView {
    pub boundary: Option<Geometry>,
    pub default_center: LatLng,
}

impl From<&BoundarySettings> for SettingsView {
    fn from(settings: &BoundarySettings) -> Self {
        Self {
            boundary: settings.polygon.as_ref().map(|p| p.geometry().clone()),
            default_center: settings.default_center,
        }
    }
}
