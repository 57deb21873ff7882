use geo::Point;
use geojson::{Geometry, JsonObject, JsonValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A WGS84 coordinate in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Finite and inside the latitude/longitude ranges.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }

    // geo works in x = longitude, y = latitude
    pub fn to_point(self) -> Point<f64> {
        Point::new(self.lng, self.lat)
    }
}

/// One geographic entity of a hazard layer. Never mutated after parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct HazardFeature {
    pub geometry: Geometry,
    pub properties: JsonObject,
}

impl HazardFeature {
    /// Property value, treating an explicit JSON `null` as absent.
    pub fn property(&self, key: &str) -> Option<&JsonValue> {
        self.properties.get(key).filter(|v| !v.is_null())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HazardKind {
    Flood,
    Landslide,
    StormSurge,
    Liquefaction,
    Tsunami,
    FaultLine,
}

impl HazardKind {
    pub const ALL: [HazardKind; 6] = [
        HazardKind::Flood,
        HazardKind::Landslide,
        HazardKind::StormSurge,
        HazardKind::Liquefaction,
        HazardKind::Tsunami,
        HazardKind::FaultLine,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HazardKind::Flood => "flood",
            HazardKind::Landslide => "landslide",
            HazardKind::StormSurge => "storm_surge",
            HazardKind::Liquefaction => "liquefaction",
            HazardKind::Tsunami => "tsunami",
            HazardKind::FaultLine => "fault_line",
        }
    }
}

impl fmt::Display for HazardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown hazard type: {0}")]
pub struct UnknownHazardKind(pub String);

impl FromStr for HazardKind {
    type Err = UnknownHazardKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        HazardKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| UnknownHazardKind(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegendKind {
    Numeric,
    Categorical,
}

/// Names the feature property that drives coloring and how to read it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegendDescriptor {
    pub key: String,
    #[serde(rename = "type")]
    pub kind: LegendKind,
}

/// Hex colors keyed by category, or by `min`/`max` for numeric legends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColorSettings(pub BTreeMap<String, String>);

impl ColorSettings {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn min(&self) -> Option<&str> {
        self.get("min")
    }

    pub fn max(&self) -> Option<&str> {
        self.get("max")
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ColorSettings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        ColorSettings(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HazardLayer {
    pub kind: HazardKind,
    pub description: String,
    pub features: Vec<HazardFeature>,
    pub legend: Option<LegendDescriptor>,
    pub color_settings: Option<ColorSettings>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IncidentAttributes {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "datetime", alias = "timestamp", default)]
    pub timestamp: Option<String>,
}

/// An incident report (e.g. a road accident) as stored externally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_position")]
    pub position: Option<LatLng>,
    #[serde(flatten)]
    pub attributes: IncidentAttributes,
}

impl IncidentRecord {
    /// The position, if present and usable for distance computations.
    pub fn valid_position(&self) -> Option<LatLng> {
        self.position.filter(LatLng::is_valid)
    }
}

// Malformed positions (missing fields, strings) read as absent rather than
// failing the whole record.
fn lenient_position<'de, D>(deserializer: D) -> Result<Option<LatLng>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(raw.and_then(|value| serde_json::from_value(value).ok()))
}
