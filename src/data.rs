use crate::types::{HazardFeature, IncidentAttributes, IncidentRecord, LatLng};
use anyhow::{anyhow, Context, Result};
use csv::ReaderBuilder;
use geojson::GeoJson;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{debug, info};

/// Parses a serialized FeatureCollection as stored in a hazard file record.
/// Features without a geometry are skipped.
pub fn parse_feature_collection(raw: &str) -> Result<Vec<HazardFeature>> {
    let geojson: GeoJson = raw.parse().context("Failed to parse GeoJSON")?;

    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => return Err(anyhow!("GeoJSON must be a FeatureCollection")),
    };

    let total = collection.features.len();
    let features: Vec<HazardFeature> = collection
        .features
        .into_iter()
        .filter_map(|feature| {
            let geometry = feature.geometry?;
            Some(HazardFeature {
                geometry,
                properties: feature.properties.unwrap_or_default(),
            })
        })
        .collect();

    if features.len() < total {
        debug!("Skipped {} features without geometry", total - features.len());
    }

    Ok(features)
}

/// Loads incident records from a `.csv` or `.json` file.
pub fn load_incidents(path: &Path) -> Result<Vec<IncidentRecord>> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
        .ok_or_else(|| anyhow!("Incident file has no extension: {:?}", path))?;

    let file = File::open(path).with_context(|| format!("Failed to open incident file: {:?}", path))?;

    let records = match extension.as_str() {
        "csv" => read_incidents_csv(file)?,
        "json" => serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse incident JSON: {:?}", path))?,
        _ => return Err(anyhow!("Unsupported incident format: {}", extension)),
    };

    info!("Loaded {} incident records from {:?}", records.len(), path);
    Ok(records)
}

#[derive(Debug, Deserialize)]
struct IncidentRow {
    #[serde(default)]
    id: String,
    lat: Option<f64>,
    lng: Option<f64>,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    severity: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    datetime: Option<String>,
}

impl From<IncidentRow> for IncidentRecord {
    fn from(row: IncidentRow) -> Self {
        let position = match (row.lat, row.lng) {
            (Some(lat), Some(lng)) => Some(LatLng::new(lat, lng)),
            _ => None,
        };
        IncidentRecord {
            id: row.id,
            position,
            attributes: IncidentAttributes {
                kind: row.kind,
                severity: row.severity,
                description: row.description,
                timestamp: row.datetime.filter(|s| !s.is_empty()),
            },
        }
    }
}

/// Reads `id,lat,lng,type,severity,description,datetime` rows. Empty or
/// unparsable coordinates leave the position unset.
pub fn read_incidents_csv<R: Read>(reader: R) -> Result<Vec<IncidentRecord>> {
    let mut rdr = ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers = rdr.headers().context("Failed to read incident CSV header")?.clone();
    let mut records = Vec::new();

    for result in rdr.records() {
        let record = result.context("Failed to read incident CSV row")?;
        let mut row: IncidentRow = record
            .deserialize(Some(&headers))
            .unwrap_or_else(|_| lenient_row(&headers, &record));
        if row.id.is_empty() {
            row.id = format!("row-{}", records.len() + 1);
        }
        records.push(row.into());
    }

    Ok(records)
}

// Falls back to field-by-field reading when a coordinate cell is not a number.
fn lenient_row(headers: &csv::StringRecord, record: &csv::StringRecord) -> IncidentRow {
    let field = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .and_then(|idx| record.get(idx))
            .unwrap_or("")
            .to_string()
    };
    IncidentRow {
        id: field("id"),
        lat: field("lat").parse().ok(),
        lng: field("lng").parse().ok(),
        kind: field("type"),
        severity: field("severity"),
        description: field("description"),
        datetime: Some(field("datetime")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn parses_feature_collection() {
        let raw = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","geometry":{"type":"Point","coordinates":[124.0,10.0]},"properties":{"Susc":"High"}},
            {"type":"Feature","geometry":null,"properties":{"Susc":"Low"}}
        ]}"#;
        let features = parse_feature_collection(raw).unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].properties["Susc"], "High");
    }

    #[test]
    fn rejects_non_collection() {
        let raw = r#"{"type":"Point","coordinates":[124.0,10.0]}"#;
        assert!(parse_feature_collection(raw).is_err());
        assert!(parse_feature_collection("not json").is_err());
    }

    #[test]
    fn csv_rows_with_empty_coordinates_have_no_position() {
        let csv = "id,lat,lng,type,severity,description,datetime\n\
                   a,10.0,124.0,collision,minor,rear-end,2024-05-01\n\
                   b,,,fall,major,no gps,\n\
                   c,abc,124.0,fall,minor,bad cell,2024-05-02\n";
        let records = read_incidents_csv(csv.as_bytes()).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].position, Some(LatLng::new(10.0, 124.0)));
        assert_eq!(records[1].position, None);
        assert_eq!(records[1].attributes.timestamp, None);
        assert_eq!(records[2].position, None);
        assert_eq!(records[2].attributes.description, "bad cell");
    }

    #[test]
    fn loads_json_incident_file() {
        let mut temp = NamedTempFile::with_suffix(".json").unwrap();
        temp.write_all(br#"[{"id":"1","position":null,"type":"collision"}]"#)
            .unwrap();
        let records = load_incidents(temp.path()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].position, None);
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let temp = NamedTempFile::with_suffix(".xml").unwrap();
        assert!(load_incidents(temp.path()).is_err());
    }
}
