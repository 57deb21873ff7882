//! Greedy fixed-radius grouping of incident reports into map markers.
//!
//! A record joins the first existing cluster whose centroid is within the
//! radius, otherwise it starts a new cluster. The centroid stays at the first
//! member's position and is not re-averaged, so results depend on input order.

use crate::types::{IncidentRecord, LatLng};
use geo::HaversineDistance;

pub const DEFAULT_RADIUS_METERS: f64 = 50.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub centroid: LatLng,
    pub count: usize,
    pub members: Vec<IncidentRecord>,
}

impl Cluster {
    fn start(position: LatLng, record: IncidentRecord) -> Self {
        Self {
            centroid: position,
            count: 1,
            members: vec![record],
        }
    }

    fn push(&mut self, record: IncidentRecord) {
        self.count += 1;
        self.members.push(record);
    }
}

/// Great-circle distance in meters.
pub fn distance_meters(a: LatLng, b: LatLng) -> f64 {
    a.to_point().haversine_distance(&b.to_point())
}

/// Clusters `records` in input order. Records without a valid position are
/// left out entirely.
pub fn cluster(records: &[IncidentRecord], radius_meters: f64) -> Vec<Cluster> {
    let mut clusters: Vec<Cluster> = Vec::new();

    for record in records {
        let Some(position) = record.valid_position() else {
            continue;
        };

        match clusters
            .iter_mut()
            .find(|c| distance_meters(position, c.centroid) <= radius_meters)
        {
            Some(existing) => existing.push(record.clone()),
            None => clusters.push(Cluster::start(position, record.clone())),
        }
    }

    clusters
}
