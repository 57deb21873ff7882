//! Hazard map engine: susceptibility classification, legend color scales,
//! hazard layer loading, incident clustering and boundary/center sync.

pub mod cluster;
pub mod color;
pub mod config;
pub mod data;
pub mod loader;
pub mod render;
pub mod server;
pub mod settings;
pub mod store;
pub mod style;
pub mod susceptibility;
pub mod types;

pub use cluster::{cluster, Cluster};
pub use color::{build_scale, Color, ColorScale};
pub use loader::{HazardLayerLoader, LoadError, LoadState};
pub use settings::{BoundaryCenterSync, BoundarySettings};
pub use susceptibility::{classify, style_for, SusceptibilityLevel};
pub use types::{HazardKind, HazardLayer, IncidentRecord, LatLng};
