use crate::cluster::DEFAULT_RADIUS_METERS;
use crate::settings::FALLBACK_CENTER;
use crate::types::{HazardKind, LatLng};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub store: StoreConfig,
    #[serde(default)]
    pub map: MapConfig,
    #[serde(default)]
    pub incidents: IncidentsConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MapConfig {
    #[serde(default = "default_center")]
    pub default_center: LatLng,
    #[serde(default = "default_radius")]
    pub cluster_radius_m: f64,
    #[serde(default = "default_hazards")]
    pub hazards: Vec<HazardKind>,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            default_center: default_center(),
            cluster_radius_m: default_radius(),
            hazards: default_hazards(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct IncidentsConfig {
    /// CSV or JSON incident list.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    pub static_dir: Option<PathBuf>,
    #[serde(default = "default_poll_secs")]
    pub settings_poll_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            static_dir: None,
            settings_poll_secs: default_poll_secs(),
        }
    }
}

fn default_center() -> LatLng {
    FALLBACK_CENTER
}

fn default_radius() -> f64 {
    DEFAULT_RADIUS_METERS
}

fn default_hazards() -> Vec<HazardKind> {
    HazardKind::ALL.to_vec()
}

fn default_port() -> u16 {
    8080
}

fn default_poll_secs() -> u64 {
    30
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "Failed to parse TOML configuration")?;
        Ok(config)
    }
}
