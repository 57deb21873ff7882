//! Access to the external document store holding hazard metadata, serialized
//! feature collections and map settings.
//!
//! The application only reads from the store. [`FsStore`] maps documents onto
//! a directory tree; [`MemoryStore`] keeps them in memory and can be told to
//! fail for a hazard kind.

use crate::types::{ColorSettings, HazardKind, LatLng, LegendDescriptor};
use async_trait::async_trait;
use geojson::JsonValue;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

/// Metadata record describing one dataset of a hazard kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HazardInfoRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub description: String,
    /// Id of the file record holding the serialized features.
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub legend_prop: Option<LegendDescriptor>,
    #[serde(default)]
    pub color_settings: Option<ColorSettings>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HazardFileRecord {
    #[serde(default)]
    pub id: String,
    /// A serialized GeoJSON FeatureCollection.
    pub data: String,
}

/// The settings document as stored. `boundary` may be a GeoJSON object or a
/// string containing one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsDocument {
    #[serde(default)]
    pub boundary: Option<JsonValue>,
    #[serde(default)]
    pub default_center: Option<LatLng>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O failed for {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed document {path:?}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait HazardStore: Send + Sync {
    /// All info records for a hazard kind, in store order.
    async fn fetch_info(&self, kind: HazardKind) -> Result<Vec<HazardInfoRecord>, StoreError>;

    /// A file record by id; `Ok(None)` when it does not exist.
    async fn fetch_file(&self, id: &str) -> Result<Option<HazardFileRecord>, StoreError>;

    async fn fetch_settings(&self) -> Result<Option<SettingsDocument>, StoreError>;
}

/// Store laid out as `info/<kind>.json`, `files/<id>.json` and
/// `settings.json` under a root directory.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn read_json<T: serde::de::DeserializeOwned>(&self, path: PathBuf) -> Result<Option<T>, StoreError> {
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Store document {:?} not found", path);
                return Ok(None);
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| StoreError::Malformed { path, source })
    }
}

#[async_trait]
impl HazardStore for FsStore {
    async fn fetch_info(&self, kind: HazardKind) -> Result<Vec<HazardInfoRecord>, StoreError> {
        let path = self.root.join("info").join(format!("{}.json", kind.as_str()));
        Ok(self.read_json(path).await?.unwrap_or_default())
    }

    async fn fetch_file(&self, id: &str) -> Result<Option<HazardFileRecord>, StoreError> {
        // Ids are document names, never paths.
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            return Ok(None);
        }
        let path = self.root.join("files").join(format!("{}.json", id));
        let record: Option<HazardFileRecord> = self.read_json(path).await?;
        Ok(record.map(|mut record| {
            if record.id.is_empty() {
                record.id = id.to_string();
            }
            record
        }))
    }

    async fn fetch_settings(&self) -> Result<Option<SettingsDocument>, StoreError> {
        self.read_json(self.root.join("settings.json")).await
    }
}

#[derive(Debug, Default)]
struct MemoryDocuments {
    info: HashMap<HazardKind, Vec<HazardInfoRecord>>,
    files: HashMap<String, HazardFileRecord>,
    settings: Option<SettingsDocument>,
    failing: HashSet<HazardKind>,
}

/// In-memory store, mainly for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: RwLock<MemoryDocuments>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_info(&self, kind: HazardKind, record: HazardInfoRecord) {
        if let Ok(mut docs) = self.docs.write() {
            docs.info.entry(kind).or_default().push(record);
        }
    }

    pub fn insert_file(&self, id: impl Into<String>, data: impl Into<String>) {
        let id = id.into();
        if let Ok(mut docs) = self.docs.write() {
            docs.files.insert(
                id.clone(),
                HazardFileRecord {
                    id,
                    data: data.into(),
                },
            );
        }
    }

    pub fn set_settings(&self, settings: SettingsDocument) {
        if let Ok(mut docs) = self.docs.write() {
            docs.settings = Some(settings);
        }
    }

    /// Makes every info fetch for `kind` fail.
    pub fn fail_kind(&self, kind: HazardKind) {
        if let Ok(mut docs) = self.docs.write() {
            docs.failing.insert(kind);
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, MemoryDocuments>, StoreError> {
        self.docs
            .read()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl HazardStore for MemoryStore {
    async fn fetch_info(&self, kind: HazardKind) -> Result<Vec<HazardInfoRecord>, StoreError> {
        let docs = self.read()?;
        if docs.failing.contains(&kind) {
            return Err(StoreError::Unavailable(format!("{} info unavailable", kind)));
        }
        Ok(docs.info.get(&kind).cloned().unwrap_or_default())
    }

    async fn fetch_file(&self, id: &str) -> Result<Option<HazardFileRecord>, StoreError> {
        Ok(self.read()?.files.get(id).cloned())
    }

    async fn fetch_settings(&self) -> Result<Option<SettingsDocument>, StoreError> {
        Ok(self.read()?.settings.clone())
    }
}
