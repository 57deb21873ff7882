use crate::data::parse_feature_collection;
use crate::store::{HazardStore, StoreError};
use crate::types::{HazardKind, HazardLayer};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tokio::task::JoinSet;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum LoadState {
    Pending,
    Ready,
    Failed(String),
}

/// A file that contributed no features to its layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerWarning {
    pub info_id: String,
    pub file_id: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct LayerLoad {
    pub layer: HazardLayer,
    pub warnings: Vec<LayerWarning>,
}

#[derive(Debug, thiserror::Error)]
#[error("failed to load {kind} layer: {source}")]
pub struct LoadError {
    pub kind: HazardKind,
    #[source]
    pub source: StoreError,
}

pub type LoadResult = Result<LayerLoad, LoadError>;

// Each load takes a generation; only the newest load of a kind may write its
// state, so a slow stale load never overwrites a fresher one.
#[derive(Debug, Default)]
struct Tracker {
    states: HashMap<HazardKind, LoadState>,
    generations: HashMap<HazardKind, u64>,
}

/// Loads hazard layers from a [`HazardStore`] and tracks per-kind load state.
#[derive(Clone)]
pub struct HazardLayerLoader {
    store: Arc<dyn HazardStore>,
    tracker: Arc<RwLock<Tracker>>,
}

impl HazardLayerLoader {
    pub fn new(store: Arc<dyn HazardStore>) -> Self {
        Self {
            store,
            tracker: Arc::new(RwLock::new(Tracker::default())),
        }
    }

    pub fn state(&self, kind: HazardKind) -> Option<LoadState> {
        self.tracker
            .read()
            .ok()
            .and_then(|tracker| tracker.states.get(&kind).cloned())
    }

    pub fn states(&self) -> BTreeMap<HazardKind, LoadState> {
        self.tracker
            .read()
            .map(|tracker| tracker.states.iter().map(|(k, v)| (*k, v.clone())).collect())
            .unwrap_or_default()
    }

    /// Loads one hazard kind. A store failure is returned as [`LoadError`]
    /// and recorded as a failed state; it never panics.
    pub async fn load_layer(&self, kind: HazardKind) -> LoadResult {
        let generation = self.begin(kind);
        self.run(kind, generation).await
    }

    /// Starts one concurrent load per kind. Loads fail independently.
    pub fn spawn_all(&self, kinds: impl IntoIterator<Item = HazardKind>) -> LayerLoadSet {
        let mut tasks = JoinSet::new();
        let mut started = Vec::new();

        for kind in kinds {
            let generation = self.begin(kind);
            let loader = self.clone();
            tasks.spawn(async move { (kind, loader.run(kind, generation).await) });
            started.push((kind, generation));
        }

        LayerLoadSet {
            tasks,
            loader: self.clone(),
            started,
        }
    }

    fn begin(&self, kind: HazardKind) -> u64 {
        let Ok(mut tracker) = self.tracker.write() else {
            return 0;
        };
        let generation = tracker.generations.entry(kind).or_insert(0);
        *generation += 1;
        let generation = *generation;
        tracker.states.insert(kind, LoadState::Pending);
        generation
    }

    fn finish(&self, kind: HazardKind, generation: u64, state: LoadState) {
        if let Ok(mut tracker) = self.tracker.write() {
            if tracker.generations.get(&kind) == Some(&generation) {
                tracker.states.insert(kind, state);
            }
        }
    }

    // Clears a still-pending state and retires its generation, so a load
    // that is already past its last await cannot write afterwards.
    fn abandon(&self, kind: HazardKind, generation: u64) {
        if let Ok(mut tracker) = self.tracker.write() {
            let current = tracker.generations.get(&kind) == Some(&generation);
            if current && tracker.states.get(&kind) == Some(&LoadState::Pending) {
                tracker.states.remove(&kind);
                tracker.generations.insert(kind, generation + 1);
            }
        }
    }

    async fn run(&self, kind: HazardKind, generation: u64) -> LoadResult {
        let mut guard = PendingGuard {
            loader: self,
            kind,
            generation,
            armed: true,
        };
        let result = fetch_layer(self.store.as_ref(), kind).await;
        guard.armed = false;
        match &result {
            Ok(load) => {
                info!(
                    "Loaded {} layer: {} features, {} warnings",
                    kind,
                    load.layer.features.len(),
                    load.warnings.len()
                );
                self.finish(kind, generation, LoadState::Ready);
            }
            Err(e) => {
                warn!("{}", e);
                self.finish(kind, generation, LoadState::Failed(e.source.to_string()));
            }
        }
        result
    }
}

/// Abandons the load's state when its future is dropped before completing.
struct PendingGuard<'a> {
    loader: &'a HazardLayerLoader,
    kind: HazardKind,
    generation: u64,
    armed: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.loader.abandon(self.kind, self.generation);
        }
    }
}

async fn fetch_layer(store: &dyn HazardStore, kind: HazardKind) -> LoadResult {
    let infos = store
        .fetch_info(kind)
        .await
        .map_err(|source| LoadError { kind, source })?;

    let mut features = Vec::new();
    let mut warnings = Vec::new();

    for info in &infos {
        let Some(file_id) = info.file.as_deref() else {
            continue;
        };

        let reason = match store.fetch_file(file_id).await {
            Ok(Some(file)) => match parse_feature_collection(&file.data) {
                Ok(mut parsed) => {
                    features.append(&mut parsed);
                    continue;
                }
                Err(e) => format!("{:#}", e),
            },
            Ok(None) => "file record not found".to_string(),
            Err(e) => e.to_string(),
        };

        warn!("{} file {} (info {}) skipped: {}", kind, file_id, info.id, reason);
        warnings.push(LayerWarning {
            info_id: info.id.clone(),
            file_id: file_id.to_string(),
            reason,
        });
    }

    let description = infos
        .iter()
        .map(|info| info.description.as_str())
        .find(|d| !d.is_empty())
        .unwrap_or_default()
        .to_string();

    let legend_source = infos.iter().find(|info| info.legend_prop.is_some());
    let legend = legend_source.and_then(|info| info.legend_prop.clone());
    let color_settings = legend_source
        .and_then(|info| info.color_settings.clone())
        .or_else(|| infos.iter().find_map(|info| info.color_settings.clone()));

    Ok(LayerLoad {
        layer: HazardLayer {
            kind,
            description,
            features,
            legend,
            color_settings,
        },
        warnings,
    })
}

/// Outstanding loads started by [`HazardLayerLoader::spawn_all`].
///
/// Dropping the set aborts whatever is still running; aborted loads leave no
/// state behind.
pub struct LayerLoadSet {
    tasks: JoinSet<(HazardKind, LoadResult)>,
    loader: HazardLayerLoader,
    started: Vec<(HazardKind, u64)>,
}

impl LayerLoadSet {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// The next load to complete, in completion order.
    pub async fn next(&mut self) -> Option<(HazardKind, LoadResult)> {
        loop {
            match self.tasks.join_next().await? {
                Ok(done) => return Some(done),
                Err(e) if e.is_cancelled() => continue,
                Err(e) => warn!("Layer load task failed: {}", e),
            }
        }
    }

    pub async fn collect(mut self) -> BTreeMap<HazardKind, LoadResult> {
        let mut results = BTreeMap::new();
        while let Some((kind, result)) = self.next().await {
            results.insert(kind, result);
        }
        results
    }

    pub fn cancel(&mut self) {
        self.tasks.abort_all();
        for (kind, generation) in &self.started {
            self.loader.abandon(*kind, *generation);
        }
    }
}

impl Drop for LayerLoadSet {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{HazardFileRecord, HazardInfoRecord, MemoryStore, SettingsDocument};
    use crate::types::{LegendDescriptor, LegendKind};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Info fetches signal `entered` and then wait for `gate`.
    #[derive(Default)]
    struct GatedStore {
        entered: Notify,
        gate: Notify,
    }

    #[async_trait]
    impl HazardStore for GatedStore {
        async fn fetch_info(&self, _kind: HazardKind) -> Result<Vec<HazardInfoRecord>, StoreError> {
            self.entered.notify_one();
            self.gate.notified().await;
            Ok(Vec::new())
        }

        async fn fetch_file(&self, _id: &str) -> Result<Option<HazardFileRecord>, StoreError> {
            Ok(None)
        }

        async fn fetch_settings(&self) -> Result<Option<SettingsDocument>, StoreError> {
            Ok(None)
        }
    }

    const ONE_POINT: &str = r#"{"type":"FeatureCollection","features":[
        {"type":"Feature","geometry":{"type":"Point","coordinates":[124.0,10.0]},"properties":{"v":1}}]}"#;
    const TWO_POLYGONS: &str = r#"{"type":"FeatureCollection","features":[
        {"type":"Feature","geometry":{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,0]]]},"properties":{"v":2}},
        {"type":"Feature","geometry":{"type":"Polygon","coordinates":[[[2,2],[3,2],[3,3],[2,2]]]},"properties":{"v":3}}]}"#;

    fn info(id: &str, file: Option<&str>) -> HazardInfoRecord {
        HazardInfoRecord {
            id: id.to_string(),
            description: format!("{} dataset", id),
            file: file.map(str::to_string),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn merges_features_across_info_records() {
        let store = MemoryStore::new();
        store.insert_file("a", ONE_POINT);
        store.insert_file("b", TWO_POLYGONS);
        store.insert_info(HazardKind::Flood, info("f1", Some("a")));
        let mut second = info("f2", Some("b"));
        second.legend_prop = Some(LegendDescriptor {
            key: "v".into(),
            kind: LegendKind::Numeric,
        });
        second.color_settings = Some([("min", "#ffffff"), ("max", "#000000")].into_iter().collect());
        store.insert_info(HazardKind::Flood, second);

        let loader = HazardLayerLoader::new(Arc::new(store));
        let load = loader.load_layer(HazardKind::Flood).await.unwrap();
        assert_eq!(load.layer.features.len(), 3);
        assert_eq!(load.layer.description, "f1 dataset");
        assert_eq!(load.layer.legend.as_ref().map(|l| l.key.as_str()), Some("v"));
        assert_eq!(load.layer.color_settings.as_ref().and_then(|c| c.min()), Some("#ffffff"));
        assert!(load.warnings.is_empty());
        assert_eq!(loader.state(HazardKind::Flood), Some(LoadState::Ready));
    }

    #[tokio::test]
    async fn bad_files_contribute_nothing_but_warn() {
        let store = MemoryStore::new();
        store.insert_file("good", ONE_POINT);
        store.insert_file("broken", "{ not geojson");
        store.insert_info(HazardKind::Landslide, info("l1", Some("good")));
        store.insert_info(HazardKind::Landslide, info("l2", Some("broken")));
        store.insert_info(HazardKind::Landslide, info("l3", Some("missing")));
        store.insert_info(HazardKind::Landslide, info("l4", None));

        let loader = HazardLayerLoader::new(Arc::new(store));
        let load = loader.load_layer(HazardKind::Landslide).await.unwrap();
        assert_eq!(load.layer.features.len(), 1);
        assert_eq!(load.layer.legend, None);
        let files: Vec<_> = load.warnings.iter().map(|w| w.file_id.as_str()).collect();
        assert_eq!(files, vec!["broken", "missing"]);
        assert_eq!(loader.state(HazardKind::Landslide), Some(LoadState::Ready));
    }

    #[tokio::test]
    async fn one_failing_kind_does_not_affect_others() {
        let store = MemoryStore::new();
        store.insert_file("a", ONE_POINT);
        store.insert_file("b", TWO_POLYGONS);
        store.insert_info(HazardKind::Flood, info("f1", Some("a")));
        store.insert_info(HazardKind::StormSurge, info("s1", Some("b")));
        store.fail_kind(HazardKind::Landslide);

        let loader = HazardLayerLoader::new(Arc::new(store));
        let results = loader
            .spawn_all([HazardKind::Flood, HazardKind::Landslide, HazardKind::StormSurge])
            .collect()
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[&HazardKind::Flood].as_ref().unwrap().layer.features.len(), 1);
        assert_eq!(results[&HazardKind::StormSurge].as_ref().unwrap().layer.features.len(), 2);
        let err = results[&HazardKind::Landslide].as_ref().unwrap_err();
        assert_eq!(err.kind, HazardKind::Landslide);

        assert_eq!(loader.state(HazardKind::Flood), Some(LoadState::Ready));
        assert_eq!(loader.state(HazardKind::StormSurge), Some(LoadState::Ready));
        assert!(matches!(loader.state(HazardKind::Landslide), Some(LoadState::Failed(_))));
    }

    #[tokio::test]
    async fn empty_kind_loads_as_empty_layer() {
        let loader = HazardLayerLoader::new(Arc::new(MemoryStore::new()));
        let load = loader.load_layer(HazardKind::Tsunami).await.unwrap();
        assert!(load.layer.features.is_empty());
        assert_eq!(load.layer.color_settings, None);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn cancelled_loads_leave_no_pending_state() {
        let store = MemoryStore::new();
        store.insert_info(HazardKind::Flood, info("f1", None));
        let loader = HazardLayerLoader::new(Arc::new(store));

        // On a current-thread runtime the spawned tasks cannot run before
        // cancel() because nothing yields in between.
        let mut set = loader.spawn_all([HazardKind::Flood, HazardKind::Tsunami]);
        assert_eq!(set.len(), 2);
        assert_eq!(loader.state(HazardKind::Flood), Some(LoadState::Pending));
        set.cancel();
        assert!(set.collect().await.is_empty());
        assert_eq!(loader.state(HazardKind::Flood), None);
        assert_eq!(loader.state(HazardKind::Tsunami), None);
    }

    #[tokio::test]
    async fn newer_load_owns_the_state() {
        let loader = HazardLayerLoader::new(Arc::new(MemoryStore::new()));
        let stale = loader.begin(HazardKind::Flood);
        let fresh = loader.begin(HazardKind::Flood);
        loader.finish(HazardKind::Flood, fresh, LoadState::Ready);
        loader.finish(HazardKind::Flood, stale, LoadState::Failed("late".into()));
        assert_eq!(loader.state(HazardKind::Flood), Some(LoadState::Ready));
    }

    #[tokio::test]
    async fn dropped_load_clears_pending_state() {
        let loader = HazardLayerLoader::new(Arc::new(GatedStore::default()));

        let timed_out = tokio::time::timeout(Duration::from_millis(20), loader.load_layer(HazardKind::Flood)).await;
        assert!(timed_out.is_err());
        assert_eq!(loader.state(HazardKind::Flood), None);
    }

    #[tokio::test]
    async fn cancelling_an_in_flight_load_clears_its_state() {
        let store = Arc::new(GatedStore::default());
        let loader = HazardLayerLoader::new(store.clone());

        let mut set = loader.spawn_all([HazardKind::Landslide]);
        store.entered.notified().await;
        assert_eq!(loader.state(HazardKind::Landslide), Some(LoadState::Pending));

        set.cancel();
        assert_eq!(loader.state(HazardKind::Landslide), None);

        store.gate.notify_one();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(set.collect().await.is_empty());
        assert_eq!(loader.state(HazardKind::Landslide), None);
    }

    #[tokio::test]
    async fn abandoned_load_cannot_finish_late() {
        let loader = HazardLayerLoader::new(Arc::new(MemoryStore::new()));
        let generation = loader.begin(HazardKind::Flood);
        loader.abandon(HazardKind::Flood, generation);
        loader.finish(HazardKind::Flood, generation, LoadState::Ready);
        assert_eq!(loader.state(HazardKind::Flood), None);

        let next = loader.begin(HazardKind::Flood);
        assert!(next > generation + 1);
        loader.finish(HazardKind::Flood, next, LoadState::Ready);
        assert_eq!(loader.state(HazardKind::Flood), Some(LoadState::Ready));
    }
}
