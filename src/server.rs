use crate::cluster::cluster;
use crate::config::AppConfig;
use crate::loader::{HazardLayerLoader, LoadState};
use crate::render::{cluster_markers, styled_layer, ClusterMarker, SettingsView, StyledLayer};
use crate::settings::{poll_settings, BoundaryCenterSync};
use crate::store::HazardStore;
use crate::types::{HazardKind, IncidentRecord, LatLng};
use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{info, warn};

pub struct AppState {
    pub config: AppConfig,
    pub loader: HazardLayerLoader,
    pub boundary: Arc<BoundaryCenterSync>,
    pub incidents: Vec<IncidentRecord>,
}

type ApiError = (StatusCode, String);

#[derive(Deserialize)]
pub struct ClusterParams {
    radius: Option<f64>,
}

#[derive(Deserialize)]
pub struct PointParams {
    lat: f64,
    lng: f64,
}

#[derive(Serialize)]
pub struct ContainsResponse {
    inside: bool,
}

pub fn router(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        .route("/api/hazards", get(list_hazards))
        .route("/api/hazards/:kind", get(hazard_layer))
        .route("/api/clusters", get(clusters))
        .route("/api/settings", get(settings))
        .route("/api/boundary/contains", get(boundary_contains));

    if let Some(dir) = &state.config.server.static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(CorsLayer::permissive()).with_state(state)
}

pub async fn start_server(
    config: AppConfig,
    store: Arc<dyn HazardStore>,
    incidents: Vec<IncidentRecord>,
) -> Result<()> {
    let boundary = Arc::new(BoundaryCenterSync::new(config.map.default_center));
    let (updates_tx, updates_rx) = mpsc::channel(8);
    boundary.activate(updates_rx);
    let poller = tokio::spawn(poll_settings(
        Arc::clone(&store),
        updates_tx,
        Duration::from_secs(config.server.settings_poll_secs.max(1)),
    ));

    let loader = HazardLayerLoader::new(store);
    let mut warmup = loader.spawn_all(config.map.hazards.clone());
    info!("Loading {} hazard layers", warmup.len());
    while let Some((kind, result)) = warmup.next().await {
        if let Err(e) = result {
            warn!("{} layer unavailable at start-up: {}", kind, e);
        }
    }

    let port = config.server.port;
    let state = Arc::new(AppState {
        config,
        loader,
        boundary: Arc::clone(&boundary),
        incidents,
    });

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("Starting server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let served = axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    poller.abort();
    boundary.deactivate();
    served.context("Server error")?;
    Ok(())
}

async fn list_hazards(State(state): State<Arc<AppState>>) -> Json<BTreeMap<HazardKind, Option<LoadState>>> {
    let states = state.loader.states();
    Json(
        state
            .config
            .map
            .hazards
            .iter()
            .map(|kind| (*kind, states.get(kind).cloned()))
            .collect(),
    )
}

async fn hazard_layer(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
) -> Result<Json<StyledLayer>, ApiError> {
    let kind: HazardKind = kind
        .parse()
        .map_err(|e: crate::types::UnknownHazardKind| (StatusCode::NOT_FOUND, e.to_string()))?;

    let load = state
        .loader
        .load_layer(kind)
        .await
        .map_err(|e| (StatusCode::BAD_GATEWAY, e.to_string()))?;

    Ok(Json(styled_layer(&load)))
}

async fn clusters(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ClusterParams>,
) -> Result<Json<Vec<ClusterMarker>>, ApiError> {
    let radius = params.radius.unwrap_or(state.config.map.cluster_radius_m);
    if !radius.is_finite() || radius < 0.0 {
        return Err((StatusCode::BAD_REQUEST, "radius must be a non-negative number".into()));
    }
    Ok(Json(cluster_markers(cluster(&state.incidents, radius))))
}

async fn settings(State(state): State<Arc<AppState>>) -> Json<SettingsView> {
    Json(SettingsView::from(state.boundary.snapshot().as_ref()))
}

async fn boundary_contains(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PointParams>,
) -> Json<ContainsResponse> {
    Json(ContainsResponse {
        inside: state.boundary.contains(LatLng::new(params.lat, params.lng)),
    })
}
