use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use hazardmap::config::AppConfig;
use hazardmap::data;
use hazardmap::loader::HazardLayerLoader;
use hazardmap::render::cluster_markers;
use hazardmap::server;
use hazardmap::store::{FsStore, HazardStore};
use hazardmap::susceptibility::{classify_str, style_for};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load every configured hazard layer and report what loaded
    Layers {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Cluster the configured incident file and print markers as JSON
    Cluster {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        /// Override the clustering radius in meters
        #[arg(short, long)]
        radius: Option<f64>,
    },
    /// Classify a susceptibility label
    Classify { value: String },
    /// Serve layers, clusters and settings over HTTP
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
}

fn load_incidents(config: &AppConfig) -> Result<Vec<hazardmap::IncidentRecord>> {
    match &config.incidents.path {
        Some(path) => data::load_incidents(path),
        None => Ok(Vec::new()),
    }
}

fn open_store(config: &AppConfig) -> Arc<dyn HazardStore> {
    let store = FsStore::new(&config.store.root);
    info!("Reading hazard store at {:?}", store.root());
    Arc::new(store)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Layers { config } => {
            let app_config = AppConfig::load_from_file(&config)?;
            let store = open_store(&app_config);
            let loader = HazardLayerLoader::new(store);

            let results = loader.spawn_all(app_config.map.hazards.clone()).collect().await;
            for (kind, result) in results {
                match result {
                    Ok(load) => {
                        println!(
                            "{:<14} ready   {:>6} features  {} warnings  {}",
                            kind.as_str(),
                            load.layer.features.len(),
                            load.warnings.len(),
                            load.layer.description
                        );
                        for warning in &load.warnings {
                            println!("    {} ({}): {}", warning.file_id, warning.info_id, warning.reason);
                        }
                    }
                    Err(e) => println!("{:<14} failed  {}", kind.as_str(), e.source),
                }
            }
        }
        Commands::Cluster { config, radius } => {
            let app_config = AppConfig::load_from_file(&config)?;
            let radius = radius.unwrap_or(app_config.map.cluster_radius_m);
            if !radius.is_finite() || radius < 0.0 {
                return Err(anyhow!("radius must be a non-negative number"));
            }

            let incidents = load_incidents(&app_config)?;
            let clusters = hazardmap::cluster(&incidents, radius);
            info!("{} incidents grouped into {} clusters", incidents.len(), clusters.len());
            println!("{}", serde_json::to_string_pretty(&cluster_markers(clusters))?);
        }
        Commands::Classify { value } => {
            let level = classify_str(&value);
            println!("{} {}", level, style_for(level));
        }
        Commands::Serve { config } => {
            let app_config = AppConfig::load_from_file(&config)?;
            let store = open_store(&app_config);
            let incidents = load_incidents(&app_config)?;
            server::start_server(app_config, store, incidents).await?;
        }
    }

    Ok(())
}
