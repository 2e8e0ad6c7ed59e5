//! contentdb - load content bundles from the command line
//!
//! Opens the content manifest, queues the requested loads and prints every
//! status event as it arrives.

use std::path::PathBuf;
use std::sync::mpsc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use contentdb_core::{AssetKey, ContentConfig, DependencyResolver};
use contentdb_loader::{ContentLoader, LoadEvent, LoadTicket, Payload, SceneMode};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to the per-user config)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Content directory holding the manifest and archives
    #[arg(long, value_name = "DIR")]
    content: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every registered asset with its owning bundle
    Assets,
    /// Load assets by id, display name or source path
    Load {
        #[arg(value_name = "ASSET", required = true)]
        keys: Vec<String>,

        /// Instantiate each asset after loading
        #[arg(long)]
        instantiate: bool,

        /// Go through the single-flight payload cache
        #[arg(long, conflicts_with = "instantiate")]
        cached: bool,
    },
    /// Load and activate a scene
    Scene {
        #[arg(value_name = "SCENE")]
        name: String,

        /// Keep already active scenes
        #[arg(long)]
        additive: bool,
    },
    /// Open bundles and their dependencies
    Bundle {
        #[arg(value_name = "BUNDLE", required = true)]
        names: Vec<String>,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")?;

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ContentConfig::load(path).context("Failed to load config")?,
        None => ContentConfig::load_or_default(),
    };
    if let Some(dir) = cli.content {
        config.content_dir = dir;
    }

    let loader = ContentLoader::open(config).context("Failed to open content")?;
    let (tx, rx) = mpsc::channel::<(String, LoadEvent)>();
    let reporter = |label: String| {
        let tx = tx.clone();
        move |event: LoadEvent| {
            let _ = tx.send((label.clone(), event));
        }
    };

    let requests: Vec<Option<LoadTicket>> = match cli.command {
        Commands::Assets => {
            let resolver = DependencyResolver::new(loader.registry());
            for entry in loader.registry().assets() {
                let bundle = match resolver.resolve(&AssetKey::Id(entry.asset.id.clone())) {
                    Ok(resolution) => resolution.bundle.name,
                    Err(_) => "-".to_string(),
                };
                println!(
                    "{}  {:<24} {:<16} {:<20} {}",
                    entry.asset.id, entry.asset.display_name, entry.group, bundle, entry.asset.source_path
                );
            }
            return Ok(());
        }
        Commands::Load {
            keys,
            instantiate,
            cached,
        } => keys
            .into_iter()
            .map(|key| {
                let callback = reporter(key.clone());
                if cached {
                    loader.load_cached(key, callback)
                } else if instantiate {
                    Some(loader.instantiate(key, callback))
                } else {
                    Some(loader.load_asset(key, callback))
                }
            })
            .collect(),
        Commands::Scene { name, additive } => {
            let mode = if additive { SceneMode::Additive } else { SceneMode::Single };
            vec![Some(loader.load_scene(&name, mode, reporter(name.clone())))]
        }
        Commands::Bundle { names } => names
            .into_iter()
            .map(|name| Some(loader.load_bundle(&name, reporter(name.clone()))))
            .collect(),
    };
    drop(tx);

    let mut remaining = requests.len();
    let mut failures = 0;
    while remaining > 0 {
        let Ok((label, event)) = rx.recv() else {
            warn!("Loader stopped with {} requests outstanding", remaining);
            break;
        };
        print_event(&label, &event);
        if event.terminal {
            remaining -= 1;
            if event.status.is_error() {
                failures += 1;
            }
        }
    }

    let bundles = loader.loaded_bundles().wait().context("Failed to read bundle cache")?;
    println!("\n{} bundles loaded", bundles.len());
    for bundle in bundles {
        println!(
            "  {:<24} group {:<16} refs {:<3} items {}",
            bundle.name, bundle.group_name, bundle.reference_count, bundle.items
        );
    }
    for scene in loader.active_scenes() {
        println!("  scene {} ({:?}) from {}", scene.name, scene.mode, scene.bundle);
    }

    info!("Done: {} requests, {} failed", requests.len(), failures);
    Ok(())
}

fn print_event(label: &str, event: &LoadEvent) {
    let mut line = format!(
        "[{}] {:<20} {:>3.0}%  {}",
        label,
        event.status.to_string(),
        event.progress * 100.0,
        event.name
    );
    if let Some(tally) = event.tally {
        line.push_str(&format!(
            "  deps ready {} missing {} skipped {} total {}",
            tally.ready, tally.missing, tally.skipped, tally.total
        ));
    }
    match &event.payload {
        Some(Payload::Asset(asset)) => line.push_str(&format!("  -> {} {}", asset.type_name, asset.data)),
        Some(Payload::Instance(instance)) => line.push_str(&format!("  -> instance {}", instance.instance_id)),
        Some(Payload::Scene(scene)) => line.push_str(&format!("  -> scene {:?}", scene.mode)),
        None => {}
    }
    if let Some(message) = &event.message {
        line.push_str(&format!("  ({})", message));
    }
    println!("{}", line);
}
