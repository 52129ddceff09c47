//! Load a game installation and print what was found.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example load_game -- --game "/games/Battlefield 1" --year 2016
//! cargo run --example load_game -- --game /games/swbf2 --profile swbf2.json --ebx ui/static/hud
//! ```
//!
//! Set `RUST_LOG=cryo_storage=debug` for per-superbundle progress.

use std::path::PathBuf;

use clap::Parser;
use cryo_storage::{GameProfile, LoadSession, StorageConfig};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "load_game")]
struct Cli {
    /// Game installation root
    #[clap(long)]
    pub game: PathBuf,

    /// Title profile as JSON; defaults to a generic profile
    #[clap(long)]
    pub profile: Option<PathBuf>,

    /// Frostbite year for the generic profile
    #[clap(long, default_value_t = 2016)]
    pub year: u32,

    /// Key script with named keys
    #[clap(long)]
    pub keys: Option<PathBuf>,

    /// Superbundles decoded in parallel
    #[clap(long, default_value_t = 1)]
    pub threads: usize,

    /// EBX asset to read after loading
    #[clap(long)]
    pub ebx: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
    let args = Cli::parse();

    let profile = match &args.profile {
        Some(path) => GameProfile::load(path)?,
        None => GameProfile::new("generic", args.year),
    };
    let mut config = StorageConfig::new(&args.game, profile).with_load_threads(args.threads);
    if let Some(keys) = &args.keys {
        config = config.with_key_script(keys);
    }

    let mut session = LoadSession::open(config)?;
    let report = session.load()?;
    info!(
        superbundles = report.superbundles,
        bundles = report.bundles,
        chunks = report.chunks,
        catalogs = report.catalogs,
        patches = report.patches,
        "load finished"
    );
    for skipped in &report.skipped {
        warn!(
            superbundle = %skipped.superbundle,
            bundle = skipped.bundle.as_deref().unwrap_or("-"),
            error = %skipped.error,
            "skipped"
        );
    }

    let assets = session.assets();
    println!(
        "{} ebx, {} res, {} chunks in {} bundles",
        assets.ebx_count(),
        assets.res_count(),
        assets.chunk_count(),
        assets.bundle_count()
    );

    if let Some(name) = &args.ebx {
        match assets.ebx(name) {
            Some(entry) => {
                let bytes = session.read_asset(&entry.asset)?;
                println!("{name}: {} bytes, sha1 {}", bytes.len(), entry.asset.sha1);
            }
            None => println!("{name}: not found"),
        }
    }
    Ok(())
}
