use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use worldspace_common::BlockPos;
use worldspace_kernel::{EntityKind, World};
use worldspace_lease::{CellRange, LeaseConfig, LeaseManager};
use worldspace_persist::WorldStore;
use worldspace_stream::{ForceConfig, ForcedGrid};
use worldspace_tools::ResidencyInspector;

#[derive(Parser)]
#[command(name = "worldspace-cli", about = "CLI tool for forced cell residency")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// JSON file with `grid` and `lease` settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Dump lease state after every lease mutation
    #[arg(long)]
    debug_leases: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print engine version and crate info
    Info,
    /// Force a range around a single anchor and show the result
    Force {
        #[arg(long, default_value_t = 165, allow_negative_numbers = true)]
        x: i32,
        #[arg(long, default_value_t = 64, allow_negative_numbers = true)]
        y: i32,
        #[arg(long, default_value_t = 85, allow_negative_numbers = true)]
        z: i32,
        #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
        min_x: i32,
        #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
        min_z: i32,
        #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
        max_x: i32,
        #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
        max_z: i32,
    },
    /// Force ranges, save the world to disk, reload it and reinstate the leases
    Reload {
        /// Store directory
        #[arg(short, long)]
        dir: PathBuf,
        /// Number of anchors to spawn
        #[arg(short, long, default_value = "3")]
        anchors: usize,
        /// Cell radius forced around each anchor
        #[arg(short, long, default_value = "1")]
        radius: i32,
    },
    /// Load the latest save from a store, reinstate its leases and list anchors
    Inspect {
        /// Store directory
        #[arg(short, long)]
        dir: PathBuf,
    },
}

/// Settings file layout.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Settings {
    grid: ForceConfig,
    lease: LeaseConfig,
}

impl Settings {
    fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let file = std::fs::File::open(path)
            .with_context(|| format!("opening config {}", path.display()))?;
        serde_json::from_reader(file).with_context(|| format!("parsing config {}", path.display()))
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let mut settings = Settings::load(cli.config.as_deref())?;
    settings.lease.debug |= cli.debug_leases;

    match cli.command {
        Commands::Info => {
            println!("worldspace-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("stream: {}", worldspace_stream::crate_info());
            println!("persist: {}", worldspace_persist::crate_info());
            println!("lease: {}", worldspace_lease::crate_info());
            println!("tools: {}", worldspace_tools::crate_info());
            println!(
                "owner: {} (lease quota {})",
                settings.lease.owner, settings.grid.lease_quota
            );
        }
        Commands::Force {
            x,
            y,
            z,
            min_x,
            min_z,
            max_x,
            max_z,
        } => {
            let mut grid = ForcedGrid::new(settings.grid);
            let mut world = World::new();
            grid.load_world(world.id(), Vec::new());
            let mut manager = LeaseManager::new(&mut grid, settings.lease)?;

            let anchor = world.spawn(EntityKind::Anchor, BlockPos::new(x, y, z))?;
            let range = CellRange::new(min_x, min_z, max_x, max_z);
            let state = manager.set_forced_range(&mut grid, &mut world, anchor, range);
            println!("state: {state:?}");
            println!("{}", manager.dump(world.id(), anchor, "force"));
            println!("{}", ResidencyInspector::summary(&world, &manager, &grid));
            manager.shutdown(&mut grid);
        }
        Commands::Reload {
            dir,
            anchors,
            radius,
        } => {
            let mut grid = ForcedGrid::new(settings.grid.clone());
            let mut world = World::new();
            grid.load_world(world.id(), Vec::new());
            let mut manager = LeaseManager::new(&mut grid, settings.lease.clone())?;

            for i in 0..anchors {
                let pos = BlockPos::new(i as i32 * 256, 64, (i as i32 % 7) * -96);
                let anchor = world.spawn(EntityKind::Anchor, pos)?;
                manager.set_forced_range(&mut grid, &mut world, anchor, CellRange::radius(radius));
            }
            let before = grid.resident_cells(world.id());
            println!("Before save: {}", ResidencyInspector::summary(&world, &manager, &grid));

            let mut store = WorldStore::open(&dir)?;
            store.save(&world, &grid.save_world(world.id()))?;
            manager.shutdown(&mut grid);
            println!("Saved to {}", store.root().display());

            let (world, grid, manager) = reload(&dir, settings)?;
            let after = grid.resident_cells(world.id());
            println!("After reload: {}", ResidencyInspector::summary(&world, &manager, &grid));
            println!(
                "Match: {}",
                if before == after { "OK" } else { "MISMATCH" }
            );
        }
        Commands::Inspect { dir } => {
            let (world, grid, manager) = reload(&dir, settings)?;
            println!("{}", ResidencyInspector::summary(&world, &manager, &grid));
            for info in ResidencyInspector::list_anchors(&world, &manager) {
                println!("  {info}");
            }
        }
    }

    Ok(())
}

/// Bring the latest save in `dir` back up in a fresh grid and reinstate its leases.
fn reload(dir: &Path, settings: Settings) -> anyhow::Result<(World, ForcedGrid, LeaseManager)> {
    let store = WorldStore::open(dir)?;
    store.verify_integrity()?;
    let save = store.load_latest()?;
    if save.corrupt_payloads > 0 {
        tracing::warn!(count = save.corrupt_payloads, "save holds unreadable lease payloads");
    }

    let mut grid = ForcedGrid::new(settings.grid);
    let mut manager = LeaseManager::new(&mut grid, settings.lease)?;
    let mut world = save.world;
    let mut batch = grid.load_world(world.id(), save.leases);
    let pending = batch.take(manager.owner());
    let report = manager.on_world_load(&mut grid, &mut world, pending);
    println!(
        "Reinstated {} lease(s), released {} orphan(s), skipped {}",
        report.reinstated, report.orphaned, report.skipped
    );
    Ok((world, grid, manager))
}
