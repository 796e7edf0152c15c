//! # greenroute CLI
//!
//! Runs the canopy overlay and the green-aware routing for one AOI described
//! by a JSON config file.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use log::{error, info, LevelFilter};
use std::path::PathBuf;

use greenroute::geo_core::{bounding_box_mercator, bounding_box_osm, tile_calculator};
use greenroute::pipeline::{run_pipeline, run_routing, ProcessVectors};
use greenroute::{Route, RunConfig};

/// Command-line interface for greenroute
#[derive(Parser)]
#[command(name = "greenroute")]
#[command(about = "Green-aware walking routes from tree canopy masks and street graphs")]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct RunArgs {
    /// JSON run configuration
    #[arg(short, long)]
    config: PathBuf,

    /// Recompute stages whose output already exists
    #[arg(short, long)]
    force: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Tree polygons, buffers, clipping and greendex
    Vectors(RunArgs),
    /// Route between the configured nodes
    Route(RunArgs),
    /// Vectors followed by routing
    Run(RunArgs),
    /// Mercator extent, tile size and OSM extent of the AOI
    Tiles {
        /// JSON run configuration
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging to stderr
    env_logger::Builder::new()
        .filter_level(if cli.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .init();

    if let Err(e) = run(cli.command) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn report(route: Option<Route>) {
    match route {
        Some(route) => println!(
            "Route by {}: {} nodes, {} edges, weight {:.4}, length {:.2}",
            route.preference,
            route.nodes.len(),
            route.edges.len(),
            route.stats.total_weight,
            route.stats.total_length
        ),
        None => println!("Route already computed; use --force to recompute"),
    }
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Vectors(args) => {
            let config = RunConfig::from_file(&args.config)?;
            let edges = ProcessVectors::new(&config, args.force).process_vectors()?;
            println!("Greendex computed for {} edges", edges.len());
        }
        Command::Route(args) => {
            let config = RunConfig::from_file(&args.config)?;
            report(run_routing(&config, args.force)?);
        }
        Command::Run(args) => {
            let config = RunConfig::from_file(&args.config)?;
            report(run_pipeline(&config, args.force)?);
        }
        Command::Tiles { config } => {
            let config = RunConfig::from_file(&config)?;
            let mercator = bounding_box_mercator(&config.bbox());
            info!(
                "Mercator extent: ({}, {}) - ({}, {})",
                mercator.xmin, mercator.ymin, mercator.xmax, mercator.ymax
            );
            let (width, height) = tile_calculator(&mercator, config.resolution)?;
            let (west, south, east, north) = bounding_box_osm(&config.bbox());
            println!("EPSG:3857 extent: {} {} {} {}", mercator.xmin, mercator.ymin, mercator.xmax, mercator.ymax);
            println!("Tile size: {}x{} pixels at {} m/pixel", width, height, config.resolution);
            println!("OSM extent (W S E N): {} {} {} {}", west, south, east, north);
        }
    }
    Ok(())
}
