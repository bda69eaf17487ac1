#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! CLI that materializes building eligibility, the hexagon layers, and the
//! district overlays in `PostGIS`.

use clap::{Parser, Subcommand};
use gce_map_database::db::{ConnectionLease, DatabaseConfig};
use gce_map_database::run_migrations;
use gce_map_generate::eligibility::build_eligibility;
use gce_map_generate::hexes::{build_hex_layers, zoom_range};
use gce_map_generate::progress::{IndicatifProgress, init_logger};
use gce_map_generate::{GenerateError, build_district_stats};
use gce_map_database_models::District;
use gce_map_spatial::mode::{MAX_HEX_ZOOM, MIN_HEX_ZOOM};
use indicatif::MultiProgress;
use strum::IntoEnumIterator as _;

#[derive(Parser)]
#[command(name = "gce_map_generate", about = "Eligibility map materialization tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate every building and rebuild `gce_eligibility`
    Eligibility,
    /// Rebuild the precomputed hexagon layers
    Hexes {
        /// Lowest zoom level to rebuild
        #[arg(long, default_value_t = MIN_HEX_ZOOM)]
        min_zoom: u8,
        /// Highest zoom level to rebuild
        #[arg(long, default_value_t = MAX_HEX_ZOOM)]
        max_zoom: u8,
    },
    /// Rebuild the district overlay tables
    Districts,
    /// Run every step in order
    All,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = init_logger();
    let cli = Cli::parse();

    let config = DatabaseConfig::from_env();
    let db = config.connect().await?;
    run_migrations(&*db).await?;

    match cli.command {
        Commands::Eligibility => eligibility(&db, &multi).await?,
        Commands::Hexes { min_zoom, max_zoom } => {
            hexes(&config, &multi, min_zoom, max_zoom).await?;
        }
        Commands::Districts => districts(&db, &multi).await?,
        Commands::All => {
            eligibility(&db, &multi).await?;
            hexes(&config, &multi, MIN_HEX_ZOOM, MAX_HEX_ZOOM).await?;
            districts(&db, &multi).await?;
        }
    }

    Ok(())
}

async fn eligibility(
    db: &ConnectionLease,
    multi: &MultiProgress,
) -> Result<(), GenerateError> {
    let progress = IndicatifProgress::buildings_bar(multi, "Evaluating buildings");
    build_eligibility(&**db, &progress).await?;
    Ok(())
}

async fn hexes(
    config: &DatabaseConfig,
    multi: &MultiProgress,
    min_zoom: u8,
    max_zoom: u8,
) -> Result<(), GenerateError> {
    let zooms = zoom_range(min_zoom, max_zoom)?;
    let progress = IndicatifProgress::buildings_bar(multi, "Binning buildings");
    let written = build_hex_layers(config, zooms, &progress).await?;
    log::info!("Wrote {written} hexagons");
    Ok(())
}

async fn districts(
    db: &ConnectionLease,
    multi: &MultiProgress,
) -> Result<(), GenerateError> {
    let kinds = District::iter().count() as u64;
    let progress = IndicatifProgress::steps_bar(multi, "Districts", kinds);
    build_district_stats(&**db, &progress).await?;
    Ok(())
}
