#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Materialization steps behind the `gce_map_generate` CLI.
//!
//! * [`eligibility`] evaluates every source building and fills
//!   `gce_eligibility`.
//! * [`hexes`] bins the materialized buildings into the per-zoom
//!   `gce_eligibility_hexes` layers.
//! * [`build_district_stats`] recomputes the district overlay tables.
//!
//! Each step reads what the previous one wrote, so `all` runs them in that
//! order.

pub mod eligibility;
pub mod hexes;
pub mod progress;

use std::sync::Arc;

use gce_map_database::DbError;
use gce_map_database::districts::rebuild_district_stats;
use gce_map_database_models::District;
use gce_map_spatial::mode::{MAX_HEX_ZOOM, MIN_HEX_ZOOM};
use strum::IntoEnumIterator as _;
use switchy_database::Database;

use crate::progress::ProgressCallback;

/// Errors that can occur while generating.
#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    /// Database error.
    #[error(transparent)]
    Database(#[from] DbError),

    /// The requested hex zoom levels don't exist.
    #[error("Invalid zoom range {min}..={max}, hexagon layers cover {MIN_HEX_ZOOM}..={MAX_HEX_ZOOM}")]
    InvalidZoomRange {
        /// Requested lowest zoom.
        min: u8,
        /// Requested highest zoom.
        max: u8,
    },
}

/// Rebuilds the stats table of every district kind. Returns the number of
/// district rows written.
///
/// # Errors
///
/// Returns [`GenerateError`] if a rebuild fails. Kinds rebuilt before the
/// failure are kept.
pub async fn build_district_stats(
    db: &dyn Database,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<u64, GenerateError> {
    let mut written = 0;
    for district in District::iter() {
        progress.set_message(format!("Rebuilding {district}"));
        written += rebuild_district_stats(db, district).await?;
        progress.inc(1);
    }
    progress.finish(format!("{written} districts"));
    Ok(written)
}
