//! Builds the precomputed hexagon layers, one per hex zoom level.
//!
//! Each layer is a hexagonal tiling whose edge length makes a default
//! 640x480 view at that zoom hold roughly [`BIN_TARGET`] cells. Every
//! tiling is anchored at the south-west corner of the materialized data, so
//! rebuilding a layer over the same buildings yields the same cells.
//!
//! All layers are filled from a single pass of the export cursor, then
//! written one transaction per layer.

use std::ops::RangeInclusive;
use std::sync::Arc;

use futures::{StreamExt as _, pin_mut};
use gce_map_database::cursor::{BuildingQuery, building_cursor};
use gce_map_database::db::DatabaseConfig;
use gce_map_database::materialize::{eligibility_extent, replace_hex_layer};
use gce_map_database_models::{BoundingBox, BuildingRecord, SpatialBin};
use gce_map_spatial::mode::{MAX_HEX_ZOOM, MIN_HEX_ZOOM};
use gce_map_spatial::{BIN_TARGET, BinAccumulator, HexGrid, MapView};
use geo::Coord;
use tokio_util::sync::CancellationToken;

use crate::GenerateError;
use crate::progress::ProgressCallback;

/// Validates a `--min-zoom`/`--max-zoom` pair.
///
/// # Errors
///
/// Returns [`GenerateError::InvalidZoomRange`] if the range is empty or
/// leaves the hex zoom levels.
pub fn zoom_range(min: u8, max: u8) -> Result<RangeInclusive<u8>, GenerateError> {
    if min > max || min < MIN_HEX_ZOOM || max > MAX_HEX_ZOOM {
        return Err(GenerateError::InvalidZoomRange { min, max });
    }
    Ok(min..=max)
}

/// The tiling of layer `zoom_level`, anchored at `extent`'s south-west
/// corner.
#[must_use]
pub fn layer_grid(zoom_level: u8, extent: &BoundingBox) -> HexGrid {
    let view = MapView {
        zoom: f64::from(zoom_level),
        ..MapView::default()
    };
    HexGrid::sized_for(&view.visible_bounds(), BIN_TARGET).with_origin(Coord {
        x: extent.west,
        y: extent.south,
    })
}

/// Per-layer accumulators fed from one pass over the buildings.
pub struct HexLayers {
    layers: Vec<(u8, BinAccumulator<HexGrid>)>,
}

impl HexLayers {
    /// One empty layer per zoom level in `zooms`.
    #[must_use]
    pub fn new(zooms: RangeInclusive<u8>, extent: &BoundingBox) -> Self {
        Self {
            layers: zooms
                .map(|zoom| (zoom, BinAccumulator::new(layer_grid(zoom, extent))))
                .collect(),
        }
    }

    /// Adds a building to every layer.
    pub fn add(&mut self, record: &BuildingRecord) {
        for (_, layer) in &mut self.layers {
            layer.add(record);
        }
    }

    /// The bins of each layer, by ascending zoom.
    #[must_use]
    pub fn into_bins(self) -> Vec<(u8, Vec<SpatialBin>)> {
        self.layers
            .into_iter()
            .map(|(zoom, layer)| (zoom, layer.into_bins(Some(zoom))))
            .collect()
    }
}

/// Rebuilds the hexagon layers in `zooms` from `gce_eligibility`.
///
/// Reads the buildings through an export cursor on one connection and
/// writes the layers on another. Returns the number of hexagons
/// written.
///
/// # Errors
///
/// Returns [`GenerateError`] if reading the buildings or writing a layer
/// fails. Layers written before the failure are kept.
pub async fn build_hex_layers(
    config: &DatabaseConfig,
    zooms: RangeInclusive<u8>,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<u64, GenerateError> {
    let writer = config.connect().await?;

    let Some(extent) = eligibility_extent(&*writer).await? else {
        log::warn!("gce_eligibility is empty; run the eligibility step first");
        progress.finish("no buildings".to_string());
        return Ok(0);
    };

    let mut layers = HexLayers::new(zooms.clone(), &extent);
    let reader = config.connect().await?;
    let records = building_cursor(reader, CancellationToken::new(), BuildingQuery::All);
    pin_mut!(records);

    progress.set_message(format!("Binning buildings for zooms {zooms:?}"));
    while let Some(record) = records.next().await {
        layers.add(&record?);
        progress.inc(1);
    }

    let mut written = 0;
    for (zoom, bins) in layers.into_bins() {
        progress.set_message(format!("Writing zoom {zoom}"));
        written += replace_hex_layer(&*writer, zoom, &bins).await?;
    }

    progress.finish(format!("{written} hexagons"));
    Ok(written)
}
