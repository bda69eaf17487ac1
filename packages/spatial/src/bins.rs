//! Folding buildings into per-cell statistics.

use std::collections::BTreeMap;

use gce_map_database_models::{BinStats, BuildingRecord, SpatialBin};
use geo::Polygon;
use geojson::{Geometry, Value};

/// A partition of the plane into cells, each point belonging to exactly one.
pub trait CellGrid {
    /// Cell identifier.
    type Cell: Ord + Copy;

    /// The cell containing the point.
    fn cell_of(&self, longitude: f64, latitude: f64) -> Self::Cell;

    /// Center of a cell as `(longitude, latitude)`.
    fn center(&self, cell: Self::Cell) -> (f64, f64);

    /// Outline of a cell.
    fn polygon(&self, cell: Self::Cell) -> Polygon<f64>;

    /// Builds the output bin for a cell.
    fn to_bin(&self, cell: Self::Cell, stats: BinStats, zoom_level: Option<u8>) -> SpatialBin {
        let (longitude, latitude) = self.center(cell);
        SpatialBin {
            longitude,
            latitude,
            zoom_level,
            geometry: Geometry::new(Value::from(&self.polygon(cell))),
            stats,
        }
    }
}

/// Accumulates buildings into the cells of a grid. Only cells that receive
/// at least one building are emitted.
pub struct BinAccumulator<G: CellGrid> {
    grid: G,
    cells: BTreeMap<G::Cell, BinStats>,
}

impl<G: CellGrid> BinAccumulator<G> {
    /// Creates an empty accumulator over `grid`.
    #[must_use]
    pub const fn new(grid: G) -> Self {
        Self {
            grid,
            cells: BTreeMap::new(),
        }
    }

    /// Adds one building to the cell containing it.
    pub fn add(&mut self, record: &BuildingRecord) {
        let cell = self.grid.cell_of(record.longitude, record.latitude);
        self.cells.entry(cell).or_default().add(record);
    }

    /// Emits one bin per non-empty cell, in cell order.
    #[must_use]
    pub fn into_bins(self, zoom_level: Option<u8>) -> Vec<SpatialBin> {
        let Self { grid, cells } = self;
        cells
            .into_iter()
            .filter(|(_, stats)| !stats.is_empty())
            .map(|(cell, stats)| grid.to_bin(cell, stats, zoom_level))
            .collect()
    }
}
