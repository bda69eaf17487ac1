#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Viewport math and spatial binning for the eligibility map.
//!
//! Everything here is pure: the database crate feeds these helpers bounding
//! boxes and rows, and pushes the heavy aggregation into SQL using the grid
//! parameters computed here.
//!
//! * [`viewport`] turns map view parameters into a prefetch bounding box.
//! * [`mode`] decides between raw buildings and precomputed hexagons.
//! * [`grid`] sizes and buckets the live rectangular cluster grid.
//! * [`hex`] tiles the plane with hexagons for the precomputed layers.
//! * [`bins`] folds buildings into per-cell statistics for either grid.

pub mod bins;
pub mod grid;
pub mod hex;
pub mod mode;
pub mod viewport;

pub use bins::{BinAccumulator, CellGrid};
pub use grid::RectGrid;
pub use hex::{HexCell, HexGrid};
pub use mode::{ViewportMode, select_mode};
pub use viewport::MapView;

/// Target number of bins per viewport, for both the rectangular cluster
/// grid and the precomputed hexagon layers.
pub const BIN_TARGET: u32 = 24 * 24;
