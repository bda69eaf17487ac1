//! Live rectangular cluster grid.
//!
//! The grid splits a box into roughly `target` cells, keeping the cells'
//! aspect close to square: the ratio of cell counts along the two axes
//! follows the ratio of the spans. Bucket numbering follows
//! `PostgreSQL`'s `WIDTH_BUCKET`: buckets are 1-based, and a value on the
//! upper edge is folded into the last bucket.

use gce_map_database_models::BoundingBox;
use geo::{Coord, Polygon, Rect};

use crate::bins::CellGrid;

/// Spans narrower than this (in degrees) are widened around their center,
/// so a box holding a single building still has a usable grid.
pub const MIN_SPAN: f64 = 1e-6;

/// Rectangular binning of a bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RectGrid {
    bounds: BoundingBox,
    longitude_cells: u32,
    latitude_cells: u32,
}

impl RectGrid {
    /// Sizes a grid of about `target` cells over `bounds`.
    #[must_use]
    pub fn new(bounds: &BoundingBox, target: u32) -> Self {
        let bounds = widen(bounds);
        let aspect = bounds.width() / bounds.height();
        let target = f64::from(target.max(1));

        Self {
            bounds,
            longitude_cells: axis_cells((target * aspect).sqrt(), target),
            latitude_cells: axis_cells((target / aspect).sqrt(), target),
        }
    }

    /// The (possibly widened) box the grid covers.
    #[must_use]
    pub const fn bounds(&self) -> &BoundingBox {
        &self.bounds
    }

    /// Number of cells along the longitude axis.
    #[must_use]
    pub const fn longitude_cells(&self) -> u32 {
        self.longitude_cells
    }

    /// Number of cells along the latitude axis.
    #[must_use]
    pub const fn latitude_cells(&self) -> u32 {
        self.latitude_cells
    }

    /// Cell width in degrees of longitude.
    #[must_use]
    pub fn longitude_division(&self) -> f64 {
        self.bounds.width() / f64::from(self.longitude_cells)
    }

    /// Cell height in degrees of latitude.
    #[must_use]
    pub fn latitude_division(&self) -> f64 {
        self.bounds.height() / f64::from(self.latitude_cells)
    }

    /// 1-based `(longitude, latitude)` bucket of a point.
    #[must_use]
    pub fn bucket(&self, longitude: f64, latitude: f64) -> (u32, u32) {
        (
            width_bucket(longitude, self.bounds.west, self.bounds.east, self.longitude_cells),
            width_bucket(latitude, self.bounds.south, self.bounds.north, self.latitude_cells),
        )
    }

    /// Edges of a bucket as `(west, south, east, north)`.
    #[must_use]
    pub fn bucket_bounds(&self, bucket: (u32, u32)) -> (f64, f64, f64, f64) {
        let lng_div = self.longitude_division();
        let lat_div = self.latitude_division();
        let west = self.bounds.west + f64::from(bucket.0 - 1) * lng_div;
        let south = self.bounds.south + f64::from(bucket.1 - 1) * lat_div;
        (west, south, west + lng_div, south + lat_div)
    }
}

impl CellGrid for RectGrid {
    type Cell = (u32, u32);

    fn cell_of(&self, longitude: f64, latitude: f64) -> Self::Cell {
        self.bucket(longitude, latitude)
    }

    fn center(&self, cell: Self::Cell) -> (f64, f64) {
        let lng_div = self.longitude_division();
        let lat_div = self.latitude_division();
        (
            f64::from(cell.0).mul_add(lng_div, -lng_div / 2.0) + self.bounds.west,
            f64::from(cell.1).mul_add(lat_div, -lat_div / 2.0) + self.bounds.south,
        )
    }

    fn polygon(&self, cell: Self::Cell) -> Polygon<f64> {
        let (west, south, east, north) = self.bucket_bounds(cell);
        Rect::new(Coord { x: west, y: south }, Coord { x: east, y: north }).to_polygon()
    }
}

/// Cells along one axis, between 1 and `target`.
fn axis_cells(share: f64, target: f64) -> u32 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let cells = share.round().clamp(1.0, target) as u32;
    cells
}

fn widen(bounds: &BoundingBox) -> BoundingBox {
    let mut widened = *bounds;
    if bounds.width() < MIN_SPAN {
        let (center, _) = bounds.center();
        widened.west = center - MIN_SPAN / 2.0;
        widened.east = center + MIN_SPAN / 2.0;
    }
    if bounds.height() < MIN_SPAN {
        let (_, center) = bounds.center();
        widened.south = center - MIN_SPAN / 2.0;
        widened.north = center + MIN_SPAN / 2.0;
    }
    widened
}

/// `WIDTH_BUCKET(value, low, high, count)` clamped to `1..=count`.
fn width_bucket(value: f64, low: f64, high: f64, count: u32) -> u32 {
    let position = ((value - low) / (high - low) * f64::from(count)).floor();
    if position.is_nan() || position < 0.0 {
        return 1;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let bucket = position as u32 + 1;
    bucket.min(count)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use gce_map_database_models::{BinStats, BuildingRecord};
    use gce_map_eligibility_models::EligibilityBreakdown;
    use geo::Contains as _;

    use super::*;
    use crate::BIN_TARGET;
    use crate::bins::BinAccumulator;

    fn building(index: u32, longitude: f64, latitude: f64) -> BuildingRecord {
        BuildingRecord {
            bbl: format!("30{index:08}"),
            address: None,
            borough: Some("BK".to_string()),
            zipcode: None,
            unitsres: Some(i32::try_from(index % 37).unwrap() + 1),
            yearbuilt: Some(1900 + i32::try_from(index % 100).unwrap()),
            ownername: None,
            bldgclass: Some("C1".to_string()),
            co_bin: None,
            co_issued: (index % 5 == 0).then(|| NaiveDate::from_ymd_opt(2001, 1, 1).unwrap()),
            subsidy_name: None,
            active_421a: None,
            active_j51: None,
            post_hstpa_rs_units: Some(i32::try_from(index % 3).unwrap()),
            wow_portfolio_units: None,
            wow_portfolio_bbls: None,
            eligibility: EligibilityBreakdown {
                eligible: index % 2 == 0,
                ..EligibilityBreakdown::default()
            },
            longitude,
            latitude,
        }
    }

    fn scattered(bbox: &BoundingBox, count: u32) -> Vec<BuildingRecord> {
        (0..count)
            .map(|i| {
                let fx = f64::from((i * 7919) % 1000) / 1000.0;
                let fy = f64::from((i * 104_729) % 997) / 997.0;
                building(
                    i,
                    fx.mul_add(bbox.width(), bbox.west),
                    fy.mul_add(bbox.height(), bbox.south),
                )
            })
            .collect()
    }

    #[test]
    fn square_box_gets_a_square_grid_of_target_cells() {
        let bbox = BoundingBox::new(0.0, 0.0, 1.0, 1.0, 12.0);
        let grid = RectGrid::new(&bbox, BIN_TARGET);
        assert_eq!(grid.longitude_cells(), 24);
        assert_eq!(grid.latitude_cells(), 24);
    }

    #[test]
    fn cell_counts_follow_the_aspect_and_multiply_to_the_target() {
        let bbox = BoundingBox::new(0.0, 0.0, 3.0, 1.0, 12.0);
        let grid = RectGrid::new(&bbox, BIN_TARGET);
        assert_eq!(grid.longitude_cells(), 42);
        assert_eq!(grid.latitude_cells(), 14);

        let viewport = BoundingBox::new(-74.05, 40.6, -73.9, 40.72, 12.0);
        let grid = RectGrid::new(&viewport, BIN_TARGET);
        let total = grid.longitude_cells() * grid.latitude_cells();
        assert!(total.abs_diff(BIN_TARGET) <= 50, "{total} cells");
    }

    #[test]
    fn every_axis_gets_at_least_one_cell() {
        let bbox = BoundingBox::new(0.0, 0.0, 100.0, 0.01, 12.0);
        let grid = RectGrid::new(&bbox, 4);
        assert_eq!(grid.latitude_cells(), 1);
        assert_eq!(grid.longitude_cells(), 4);
    }

    #[test]
    fn degenerate_box_is_widened() {
        let bbox = BoundingBox::new(-73.9, 40.7, -73.9, 40.7, 12.0);
        let grid = RectGrid::new(&bbox, BIN_TARGET);
        assert!(grid.bounds().is_valid());
        assert_eq!(grid.longitude_cells(), 24);
        assert_eq!(grid.latitude_cells(), 24);

        let widened = *grid.bounds();
        assert_eq!(grid.bucket(widened.west, widened.south), (1, 1));
        assert_eq!(grid.bucket(widened.east, widened.north), (24, 24));

        let (lng, lat) = grid.bucket(-73.9, 40.7);
        assert!((12..=13).contains(&lng) && (12..=13).contains(&lat));
        let (west, south, east, north) = grid.bucket_bounds((lng, lat));
        assert!((west..=east).contains(&-73.9) && (south..=north).contains(&40.7));
        assert!(grid.longitude_division() > 0.0);
    }

    #[test]
    fn buckets_follow_width_bucket_and_clamp_edges() {
        let bbox = BoundingBox::new(0.0, 0.0, 10.0, 10.0, 12.0);
        let grid = RectGrid::new(&bbox, 4);
        assert_eq!(grid.longitude_cells(), 2);
        assert_eq!(grid.bucket(0.0, 0.0), (1, 1));
        assert_eq!(grid.bucket(4.99, 5.0), (1, 2));
        assert_eq!(grid.bucket(10.0, 10.0), (2, 2));
        assert_eq!(grid.bucket(-3.0, 12.0), (1, 2));
    }

    #[test]
    fn center_is_middle_of_bucket() {
        let bbox = BoundingBox::new(0.0, 0.0, 10.0, 10.0, 12.0);
        let grid = RectGrid::new(&bbox, 4);
        let (lng, lat) = grid.center((2, 1));
        assert!((lng - 7.5).abs() < 1e-12);
        assert!((lat - 2.5).abs() < 1e-12);
    }

    #[test]
    fn cell_polygon_contains_its_points() {
        let bbox = BoundingBox::new(-74.05, 40.6, -73.9, 40.72, 12.0);
        let grid = RectGrid::new(&bbox, BIN_TARGET);
        for record in scattered(&bbox, 200) {
            let cell = grid.cell_of(record.longitude, record.latitude);
            let (west, south, east, north) = grid.bucket_bounds(cell);
            assert!(record.longitude >= west - 1e-12 && record.longitude <= east + 1e-12);
            assert!(record.latitude >= south - 1e-12 && record.latitude <= north + 1e-12);

            let (lng, lat) = grid.center(cell);
            assert!(grid.polygon(cell).contains(&geo::Point::new(lng, lat)));
        }
    }

    #[test]
    fn binned_units_sum_to_direct_total() {
        let bbox = BoundingBox::new(-74.05, 40.6, -73.9, 40.72, 12.0);
        let records = scattered(&bbox, 2_000);

        let mut direct = BinStats::default();
        let mut bins = BinAccumulator::new(RectGrid::new(&bbox, BIN_TARGET));
        for record in &records {
            direct.add(record);
            bins.add(record);
        }

        let bins = bins.into_bins(None);
        assert!(bins.iter().all(|bin| bin.stats.bbls_count > 0));
        assert_eq!(bins.iter().map(|b| b.stats.unitsres).sum::<i64>(), direct.unitsres);
        assert_eq!(bins.iter().map(|b| b.stats.bbls_count).sum::<i64>(), direct.bbls_count);
        assert_eq!(
            bins.iter().map(|b| b.stats.eligible_units_count).sum::<i64>(),
            direct.eligible_units_count
        );
        assert_eq!(
            bins.iter().map(|b| b.stats.post_hstpa_rs_units).sum::<i64>(),
            direct.post_hstpa_rs_units
        );
    }
}
