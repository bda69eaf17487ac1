//! Hexagonal tiling for the precomputed zoom layers.
//!
//! Pointy-top hexagons in axial coordinates, laid out directly in degree
//! space from a fixed origin so every building falls in exactly one cell.

use gce_map_database_models::BoundingBox;
use geo::{Coord, LineString, Polygon};

use crate::bins::CellGrid;

const SQRT_3: f64 = 1.732_050_807_568_877_2;

/// Axial coordinates of a hexagon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HexCell {
    /// Column.
    pub q: i64,
    /// Row.
    pub r: i64,
}

/// A hexagonal tiling with edge length `size` degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HexGrid {
    origin: Coord<f64>,
    size: f64,
}

impl HexGrid {
    /// Creates a tiling anchored at `origin` with edge length `size`.
    #[must_use]
    pub const fn new(origin: Coord<f64>, size: f64) -> Self {
        Self { origin, size }
    }

    /// Sizes a tiling for `bounds` so the edge length is
    /// `sqrt(area / target_cells)`, anchored at the box's south-west corner.
    #[must_use]
    pub fn sized_for(bounds: &BoundingBox, target_cells: u32) -> Self {
        let size = (bounds.area() / f64::from(target_cells.max(1))).sqrt();
        Self::new(
            Coord {
                x: bounds.west,
                y: bounds.south,
            },
            size,
        )
    }

    /// Edge length in degrees.
    #[must_use]
    pub const fn size(&self) -> f64 {
        self.size
    }

    /// Same edge length, different anchor.
    #[must_use]
    pub const fn with_origin(self, origin: Coord<f64>) -> Self {
        Self { origin, ..self }
    }
}

impl CellGrid for HexGrid {
    type Cell = HexCell;

    fn cell_of(&self, longitude: f64, latitude: f64) -> HexCell {
        let x = longitude - self.origin.x;
        let y = latitude - self.origin.y;
        let q = (SQRT_3 / 3.0).mul_add(x, -y / 3.0) / self.size;
        let r = (2.0 / 3.0) * y / self.size;
        cube_round(q, r)
    }

    fn center(&self, cell: HexCell) -> (f64, f64) {
        #[allow(clippy::cast_precision_loss)]
        let (q, r) = (cell.q as f64, cell.r as f64);
        (
            self.size * SQRT_3 * r.mul_add(0.5, q) + self.origin.x,
            self.size * 1.5 * r + self.origin.y,
        )
    }

    fn polygon(&self, cell: HexCell) -> Polygon<f64> {
        let (cx, cy) = self.center(cell);
        let ring: Vec<Coord<f64>> = (0..6)
            .map(|corner| {
                let angle = f64::from(60 * corner - 30).to_radians();
                Coord {
                    x: self.size.mul_add(angle.cos(), cx),
                    y: self.size.mul_add(angle.sin(), cy),
                }
            })
            .collect();
        Polygon::new(LineString::from(ring), Vec::new())
    }
}

/// Rounds fractional axial coordinates to the nearest hexagon.
#[allow(clippy::cast_possible_truncation)]
fn cube_round(q: f64, r: f64) -> HexCell {
    let s = -q - r;
    let mut rq = q.round();
    let mut rr = r.round();
    let rs = s.round();

    let dq = (rq - q).abs();
    let dr = (rr - r).abs();
    let ds = (rs - s).abs();

    if dq > dr && dq > ds {
        rq = -rr - rs;
    } else if dr > ds {
        rr = -rq - rs;
    }

    HexCell {
        q: rq as i64,
        r: rr as i64,
    }
}
