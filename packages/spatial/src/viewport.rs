//! Map viewport to bounding box resolution.
//!
//! Mirrors what a Web Mercator slippy map of a given pixel size displays
//! around a center point, then pads the box so content just off screen is
//! already loaded when the user pans.

use std::f64::consts::PI;

use gce_map_database_models::BoundingBox;

/// Zoom used when the request has none.
pub const DEFAULT_ZOOM: f64 = 11.0;
/// Latitude used when the request has none (central Brooklyn).
pub const DEFAULT_LATITUDE: f64 = 40.653_632;
/// Longitude used when the request has none (central Brooklyn).
pub const DEFAULT_LONGITUDE: f64 = -73.957_117;
/// Map width in pixels used when the request has none.
pub const DEFAULT_MAP_WIDTH: f64 = 640.0;
/// Map height in pixels used when the request has none.
pub const DEFAULT_MAP_HEIGHT: f64 = 480.0;

/// Fraction of the visible span added to each edge.
pub const PREFETCH_MARGIN: f64 = 0.1;

/// Pixel size of a map tile at zoom 0.
const TILE_SIZE: f64 = 256.0;

/// Latitude limit of the Web Mercator projection.
const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// What the map is showing: center, zoom, and pixel dimensions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapView {
    /// Fractional zoom level.
    pub zoom: f64,
    /// Center latitude.
    pub latitude: f64,
    /// Center longitude.
    pub longitude: f64,
    /// Map width in pixels.
    pub map_width: f64,
    /// Map height in pixels.
    pub map_height: f64,
}

impl Default for MapView {
    fn default() -> Self {
        Self {
            zoom: DEFAULT_ZOOM,
            latitude: DEFAULT_LATITUDE,
            longitude: DEFAULT_LONGITUDE,
            map_width: DEFAULT_MAP_WIDTH,
            map_height: DEFAULT_MAP_HEIGHT,
        }
    }
}

impl MapView {
    /// Builds a view from raw query-string values. Missing, unparseable,
    /// or non-finite values fall back to the defaults, as do non-positive
    /// map dimensions.
    #[must_use]
    pub fn from_params(
        zoom: Option<&str>,
        latitude: Option<&str>,
        longitude: Option<&str>,
        map_width: Option<&str>,
        map_height: Option<&str>,
    ) -> Self {
        Self {
            zoom: parse_f64_or(zoom, DEFAULT_ZOOM),
            latitude: parse_f64_or(latitude, DEFAULT_LATITUDE),
            longitude: parse_f64_or(longitude, DEFAULT_LONGITUDE),
            map_width: positive_or(parse_f64_or(map_width, DEFAULT_MAP_WIDTH), DEFAULT_MAP_WIDTH),
            map_height: positive_or(
                parse_f64_or(map_height, DEFAULT_MAP_HEIGHT),
                DEFAULT_MAP_HEIGHT,
            ),
        }
    }

    /// The box the map displays, without any prefetch margin.
    #[must_use]
    pub fn visible_bounds(&self) -> BoundingBox {
        let world = TILE_SIZE * self.zoom.exp2();
        let (center_x, center_y) = project(self.longitude, self.latitude, world);

        let half_width = self.map_width / 2.0;
        let half_height = self.map_height / 2.0;

        let (west, north) = unproject(center_x - half_width, center_y - half_height, world);
        let (east, south) = unproject(center_x + half_width, center_y + half_height, world);

        BoundingBox::new(west, south, east, north, self.zoom)
    }

    /// The box to query: the visible box grown by [`PREFETCH_MARGIN`] of
    /// its span on each side.
    #[must_use]
    pub fn resolve(&self) -> BoundingBox {
        let bbox = self.visible_bounds().expand(PREFETCH_MARGIN);
        log::debug!(
            "Resolved viewport z{:.2} ({}, {}) {}x{} to [{}, {}, {}, {}]",
            self.zoom,
            self.longitude,
            self.latitude,
            self.map_width,
            self.map_height,
            bbox.west,
            bbox.south,
            bbox.east,
            bbox.north,
        );
        bbox
    }
}

/// Parses a float, falling back to `default` when the value is missing,
/// unparseable, or not finite.
#[must_use]
pub fn parse_f64_or(value: Option<&str>, default: f64) -> f64 {
    value
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

fn positive_or(value: f64, default: f64) -> f64 {
    if value > 0.0 { value } else { default }
}

/// Projects WGS84 degrees to Web Mercator pixels in a world `world` pixels
/// wide.
fn project(longitude: f64, latitude: f64, world: f64) -> (f64, f64) {
    let phi = latitude.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
    let x = (longitude + 180.0) / 360.0 * world;
    let y = (0.5 - (PI / 4.0 + phi / 2.0).tan().ln() / (2.0 * PI)) * world;
    (x, y)
}

/// Inverse of [`project`]. Vertical pixels are clamped to the world.
fn unproject(x: f64, y: f64, world: f64) -> (f64, f64) {
    let y = y.clamp(0.0, world);
    let longitude = x / world * 360.0 - 180.0;
    let latitude = (2.0 * (PI * (1.0 - 2.0 * y / world)).exp().atan() - PI / 2.0).to_degrees();
    (longitude, latitude)
}
