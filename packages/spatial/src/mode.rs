//! Raw-buildings versus aggregated-bins decision.
//!
//! The decision is made on zoom alone so it costs no database round-trip.
//! Hexagon layers are precomputed for each integer zoom in
//! [`MIN_HEX_ZOOM`]`..=`[`MAX_HEX_ZOOM`]; views zoomed out further than the
//! lowest layer reuse it.

/// Lowest precomputed hexagon layer.
pub const MIN_HEX_ZOOM: u8 = 10;

/// Highest zoom served with hexagons. Anything closer gets raw buildings.
pub const MAX_HEX_ZOOM: u8 = 16;

/// What a viewport query should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewportMode {
    /// Individual building records.
    Buildings,
    /// Bins from the precomputed hexagon layer at `zoom_level`.
    Hexes {
        /// Layer key in `gce_eligibility_hexes.zoom_level`.
        zoom_level: u8,
    },
}

/// Chooses the mode for a fractional display zoom.
#[must_use]
pub fn select_mode(zoom: f64) -> ViewportMode {
    if zoom.round() <= f64::from(MAX_HEX_ZOOM) {
        ViewportMode::Hexes {
            zoom_level: hex_zoom_level(zoom),
        }
    } else {
        ViewportMode::Buildings
    }
}

/// Rounds a display zoom to the nearest precomputed layer key, clamped to
/// [`MIN_HEX_ZOOM`]`..=`[`MAX_HEX_ZOOM`]. The viewport box itself is never
/// clamped; only the layer lookup is.
#[must_use]
pub fn hex_zoom_level(zoom: f64) -> u8 {
    let rounded = zoom.round();
    if rounded.is_nan() || rounded <= f64::from(MIN_HEX_ZOOM) {
        return MIN_HEX_ZOOM;
    }
    if rounded >= f64::from(MAX_HEX_ZOOM) {
        return MAX_HEX_ZOOM;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let level = rounded as u8;
    level
}
