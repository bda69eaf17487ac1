//! Aggregated bin queries: the precomputed hexagon layers and the live
//! rectangular cluster grid.

use gce_map_database_models::{BoundingBox, SpatialBin, parse_geometry};
use gce_map_spatial::{CellGrid, RectGrid};
use moosicbox_json_utils::database::ToValue as _;
use switchy_database::{Database, DatabaseValue};

use crate::DbError;
use crate::queries::{BIN_STATS_AGGREGATES, STRICT_BOX_FILTER, box_params, row_to_stats};

/// Stats columns stored on every precomputed bin row.
const STORED_STATS_COLUMNS: &str = "bbls_count, unitsres, post_hstpa_rs_units, \
     eligible_bbls_count, eligible_units_count, \
     min_co_issued::text AS min_co_issued, max_co_issued::text AS max_co_issued";

/// Builds the query for the hexagons of layer `zoom_level` overlapping
/// `bbox`. Hexagons straddling the box edge are included so panning never
/// reveals a gap.
#[must_use]
pub fn hexes_query(bbox: &BoundingBox, zoom_level: u8) -> (String, Vec<DatabaseValue>) {
    let sql = format!(
        "SELECT zoom_level, longitude, latitude, ST_AsGeoJSON(geom) AS geom_json,
                {STORED_STATS_COLUMNS}
         FROM gce_eligibility_hexes
         WHERE zoom_level = $5
           AND geom && ST_MakeEnvelope($1, $2, $3, $4, 4326)"
    );
    let mut params = box_params(bbox);
    params.push(DatabaseValue::Int32(i32::from(zoom_level)));
    (sql, params)
}

/// Reads the precomputed hexagons of layer `zoom_level` overlapping `bbox`.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or a row cannot be converted.
pub async fn hexes(
    db: &dyn Database,
    bbox: &BoundingBox,
    zoom_level: u8,
) -> Result<Vec<SpatialBin>, DbError> {
    let (sql, params) = hexes_query(bbox, zoom_level);
    let rows = db.query_raw_params(&sql, &params).await?;

    let mut bins = Vec::with_capacity(rows.len());
    for row in &rows {
        let geom_json: String = row
            .to_value("geom_json")
            .map_err(|e| DbError::conversion("geom_json", e))?;
        let geometry = parse_geometry(&geom_json)
            .ok_or_else(|| DbError::conversion("geom_json", "not a GeoJSON geometry"))?;

        bins.push(SpatialBin {
            longitude: row
                .to_value("longitude")
                .map_err(|e| DbError::conversion("longitude", e))?,
            latitude: row
                .to_value("latitude")
                .map_err(|e| DbError::conversion("latitude", e))?,
            zoom_level: Some(zoom_level),
            geometry,
            stats: row_to_stats(row)?,
        });
    }

    log::debug!("Read {} hexes at zoom level {zoom_level}", bins.len());
    Ok(bins)
}

/// Builds the live cluster query: a 2D histogram of the buildings strictly
/// inside `bbox` over `grid`, one row per non-empty bucket.
///
/// Bucket numbering matches [`RectGrid::bucket`]: `WIDTH_BUCKET` clamped to
/// `1..=cells`.
#[must_use]
pub fn clusters_query(bbox: &BoundingBox, grid: &RectGrid) -> (String, Vec<DatabaseValue>) {
    let sql = format!(
        "SELECT GREATEST(LEAST(WIDTH_BUCKET(e.longitude, $5, $6, $7::integer), $7::integer), 1)
                    AS longitude_bucket,
                GREATEST(LEAST(WIDTH_BUCKET(e.latitude, $8, $9, $10::integer), $10::integer), 1)
                    AS latitude_bucket,
                {BIN_STATS_AGGREGATES}
         FROM gce_eligibility e
         WHERE {STRICT_BOX_FILTER}
         GROUP BY 1, 2
         HAVING COUNT(*) > 0
         ORDER BY 1, 2"
    );

    let bounds = grid.bounds();
    let mut params = box_params(bbox);
    params.extend([
        DatabaseValue::Real64(bounds.west),
        DatabaseValue::Real64(bounds.east),
        DatabaseValue::Int32(cells_param(grid.longitude_cells())),
        DatabaseValue::Real64(bounds.south),
        DatabaseValue::Real64(bounds.north),
        DatabaseValue::Int32(cells_param(grid.latitude_cells())),
    ]);
    (sql, params)
}

fn cells_param(cells: u32) -> i32 {
    i32::try_from(cells).unwrap_or(i32::MAX)
}

/// Aggregates the buildings strictly inside `bbox` into the cells of a
/// rectangular grid laid over `grid`'s bounds.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or a row cannot be converted.
pub async fn clusters(
    db: &dyn Database,
    bbox: &BoundingBox,
    grid: &RectGrid,
) -> Result<Vec<SpatialBin>, DbError> {
    let (sql, params) = clusters_query(bbox, grid);
    let rows = db.query_raw_params(&sql, &params).await?;

    let mut bins = Vec::with_capacity(rows.len());
    for row in &rows {
        let longitude_bucket: i32 = row
            .to_value("longitude_bucket")
            .map_err(|e| DbError::conversion("longitude_bucket", e))?;
        let latitude_bucket: i32 = row
            .to_value("latitude_bucket")
            .map_err(|e| DbError::conversion("latitude_bucket", e))?;
        let cell = (
            u32::try_from(longitude_bucket)
                .map_err(|e| DbError::conversion("longitude_bucket", e))?,
            u32::try_from(latitude_bucket)
                .map_err(|e| DbError::conversion("latitude_bucket", e))?,
        );

        let stats = row_to_stats(row)?;
        if stats.is_empty() {
            continue;
        }
        bins.push(grid.to_bin(cell, stats, None));
    }

    log::debug!(
        "Aggregated {} clusters on a {}x{} grid",
        bins.len(),
        grid.longitude_cells(),
        grid.latitude_cells()
    );
    Ok(bins)
}

#[cfg(test)]
mod tests {
    use gce_map_spatial::BIN_TARGET;

    use super::*;

    #[test]
    fn hexes_query_filters_by_layer_and_overlap() {
        let bbox = BoundingBox::new(-74.1, 40.6, -73.8, 40.8, 12.3);
        let (sql, params) = hexes_query(&bbox, 12);

        assert!(sql.contains("FROM gce_eligibility_hexes"));
        assert!(sql.contains("zoom_level = $5"));
        assert!(sql.contains("geom && ST_MakeEnvelope($1, $2, $3, $4, 4326)"));
        assert!(sql.contains("ST_AsGeoJSON(geom) AS geom_json"));
        assert_eq!(params.len(), 5);
        assert!(matches!(params[4], DatabaseValue::Int32(12)));
    }

    #[test]
    fn clusters_query_binds_grid_shape() {
        let bbox = BoundingBox::new(-74.1, 40.6, -73.8, 40.8, 13.0);
        let extent = BoundingBox::new(-74.0, 40.65, -73.85, 40.75, 13.0);
        let grid = RectGrid::new(&extent, BIN_TARGET);
        let (sql, params) = clusters_query(&bbox, &grid);

        assert!(sql.contains("WIDTH_BUCKET(e.longitude, $5, $6, $7::integer)"));
        assert!(sql.contains("WIDTH_BUCKET(e.latitude, $8, $9, $10::integer)"));
        assert!(sql.contains("HAVING COUNT(*) > 0"));
        assert!(sql.contains("GROUP BY 1, 2"));
        assert_eq!(params.len(), 10);

        let longitude_cells = i32::try_from(grid.longitude_cells()).unwrap();
        let latitude_cells = i32::try_from(grid.latitude_cells()).unwrap();
        assert!(matches!(params[6], DatabaseValue::Int32(n) if n == longitude_cells));
        assert!(matches!(params[9], DatabaseValue::Int32(n) if n == latitude_cells));
        assert!(matches!(params[4], DatabaseValue::Real64(v) if (v - -74.0).abs() < 1e-12));
    }

    #[test]
    fn oversized_cell_counts_saturate() {
        assert_eq!(cells_param(24), 24);
        assert_eq!(cells_param(u32::MAX), i32::MAX);
    }
}
