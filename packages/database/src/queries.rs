//! Building record queries against the materialized `gce_eligibility`
//! table.
//!
//! Boxes are matched with an index-friendly `&&` envelope test plus a
//! strict comparison on the stored longitude/latitude, so a building that
//! sits exactly on an edge belongs to neither neighbouring box.

use chrono::NaiveDate;
use gce_map_database_models::{BinStats, BoundingBox, BuildingRecord};
use gce_map_eligibility_models::EligibilityBreakdown;
use moosicbox_json_utils::database::ToValue as _;
use switchy_database::{Database, DatabaseValue, Row};

use crate::DbError;

/// Columns of a [`BuildingRecord`], read from `gce_eligibility` aliased as
/// `e`. Dates come back as text to keep the row conversion driver-neutral.
pub const BUILDING_COLUMNS: &str = "e.bbl, e.address, e.borough, e.zipcode, e.unitsres, \
     e.yearbuilt, e.ownername, e.bldgclass, e.co_bin, e.co_issued::text AS co_issued, \
     e.subsidy_name, e.active_421a, e.active_j51, e.post_hstpa_rs_units, \
     e.wow_portfolio_units, e.wow_portfolio_bbls, e.eligible_bldgclass, e.eligible_co, \
     e.eligible_rent_stab, e.eligible_subsidy, e.eligible_portfolio_size, e.eligible, \
     e.longitude, e.latitude";

/// Aggregate columns shared by every bin query over `gce_eligibility e`.
pub const BIN_STATS_AGGREGATES: &str = "COUNT(*) AS bbls_count, \
     COALESCE(SUM(e.unitsres), 0)::bigint AS unitsres, \
     COALESCE(SUM(e.post_hstpa_rs_units), 0)::bigint AS post_hstpa_rs_units, \
     COUNT(*) FILTER (WHERE e.eligible) AS eligible_bbls_count, \
     COALESCE(SUM(e.unitsres) FILTER (WHERE e.eligible), 0)::bigint AS eligible_units_count, \
     MIN(COALESCE(e.co_issued, make_date(NULLIF(e.yearbuilt, 0), 1, 1)))::text AS min_co_issued, \
     MAX(COALESCE(e.co_issued, make_date(NULLIF(e.yearbuilt, 0), 1, 1)))::text AS max_co_issued";

/// The part of a box that actually holds buildings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataExtent {
    /// Min/max longitude and latitude of the buildings strictly inside the
    /// queried box, carrying that box's zoom. It lies within the queried
    /// box, so it is already the intersection of the two.
    pub bounds: BoundingBox,
    /// Number of buildings strictly inside the queried box.
    pub buildings_count: i64,
}

/// `WHERE` clause matching buildings strictly inside the box bound to
/// `$1..$4` as west, south, east, north.
pub const STRICT_BOX_FILTER: &str = "e.geom && ST_MakeEnvelope($1, $2, $3, $4, 4326) \
     AND e.longitude > $1 AND e.latitude > $2 AND e.longitude < $3 AND e.latitude < $4";

/// Binds a box as `$1..$4` for [`STRICT_BOX_FILTER`].
#[must_use]
pub fn box_params(bbox: &BoundingBox) -> Vec<DatabaseValue> {
    vec![
        DatabaseValue::Real64(bbox.west),
        DatabaseValue::Real64(bbox.south),
        DatabaseValue::Real64(bbox.east),
        DatabaseValue::Real64(bbox.north),
    ]
}

/// Finds where the buildings inside `bbox` actually are.
///
/// Returns `None` when the box holds no buildings.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or a column cannot be read.
pub async fn data_extent(
    db: &dyn Database,
    bbox: &BoundingBox,
) -> Result<Option<DataExtent>, DbError> {
    let sql = format!(
        "SELECT MIN(e.longitude) AS west, MIN(e.latitude) AS south,
                MAX(e.longitude) AS east, MAX(e.latitude) AS north,
                COUNT(*) AS buildings_count
         FROM gce_eligibility e
         WHERE {STRICT_BOX_FILTER}"
    );
    let rows = db.query_raw_params(&sql, &box_params(bbox)).await?;

    let Some(row) = rows.first() else {
        return Ok(None);
    };

    let buildings_count: i64 = row
        .to_value("buildings_count")
        .map_err(|e| DbError::conversion("buildings_count", e))?;
    if buildings_count == 0 {
        return Ok(None);
    }

    let west: f64 = row.to_value("west").map_err(|e| DbError::conversion("west", e))?;
    let south: f64 = row.to_value("south").map_err(|e| DbError::conversion("south", e))?;
    let east: f64 = row.to_value("east").map_err(|e| DbError::conversion("east", e))?;
    let north: f64 = row.to_value("north").map_err(|e| DbError::conversion("north", e))?;

    Ok(Some(DataExtent {
        bounds: BoundingBox::new(west, south, east, north, bbox.zoom),
        buildings_count,
    }))
}

/// Builds the record query for buildings strictly inside `bbox`, using
/// `envelope` (normally the data extent) to narrow the index scan.
#[must_use]
pub fn buildings_in_bbox_query(
    bbox: &BoundingBox,
    envelope: &BoundingBox,
) -> (String, Vec<DatabaseValue>) {
    let sql = format!(
        "SELECT {BUILDING_COLUMNS}
         FROM gce_eligibility e
         WHERE {STRICT_BOX_FILTER}
           AND e.geom && ST_MakeEnvelope($5, $6, $7, $8, 4326)
         ORDER BY e.bbl"
    );
    let mut params = box_params(bbox);
    params.extend(box_params(envelope));
    (sql, params)
}

/// Fetches every building strictly inside `bbox`.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or a row cannot be converted.
pub async fn buildings_in_bbox(
    db: &dyn Database,
    bbox: &BoundingBox,
    envelope: &BoundingBox,
) -> Result<Vec<BuildingRecord>, DbError> {
    let (sql, params) = buildings_in_bbox_query(bbox, envelope);
    let rows = db.query_raw_params(&sql, &params).await?;
    rows.iter().map(row_to_building).collect()
}

/// Converts a row selected with [`BUILDING_COLUMNS`].
///
/// # Errors
///
/// Returns [`DbError::Conversion`] if `bbl` or the coordinates are missing
/// or malformed.
pub fn row_to_building(row: &Row) -> Result<BuildingRecord, DbError> {
    let co_issued: Option<String> = row.to_value("co_issued").unwrap_or(None);

    Ok(BuildingRecord {
        bbl: row.to_value("bbl").map_err(|e| DbError::conversion("bbl", e))?,
        address: row.to_value("address").unwrap_or(None),
        borough: row.to_value("borough").unwrap_or(None),
        zipcode: row.to_value("zipcode").unwrap_or(None),
        unitsres: row.to_value("unitsres").unwrap_or(None),
        yearbuilt: row.to_value("yearbuilt").unwrap_or(None),
        ownername: row.to_value("ownername").unwrap_or(None),
        bldgclass: row.to_value("bldgclass").unwrap_or(None),
        co_bin: row.to_value("co_bin").unwrap_or(None),
        co_issued: parse_date(co_issued.as_deref()),
        subsidy_name: row.to_value("subsidy_name").unwrap_or(None),
        active_421a: row.to_value("active_421a").unwrap_or(None),
        active_j51: row.to_value("active_j51").unwrap_or(None),
        post_hstpa_rs_units: row.to_value("post_hstpa_rs_units").unwrap_or(None),
        wow_portfolio_units: row.to_value("wow_portfolio_units").unwrap_or(None),
        wow_portfolio_bbls: row.to_value("wow_portfolio_bbls").unwrap_or(None),
        eligibility: EligibilityBreakdown {
            eligible_bldgclass: row.to_value("eligible_bldgclass").unwrap_or(false),
            eligible_co: row.to_value("eligible_co").unwrap_or(false),
            eligible_rent_stab: row.to_value("eligible_rent_stab").unwrap_or(false),
            eligible_subsidy: row.to_value("eligible_subsidy").unwrap_or(false),
            eligible_portfolio_size: row.to_value("eligible_portfolio_size").unwrap_or(false),
            eligible: row.to_value("eligible").unwrap_or(false),
        },
        longitude: row
            .to_value("longitude")
            .map_err(|e| DbError::conversion("longitude", e))?,
        latitude: row
            .to_value("latitude")
            .map_err(|e| DbError::conversion("latitude", e))?,
    })
}

/// Converts the columns produced by [`BIN_STATS_AGGREGATES`] (or stored
/// with the same names in a precomputed table).
///
/// # Errors
///
/// Returns [`DbError::Conversion`] if a count column is missing.
pub fn row_to_stats(row: &Row) -> Result<BinStats, DbError> {
    let min_co_issued: Option<String> = row.to_value("min_co_issued").unwrap_or(None);
    let max_co_issued: Option<String> = row.to_value("max_co_issued").unwrap_or(None);

    Ok(BinStats {
        bbls_count: row
            .to_value("bbls_count")
            .map_err(|e| DbError::conversion("bbls_count", e))?,
        unitsres: row.to_value("unitsres").unwrap_or(0),
        post_hstpa_rs_units: row.to_value("post_hstpa_rs_units").unwrap_or(0),
        eligible_bbls_count: row.to_value("eligible_bbls_count").unwrap_or(0),
        eligible_units_count: row.to_value("eligible_units_count").unwrap_or(0),
        min_co_issued: parse_date(min_co_issued.as_deref()),
        max_co_issued: parse_date(max_co_issued.as_deref()),
    })
}

/// Parses a `date::text` value (`YYYY-MM-DD`). Anything else is treated as
/// unknown.
#[must_use]
pub fn parse_date(value: Option<&str>) -> Option<NaiveDate> {
    value.and_then(|v| NaiveDate::parse_from_str(v.trim(), "%Y-%m-%d").ok())
}

/// Binds an optional date as text for a `$n::date` placeholder.
#[must_use]
pub fn date_param(value: Option<NaiveDate>) -> DatabaseValue {
    value.map_or(DatabaseValue::Null, |d| {
        DatabaseValue::String(d.format("%Y-%m-%d").to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_postgres_date_text() {
        assert_eq!(
            parse_date(Some("1931-06-02")),
            NaiveDate::from_ymd_opt(1931, 6, 2)
        );
        assert_eq!(parse_date(Some("")), None);
        assert_eq!(parse_date(Some("infinity")), None);
        assert_eq!(parse_date(None), None);
    }

    #[test]
    fn date_param_round_trips_through_text() {
        let date = NaiveDate::from_ymd_opt(2008, 12, 31);
        let DatabaseValue::String(text) = date_param(date) else {
            panic!("expected a string parameter");
        };
        assert_eq!(parse_date(Some(&text)), date);
        assert!(matches!(date_param(None), DatabaseValue::Null));
    }

    #[test]
    fn box_filter_is_strict_and_indexed() {
        assert!(STRICT_BOX_FILTER.contains("e.geom && ST_MakeEnvelope($1, $2, $3, $4, 4326)"));
        assert!(STRICT_BOX_FILTER.contains("e.longitude > $1"));
        assert!(STRICT_BOX_FILTER.contains("e.latitude < $4"));
        assert!(!STRICT_BOX_FILTER.contains(">="));
        assert!(!STRICT_BOX_FILTER.contains("<="));
    }

    #[test]
    fn record_query_binds_box_then_envelope() {
        let bbox = BoundingBox::new(-74.0, 40.6, -73.9, 40.7, 17.0);
        let extent = BoundingBox::new(-73.98, 40.61, -73.91, 40.69, 17.0);
        let (sql, params) = buildings_in_bbox_query(&bbox, &extent);

        assert!(sql.contains("FROM gce_eligibility e"));
        assert!(sql.contains("ST_MakeEnvelope($5, $6, $7, $8, 4326)"));
        assert!(sql.contains("e.eligible,"));
        assert_eq!(params.len(), 8);
        assert!(matches!(params[0], DatabaseValue::Real64(v) if (v - -74.0).abs() < f64::EPSILON));
        assert!(matches!(params[4], DatabaseValue::Real64(v) if (v - -73.98).abs() < f64::EPSILON));
    }

    #[test]
    fn every_exported_column_is_selected() {
        for column in [
            "bbl",
            "address",
            "borough",
            "zipcode",
            "unitsres",
            "yearbuilt",
            "ownername",
            "bldgclass",
            "co_bin",
            "co_issued",
            "subsidy_name",
            "active_421a",
            "active_j51",
            "post_hstpa_rs_units",
            "wow_portfolio_units",
            "wow_portfolio_bbls",
            "eligible_bldgclass",
            "eligible_co",
            "eligible_rent_stab",
            "eligible_subsidy",
            "eligible_portfolio_size",
            "longitude",
            "latitude",
        ] {
            assert!(
                BUILDING_COLUMNS.contains(&format!("e.{column}")),
                "{column} missing"
            );
        }
    }
}
