//! Administrative district overlays.

use gce_map_database_models::{BoundingBox, District, DistrictStats, parse_geometry};
use moosicbox_json_utils::database::ToValue as _;
use switchy_database::{Database, DatabaseValue};

use crate::DbError;
use crate::queries::{box_params, row_to_stats};

/// Builds the query for the districts of `district` whose boundary box
/// overlaps `bbox`.
#[must_use]
pub fn district_stats_query(district: District, bbox: &BoundingBox) -> (String, Vec<DatabaseValue>) {
    let sql = format!(
        "SELECT {id} AS id, longitude, latitude, ST_AsGeoJSON(geom) AS geom_json,
                bbls_count, unitsres, post_hstpa_rs_units,
                eligible_bbls_count, eligible_units_count,
                min_co_issued::text AS min_co_issued, max_co_issued::text AS max_co_issued
         FROM {table}
         WHERE ST_MakeEnvelope($1, $2, $3, $4, 4326) && geom
         ORDER BY {id}",
        id = district.id_column(),
        table = district.stats_table(),
    );
    (sql, box_params(bbox))
}

/// Reads the precomputed stats of every district of kind `district`
/// overlapping `bbox`.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or a row cannot be converted.
pub async fn district_stats(
    db: &dyn Database,
    district: District,
    bbox: &BoundingBox,
) -> Result<Vec<DistrictStats>, DbError> {
    let (sql, params) = district_stats_query(district, bbox);
    let rows = db.query_raw_params(&sql, &params).await?;

    let mut districts = Vec::with_capacity(rows.len());
    for row in &rows {
        let geom_json: String = row
            .to_value("geom_json")
            .map_err(|e| DbError::conversion("geom_json", e))?;

        districts.push(DistrictStats {
            district,
            id: row.to_value("id").map_err(|e| DbError::conversion("id", e))?,
            longitude: row.to_value("longitude").unwrap_or(0.0),
            latitude: row.to_value("latitude").unwrap_or(0.0),
            geometry: parse_geometry(&geom_json)
                .ok_or_else(|| DbError::conversion("geom_json", "not a GeoJSON geometry"))?,
            stats: row_to_stats(row)?,
        });
    }

    log::debug!("Read {} {district} overlapping the viewport", districts.len());
    Ok(districts)
}

/// Builds the statement that recomputes every row of `district`'s stats
/// table from its boundary table and the materialized buildings.
///
/// Districts without buildings keep a row with zero counts so their
/// outline still draws.
#[must_use]
pub fn rebuild_district_stats_sql(district: District) -> String {
    format!(
        "INSERT INTO {table} ({id}, longitude, latitude, geom,
                              bbls_count, unitsres, post_hstpa_rs_units,
                              eligible_bbls_count, eligible_units_count,
                              min_co_issued, max_co_issued)
         SELECT d.{id},
                ST_X(ST_PointOnSurface(d.geom)),
                ST_Y(ST_PointOnSurface(d.geom)),
                ST_Multi(d.geom),
                COUNT(e.bbl) AS bbls_count,
                COALESCE(SUM(e.unitsres), 0)::bigint AS unitsres,
                COALESCE(SUM(e.post_hstpa_rs_units), 0)::bigint AS post_hstpa_rs_units,
                COUNT(e.bbl) FILTER (WHERE e.eligible) AS eligible_bbls_count,
                COALESCE(SUM(e.unitsres) FILTER (WHERE e.eligible), 0)::bigint
                    AS eligible_units_count,
                MIN(COALESCE(e.co_issued, make_date(NULLIF(e.yearbuilt, 0), 1, 1))),
                MAX(COALESCE(e.co_issued, make_date(NULLIF(e.yearbuilt, 0), 1, 1)))
         FROM (SELECT {id}, ST_Transform(geom, 4326) AS geom FROM {boundary}) d
         LEFT JOIN pluto_latest_districts pd ON pd.{lot} = d.{id}::text
         LEFT JOIN gce_eligibility e ON e.bbl = pd.bbl
         GROUP BY d.{id}, d.geom",
        table = district.stats_table(),
        id = district.id_column(),
        boundary = district.boundary_table(),
        lot = district.lot_column(),
    )
}

/// Replaces the stats table of `district` in one transaction.
///
/// # Errors
///
/// Returns [`DbError`] if any statement fails; the previous rows are kept.
pub async fn rebuild_district_stats(db: &dyn Database, district: District) -> Result<u64, DbError> {
    let txn = db.begin_transaction().await?;
    txn.exec_raw(&format!("DELETE FROM {}", district.stats_table()))
        .await?;
    let inserted = txn
        .exec_raw_params(&rebuild_district_stats_sql(district), &[])
        .await?;
    txn.commit().await?;

    log::info!(
        "Rebuilt {inserted} rows of {} from {}",
        district.stats_table(),
        district.boundary_table()
    );
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator as _;

    use super::*;

    #[test]
    fn stats_query_reads_the_kind_table() {
        let bbox = BoundingBox::new(-74.1, 40.6, -73.8, 40.8, 12.0);
        let (sql, params) = district_stats_query(District::CityCouncil, &bbox);

        assert!(sql.contains("FROM gce_eligibility_nycc"));
        assert!(sql.contains("coundist AS id"));
        assert!(sql.contains("&& geom"));
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn rebuild_joins_lots_by_text_district() {
        let sql = rebuild_district_stats_sql(District::Assembly);
        assert!(sql.starts_with("INSERT INTO gce_eligibility_nyad (assemdist,"));
        assert!(sql.contains("FROM nyad) d"));
        assert!(sql.contains("pd.assem_dist = d.assemdist::text"));
        assert!(sql.contains("LEFT JOIN gce_eligibility e ON e.bbl = pd.bbl"));
    }

    #[test]
    fn every_kind_has_distinct_tables() {
        let tables: std::collections::BTreeSet<_> =
            District::iter().map(District::stats_table).collect();
        assert_eq!(tables.len(), District::iter().count());

        for district in District::iter() {
            let sql = rebuild_district_stats_sql(district);
            assert!(sql.contains(district.boundary_table()));
            assert!(sql.contains(district.lot_column()));
        }
    }
}
