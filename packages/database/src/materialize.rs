//! Writes for the generator: reading the source tables, materializing
//! `gce_eligibility`, and replacing precomputed hexagon layers.

use chrono::NaiveDate;
use gce_map_database_models::{BoundingBox, BuildingRecord, SpatialBin};
use gce_map_eligibility_models::{BuildingFacts, SubsidyFlags, SubsidyProgram, evaluate};
use moosicbox_json_utils::database::ToValue as _;
use switchy_database::{Database, DatabaseValue, Row};

use crate::DbError;
use crate::queries::{date_param, parse_date};

/// Source rows read per keyset page.
pub const SOURCE_BATCH_SIZE: i64 = 1_000;

/// Rows written per multi-row `INSERT`.
pub const INSERT_CHUNK_SIZE: usize = 500;

const BUILDING_INSERT_COLUMNS: &[&str] = &[
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
    "eligible",
    "longitude",
    "latitude",
];

const HEX_INSERT_COLUMNS: &[&str] = &[
    "zoom_level",
    "longitude",
    "latitude",
    "geom",
    "bbls_count",
    "unitsres",
    "post_hstpa_rs_units",
    "eligible_bbls_count",
    "eligible_units_count",
    "min_co_issued",
    "max_co_issued",
];

/// One building as found in the source tables, before the eligibility
/// rule is applied.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceBuilding {
    /// Borough-block-lot identifier.
    pub bbl: String,
    /// Street address.
    pub address: Option<String>,
    /// Borough code.
    pub borough: Option<String>,
    /// ZIP code.
    pub zipcode: Option<String>,
    /// Residential units.
    pub unitsres: Option<i32>,
    /// Year built (`0` when unknown).
    pub yearbuilt: Option<i32>,
    /// Owner name.
    pub ownername: Option<String>,
    /// Building class code.
    pub bldgclass: Option<String>,
    /// BIN on the earliest certificate of occupancy.
    pub co_bin: Option<String>,
    /// Issue date of the earliest certificate of occupancy.
    pub co_issued: Option<NaiveDate>,
    /// Receives a 421-a exemption.
    pub active_421a: Option<bool>,
    /// Receives a J-51 exemption.
    pub active_j51: Option<bool>,
    /// Rent-stabilized units registered after the 2019 HSTPA.
    pub post_hstpa_rs_units: Option<i32>,
    /// Units owned by the same landlord portfolio.
    pub wow_portfolio_units: Option<i64>,
    /// Buildings owned by the same landlord portfolio.
    pub wow_portfolio_bbls: Option<i64>,
    /// Subsidy programs flagging the building.
    pub subsidies: SubsidyFlags,
    /// Longitude (WGS84).
    pub longitude: f64,
    /// Latitude (WGS84).
    pub latitude: f64,
}

impl SourceBuilding {
    /// The attributes the eligibility rule reads.
    #[must_use]
    pub fn facts(&self) -> BuildingFacts<'_> {
        BuildingFacts {
            bldgclass: self.bldgclass.as_deref(),
            yearbuilt: self.yearbuilt,
            co_issued: self.co_issued,
            unitsres: self.unitsres,
            post_hstpa_rs_units: self.post_hstpa_rs_units,
            subsidies: self.subsidies,
        }
    }

    /// Applies the eligibility rule and produces the row to materialize.
    #[must_use]
    pub fn into_record(self) -> BuildingRecord {
        let eligibility = evaluate(&self.facts());
        BuildingRecord {
            subsidy_name: self.subsidies.describe(),
            bbl: self.bbl,
            address: self.address,
            borough: self.borough,
            zipcode: self.zipcode,
            unitsres: self.unitsres,
            yearbuilt: self.yearbuilt,
            ownername: self.ownername,
            bldgclass: self.bldgclass,
            co_bin: self.co_bin,
            co_issued: self.co_issued,
            active_421a: self.active_421a,
            active_j51: self.active_j51,
            post_hstpa_rs_units: self.post_hstpa_rs_units,
            wow_portfolio_units: self.wow_portfolio_units,
            wow_portfolio_bbls: self.wow_portfolio_bbls,
            eligibility,
            longitude: self.longitude,
            latitude: self.latitude,
        }
    }
}

/// Builds the keyset page query over the source tables: PLUTO lots with a
/// location, joined to their earliest certificate of occupancy, subsidy
/// flags, rent stabilization counts, and landlord portfolio sizes.
#[must_use]
pub fn source_page_query(after_bbl: Option<&str>, limit: i64) -> (String, Vec<DatabaseValue>) {
    let subsidy_columns = SubsidyProgram::all()
        .into_iter()
        .map(|program| {
            let column = program.column();
            format!("COALESCE(s.{column}, false) AS {column}")
        })
        .collect::<Vec<_>>()
        .join(",\n                ");

    let sql = format!(
        "SELECT p.bbl::text AS bbl, p.address, p.borough, p.zipcode::text AS zipcode,
                p.unitsres::int AS unitsres, p.yearbuilt::int AS yearbuilt,
                p.ownername, p.bldgclass,
                p.longitude::float8 AS longitude, p.latitude::float8 AS latitude,
                co.bin AS co_bin, co.issued::text AS co_issued,
                COALESCE(s.data421a, false) AS active_421a,
                COALESCE(s.dataj51, false) AS active_j51,
                {subsidy_columns},
                rs.uc2022::int AS post_hstpa_rs_units,
                w.portfolio_units::bigint AS wow_portfolio_units,
                w.portfolio_bbls::bigint AS wow_portfolio_bbls
         FROM pluto_latest p
         LEFT JOIN LATERAL (
             SELECT c.bin::text AS bin, c.issuedate AS issued
             FROM dob_certificate_occupancy c
             WHERE c.bbl = p.bbl
             ORDER BY c.issuedate ASC
             LIMIT 1
         ) co ON TRUE
         LEFT JOIN fc_shd_building s ON s.bbl = p.bbl
         LEFT JOIN rentstab_v2 rs ON rs.ucbbl = p.bbl
         LEFT JOIN wow_portfolio_bbls w ON w.bbl = p.bbl
         WHERE p.longitude IS NOT NULL
           AND p.latitude IS NOT NULL
           AND p.bbl::text > $1
         ORDER BY p.bbl::text
         LIMIT $2"
    );

    (
        sql,
        vec![
            DatabaseValue::String(after_bbl.unwrap_or_default().to_string()),
            DatabaseValue::Int64(limit),
        ],
    )
}

/// Counts the source lots with a location, for progress reporting.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub async fn count_source_buildings(db: &dyn Database) -> Result<u64, DbError> {
    let rows = db
        .query_raw_params(
            "SELECT COUNT(*) AS count FROM pluto_latest
             WHERE longitude IS NOT NULL AND latitude IS NOT NULL",
            &[],
        )
        .await?;
    let count: i64 = rows
        .first()
        .map(|row| row.to_value("count"))
        .transpose()
        .map_err(|e| DbError::conversion("count", e))?
        .unwrap_or(0);
    Ok(u64::try_from(count).unwrap_or(0))
}

/// Reads up to `limit` source buildings whose BBL sorts after `after_bbl`.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or a row cannot be converted.
pub async fn source_page(
    db: &dyn Database,
    after_bbl: Option<&str>,
    limit: i64,
) -> Result<Vec<SourceBuilding>, DbError> {
    let (sql, params) = source_page_query(after_bbl, limit);
    let rows = db.query_raw_params(&sql, &params).await?;
    rows.iter().map(row_to_source).collect()
}

fn row_to_source(row: &Row) -> Result<SourceBuilding, DbError> {
    let co_issued: Option<String> = row.to_value("co_issued").unwrap_or(None);
    let subsidies = SubsidyProgram::all()
        .into_iter()
        .fold(SubsidyFlags::none(), |flags, program| {
            let active: bool = row.to_value(program.column().as_str()).unwrap_or(false);
            flags.with(program, active)
        });

    Ok(SourceBuilding {
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
        active_421a: row.to_value("active_421a").unwrap_or(None),
        active_j51: row.to_value("active_j51").unwrap_or(None),
        post_hstpa_rs_units: row.to_value("post_hstpa_rs_units").unwrap_or(None),
        wow_portfolio_units: row.to_value("wow_portfolio_units").unwrap_or(None),
        wow_portfolio_bbls: row.to_value("wow_portfolio_bbls").unwrap_or(None),
        subsidies,
        longitude: row
            .to_value("longitude")
            .map_err(|e| DbError::conversion("longitude", e))?,
        latitude: row
            .to_value("latitude")
            .map_err(|e| DbError::conversion("latitude", e))?,
    })
}

/// Empties `gce_eligibility` ahead of a full rebuild.
///
/// # Errors
///
/// Returns [`DbError`] if the statement fails.
pub async fn clear_eligibility(db: &dyn Database) -> Result<(), DbError> {
    db.exec_raw("TRUNCATE gce_eligibility").await?;
    Ok(())
}

/// Builds a multi-row `INSERT` with one placeholder tuple per row.
///
/// Each tuple binds `columns.len()` parameters in order. `casts` wraps the
/// placeholder of a named column in an expression, with `{}` standing for
/// the placeholder.
fn multi_row_insert(
    table: &str,
    columns: &[&str],
    rows: usize,
    casts: &[(&str, &str)],
) -> String {
    let mut tuples = Vec::with_capacity(rows);
    for row in 0..rows {
        let base = row * columns.len();
        let placeholders = columns
            .iter()
            .enumerate()
            .map(|(index, column)| {
                let placeholder = format!("${}", base + index + 1);
                casts
                    .iter()
                    .find(|(name, _)| name == column)
                    .map_or(placeholder.clone(), |(_, cast)| {
                        cast.replace("{}", &placeholder)
                    })
            })
            .collect::<Vec<_>>();
        tuples.push(format!("({})", placeholders.join(", ")));
    }

    format!(
        "INSERT INTO {table} ({}) VALUES {}",
        columns.join(", "),
        tuples.join(", ")
    )
}

/// The `INSERT` for `rows` buildings into `gce_eligibility`. The point
/// geometry is a generated column over longitude and latitude.
#[must_use]
pub fn insert_buildings_sql(rows: usize) -> String {
    let mut sql = multi_row_insert(
        "gce_eligibility",
        BUILDING_INSERT_COLUMNS,
        rows,
        &[("co_issued", "{}::text::date")],
    );
    sql.push_str(" ON CONFLICT (bbl) DO NOTHING RETURNING eligible");
    sql
}

/// Parameters for one building, in [`insert_buildings_sql`] order.
#[must_use]
pub fn building_params(record: &BuildingRecord) -> Vec<DatabaseValue> {
    let text = |value: &Option<String>| {
        value
            .as_ref()
            .map_or(DatabaseValue::Null, |v| DatabaseValue::String(v.clone()))
    };
    let int = |value: Option<i32>| value.map_or(DatabaseValue::Null, DatabaseValue::Int32);
    let bigint = |value: Option<i64>| value.map_or(DatabaseValue::Null, DatabaseValue::Int64);
    let flag = |value: Option<bool>| value.map_or(DatabaseValue::Null, DatabaseValue::Bool);
    let eligibility = &record.eligibility;

    vec![
        DatabaseValue::String(record.bbl.clone()),
        text(&record.address),
        text(&record.borough),
        text(&record.zipcode),
        int(record.unitsres),
        int(record.yearbuilt),
        text(&record.ownername),
        text(&record.bldgclass),
        text(&record.co_bin),
        date_param(record.co_issued),
        text(&record.subsidy_name),
        flag(record.active_421a),
        flag(record.active_j51),
        int(record.post_hstpa_rs_units),
        bigint(record.wow_portfolio_units),
        bigint(record.wow_portfolio_bbls),
        DatabaseValue::Bool(eligibility.eligible_bldgclass),
        DatabaseValue::Bool(eligibility.eligible_co),
        DatabaseValue::Bool(eligibility.eligible_rent_stab),
        DatabaseValue::Bool(eligibility.eligible_subsidy),
        DatabaseValue::Bool(eligibility.eligible_portfolio_size),
        DatabaseValue::Bool(eligibility.eligible),
        DatabaseValue::Real64(record.longitude),
        DatabaseValue::Real64(record.latitude),
    ]
}

/// Counts of the buildings an insert actually stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertedBuildings {
    /// Rows written.
    pub written: u64,
    /// Of those, rows marked eligible.
    pub eligible: u64,
}

impl InsertedBuildings {
    /// Tallies the `eligible` flags returned for the stored rows.
    #[must_use]
    pub fn tally(flags: impl IntoIterator<Item = bool>) -> Self {
        flags.into_iter().fold(Self::default(), |mut totals, eligible| {
            totals.written += 1;
            totals.eligible += u64::from(eligible);
            totals
        })
    }
}

/// Writes buildings into `gce_eligibility`, [`INSERT_CHUNK_SIZE`] per
/// statement, in one transaction. Buildings already present are skipped
/// and not counted.
///
/// # Errors
///
/// Returns [`DbError`] if any statement fails; nothing from this call is
/// kept in that case.
pub async fn insert_buildings(
    db: &dyn Database,
    records: &[BuildingRecord],
) -> Result<InsertedBuildings, DbError> {
    if records.is_empty() {
        return Ok(InsertedBuildings::default());
    }

    let txn = db.begin_transaction().await?;
    let mut flags = Vec::with_capacity(records.len());
    for chunk in records.chunks(INSERT_CHUNK_SIZE) {
        let params: Vec<DatabaseValue> = chunk.iter().flat_map(building_params).collect();
        let stored = txn
            .query_raw_params(&insert_buildings_sql(chunk.len()), &params)
            .await?;
        for row in &stored {
            let eligible: bool = row
                .to_value("eligible")
                .map_err(|e| DbError::conversion("eligible", e))?;
            flags.push(eligible);
        }
    }
    txn.commit().await?;
    Ok(InsertedBuildings::tally(flags))
}

/// The `INSERT` for `rows` hexagons into `gce_eligibility_hexes`.
#[must_use]
pub fn insert_hexes_sql(rows: usize) -> String {
    multi_row_insert(
        "gce_eligibility_hexes",
        HEX_INSERT_COLUMNS,
        rows,
        &[
            ("geom", "ST_SetSRID(ST_GeomFromGeoJSON({}), 4326)"),
            ("min_co_issued", "{}::text::date"),
            ("max_co_issued", "{}::text::date"),
        ],
    )
}

/// Parameters for one hexagon, in [`insert_hexes_sql`] order.
///
/// # Errors
///
/// Returns [`DbError::Conversion`] if the geometry cannot be serialized.
pub fn hex_params(zoom_level: u8, bin: &SpatialBin) -> Result<Vec<DatabaseValue>, DbError> {
    let geometry =
        serde_json::to_string(&bin.geometry).map_err(|e| DbError::conversion("geom", e))?;
    let stats = &bin.stats;

    Ok(vec![
        DatabaseValue::Int32(i32::from(zoom_level)),
        DatabaseValue::Real64(bin.longitude),
        DatabaseValue::Real64(bin.latitude),
        DatabaseValue::String(geometry),
        DatabaseValue::Int64(stats.bbls_count),
        DatabaseValue::Int64(stats.unitsres),
        DatabaseValue::Int64(stats.post_hstpa_rs_units),
        DatabaseValue::Int64(stats.eligible_bbls_count),
        DatabaseValue::Int64(stats.eligible_units_count),
        date_param(stats.min_co_issued),
        date_param(stats.max_co_issued),
    ])
}

/// Replaces layer `zoom_level` of `gce_eligibility_hexes` with `bins` in
/// one transaction.
///
/// # Errors
///
/// Returns [`DbError`] if any statement fails; the previous layer is kept
/// in that case.
pub async fn replace_hex_layer(
    db: &dyn Database,
    zoom_level: u8,
    bins: &[SpatialBin],
) -> Result<u64, DbError> {
    let txn = db.begin_transaction().await?;
    txn.exec_raw_params(
        "DELETE FROM gce_eligibility_hexes WHERE zoom_level = $1",
        &[DatabaseValue::Int32(i32::from(zoom_level))],
    )
    .await?;

    let mut inserted = 0;
    for chunk in bins.chunks(INSERT_CHUNK_SIZE) {
        let mut params = Vec::with_capacity(chunk.len() * HEX_INSERT_COLUMNS.len());
        for bin in chunk {
            params.extend(hex_params(zoom_level, bin)?);
        }
        inserted += txn
            .exec_raw_params(&insert_hexes_sql(chunk.len()), &params)
            .await?;
    }
    txn.commit().await?;

    log::info!("Wrote {inserted} hexes for zoom level {zoom_level}");
    Ok(inserted)
}

/// Bounds of every materialized building, or `None` when the table is
/// empty.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub async fn eligibility_extent(db: &dyn Database) -> Result<Option<BoundingBox>, DbError> {
    let rows = db
        .query_raw_params(
            "SELECT MIN(longitude) AS west, MIN(latitude) AS south,
                    MAX(longitude) AS east, MAX(latitude) AS north
             FROM gce_eligibility",
            &[],
        )
        .await?;

    let Some(row) = rows.first() else {
        return Ok(None);
    };
    let west: Option<f64> = row.to_value("west").unwrap_or(None);
    let south: Option<f64> = row.to_value("south").unwrap_or(None);
    let east: Option<f64> = row.to_value("east").unwrap_or(None);
    let north: Option<f64> = row.to_value("north").unwrap_or(None);

    Ok(match (west, south, east, north) {
        (Some(west), Some(south), Some(east), Some(north)) => {
            Some(BoundingBox::new(west, south, east, north, 0.0))
        }
        _ => None,
    })
}
