#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Row types for buildings, spatial bins, and district overlays.
//!
//! These types represent the shapes of data as retrieved from the `PostGIS`
//! database. All of them are request-scoped: built fresh per query and
//! dropped once the response is written.

use chrono::NaiveDate;
use gce_map_eligibility_models::EligibilityBreakdown;
use geojson::{Feature, FeatureCollection, GeoJson, Geometry, JsonObject, Value};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

/// A geographic bounding box in WGS84 coordinates plus the zoom level the
/// box was resolved at.
///
/// Boxes never cross the antimeridian: `west < east` and `south < north`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Western longitude boundary.
    pub west: f64,
    /// Southern latitude boundary.
    pub south: f64,
    /// Eastern longitude boundary.
    pub east: f64,
    /// Northern latitude boundary.
    pub north: f64,
    /// Fractional map zoom level.
    pub zoom: f64,
}

/// An absolute margin in degrees, applied to each side of a box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Margin {
    /// Degrees added to the west and east edges.
    pub longitude: f64,
    /// Degrees added to the south and north edges.
    pub latitude: f64,
}

impl Margin {
    /// Returns this margin scaled by `factor`.
    #[must_use]
    pub fn scaled(self, factor: f64) -> Self {
        Self {
            longitude: self.longitude * factor,
            latitude: self.latitude * factor,
        }
    }
}

impl BoundingBox {
    /// Creates a new bounding box from the given coordinates.
    #[must_use]
    pub const fn new(west: f64, south: f64, east: f64, north: f64, zoom: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
            zoom,
        }
    }

    /// Longitude span in degrees.
    #[must_use]
    pub fn width(&self) -> f64 {
        self.east - self.west
    }

    /// Latitude span in degrees.
    #[must_use]
    pub fn height(&self) -> f64 {
        self.north - self.south
    }

    /// Area in square degrees.
    #[must_use]
    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// Whether `west < east` and `south < north`.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.west < self.east && self.south < self.north
    }

    /// The margin that is `fraction` of this box's span on each axis.
    #[must_use]
    pub fn margin(&self, fraction: f64) -> Margin {
        Margin {
            longitude: self.width() * fraction,
            latitude: self.height() * fraction,
        }
    }

    /// Grows every edge outward by `margin`.
    #[must_use]
    pub fn expand_by(&self, margin: Margin) -> Self {
        Self {
            west: self.west - margin.longitude,
            south: self.south - margin.latitude,
            east: self.east + margin.longitude,
            north: self.north + margin.latitude,
            zoom: self.zoom,
        }
    }

    /// Grows every edge outward by `fraction` of the box's span.
    #[must_use]
    pub fn expand(&self, fraction: f64) -> Self {
        self.expand_by(self.margin(fraction))
    }

    /// Center point as `(longitude, latitude)`.
    #[must_use]
    pub fn center(&self) -> (f64, f64) {
        (
            self.west + self.width() / 2.0,
            self.south + self.height() / 2.0,
        )
    }
}

/// A building (tax lot) row from the materialized `gce_eligibility` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildingRecord {
    /// Borough-block-lot identifier.
    pub bbl: String,
    /// Street address.
    pub address: Option<String>,
    /// Two-letter borough code.
    pub borough: Option<String>,
    /// ZIP code.
    pub zipcode: Option<String>,
    /// Residential unit count.
    pub unitsres: Option<i32>,
    /// Year built (`0` when unknown).
    pub yearbuilt: Option<i32>,
    /// Owner of record.
    pub ownername: Option<String>,
    /// PLUTO building class code.
    pub bldgclass: Option<String>,
    /// Building identification number from the certificate of occupancy.
    pub co_bin: Option<String>,
    /// Issue date of the earliest certificate of occupancy.
    pub co_issued: Option<NaiveDate>,
    /// Name of the subsidy program(s) covering the building.
    pub subsidy_name: Option<String>,
    /// Active 421-a tax exemption.
    pub active_421a: Option<bool>,
    /// Active J-51 tax exemption.
    pub active_j51: Option<bool>,
    /// Rent-stabilized units registered after the 2019 HSTPA.
    pub post_hstpa_rs_units: Option<i32>,
    /// Units in the owner's portfolio (Who Owns What).
    pub wow_portfolio_units: Option<i64>,
    /// Lots in the owner's portfolio (Who Owns What).
    pub wow_portfolio_bbls: Option<i64>,
    /// Materialized eligibility flags.
    #[serde(flatten)]
    pub eligibility: EligibilityBreakdown,
    /// Longitude (WGS84).
    pub longitude: f64,
    /// Latitude (WGS84).
    pub latitude: f64,
}

impl BuildingRecord {
    /// The date used for min/max construction ranges: the certificate of
    /// occupancy date when known, else January 1st of the year built.
    #[must_use]
    pub fn construction_date(&self) -> Option<NaiveDate> {
        self.co_issued.or_else(|| {
            self.yearbuilt
                .filter(|year| *year > 0)
                .and_then(|year| NaiveDate::from_ymd_opt(year, 1, 1))
        })
    }

    /// Converts the record into a `GeoJSON` point feature. `eligible` is
    /// emitted as `1`/`0` so map style expressions can use it numerically.
    #[must_use]
    pub fn to_feature(&self) -> Feature {
        let mut properties = to_properties(self);
        properties.insert(
            "eligible".to_string(),
            serde_json::Value::from(u8::from(self.eligibility.eligible)),
        );
        feature(
            Geometry::new(Value::Point(vec![self.longitude, self.latitude])),
            properties,
        )
    }
}

/// Summary statistics over a set of buildings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinStats {
    /// Number of buildings.
    pub bbls_count: i64,
    /// Sum of residential units.
    pub unitsres: i64,
    /// Sum of post-HSTPA rent-stabilized units.
    pub post_hstpa_rs_units: i64,
    /// Number of eligible buildings.
    pub eligible_bbls_count: i64,
    /// Sum of residential units in eligible buildings.
    pub eligible_units_count: i64,
    /// Earliest construction date.
    pub min_co_issued: Option<NaiveDate>,
    /// Latest construction date.
    pub max_co_issued: Option<NaiveDate>,
}

impl BinStats {
    /// Folds one building into the totals.
    pub fn add(&mut self, record: &BuildingRecord) {
        let units = i64::from(record.unitsres.unwrap_or(0));
        self.bbls_count += 1;
        self.unitsres += units;
        self.post_hstpa_rs_units += i64::from(record.post_hstpa_rs_units.unwrap_or(0));
        if record.eligibility.eligible {
            self.eligible_bbls_count += 1;
            self.eligible_units_count += units;
        }
        if let Some(date) = record.construction_date() {
            self.min_co_issued = Some(self.min_co_issued.map_or(date, |d| d.min(date)));
            self.max_co_issued = Some(self.max_co_issued.map_or(date, |d| d.max(date)));
        }
    }

    /// Whether no buildings were added.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bbls_count == 0
    }
}

/// An aggregate over the buildings inside one grid cell (rectangular
/// cluster or hexagon).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpatialBin {
    /// Cell center longitude.
    pub longitude: f64,
    /// Cell center latitude.
    pub latitude: f64,
    /// Precomputed zoom layer the cell belongs to (hexagons only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zoom_level: Option<u8>,
    /// Cell polygon.
    pub geometry: Geometry,
    /// Totals over the cell's buildings.
    #[serde(flatten)]
    pub stats: BinStats,
}

impl SpatialBin {
    /// Converts the bin into a polygon feature.
    #[must_use]
    pub fn to_feature(&self) -> Feature {
        feature(self.geometry.clone(), to_properties(self))
    }
}

/// Kind of administrative district with a precomputed overlay.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString, AsRefStr, EnumIter,
)]
#[strum(serialize_all = "kebab-case")]
pub enum District {
    /// New York State Assembly district.
    #[strum(serialize = "assembly-districts")]
    Assembly,
    /// New York City Council district.
    #[strum(serialize = "city-council-districts")]
    CityCouncil,
    /// U.S. Congressional district.
    #[strum(serialize = "congress-districts")]
    Congress,
    /// New York State Senate district.
    #[strum(serialize = "state-senate-districts")]
    StateSenate,
}

impl District {
    /// Table holding one precomputed stats row per district.
    #[must_use]
    pub const fn stats_table(self) -> &'static str {
        match self {
            Self::Assembly => "gce_eligibility_nyad",
            Self::CityCouncil => "gce_eligibility_nycc",
            Self::Congress => "gce_eligibility_nycg",
            Self::StateSenate => "gce_eligibility_nyss",
        }
    }

    /// Boundary table the district polygons are read from.
    #[must_use]
    pub const fn boundary_table(self) -> &'static str {
        match self {
            Self::Assembly => "nyad",
            Self::CityCouncil => "nycc",
            Self::Congress => "nycg",
            Self::StateSenate => "nyss",
        }
    }

    /// District identifier column in [`Self::stats_table`] and
    /// [`Self::boundary_table`].
    #[must_use]
    pub const fn id_column(self) -> &'static str {
        match self {
            Self::Assembly => "assemdist",
            Self::CityCouncil => "coundist",
            Self::Congress => "congdist",
            Self::StateSenate => "stsendist",
        }
    }

    /// District column in `pluto_latest_districts` (stored as text).
    #[must_use]
    pub const fn lot_column(self) -> &'static str {
        match self {
            Self::Assembly => "assem_dist",
            Self::CityCouncil => "coun_dist",
            Self::Congress => "cong_dist",
            Self::StateSenate => "stsen_dist",
        }
    }

    /// File name offered for the district's building export.
    #[must_use]
    pub const fn export_filename(self) -> &'static str {
        match self {
            Self::Assembly => "assembly-district-good-cause-eviction-buildings.csv",
            Self::CityCouncil => "city-council-district-good-cause-eviction-buildings.csv",
            Self::Congress => "congress-district-good-cause-eviction-buildings.csv",
            Self::StateSenate => "state-senate-district-good-cause-eviction-buildings.csv",
        }
    }
}

/// Precomputed statistics for one administrative district.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistrictStats {
    /// Kind of district.
    pub district: District,
    /// District number.
    pub id: i32,
    /// Label point longitude.
    pub longitude: f64,
    /// Label point latitude.
    pub latitude: f64,
    /// District boundary.
    pub geometry: Geometry,
    /// Totals over the district's buildings.
    #[serde(flatten)]
    pub stats: BinStats,
}

impl Serialize for District {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_ref())
    }
}

impl<'de> Deserialize<'de> for District {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl DistrictStats {
    /// Converts the district into a boundary feature.
    #[must_use]
    pub fn to_feature(&self) -> Feature {
        feature(self.geometry.clone(), to_properties(self))
    }
}

/// The result of a viewport query: raw buildings, or bins when the view is
/// too zoomed out to draw individual buildings.
///
/// Serializes as `{"buildings": [...]}`, `{"hexes": [...]}`, or
/// `{"clusters": [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ViewportResult {
    /// Individual buildings.
    Buildings(Vec<BuildingRecord>),
    /// Bins from a precomputed hexagon layer.
    Hexes(Vec<SpatialBin>),
    /// Bins from the live rectangular grid.
    Clusters(Vec<SpatialBin>),
}

impl ViewportResult {
    /// Discriminant name (`buildings`, `hexes`, or `clusters`).
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Buildings(_) => "buildings",
            Self::Hexes(_) => "hexes",
            Self::Clusters(_) => "clusters",
        }
    }

    /// Converts the result into a `GeoJSON` feature collection.
    #[must_use]
    pub fn to_feature_collection(&self) -> FeatureCollection {
        let features = match self {
            Self::Buildings(buildings) => buildings.iter().map(BuildingRecord::to_feature).collect(),
            Self::Hexes(bins) | Self::Clusters(bins) => {
                bins.iter().map(SpatialBin::to_feature).collect()
            }
        };
        feature_collection(features)
    }
}

/// Wraps features into a collection without a bbox or foreign members.
#[must_use]
pub const fn feature_collection(features: Vec<Feature>) -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

/// Parses a `GeoJSON` geometry string (as produced by `ST_AsGeoJSON`).
#[must_use]
pub fn parse_geometry(geojson_str: &str) -> Option<Geometry> {
    match geojson_str.parse::<GeoJson>().ok()? {
        GeoJson::Geometry(geometry) => Some(geometry),
        _ => None,
    }
}

fn feature(geometry: Geometry, properties: JsonObject) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(geometry),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

/// Serializes `value` into a property map, dropping any `geometry` key.
fn to_properties<T: Serialize>(value: &T) -> JsonObject {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::Object(mut map)) => {
            map.remove("geometry");
            map
        }
        _ => JsonObject::new(),
    }
}
