#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! API request and response types for the eligibility map server.
//!
//! Query parameters stay raw strings until [`ViewportQueryParams::to_map_view`]
//! so that a malformed value falls back to its default instead of failing
//! extraction.

use gce_map_database_models::{DistrictStats, ViewportResult, feature_collection};
use gce_map_spatial::MapView;
use geojson::FeatureCollection;
use serde::{Deserialize, Serialize};

/// Query parameters shared by the map endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewportQueryParams {
    /// Fractional zoom level.
    pub zoom: Option<String>,
    /// Latitude of the map center.
    pub latitude: Option<String>,
    /// Longitude of the map center.
    pub longitude: Option<String>,
    /// Map width in pixels.
    pub map_width: Option<String>,
    /// Map height in pixels.
    pub map_height: Option<String>,
}

impl ViewportQueryParams {
    /// Converts to a map view, substituting defaults for missing or
    /// malformed values.
    #[must_use]
    pub fn to_map_view(&self) -> MapView {
        MapView::from_params(
            self.zoom.as_deref(),
            self.latitude.as_deref(),
            self.longitude.as_deref(),
            self.map_width.as_deref(),
            self.map_height.as_deref(),
        )
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiHealth {
    /// Whether the service is healthy.
    pub healthy: bool,
    /// Service version.
    pub version: String,
}

/// A map layer: the result kind and its features.
#[derive(Debug, Clone, Serialize)]
pub struct ApiMapResponse {
    /// `buildings`, `hexes`, `clusters`, or `districts`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Features of the layer.
    pub data: FeatureCollection,
}

impl From<&ViewportResult> for ApiMapResponse {
    fn from(result: &ViewportResult) -> Self {
        Self {
            kind: result.kind().to_string(),
            data: result.to_feature_collection(),
        }
    }
}

impl ApiMapResponse {
    /// A district overlay layer.
    #[must_use]
    pub fn districts(districts: &[DistrictStats]) -> Self {
        Self {
            kind: "districts".to_string(),
            data: feature_collection(districts.iter().map(DistrictStats::to_feature).collect()),
        }
    }
}

/// Error body of a failed request.
#[derive(Debug, Serialize)]
pub struct ApiError {
    /// What went wrong.
    pub error: String,
}

#[cfg(test)]
mod tests {
    use gce_map_spatial::viewport::{DEFAULT_LATITUDE, DEFAULT_MAP_WIDTH, DEFAULT_ZOOM};

    use super::*;

    #[test]
    fn malformed_params_fall_back_to_defaults() {
        let params: ViewportQueryParams = serde_json::from_value(serde_json::json!({
            "zoom": "abc",
            "latitude": "",
            "mapWidth": "-5",
            "mapHeight": "900",
        }))
        .unwrap();
        let view = params.to_map_view();

        assert!((view.zoom - DEFAULT_ZOOM).abs() < f64::EPSILON);
        assert!((view.latitude - DEFAULT_LATITUDE).abs() < f64::EPSILON);
        assert!((view.map_width - DEFAULT_MAP_WIDTH).abs() < f64::EPSILON);
        assert!((view.map_height - 900.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_result_serializes_as_typed_empty_collection() {
        let response = ApiMapResponse::from(&ViewportResult::Buildings(Vec::new()));
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["type"], "buildings");
        assert_eq!(json["data"]["type"], "FeatureCollection");
        assert_eq!(json["data"]["features"], serde_json::json!([]));
    }

    #[test]
    fn district_layer_is_tagged_districts() {
        let response = ApiMapResponse::districts(&[]);
        assert_eq!(response.kind, "districts");
        assert!(response.data.features.is_empty());
    }
}
