//! Viewport queries: one leased connection, sequential queries, one
//! cancellation token.

use gce_map_database_models::{
    BoundingBox, BuildingRecord, District, DistrictStats, SpatialBin, ViewportResult,
};
use gce_map_spatial::{BIN_TARGET, RectGrid, ViewportMode, select_mode};
use switchy_database::Database;
use tokio_util::sync::CancellationToken;

use crate::DbError;
use crate::bins::{clusters, hexes};
use crate::cancel::run_cancellable;
use crate::districts::district_stats;
use crate::queries::{DataExtent, buildings_in_bbox, data_extent};

/// The queries [`viewport`] chooses between.
trait ViewportQueries {
    async fn hexes(&self, bbox: &BoundingBox, zoom_level: u8) -> Result<Vec<SpatialBin>, DbError>;

    async fn data_extent(&self, bbox: &BoundingBox) -> Result<Option<DataExtent>, DbError>;

    async fn buildings(
        &self,
        bbox: &BoundingBox,
        envelope: &BoundingBox,
    ) -> Result<Vec<BuildingRecord>, DbError>;
}

struct Live<'a>(&'a dyn Database);

impl ViewportQueries for Live<'_> {
    async fn hexes(&self, bbox: &BoundingBox, zoom_level: u8) -> Result<Vec<SpatialBin>, DbError> {
        hexes(self.0, bbox, zoom_level).await
    }

    async fn data_extent(&self, bbox: &BoundingBox) -> Result<Option<DataExtent>, DbError> {
        data_extent(self.0, bbox).await
    }

    async fn buildings(
        &self,
        bbox: &BoundingBox,
        envelope: &BoundingBox,
    ) -> Result<Vec<BuildingRecord>, DbError> {
        buildings_in_bbox(self.0, bbox, envelope).await
    }
}

/// Answers a viewport with raw buildings or precomputed hexagons,
/// depending on the box's zoom.
///
/// Raw mode first finds the data extent inside the box, then fetches the
/// buildings, both on `db` and in that order. An empty box is
/// `Buildings(vec![])`, never an error.
///
/// # Errors
///
/// Returns [`DbError::Cancelled`] if `token` fires first, otherwise any
/// query failure.
pub async fn viewport(
    db: &dyn Database,
    bbox: &BoundingBox,
    token: &CancellationToken,
) -> Result<ViewportResult, DbError> {
    route(&Live(db), bbox, token).await
}

async fn route(
    queries: &impl ViewportQueries,
    bbox: &BoundingBox,
    token: &CancellationToken,
) -> Result<ViewportResult, DbError> {
    match select_mode(bbox.zoom) {
        ViewportMode::Hexes { zoom_level } => {
            let bins = run_cancellable(token, queries.hexes(bbox, zoom_level)).await?;
            Ok(ViewportResult::Hexes(bins))
        }
        ViewportMode::Buildings => {
            let Some(extent) = run_cancellable(token, queries.data_extent(bbox)).await? else {
                log::debug!("No buildings in viewport at zoom {:.2}", bbox.zoom);
                return Ok(ViewportResult::Buildings(Vec::new()));
            };
            let buildings =
                run_cancellable(token, queries.buildings(bbox, &extent.bounds)).await?;
            log::debug!(
                "Returning {} of {} buildings in viewport",
                buildings.len(),
                extent.buildings_count
            );
            Ok(ViewportResult::Buildings(buildings))
        }
    }
}

/// Answers a viewport with a live rectangular grid laid over the data
/// extent inside the box, whatever the zoom.
///
/// # Errors
///
/// Returns [`DbError::Cancelled`] if `token` fires first, otherwise any
/// query failure.
pub async fn viewport_clusters(
    db: &dyn Database,
    bbox: &BoundingBox,
    token: &CancellationToken,
) -> Result<ViewportResult, DbError> {
    let Some(extent) = run_cancellable(token, data_extent(db, bbox)).await? else {
        return Ok(ViewportResult::Clusters(Vec::new()));
    };
    let grid = RectGrid::new(&extent.bounds, BIN_TARGET);
    let bins = run_cancellable(token, clusters(db, bbox, &grid)).await?;
    Ok(ViewportResult::Clusters(bins))
}

/// District overlay for a viewport.
///
/// # Errors
///
/// Returns [`DbError::Cancelled`] if `token` fires first, otherwise any
/// query failure.
pub async fn viewport_districts(
    db: &dyn Database,
    district: District,
    bbox: &BoundingBox,
    token: &CancellationToken,
) -> Result<Vec<DistrictStats>, DbError> {
    run_cancellable(token, district_stats(db, district, bbox)).await
}
