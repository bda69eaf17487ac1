//! Rebuilds `gce_eligibility` from the source tables.

use std::sync::Arc;

use gce_map_database::materialize::{
    InsertedBuildings, SOURCE_BATCH_SIZE, SourceBuilding, clear_eligibility,
    count_source_buildings, insert_buildings, source_page,
};
use gce_map_database_models::BuildingRecord;
use switchy_database::Database;

use crate::GenerateError;
use crate::progress::ProgressCallback;

/// Totals of a rebuild.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EligibilitySummary {
    /// Buildings written.
    pub buildings: u64,
    /// Of those, buildings covered by Good Cause Eviction.
    pub eligible: u64,
}

impl EligibilitySummary {
    /// Counts the buildings one batch stored.
    pub const fn add_batch(&mut self, inserted: InsertedBuildings) {
        self.buildings += inserted.written;
        self.eligible += inserted.eligible;
    }
}

/// Empties `gce_eligibility` and refills it page by page, applying the
/// eligibility rule to every source building.
///
/// # Errors
///
/// Returns [`GenerateError`] if reading the source tables or writing a
/// batch fails. Batches written before the failure are kept.
pub async fn build_eligibility(
    db: &dyn Database,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<EligibilitySummary, GenerateError> {
    let total = count_source_buildings(db).await?;
    progress.set_total(total);
    log::info!("Materializing eligibility for {total} buildings");

    clear_eligibility(db).await?;

    let mut summary = EligibilitySummary::default();
    let mut after_bbl: Option<String> = None;
    loop {
        let page = source_page(db, after_bbl.as_deref(), SOURCE_BATCH_SIZE).await?;
        let Some(last) = page.last() else {
            break;
        };
        after_bbl = Some(last.bbl.clone());
        let fetched = page.len();

        let records: Vec<BuildingRecord> =
            page.into_iter().map(SourceBuilding::into_record).collect();
        summary.add_batch(insert_buildings(db, &records).await?);
        progress.inc(fetched as u64);

        if i64::try_from(fetched).unwrap_or(i64::MAX) < SOURCE_BATCH_SIZE {
            break;
        }
    }

    progress.finish(format!(
        "{} buildings, {} eligible",
        summary.buildings, summary.eligible
    ));
    log::info!(
        "Materialized {} buildings ({} eligible)",
        summary.buildings,
        summary.eligible
    );
    Ok(summary)
}
