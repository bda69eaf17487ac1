#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Streaming CSV export of building records.
//!
//! [`csv_stream`] turns a forward-only record stream into CSV chunks: the
//! header first, then one chunk per record. A chunk is only produced when
//! the consumer polls for it, so the record source (an export cursor) is
//! never read ahead of the response body. Dropping the returned stream
//! drops the record source with it.

use futures::{Stream, StreamExt as _, pin_mut};
use gce_map_database::DbError;
use gce_map_database_models::BuildingRecord;

/// Column names of the export, in order.
pub const CSV_HEADER: [&str; 22] = [
    "bbl",
    "address",
    "borough",
    "zipcode",
    "unitsres",
    "yearbuilt",
    "ownername",
    "bldgclass",
    "coBin",
    "coIssued",
    "subsidyName",
    "active_421a",
    "activeJ51",
    "postHstpaRsUnits",
    "wowPortfolioUnits",
    "wowPortfolioBbls",
    "eligibleBldgclass",
    "eligibleCo",
    "eligibleRentStab",
    "eligibleSubsidy",
    "eligiblePortfolioSize",
    "eligible",
];

/// Errors that can occur while exporting.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// Reading the next record failed.
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// A row could not be encoded.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The encoded row could not be flushed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Encodes one CSV row. Every field is quoted and embedded quotes are
/// doubled.
///
/// # Errors
///
/// Returns [`ExportError`] if the row cannot be written.
pub fn encode_row<I, T>(fields: I) -> Result<Vec<u8>, ExportError>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(fields)?;
    writer.into_inner().map_err(|e| ExportError::Io(e.into_error()))
}

fn optional<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(String::new, |v| v.to_string())
}

/// The export fields of `record`, in [`CSV_HEADER`] order. Missing values
/// are empty strings.
#[must_use]
pub fn record_fields(record: &BuildingRecord) -> [String; 22] {
    let eligibility = &record.eligibility;
    [
        record.bbl.clone(),
        optional(record.address.as_deref()),
        optional(record.borough.as_deref()),
        optional(record.zipcode.as_deref()),
        optional(record.unitsres),
        optional(record.yearbuilt),
        optional(record.ownername.as_deref()),
        optional(record.bldgclass.as_deref()),
        optional(record.co_bin.as_deref()),
        optional(record.co_issued),
        optional(record.subsidy_name.as_deref()),
        optional(record.active_421a),
        optional(record.active_j51),
        optional(record.post_hstpa_rs_units),
        optional(record.wow_portfolio_units),
        optional(record.wow_portfolio_bbls),
        eligibility.eligible_bldgclass.to_string(),
        eligibility.eligible_co.to_string(),
        eligibility.eligible_rent_stab.to_string(),
        eligibility.eligible_subsidy.to_string(),
        eligibility.eligible_portfolio_size.to_string(),
        eligibility.eligible.to_string(),
    ]
}

/// Serializes `records` as CSV, one chunk per pull.
///
/// The first chunk is the header. The stream ends after the first error.
pub fn csv_stream<S>(records: S) -> impl Stream<Item = Result<Vec<u8>, ExportError>>
where
    S: Stream<Item = Result<BuildingRecord, DbError>>,
{
    async_stream::try_stream! {
        yield encode_row(CSV_HEADER)?;

        pin_mut!(records);
        let mut rows = 0_u64;
        while let Some(record) = records.next().await {
            yield encode_row(record_fields(&record?))?;
            rows += 1;
        }
        log::debug!("Exported {rows} buildings");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::{StreamExt as _, TryStreamExt as _, stream};
    use gce_map_eligibility_models::EligibilityBreakdown;

    use super::*;

    fn record(bbl: &str, ownername: &str) -> BuildingRecord {
        BuildingRecord {
            bbl: bbl.to_string(),
            address: Some("10 MAIN STREET".to_string()),
            borough: Some("BK".to_string()),
            zipcode: Some("11201".to_string()),
            unitsres: Some(12),
            yearbuilt: Some(1931),
            ownername: Some(ownername.to_string()),
            bldgclass: Some("C1".to_string()),
            co_bin: None,
            co_issued: None,
            subsidy_name: None,
            active_421a: Some(false),
            active_j51: None,
            post_hstpa_rs_units: None,
            wow_portfolio_units: Some(12),
            wow_portfolio_bbls: Some(1),
            eligibility: EligibilityBreakdown {
                eligible_bldgclass: true,
                eligible_co: true,
                eligible_rent_stab: true,
                eligible_subsidy: true,
                eligible_portfolio_size: true,
                eligible: true,
            },
            longitude: -73.99,
            latitude: 40.69,
        }
    }

    #[test]
    fn embedded_quotes_are_doubled_and_parse_back() {
        let bytes = encode_row(record_fields(&record("3001230045", "O\"Brien"))).unwrap();
        let row = String::from_utf8(bytes.clone()).unwrap();
        assert!(row.contains("\"O\"\"Brien\""));
        assert!(row.starts_with("\"3001230045\",\"10 MAIN STREET\""));
        assert!(row.ends_with("\"true\"\n"));

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(bytes.as_slice());
        let parsed = reader.records().next().unwrap().unwrap();
        assert_eq!(&parsed[6], "O\"Brien");
        assert_eq!(&parsed[8], "");
        assert_eq!(parsed.len(), CSV_HEADER.len());
    }

    #[tokio::test]
    async fn header_comes_first_then_one_chunk_per_record() {
        let records = stream::iter(vec![
            Ok(record("1000010001", "A")),
            Ok(record("1000010002", "B")),
        ]);
        let chunks: Vec<Vec<u8>> = csv_stream(records).try_collect().await.unwrap();

        assert_eq!(chunks.len(), 3);
        let header = String::from_utf8(chunks[0].clone()).unwrap();
        assert!(header.starts_with("\"bbl\",\"address\""));
        assert!(header.ends_with("\"eligible\"\n"));
        assert!(String::from_utf8(chunks[2].clone()).unwrap().contains("1000010002"));
    }

    #[tokio::test]
    async fn records_are_pulled_only_on_demand() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&pulled);
        let records = stream::iter(0..1_000).map(move |i| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(record(&format!("10000{i:05}"), "OWNER"))
        });

        let output = csv_stream(records);
        pin_mut!(output);
        output.next().await.unwrap().unwrap();
        output.next().await.unwrap().unwrap();
        output.next().await.unwrap().unwrap();

        assert!(pulled.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn stream_stops_after_the_first_error() {
        let records = stream::iter(vec![
            Ok(record("1000010001", "A")),
            Err(DbError::Cancelled),
            Ok(record("1000010003", "C")),
        ]);
        let items: Vec<_> = csv_stream(records).collect().await;

        assert_eq!(items.len(), 3);
        assert!(items[1].is_ok());
        assert!(matches!(items[2], Err(ExportError::Database(DbError::Cancelled))));
    }
}
