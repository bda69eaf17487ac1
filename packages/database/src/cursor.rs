//! Forward-only building streams backed by a server-side cursor.
//!
//! The stream owns its [`ConnectionLease`] and runs the cursor inside a
//! transaction opened on it. Rows are pulled from the cursor
//! [`FETCH_SIZE`] at a time, only when the consumer asks for more, and the
//! cancellation token is checked before every fetch and every yielded
//! record. Cancelling the token rolls the transaction back, which closes
//! the cursor. Dropping the stream (consumer gone) drops the transaction
//! and the lease with it.

use std::future::Future;

use futures::{Stream, StreamExt as _, pin_mut};
use gce_map_database_models::{BuildingRecord, District};
use switchy_database::{DatabaseTransaction, DatabaseValue};
use tokio_util::sync::CancellationToken;

use crate::DbError;
use crate::cancel::run_cancellable;
use crate::db::ConnectionLease;
use crate::queries::{BUILDING_COLUMNS, row_to_building};

/// Rows requested per `FETCH`.
pub const FETCH_SIZE: usize = 500;

/// Name of the export cursor. One per connection, so it never collides.
pub const CURSOR_NAME: &str = "gce_export";

/// Which buildings an export covers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BuildingQuery {
    /// Every building of one administrative district.
    District {
        /// Kind of district.
        district: District,
        /// District number.
        id: i32,
    },
    /// Every building inside the hexagon of layer `zoom_level` that
    /// contains the given point.
    Hex {
        /// Precomputed layer key.
        zoom_level: u8,
        /// Longitude of a point inside the hexagon.
        longitude: f64,
        /// Latitude of a point inside the hexagon.
        latitude: f64,
    },
    /// Every materialized building.
    All,
}

impl BuildingQuery {
    /// The `SELECT` the cursor is declared over, with its parameters.
    #[must_use]
    pub fn select(&self) -> (String, Vec<DatabaseValue>) {
        match *self {
            Self::District { district, id } => (
                format!(
                    "SELECT {BUILDING_COLUMNS}
                     FROM gce_eligibility e
                     JOIN pluto_latest_districts pd ON pd.bbl = e.bbl
                     WHERE pd.{lot} = $1::text
                     ORDER BY e.bbl",
                    lot = district.lot_column(),
                ),
                vec![DatabaseValue::String(id.to_string())],
            ),
            Self::Hex {
                zoom_level,
                longitude,
                latitude,
            } => (
                format!(
                    "SELECT {BUILDING_COLUMNS}
                     FROM gce_eligibility e
                     JOIN gce_eligibility_hexes h ON ST_Within(e.geom, h.geom)
                     WHERE h.zoom_level = $1
                       AND ST_Within(ST_SetSRID(ST_MakePoint($2, $3), 4326), h.geom)
                     ORDER BY e.bbl"
                ),
                vec![
                    DatabaseValue::Int32(i32::from(zoom_level)),
                    DatabaseValue::Real64(longitude),
                    DatabaseValue::Real64(latitude),
                ],
            ),
            Self::All => (
                format!("SELECT {BUILDING_COLUMNS} FROM gce_eligibility e ORDER BY e.bbl"),
                Vec::new(),
            ),
        }
    }

    /// `DECLARE` statement opening the cursor over [`Self::select`].
    #[must_use]
    pub fn declare(&self) -> (String, Vec<DatabaseValue>) {
        let (select, params) = self.select();
        (
            format!("DECLARE {CURSOR_NAME} NO SCROLL CURSOR FOR {select}"),
            params,
        )
    }
}

/// Streams the items of `next_page`, one page at a time.
///
/// A page shorter than `page_size` is the last one. `token` is checked
/// before every page and every item; once it fires nothing more is
/// yielded and no further page is requested. A failing page yields one
/// error and ends the stream.
pub fn paged<'a, T, F, Fut>(
    token: &'a CancellationToken,
    page_size: usize,
    mut next_page: F,
) -> impl Stream<Item = Result<T, DbError>> + 'a
where
    T: 'a,
    F: FnMut() -> Fut + 'a,
    Fut: Future<Output = Result<Vec<T>, DbError>> + 'a,
{
    async_stream::try_stream! {
        'pages: loop {
            if token.is_cancelled() {
                break;
            }

            let page = match run_cancellable(token, next_page()).await {
                Err(DbError::Cancelled) => break,
                other => other?,
            };

            let len = page.len();
            for item in page {
                if token.is_cancelled() {
                    break 'pages;
                }
                yield item;
            }

            if len < page_size {
                break;
            }
        }
    }
}

async fn fetch_page(
    txn: &dyn DatabaseTransaction,
    fetch: &str,
) -> Result<Vec<BuildingRecord>, DbError> {
    txn.query_raw_params(fetch, &[])
        .await?
        .iter()
        .map(row_to_building)
        .collect()
}

/// Rolls back a cancelled export. Failures only reach the log.
async fn abandon(txn: Box<dyn DatabaseTransaction>) {
    if let Err(e) = txn.rollback().await {
        log::debug!("Rolling back cancelled export failed: {e}");
    }
}

/// Streams the buildings matched by `query` through a server-side cursor
/// on `lease`.
///
/// Cancellation ends the stream without an error item. A failing fetch
/// yields one error and ends the stream.
pub fn building_cursor(
    lease: ConnectionLease,
    token: CancellationToken,
    query: BuildingQuery,
) -> impl Stream<Item = Result<BuildingRecord, DbError>> + Send + 'static {
    async_stream::try_stream! {
        let lease = lease;
        let (declare, params) = query.declare();
        let fetch = format!("FETCH {FETCH_SIZE} FROM {CURSOR_NAME}");

        log::debug!("Opening export cursor on connection {}", lease.id());
        let txn = match run_cancellable(&token, async {
            Ok::<_, DbError>(lease.begin_transaction().await?)
        })
        .await
        {
            Err(DbError::Cancelled) => {
                log::debug!("Export on connection {} cancelled before opening", lease.id());
                return;
            }
            other => other?,
        };
        match run_cancellable(&token, async {
            Ok::<_, DbError>(txn.exec_raw_params(&declare, &params).await?)
        })
        .await
        {
            Err(DbError::Cancelled) => {
                abandon(txn).await;
                return;
            }
            other => {
                other?;
            }
        }

        let mut streamed = 0_usize;
        {
            let txn_ref: &dyn DatabaseTransaction = &*txn;
            let fetch = fetch.as_str();
            let records = paged(&token, FETCH_SIZE, move || fetch_page(txn_ref, fetch));
            pin_mut!(records);
            while let Some(record) = records.next().await {
                yield record?;
                streamed += 1;
            }
        }

        if token.is_cancelled() {
            log::debug!(
                "Export cursor on connection {} cancelled after {streamed} buildings",
                lease.id()
            );
            abandon(txn).await;
            return;
        }

        txn.exec_raw(&format!("CLOSE {CURSOR_NAME}")).await?;
        txn.commit().await?;
        log::debug!(
            "Export cursor on connection {} finished after {streamed} buildings",
            lease.id()
        );
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use futures::StreamExt as _;

    use super::*;

    #[test]
    fn district_export_filters_on_text_district() {
        let query = BuildingQuery::District {
            district: District::CityCouncil,
            id: 35,
        };
        let (sql, params) = query.select();

        assert!(sql.contains("JOIN pluto_latest_districts pd ON pd.bbl = e.bbl"));
        assert!(sql.contains("pd.coun_dist = $1::text"));
        assert_eq!(params.len(), 1);
        assert!(matches!(&params[0], DatabaseValue::String(s) if s == "35"));
    }

    #[test]
    fn hex_export_finds_the_containing_hexagon() {
        let query = BuildingQuery::Hex {
            zoom_level: 14,
            longitude: -73.95,
            latitude: 40.65,
        };
        let (sql, params) = query.select();

        assert!(sql.contains("h.zoom_level = $1"));
        assert!(sql.contains("ST_Within(ST_SetSRID(ST_MakePoint($2, $3), 4326), h.geom)"));
        assert_eq!(params.len(), 3);
        assert!(matches!(params[0], DatabaseValue::Int32(14)));
    }

    fn pages(
        pages: Vec<Vec<u32>>,
        fetched: &Cell<usize>,
    ) -> impl FnMut() -> std::future::Ready<Result<Vec<u32>, DbError>> + '_ {
        let mut pages = pages.into_iter();
        move || {
            fetched.set(fetched.get() + 1);
            std::future::ready(Ok(pages.next().unwrap_or_default()))
        }
    }

    #[tokio::test]
    async fn short_page_ends_the_stream() {
        let token = CancellationToken::new();
        let fetched = Cell::new(0);
        let items: Vec<u32> = paged(&token, 3, pages(vec![vec![1, 2, 3], vec![4, 5]], &fetched))
            .map(Result::unwrap)
            .collect()
            .await;

        assert_eq!(items, vec![1, 2, 3, 4, 5]);
        assert_eq!(fetched.get(), 2);
    }

    #[tokio::test]
    async fn full_last_page_needs_one_empty_fetch() {
        let token = CancellationToken::new();
        let fetched = Cell::new(0);
        let items: Vec<u32> = paged(&token, 2, pages(vec![vec![1, 2], vec![3, 4]], &fetched))
            .map(Result::unwrap)
            .collect()
            .await;

        assert_eq!(items, vec![1, 2, 3, 4]);
        assert_eq!(fetched.get(), 3);
    }

    #[tokio::test]
    async fn cancel_after_first_page_yields_nothing_more() {
        let token = CancellationToken::new();
        let fetched = Cell::new(0);
        let stream = paged(
            &token,
            2,
            pages(vec![vec![1, 2], vec![3, 4], vec![5]], &fetched),
        );
        pin_mut!(stream);

        assert_eq!(stream.next().await.unwrap().unwrap(), 1);
        assert_eq!(stream.next().await.unwrap().unwrap(), 2);
        token.cancel();

        assert!(stream.next().await.is_none());
        assert_eq!(fetched.get(), 1);
    }

    #[tokio::test]
    async fn cancel_mid_page_drops_the_rest_of_the_page() {
        let token = CancellationToken::new();
        let fetched = Cell::new(0);
        let stream = paged(&token, 3, pages(vec![vec![1, 2, 3]], &fetched));
        pin_mut!(stream);

        assert_eq!(stream.next().await.unwrap().unwrap(), 1);
        token.cancel();

        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn cancelled_token_never_fetches() {
        let token = CancellationToken::new();
        token.cancel();
        let fetched = Cell::new(0);
        let count = paged(&token, 3, pages(vec![vec![1]], &fetched)).count().await;

        assert_eq!(count, 0);
        assert_eq!(fetched.get(), 0);
    }

    #[tokio::test]
    async fn failing_page_yields_one_error_and_ends() {
        let token = CancellationToken::new();
        let mut calls = 0;
        let items: Vec<Result<u32, DbError>> = paged(&token, 1, || {
            calls += 1;
            let page = if calls == 1 {
                Ok(vec![7])
            } else {
                Err(DbError::conversion("bbl", "null"))
            };
            std::future::ready(page)
        })
        .collect()
        .await;

        assert_eq!(items.len(), 2);
        assert_eq!(*items[0].as_ref().unwrap(), 7);
        assert!(matches!(items[1], Err(DbError::Conversion { .. })));
    }

    #[test]
    fn declare_wraps_select_in_named_cursor() {
        let (declare, params) = BuildingQuery::All.declare();
        assert!(declare.starts_with("DECLARE gce_export NO SCROLL CURSOR FOR SELECT e.bbl"));
        assert!(declare.ends_with("ORDER BY e.bbl"));
        assert!(params.is_empty());
    }
}
