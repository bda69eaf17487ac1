//! Cooperative cancellation of database work.
//!
//! A request's [`CancellationToken`] is raced against the pending query.
//! If it fires first the query future is dropped, which abandons the
//! in-flight round-trip; the lease holding the connection is then dropped
//! by the caller and the server-side `statement_timeout` bounds whatever
//! the server was still doing. The listener on the token is the
//! `cancelled()` future itself, so it goes away with the `select!` on
//! either outcome.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::DbError;

/// Awaits `future` unless `token` is cancelled first.
///
/// A token that is already cancelled wins without polling `future`.
///
/// # Errors
///
/// Returns [`DbError::Cancelled`] if the token fired before the future
/// finished, otherwise whatever the future returned.
pub async fn run_cancellable<T, F>(token: &CancellationToken, future: F) -> Result<T, DbError>
where
    F: Future<Output = Result<T, DbError>>,
{
    tokio::select! {
        biased;
        () = token.cancelled() => {
            log::debug!("Query cancelled before completion");
            Err(DbError::Cancelled)
        }
        result = future => result,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn completed_query_returns_its_result() {
        let token = CancellationToken::new();
        let result = run_cancellable(&token, async { Ok::<_, DbError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn query_errors_pass_through() {
        let token = CancellationToken::new();
        let result: Result<(), _> =
            run_cancellable(&token, async { Err(DbError::conversion("bbl", "null")) }).await;
        assert!(matches!(result, Err(DbError::Conversion { .. })));
    }

    #[tokio::test]
    async fn cancellation_settles_a_hung_query() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            run_cancellable(&token, std::future::pending::<Result<(), DbError>>()),
        )
        .await
        .expect("cancellation should settle the query");

        assert!(result.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn already_cancelled_token_skips_the_query() {
        let token = CancellationToken::new();
        token.cancel();

        let polled = Arc::new(AtomicBool::new(false));
        let flag = polled.clone();
        let result = run_cancellable(&token, async move {
            flag.store(true, Ordering::SeqCst);
            Ok::<_, DbError>(())
        })
        .await;

        assert!(result.unwrap_err().is_cancelled());
        assert!(!polled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn dropped_drop_guard_cancels() {
        let token = CancellationToken::new();
        let guard = token.clone().drop_guard();
        drop(guard);

        let result = run_cancellable(&token, std::future::pending::<Result<(), DbError>>()).await;
        assert!(result.unwrap_err().is_cancelled());
    }
}
