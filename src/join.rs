//! All-or-nothing aggregation over concurrent work.
//!
//! Every future is driven to completion before the call returns, even after
//! one of them has failed. Results are returned in input order. On failure
//! the error of the first future to fail (by completion time) is returned
//! and the successful results are discarded. Side effects already performed
//! by the successful futures are not undone.

use std::future::Future;

use futures::stream::{FuturesUnordered, StreamExt};

/// Await all futures, failing with the first error once all have settled
pub async fn try_join_settled<I, F, T, E>(futures: I) -> Result<Vec<T>, E>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T, E>>,
{
    let mut pending: FuturesUnordered<_> = futures
        .into_iter()
        .enumerate()
        .map(|(index, fut)| async move { (index, fut.await) })
        .collect();

    let mut slots: Vec<Option<T>> = (0..pending.len()).map(|_| None).collect();
    let mut first_error = None;

    while let Some((index, result)) = pending.next().await {
        match result {
            Ok(value) => slots[index] = Some(value),
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(slots.into_iter().flatten().collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_results_keep_input_order() {
        let delays = [30u64, 5, 15];
        let results: Result<Vec<usize>, String> =
            try_join_settled(delays.iter().enumerate().map(|(i, ms)| async move {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
                Ok(i)
            }))
            .await;
        assert_eq!(results.unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_empty_input() {
        let results: Result<Vec<u8>, String> = tokio_test::block_on(try_join_settled(
            Vec::<std::future::Ready<Result<u8, String>>>::new(),
        ));
        assert!(results.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_waits_for_all_before_failing() {
        let completed = Arc::new(AtomicUsize::new(0));

        let futures = (0..3).map(|i| {
            let completed = completed.clone();
            async move {
                if i == 0 {
                    return Err(format!("task {} failed", i));
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
                completed.fetch_add(1, Ordering::SeqCst);
                Ok(i)
            }
        });

        let result = try_join_settled(futures).await;
        assert_eq!(result.unwrap_err(), "task 0 failed");
        assert_eq!(completed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_first_failure_by_completion_wins() {
        let futures = [40u64, 10].into_iter().map(|ms| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Err::<(), _>(ms)
        });
        assert_eq!(try_join_settled(futures).await.unwrap_err(), 10);
    }
}
