// ─── Bounded Task Pool ───
// The one worker-pool shape shared by the downloader and the parallel
// latest-version passes: a fixed set of jobs drained by at most `limit`
// in-flight futures.

use futures::stream::{self, StreamExt};
use std::future::Future;

/// Runs `f` over every item with at most `limit` futures in flight.
/// Results are collected in completion order; callers that need to correlate
/// results with inputs should return an index from `f`.
pub async fn run_bounded<T, R, F, Fut>(items: Vec<T>, limit: usize, f: F) -> Vec<R>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = R>,
{
    stream::iter(items)
        .map(f)
        .buffer_unordered(limit.max(1))
        .collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn runs_every_item() {
        let results = run_bounded(vec![1u64, 2, 3, 4], 2, |n| async move { n * 10 }).await;
        let mut sorted = results.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, [10, 20, 30, 40]);
    }

    #[tokio::test]
    async fn never_exceeds_the_limit() {
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        run_bounded(vec![(); 16], 3, |_| {
            let in_flight = &in_flight;
            let peak = &peak;
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }
        })
        .await;

        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn zero_limit_is_clamped() {
        let results = run_bounded(vec![1, 2], 0, |n| async move { n }).await;
        assert_eq!(results.len(), 2);
    }
}
