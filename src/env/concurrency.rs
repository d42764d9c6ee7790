//! Bounded-parallelism executor for sub-call fan-out.

use futures::stream::{self, StreamExt};
use std::future::Future;

/// Run `f` over `items` with at most `limit` futures in flight, returning the
/// outputs in input order regardless of completion order. One item's outcome
/// never cancels its siblings; per-item errors are the caller's business
/// (have `f` return a `Result`).
pub async fn run_with_concurrency<T, R, F, Fut>(items: Vec<T>, limit: usize, f: F) -> Vec<R>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = R>,
{
    let limit = limit.max(1);
    let mut results: Vec<(usize, R)> = stream::iter(items.into_iter().enumerate())
        .map(|(i, item)| {
            let fut = f(item);
            async move { (i, fut.await) }
        })
        .buffer_unordered(limit)
        .collect()
        .await;
    results.sort_by_key(|(i, _)| *i);
    results.into_iter().map(|(_, r)| r).collect()
}
