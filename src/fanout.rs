use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinSet;
use tracing::trace;

/// Runs `op` over every item on at most `workers` concurrent tasks and returns the outcomes in input order.
///
/// Workers pull from a shared queue until it is empty. An item's failure is just its outcome; it never stops the
/// other items from being processed. A panicking `op` is re-raised once all workers are done.
///
/// ```ignore
/// let written = fan_out(documents, 8, move |doc| {
///     let engine = engine.clone();
///     async move { engine.writer().write_document(&doc, &OpContext::new()).await }
/// })
/// .await;
/// ```
pub async fn fan_out<I, T, R, F, Fut>(items: I, workers: usize, op: F) -> Vec<R>
where
    I: IntoIterator<Item = T>,
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    let queue = items.into_iter().enumerate().collect::<VecDeque<_>>();
    let total = queue.len();
    let queue = Arc::new(Mutex::new(queue));
    let results = Arc::new(Mutex::new((0..total).map(|_| None).collect::<Vec<Option<R>>>()));
    let op = Arc::new(op);

    let mut tasks = JoinSet::new();
    for worker in 0..workers.clamp(1, total.max(1)) {
        let queue = Arc::clone(&queue);
        let results = Arc::clone(&results);
        let op = Arc::clone(&op);
        tasks.spawn(async move {
            loop {
                let next = queue.lock().pop_front();
                let Some((index, item)) = next
                else {
                    break;
                };
                trace!(worker, index, "processing item");
                let outcome = op(item).await;
                results.lock()[index] = Some(outcome);
            }
        });
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = joined {
            if err.is_panic() {
                std::panic::resume_unwind(err.into_panic());
            }
        }
    }

    let collected = std::mem::take(&mut *results.lock());
    collected.into_iter().flatten().collect()
}
