//! A bounded pool of concurrent probe tasks shared by every scanning phase.
use futures::{future, stream, Future, StreamExt};
use tokio_util::sync::CancellationToken;

/// Runs one task per item with at most `capacity` tasks in flight.
///
/// Cancelling the token stops new items from being dispatched. Tasks that
/// already started run to completion (or to their own timeout) and their
/// outputs are still returned.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    capacity: usize,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// A capacity of zero is corrected to one.
    pub fn new(capacity: usize, cancel: CancellationToken) -> Self {
        Self {
            capacity: capacity.max(1),
            cancel,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Dispatches `task` over `items` and collects every `Some` output in
    /// completion order.
    pub async fn run<I, F, Fut, T>(&self, items: I, task: F) -> Vec<T>
    where
        I: IntoIterator,
        F: FnMut(I::Item) -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        let cancel = self.cancel.clone();

        stream::iter(items)
            .take_while(move |_| future::ready(!cancel.is_cancelled()))
            .map(task)
            .buffer_unordered(self.capacity)
            .filter_map(future::ready)
            .collect()
            .await
    }
}
