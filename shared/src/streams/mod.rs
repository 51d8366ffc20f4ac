//! The small stream operator toolkit the import pipelines are composed from.
//!
//! Operators are plain functions from stream to stream. Failed items never
//! poison a batch: every operator that can fail takes an [`ErrorEmitter`]
//! and reports each item it could not process instead of forwarding it,
//! which is how transient failures feed back into the retry ranges.

pub mod batch_rpc;
pub mod cache;

use futures::channel::mpsc;
use futures::future;
use futures::stream::{self, Stream, StreamExt};
use futures::FutureExt;
use std::future::Future;
use std::time::Duration;

pub use batch_rpc::{batch_rpc_calls, plan_batches, BatchPlan, BatchRpcConfig};
pub use cache::TimedCache;

/// Groups stream items, emitting a group when either `max_count` items are
/// buffered or `max_wait` elapsed since the first item of the group arrived.
/// Groups are never empty; an idle stream emits nothing.
pub fn buffer_time<T, S>(
    items: S,
    max_wait: Duration,
    max_count: usize,
) -> impl Stream<Item = Vec<T>>
where
    S: Stream<Item = T> + Unpin,
{
    let max_count = max_count.max(1);
    stream::unfold(items.fuse(), move |mut items| async move {
        let mut group = vec![items.next().await?];

        let deadline = tokio::time::sleep(max_wait).fuse();
        futures::pin_mut!(deadline);

        while group.len() < max_count {
            futures::select_biased! {
                item = items.next() => match item {
                    Some(item) => group.push(item),
                    None => break,
                },
                _ = deadline => break,
            }
        }

        Some((group, items))
    })
}

/// Applies an async function with at most `concurrency` invocations in
/// flight. Output order follows completion, not input.
pub fn map_concurrent<T, U, S, F, Fut>(
    items: S,
    concurrency: usize,
    f: F,
) -> impl Stream<Item = U>
where
    S: Stream<Item = T>,
    F: FnMut(T) -> Fut,
    Fut: Future<Output = U>,
{
    items.map(f).buffer_unordered(concurrency)
}

/// Applies an async function one item at a time, preserving input order.
pub fn map_ordered<T, U, S, F, Fut>(items: S, f: F) -> impl Stream<Item = U>
where
    S: Stream<Item = T>,
    F: FnMut(T) -> Fut,
    Fut: Future<Output = U>,
{
    items.then(f)
}

/// Splits a stream in two by a predicate: items matching the predicate go
/// left, the rest right. Driven by a spawned task so both halves can be
/// consumed independently.
pub fn partition<T, S, P>(
    items: S,
    predicate: P,
) -> (impl Stream<Item = T>, impl Stream<Item = T>)
where
    T: Send + 'static,
    S: Stream<Item = T> + Send + 'static,
    P: Fn(&T) -> bool + Send + 'static,
{
    let (left_sender, left) = mpsc::unbounded();
    let (right_sender, right) = mpsc::unbounded();
    tokio::spawn(async move {
        futures::pin_mut!(items);
        while let Some(item) = items.next().await {
            let target = if predicate(&item) {
                &left_sender
            } else {
                &right_sender
            };
            // A dropped half just discards its items, the other keeps going.
            let _ = target.unbounded_send(item);
        }
    });
    (left, right)
}

/// The per item error feedback path. Operators report every upstream item
/// they fail to process here instead of forwarding it downstream.
pub struct ErrorEmitter<T> {
    sender: mpsc::UnboundedSender<T>,
}

impl<T> Clone for ErrorEmitter<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<T> ErrorEmitter<T> {
    pub fn emit(&self, item: T) {
        if self.sender.unbounded_send(item).is_err() {
            tracing::warn!("error receiver dropped, failed item lost");
        }
    }

    pub fn emit_all(&self, items: impl IntoIterator<Item = T>) {
        for item in items {
            self.emit(item);
        }
    }
}

/// Creates the error feedback channel for one pipeline run.
pub fn error_channel<T>() -> (ErrorEmitter<T>, mpsc::UnboundedReceiver<T>) {
    let (sender, receiver) = mpsc::unbounded();
    (ErrorEmitter { sender }, receiver)
}

/// `map_concurrent` for fallible stages: failing items are reported through
/// the emitter and dropped from the output.
pub fn map_concurrent_caught<T, U, S, F, Fut>(
    items: S,
    concurrency: usize,
    errors: ErrorEmitter<T>,
    f: F,
) -> impl Stream<Item = U>
where
    T: Clone,
    S: Stream<Item = T>,
    F: Fn(T) -> Fut,
    Fut: Future<Output = anyhow::Result<U>>,
{
    items
        .map(move |item| {
            let work = f(item.clone());
            async move { (item, work.await) }
        })
        .buffer_unordered(concurrency)
        .filter_map(move |(item, result)| {
            future::ready(match result {
                Ok(output) => Some(output),
                Err(error) => {
                    tracing::error!(?error, "stage failed, reporting item for retry");
                    errors.emit(item);
                    None
                }
            })
        })
}
