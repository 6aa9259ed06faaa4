use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use futures::stream::BoxStream;
use tokio::sync::broadcast;

/// Default number of items retained for slow readers.
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// Bounded multi-consumer event bus.
///
/// Every reader attached with [`EventBus::subscribe`] sees every item
/// published after it attached, in publish order. Capacity is per bus: when a
/// reader falls more than `capacity` items behind, the oldest items are
/// overwritten and the reader skips ahead (drop-oldest). Publishing never
/// waits for readers, so the network read loop is never back-pressured.
#[derive(Debug)]
pub struct EventBus<T: Clone + Send + 'static> {
    tx: broadcast::Sender<T>,
    name: &'static str,
}

impl<T: Clone + Send + 'static> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            name: self.name,
        }
    }
}

impl<T: Clone + Send + 'static> EventBus<T> {
    /// Create a bus. `capacity` is clamped to at least 1.
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, name }
    }

    /// Publish an item to all current readers. Returns how many readers
    /// were attached; zero readers is not an error.
    pub fn publish(&self, item: T) -> usize {
        self.tx.send(item).unwrap_or(0)
    }

    /// Attach a new reader starting at the next published item.
    pub fn subscribe(&self) -> BusStream<T> {
        let name = self.name;
        let rx = self.tx.subscribe();
        let inner = futures::stream::unfold(rx, move |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(item) => return Some((item, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(bus = name, skipped, "slow reader dropped oldest items");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        BusStream {
            inner: Box::pin(inner),
        }
    }
}

/// Reader side of an [`EventBus`].
pub struct BusStream<T> {
    inner: BoxStream<'static, T>,
}

impl<T> BusStream<T> {
    /// Wait for the next item; `None` once the bus has been dropped.
    pub async fn recv(&mut self) -> Option<T> {
        futures::StreamExt::next(self).await
    }
}

impl<T> Stream for BusStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.inner.as_mut().poll_next(cx)
    }
}
