//! Change notifications emitted by writable stores.
//!
//! Every writable store owns one [`ChangeSender`] and emits each accepted
//! write, in the order it was applied, into a bounded broadcast channel.
//! Subscribers get a [`ChangeStream`] that yields the changes in that same
//! order. A subscriber that falls more than the channel capacity behind gets
//! a [`MissedChanges`] item instead of the dropped changes and has to
//! resynchronize.

use futures_util::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

/// A change applied to a flat key-value store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyValueChange<K, V> {
    /// `key` now maps to `value`.
    Set(K, V),
    /// `key` no longer exists.
    Removed(K),
}

impl<K, V> KeyValueChange<K, V> {
    /// The key this change is about.
    pub fn key(&self) -> &K {
        match self {
            Self::Set(key, _) | Self::Removed(key) => key,
        }
    }
}

/// A change applied to a CRUD store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrudChange<O, Id> {
    Created(O),
    Updated(O),
    Deleted(Id),
}

/// The subscriber fell behind and this many changes were dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissedChanges(pub u64);

/// Sending half of a change channel, owned by a store.
#[derive(Debug, Clone)]
pub struct ChangeSender<T> {
    tx: broadcast::Sender<T>,
}

impl<T> ChangeSender<T>
where
    T: Clone + Send + 'static,
{
    /// Create a channel buffering up to `capacity` changes per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish a change, returning how many subscribers will see it.
    ///
    /// Having no subscribers is not an error: nobody is caching this store.
    pub fn emit(&self, change: T) -> usize {
        self.tx.send(change).unwrap_or(0)
    }

    /// Subscribe to every change emitted from now on.
    pub fn subscribe(&self) -> ChangeStream<T> {
        ChangeStream::new(self.tx.subscribe())
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Ordered stream of changes from one store.
///
/// Dropping the stream unsubscribes it.
pub struct ChangeStream<T> {
    inner: BroadcastStream<T>,
}

impl<T> ChangeStream<T>
where
    T: Clone + Send + 'static,
{
    fn new(rx: broadcast::Receiver<T>) -> Self {
        Self {
            inner: BroadcastStream::new(rx),
        }
    }
}

impl<T> Stream for ChangeStream<T>
where
    T: Clone + Send + 'static,
{
    type Item = Result<T, MissedChanges>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner)
            .poll_next(cx)
            .map(|item| item.map(|received| received.map_err(missed)))
    }
}

fn missed(err: BroadcastStreamRecvError) -> MissedChanges {
    match err {
        BroadcastStreamRecvError::Lagged(count) => MissedChanges(count),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn test_changes_arrive_in_emission_order() {
        let sender = ChangeSender::new(8);
        let mut stream = sender.subscribe();

        sender.emit(KeyValueChange::Set(1, "a"));
        sender.emit(KeyValueChange::Removed(1));
        sender.emit(KeyValueChange::Set(2, "b"));

        assert_eq!(stream.next().await, Some(Ok(KeyValueChange::Set(1, "a"))));
        assert_eq!(stream.next().await, Some(Ok(KeyValueChange::Removed(1))));
        assert_eq!(stream.next().await, Some(Ok(KeyValueChange::Set(2, "b"))));
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_silent() {
        let sender: ChangeSender<CrudChange<u8, u8>> = ChangeSender::new(4);
        assert_eq!(sender.emit(CrudChange::Deleted(1)), 0);
        assert_eq!(sender.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_dropping_stream_unsubscribes() {
        let sender: ChangeSender<u8> = ChangeSender::new(4);
        let stream = sender.subscribe();
        assert_eq!(sender.subscriber_count(), 1);
        drop(stream);
        assert_eq!(sender.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_sees_missed_changes() {
        let sender = ChangeSender::new(2);
        let mut stream = sender.subscribe();

        for i in 0..5u32 {
            sender.emit(i);
        }

        assert_eq!(stream.next().await, Some(Err(MissedChanges(3))));
        assert_eq!(stream.next().await, Some(Ok(3)));
        assert_eq!(stream.next().await, Some(Ok(4)));
    }

    #[tokio::test]
    async fn test_stream_ends_when_sender_dropped() {
        let sender: ChangeSender<u8> = ChangeSender::new(2);
        let mut stream = sender.subscribe();
        drop(sender);
        assert_eq!(stream.next().await, None);
    }

    #[test]
    fn test_change_key() {
        assert_eq!(KeyValueChange::<_, ()>::Removed(7).key(), &7);
        assert_eq!(KeyValueChange::Set(3, "x").key(), &3);
    }
}
