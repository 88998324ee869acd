//! Replaying multicast channel for request states.
//!
//! A [`StateSubject`] remembers the last published value. Every subscriber
//! first receives that value (if any), then every later publication in
//! order. Each subscriber owns an unbounded queue, and the replay snapshot,
//! the queue registration and every publication share one lock, so a
//! subscriber never sees a value twice and never misses one published after
//! it attached.

use futures::Stream;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;

/// Stream returned by [`StateSubject::subscribe`].
pub type StateStream<S> = Pin<Box<dyn Stream<Item = S> + Send>>;

struct Channel<S> {
    latest: Option<S>,
    subscribers: Vec<mpsc::UnboundedSender<S>>,
}

impl<S: Clone> Channel<S> {
    fn publish(&mut self, value: S) {
        // Dropped streams are pruned here
        self.subscribers.retain(|tx| tx.send(value.clone()).is_ok());
        self.latest = Some(value);
    }
}

/// Multicast channel that replays the latest value to late subscribers.
///
/// # Slow subscribers
///
/// Nothing is ever dropped: a subscriber that stops polling keeps every
/// state queued until it catches up or drops its stream.
pub struct StateSubject<S> {
    channel: Mutex<Channel<S>>,
}

impl<S> StateSubject<S>
where
    S: Clone + Send + 'static,
{
    /// Create a subject with no value and no subscribers.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            channel: Mutex::new(Channel {
                latest: None,
                subscribers: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Channel<S>> {
        self.channel.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish a value to current subscribers and remember it for replay.
    pub fn publish(&self, value: S) {
        self.lock().publish(value);
    }

    /// Publish only if nothing has been published yet.
    ///
    /// Returns `true` when the value was published.
    pub fn publish_if_empty(&self, value: S) -> bool {
        let mut channel = self.lock();
        if channel.latest.is_some() {
            return false;
        }
        channel.publish(value);
        true
    }

    /// The most recently published value.
    #[must_use]
    pub fn latest(&self) -> Option<S> {
        self.lock().latest.clone()
    }

    /// Number of attached subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let mut channel = self.lock();
        channel.subscribers.retain(|tx| !tx.is_closed());
        channel.subscribers.len()
    }

    /// Subscribe: replay the latest value, then follow new publications.
    ///
    /// The stream ends when the subject is dropped.
    #[must_use]
    pub fn subscribe(&self) -> StateStream<S> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let replay = {
            let mut channel = self.lock();
            channel.subscribers.push(tx);
            channel.latest.clone()
        };

        Box::pin(async_stream::stream! {
            if let Some(value) = replay {
                yield value;
            }
            while let Some(value) = rx.recv().await {
                yield value;
            }
        })
    }
}

impl<S> Default for StateSubject<S>
where
    S: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S> std::fmt::Debug for StateSubject<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let subscribers = self
            .channel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribers
            .len();
        f.debug_struct("StateSubject")
            .field("subscribers", &subscribers)
            .finish_non_exhaustive()
    }
}
