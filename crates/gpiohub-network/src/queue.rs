//! Unique delivery queue.
//!
//! Buffers outbound messages for a transport whose link comes and goes.
//! While the link is down only the newest message per topic is kept, and
//! it moves to the tail each time it is replaced: a consumer that comes
//! back sees current state, not history. While the link is up every
//! message is kept in arrival order.
//!
//! The ordered sequence and the per-topic map are always updated under the
//! same lock. Each queued message carries a sequence number; the map points
//! a topic at the sequence number of its pending message, so a dequeue only
//! clears the entry when it still refers to the message being removed.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;
use std::pin::pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::trace;

/// One outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

impl QueueItem {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>, retain: bool) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retain,
        }
    }
}

#[derive(Debug)]
struct Slot {
    seq: u64,
    item: QueueItem,
}

#[derive(Debug, Default)]
struct QueueState {
    slots: VecDeque<Slot>,
    pending: HashMap<String, u64>,
    connected: bool,
    next_seq: u64,
}

impl QueueState {
    fn push(&mut self, item: QueueItem, capacity: Option<NonZeroUsize>) -> Result<(), QueueItem> {
        let replaced = if self.connected {
            None
        } else {
            self.pending.get(&item.topic).copied()
        };

        match replaced {
            Some(stale) => {
                if let Some(position) = self.slots.iter().position(|slot| slot.seq == stale) {
                    self.slots.remove(position);
                }
                trace!(topic = %item.topic, "Coalesced pending message");
            }
            None => {
                if capacity.is_some_and(|capacity| self.slots.len() >= capacity.get()) {
                    return Err(item);
                }
            }
        }

        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.pending.insert(item.topic.clone(), seq);
        self.slots.push_back(Slot { seq, item });
        Ok(())
    }

    fn requeue(&mut self, item: QueueItem) -> bool {
        if self.pending.contains_key(&item.topic) {
            trace!(topic = %item.topic, "Newer message pending, requeue skipped");
            return false;
        }
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.pending.insert(item.topic.clone(), seq);
        self.slots.push_back(Slot { seq, item });
        true
    }

    fn pop(&mut self) -> Option<QueueItem> {
        let Slot { seq, item } = self.slots.pop_front()?;
        if self.pending.get(&item.topic) == Some(&seq) {
            self.pending.remove(&item.topic);
        }
        Some(item)
    }
}

/// FIFO queue that coalesces per topic while disconnected.
///
/// Unbounded by default. With a capacity, [`enqueue`](Self::enqueue)
/// suspends until a slot frees up; nothing is ever dropped. Replacing the
/// pending message of a topic never needs a free slot.
///
/// Starts disconnected.
#[derive(Debug, Default)]
pub struct UniqueQueue {
    state: Mutex<QueueState>,
    capacity: Option<NonZeroUsize>,
    items: Notify,
    space: Notify,
}

impl UniqueQueue {
    /// Unbounded queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue holding at most `capacity` messages.
    pub fn bounded(capacity: NonZeroUsize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> Option<NonZeroUsize> {
        self.capacity
    }

    /// Switch coalescing off (connected) or on (disconnected).
    ///
    /// Messages already queued are left as they are.
    pub fn set_connected(&self, connected: bool) {
        self.lock().connected = connected;
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().slots.is_empty()
    }

    /// Queue a message without waiting.
    ///
    /// # Errors
    ///
    /// Hands the message back when the queue is full.
    pub fn try_enqueue(&self, item: QueueItem) -> Result<(), QueueItem> {
        self.lock().push(item, self.capacity)?;
        self.items.notify_one();
        Ok(())
    }

    /// Queue a message, waiting for a free slot if the queue is full.
    pub async fn enqueue(&self, mut item: QueueItem) {
        loop {
            let mut space = pin!(self.space.notified());
            space.as_mut().enable();

            match self.try_enqueue(item) {
                Ok(()) => return,
                Err(rejected) => {
                    trace!(topic = %rejected.topic, "Queue full, waiting for space");
                    item = rejected;
                }
            }
            space.await;
        }
    }

    /// Put back a message that was dequeued but could not be delivered.
    ///
    /// The message goes to the tail unless its topic already has a newer
    /// message queued, in which case it is dropped. Returns `true` if it
    /// was queued. Never waits for space: the message held a slot before
    /// it was taken out, so a bounded queue may briefly exceed its
    /// capacity by the messages being returned.
    pub fn requeue(&self, item: QueueItem) -> bool {
        let queued = self.lock().requeue(item);
        if queued {
            self.items.notify_one();
        }
        queued
    }

    /// Remove the head message if there is one.
    pub fn try_dequeue(&self) -> Option<QueueItem> {
        let item = self.lock().pop()?;
        self.space.notify_one();
        Some(item)
    }

    /// Remove the head message, waiting until there is one.
    pub async fn dequeue(&self) -> QueueItem {
        loop {
            let mut available = pin!(self.items.notified());
            available.as_mut().enable();

            if let Some(item) = self.try_dequeue() {
                return item;
            }
            available.await;
        }
    }

    /// Topics with a message pending, in no particular order.
    pub fn pending_topics(&self) -> Vec<String> {
        self.lock().pending.keys().cloned().collect()
    }
}
