//! Outbound transport seam and the in-process transport.
//!
//! The gateway never talks to a broker directly: the publisher drains the
//! queue into a [`Transport`]. [`LocalTransport`] routes messages to
//! in-process subscribers using MQTT topic filters, keeps retained values
//! and can be switched offline to exercise the queue's outage behavior.

use crate::error::{NetworkError, Result};
use crate::queue::QueueItem;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Link to the upstream consumer.
pub trait Transport: Send + Sync {
    /// Whether messages can be sent right now.
    fn is_connected(&self) -> bool;

    /// Send one message.
    ///
    /// # Errors
    ///
    /// Returns an error when the message could not be handed over; the
    /// caller decides whether to retry.
    fn send(&self, item: &QueueItem) -> impl Future<Output = Result<()>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn send(&self, item: &QueueItem) -> impl Future<Output = Result<()>> + Send {
        (**self).send(item)
    }
}

/// Match a topic against an MQTT filter (`+` one level, `#` the rest).
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[derive(Debug)]
struct Subscriber {
    filter: String,
    tx: mpsc::UnboundedSender<QueueItem>,
}

#[derive(Debug, Default)]
struct Routes {
    subscribers: Vec<Subscriber>,
    retained: BTreeMap<String, QueueItem>,
}

#[derive(Debug)]
struct LocalInner {
    connected: AtomicBool,
    routes: Mutex<Routes>,
}

/// In-process transport.
///
/// Cheap to clone; clones share subscribers, retained values and the
/// connectivity switch. Starts connected.
#[derive(Debug, Clone)]
pub struct LocalTransport {
    inner: Arc<LocalInner>,
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalTransport {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(LocalInner {
                connected: AtomicBool::new(true),
                routes: Mutex::new(Routes::default()),
            }),
        }
    }

    fn routes(&self) -> MutexGuard<'_, Routes> {
        self.inner.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the link up or down.
    pub fn set_connected(&self, connected: bool) {
        let previous = self.inner.connected.swap(connected, Ordering::AcqRel);
        if previous != connected {
            debug!(connected, "Local transport connectivity changed");
        }
    }

    /// Receive every message whose topic matches `filter`.
    ///
    /// Retained values matching the filter are delivered first.
    pub fn subscribe(&self, filter: &str) -> mpsc::UnboundedReceiver<QueueItem> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut routes = self.routes();

        for item in routes.retained.values() {
            if topic_matches(filter, &item.topic) {
                let _ = tx.send(item.clone());
            }
        }
        routes.subscribers.push(Subscriber {
            filter: filter.to_string(),
            tx,
        });
        rx
    }

    /// Retained payload of a topic.
    pub fn retained(&self, topic: &str) -> Option<String> {
        self.routes().retained.get(topic).map(|item| item.payload.clone())
    }

    fn route(&self, item: &QueueItem) {
        let mut routes = self.routes();

        if item.retain {
            if item.payload.is_empty() {
                routes.retained.remove(&item.topic);
            } else {
                routes.retained.insert(item.topic.clone(), item.clone());
            }
        }

        routes.subscribers.retain(|subscriber| !subscriber.tx.is_closed());
        let mut delivered = 0usize;
        for subscriber in &routes.subscribers {
            if topic_matches(&subscriber.filter, &item.topic) && subscriber.tx.send(item.clone()).is_ok() {
                delivered += 1;
            }
        }
        trace!(topic = %item.topic, retain = item.retain, delivered, "Routed message");
    }
}

impl Transport for LocalTransport {
    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    async fn send(&self, item: &QueueItem) -> Result<()> {
        if !self.is_connected() {
            return Err(NetworkError::Disconnected);
        }
        self.route(item);
        Ok(())
    }
}
