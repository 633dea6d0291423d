//! Drains the unique queue into a transport.
//!
//! Two tasks run per publisher. The monitor polls the transport's
//! connectivity, switches the queue between coalescing and history mode
//! and broadcasts every change. The drain task follows that broadcast and
//! sends queued messages only while the link is up; a message that fails
//! to send goes back to the tail of the queue unless a newer message for
//! its topic was queued while it was in flight.

use crate::queue::UniqueQueue;
use crate::transport::Transport;
use gpiohub_core::constants::TRANSPORT_POLL_INTERVAL_MS;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuePublisherConfig {
    /// How often connectivity is checked, and how long the drain task waits
    /// before retrying while the link is down.
    pub poll_interval: Duration,
}

impl Default for QueuePublisherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(TRANSPORT_POLL_INTERVAL_MS),
        }
    }
}

/// Background delivery of a [`UniqueQueue`] through a [`Transport`].
#[derive(Debug)]
pub struct QueuePublisher {
    queue: Arc<UniqueQueue>,
    cancel: CancellationToken,
    tasks: Mutex<JoinSet<()>>,
    connectivity: watch::Receiver<bool>,
}

impl QueuePublisher {
    /// Start delivering. Must be called from within a tokio runtime.
    pub fn spawn<T>(queue: Arc<UniqueQueue>, transport: T, config: QueuePublisherConfig) -> Self
    where
        T: Transport + 'static,
    {
        let transport = Arc::new(transport);
        let cancel = CancellationToken::new();
        let (connectivity_tx, connectivity) = watch::channel(false);

        let mut tasks = JoinSet::new();
        tasks.spawn(monitor(
            Arc::clone(&queue),
            Arc::clone(&transport),
            config.poll_interval,
            connectivity_tx,
            cancel.clone(),
        ));
        tasks.spawn(drain(
            Arc::clone(&queue),
            transport,
            config.poll_interval,
            connectivity.clone(),
            cancel.clone(),
        ));

        info!(poll_interval = ?config.poll_interval, "Queue publisher started");
        Self {
            queue,
            cancel,
            tasks: Mutex::new(tasks),
            connectivity,
        }
    }

    pub fn queue(&self) -> &Arc<UniqueQueue> {
        &self.queue
    }

    /// Connectivity as last seen by the monitor. Changes whenever the link
    /// goes up or down.
    pub fn connectivity(&self) -> watch::Receiver<bool> {
        self.connectivity.clone()
    }

    /// Stop both tasks. Messages still queued stay in the queue.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let mut tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        while let Some(result) = tasks.join_next().await {
            if let Err(err) = result
                && err.is_panic()
            {
                warn!(error = %err, "Queue publisher task panicked");
            }
        }
        info!(remaining = self.queue.len(), "Queue publisher stopped");
    }
}

impl Drop for QueuePublisher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn monitor<T: Transport>(
    queue: Arc<UniqueQueue>,
    transport: Arc<T>,
    poll_interval: Duration,
    connectivity: watch::Sender<bool>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last = None;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let connected = transport.is_connected();
        if last == Some(connected) {
            continue;
        }
        last = Some(connected);

        queue.set_connected(connected);
        if connected {
            info!(queued = queue.len(), "Transport connected");
        } else {
            warn!("Transport disconnected, coalescing outbound messages");
        }
        connectivity.send_replace(connected);
    }
}

async fn drain<T: Transport>(
    queue: Arc<UniqueQueue>,
    transport: Arc<T>,
    poll_interval: Duration,
    mut connectivity: watch::Receiver<bool>,
    cancel: CancellationToken,
) {
    loop {
        if !*connectivity.borrow_and_update() {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                changed = connectivity.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }
        }

        // Stop waiting as soon as the link drops, so messages queued during
        // the outage stay in the queue and coalesce.
        let item = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            changed = connectivity.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            item = queue.dequeue() => item,
        };

        match transport.send(&item).await {
            Ok(()) => trace!(topic = %item.topic, "Message sent"),
            Err(err) => {
                let topic = item.topic.clone();
                if queue.requeue(item) {
                    warn!(topic = %topic, error = %err, "Send failed, message requeued");
                } else {
                    warn!(topic = %topic, error = %err, "Send failed, superseded by a newer message");
                }
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(poll_interval) => {}
                }
            }
        }
    }
    debug!("Queue drain stopped");
}
