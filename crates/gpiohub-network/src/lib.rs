//! Outbound delivery for the gateway.
//!
//! Messages leave the gateway through a [`UniqueQueue`] drained by a
//! [`QueuePublisher`] into a [`Transport`]. While the transport is down the
//! queue keeps only the newest message per topic; once it is back, every
//! message is delivered in order.
//!
//! # Components
//!
//! - [`UniqueQueue`]: coalescing FIFO with optional backpressure
//! - [`Transport`]: the link to the upstream consumer
//! - [`LocalTransport`]: in-process transport with topic filters and
//!   retained values
//! - [`QueuePublisher`]: connectivity monitor plus drain task
//!
//! # Example
//!
//! ```no_run
//! use gpiohub_network::{LocalTransport, QueueItem, QueuePublisher, QueuePublisherConfig, UniqueQueue};
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let transport = LocalTransport::new();
//! let mut inputs = transport.subscribe("gpiohub/input/+");
//!
//! let queue = Arc::new(UniqueQueue::new());
//! let publisher = QueuePublisher::spawn(Arc::clone(&queue), transport, QueuePublisherConfig::default());
//!
//! queue.enqueue(QueueItem::new("gpiohub/input/P8_30", r#"{"event_type":"single"}"#, false)).await;
//! let message = inputs.recv().await;
//! # publisher.stop().await;
//! # }
//! ```

pub mod error;
pub mod payload;
pub mod publisher;
pub mod queue;
pub mod transport;

pub use error::{NetworkError, Result};
pub use payload::{input_payload, output_payload, state_topic};
pub use publisher::{QueuePublisher, QueuePublisherConfig};
pub use queue::{QueueItem, UniqueQueue};
pub use transport::{LocalTransport, Transport, topic_matches};
