//! Typed publish/subscribe bus of the gpiohub gateway.
//!
//! Inputs, outputs and covers publish [`gpiohub_core::Event`]s here; whoever
//! cares about an entity registers a listener for its category and id. The
//! bus also owns the periodic tick, one-shot scheduling and the shutdown
//! sequence every other component hooks into.
//!
//! # Example
//!
//! ```no_run
//! use chrono::{TimeDelta, Utc};
//! use gpiohub_events::{EventBus, EventBusConfig, Target, Tick};
//!
//! #[tokio::main]
//! async fn main() -> gpiohub_events::Result<()> {
//!     let bus = EventBus::start(EventBusConfig::default());
//!
//!     bus.register_every_second("uptime", Target::immediate(|tick| {
//!         if let Tick::At(now) = tick {
//!             println!("tick at {now}");
//!         }
//!         Ok(())
//!     }));
//!
//!     let job = bus.schedule_once(
//!         Utc::now() + TimeDelta::seconds(5),
//!         Target::immediate(|at| {
//!             println!("due at {at}");
//!             Ok(())
//!         }),
//!     )?;
//!     job.cancel();
//!
//!     bus.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod clock;
pub mod error;
pub mod listener;
pub mod registry;

pub use bus::{EventBus, EventBusConfig, ScheduledJob};
pub use clock::{Clock, SystemClock};
pub use error::{EventBusError, Result};
pub use listener::{EventTarget, HookTarget, JobTarget, Target, Tick, TickTarget};
pub use registry::ListenerRegistry;
