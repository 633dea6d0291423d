//! GPIO line ownership for the gpiohub gateway.
//!
//! This crate discovers the named lines of every GPIO chip on the host and
//! hands them out by name through the [`PinManager`]. Callers never see a
//! line request: reading an output flips it back to input, writing an input
//! flips it to output, and edge subscriptions survive alongside ad-hoc reads.
//!
//! # Backends
//!
//! A backend implements [`LineBackend`] and produces [`LineRequest`]s:
//!
//! - [`mock::MockBackend`] simulates a board, driven through a
//!   [`mock::MockBackendHandle`] (always available)
//! - `gpiod::GpiodBackend` talks to `/dev/gpiochip*` (feature `gpiod`)
//!
//! The manager dispatches over [`AnyLineBackend`], since the async traits
//! are not object-safe.
//!
//! # Levels
//!
//! Everything above the backend speaks logical levels: `true` means active.
//! Lines discovered as active-low are corrected inside the manager.
//!
//! # Example
//!
//! ```no_run
//! use gpiohub_hardware::mock::MockBackend;
//! use gpiohub_hardware::{Bias, Direction, PinManager, PinManagerConfig};
//!
//! #[tokio::main]
//! async fn main() -> gpiohub_hardware::Result<()> {
//!     let (backend, handle) = MockBackend::new(&["P8_30"]);
//!     let pins = PinManager::discover(backend.into(), PinManagerConfig::default()).await?;
//!
//!     pins.configure("P8_30", Direction::Input, Bias::PullUp).await?;
//!     handle.set_level("P8_30", true)?;
//!     assert!(pins.read("P8_30").await?);
//!
//!     pins.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod backends;
pub mod error;
#[cfg(feature = "gpiod")]
pub mod gpiod;
pub mod manager;
pub mod mock;
pub mod traits;
pub mod types;

pub use backends::{AnyLineBackend, AnyLineRequest};
pub use error::{HardwareError, Result};
pub use manager::{EdgeCallback, PinManager, PinManagerConfig};
pub use traits::{LineBackend, LineRequest};
pub use types::{Bias, Direction, Edge, EdgeEvent, EdgeKind, LineInfo, LineSettings};
