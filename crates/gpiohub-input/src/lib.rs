//! Physical inputs: sampling, click-gesture classification and delivery.
//!
//! An input is bound to one pin of the [`PinManager`](gpiohub_hardware::PinManager).
//! Momentary buttons are classified into single, double and long clicks by
//! a [`GestureMachine`]; two-state contacts are reported as pressed and
//! released by a [`BinarySensorMachine`]. Either way the result reaches the
//! gateway through a press callback and the event bus.
//!
//! # Example
//!
//! ```no_run
//! use gpiohub_core::InputKind;
//! use gpiohub_events::{EventBus, EventBusConfig, Target};
//! use gpiohub_hardware::{PinManager, PinManagerConfig, mock::MockBackend};
//! use gpiohub_input::{Detection, Input, InputConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (backend, _handle) = MockBackend::new(&["P8_30"]);
//! let pins = Arc::new(PinManager::discover(backend.into(), PinManagerConfig::default()).await?);
//! let bus = EventBus::start(EventBusConfig::default());
//!
//! let config = InputConfig::new("P8_30", InputKind::Event).with_detection(Detection::edge());
//! let input = Input::start(
//!     config,
//!     pins,
//!     bus,
//!     Target::immediate(|report: gpiohub_input::PressReport| {
//!         println!("{} {}", report.pin, report.click);
//!         Ok(())
//!     }),
//! )
//! .await?;
//! # input.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod binary_sensor;
pub mod click_timer;
pub mod detection;
pub mod error;
pub mod gesture;
pub mod input;

pub use binary_sensor::BinarySensorMachine;
pub use click_timer::ClickTimer;
pub use detection::{Debouncer, Detection, GestureTimings, Offer};
pub use error::{InputError, Result};
pub use gesture::{GestureMachine, GestureState, GestureTimers};
pub use input::{Input, InputConfig, PressCallback, PressReport};
