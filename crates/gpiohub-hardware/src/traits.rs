//! Line backend trait definitions.
//!
//! A backend enumerates the lines of every GPIO chip and hands out line
//! requests. A request is the exclusive handle on one line: it can be read,
//! written, switched between input and output, and waited on for edges.
//!
//! All traits use native `async fn` methods (Rust 1.90 + Edition 2024 RPITIT),
//! eliminating the need for the `async_trait` macro. Because those methods
//! return opaque futures the traits are not object-safe; the pin manager
//! dispatches through the enums in [`crate::backends`] instead.

#![allow(async_fn_in_trait)]

use crate::error::Result;
use crate::types::{EdgeEvent, LineInfo, LineSettings};

/// Source of GPIO lines.
///
/// # Examples
///
/// ```no_run
/// use gpiohub_hardware::traits::LineBackend;
/// use gpiohub_hardware::error::Result;
///
/// async fn names<B: LineBackend>(backend: &B) -> Result<Vec<String>> {
///     let lines = backend.discover().await?;
///     Ok(lines.into_iter().map(|line| line.name).collect())
/// }
/// ```
pub trait LineBackend: Send + Sync {
    /// Handle type produced by [`LineBackend::request`].
    type Request: LineRequest;

    /// Enumerate every line on every chip.
    ///
    /// # Errors
    ///
    /// Returns `HardwareError::DiscoveryFailed` if no chip can be found.
    async fn discover(&self) -> Result<Vec<LineInfo>>;

    /// Acquire an exclusive request on a line.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver refuses the request (line busy,
    /// unsupported settings).
    async fn request(&self, line: &LineInfo, settings: &LineSettings) -> Result<Self::Request>;
}

/// Exclusive handle on one requested line.
///
/// Levels are physical: active-low correction is applied by the caller.
pub trait LineRequest: Send {
    /// Apply new settings to the line without giving it up.
    async fn reconfigure(&mut self, settings: &LineSettings) -> Result<()>;

    /// Read the current physical level.
    async fn get_value(&mut self) -> Result<bool>;

    /// Drive the line to a physical level. The line must be an output.
    async fn set_value(&mut self, value: bool) -> Result<()>;

    /// Wait until at least one edge is pending, then drain every pending
    /// edge in the order the driver reports them.
    ///
    /// Must be cancel-safe: dropping the future before it completes must not
    /// lose any edge.
    async fn read_edges(&mut self) -> Result<Vec<EdgeEvent>>;

    /// Give the line back to the driver.
    async fn release(self) -> Result<()>;
}
