//! Mock backend implementation for testing and development.
//!
//! This module provides a simulated GPIO board that can be controlled
//! programmatically without requiring physical hardware.

pub mod line;

// Re-export commonly used types
pub use line::{MockBackend, MockBackendHandle, MockLineRequest, ReleaseBehavior};
