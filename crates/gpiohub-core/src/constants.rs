//! Timing and naming constants shared by the gateway crates.
//!
//! Inputs come in two timing profiles. Polled gesture inputs sample the line
//! every bounce interval and use wider gesture windows; edge-driven inputs are
//! woken by the kernel and can afford tighter ones:
//!
//! | Profile | Double-click window | Long-press threshold | Sampling |
//! |---------|---------------------|----------------------|----------|
//! | Poll    | 350 ms              | 600 ms               | every 50 ms |
//! | Edge    | 220 ms              | 400 ms               | 100 ms debounce |
//!
//! # Usage
//!
//! ```
//! use gpiohub_core::constants::*;
//! use std::time::Duration;
//!
//! let long = Duration::from_millis(LONG_PRESS_DURATION_MS);
//! assert!(long > Duration::from_millis(DOUBLE_CLICK_DURATION_MS));
//! ```

// ============================================================================
// Gesture Timing (polled inputs)
// ============================================================================

/// Window after a release in which a second press counts as a double click.
pub const DOUBLE_CLICK_DURATION_MS: u64 = 350;

/// Hold time after which a press is reported as a long press.
pub const LONG_PRESS_DURATION_MS: u64 = 600;

/// Interval between two samples of a polled input.
pub const DEFAULT_BOUNCE_TIME_MS: u64 = 50;

// ============================================================================
// Gesture Timing (edge-driven inputs)
// ============================================================================

/// Double-click window for edge-driven inputs.
pub const EDGE_DOUBLE_CLICK_DURATION_MS: u64 = 220;

/// Long-press threshold for edge-driven inputs.
pub const EDGE_LONG_PRESS_DURATION_MS: u64 = 400;

/// Software debounce window for edge-driven inputs.
///
/// A sample arriving within this window of the previous accepted sample is
/// rejected.
pub const DEFAULT_EDGE_DEBOUNCE_MS: u64 = 100;

// ============================================================================
// Shutdown
// ============================================================================

/// Upper bound for releasing every line request during shutdown.
pub const PIN_SHUTDOWN_GRACE_MS: u64 = 5000;

/// Upper bound for the event dispatch loop to finish after cancellation.
pub const EVENT_BUS_SHUTDOWN_GRACE_MS: u64 = 5000;

// ============================================================================
// Outbound Messaging
// ============================================================================

/// Default prefix of outbound input topics (`{prefix}/{kind}/{pin}`).
pub const DEFAULT_TOPIC_PREFIX: &str = "gpiohub";

/// Delay before an empty payload clears a momentary input topic.
pub const CLEAR_MESSAGE_DELAY_MS: u64 = 200;

/// How often the publisher samples transport connectivity.
pub const TRANSPORT_POLL_INTERVAL_MS: u64 = 500;

// ============================================================================
// Hardware
// ============================================================================

/// Consumer label attached to every line request.
pub const LINE_CONSUMER: &str = "gpiohub";

/// Directory scanned for GPIO character devices.
pub const GPIO_DEVICE_DIR: &str = "/dev";

/// File name prefix of GPIO character devices.
pub const GPIO_CHIP_PREFIX: &str = "gpiochip";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gesture_windows_ordered() {
        assert!(DOUBLE_CLICK_DURATION_MS < LONG_PRESS_DURATION_MS);
        assert!(EDGE_DOUBLE_CLICK_DURATION_MS < EDGE_LONG_PRESS_DURATION_MS);
    }

    #[test]
    fn test_edge_profile_tighter_than_poll() {
        assert!(EDGE_DOUBLE_CLICK_DURATION_MS < DOUBLE_CLICK_DURATION_MS);
        assert!(EDGE_LONG_PRESS_DURATION_MS < LONG_PRESS_DURATION_MS);
    }

    #[test]
    fn test_bounce_shorter_than_windows() {
        assert!(DEFAULT_BOUNCE_TIME_MS < DOUBLE_CLICK_DURATION_MS);
        assert!(DEFAULT_EDGE_DEBOUNCE_MS < EDGE_DOUBLE_CLICK_DURATION_MS);
    }
}
