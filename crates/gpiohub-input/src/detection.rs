//! How an input notices level changes, and the timings that go with it.

use gpiohub_core::constants::{
    DEFAULT_BOUNCE_TIME_MS, DEFAULT_EDGE_DEBOUNCE_MS, DOUBLE_CLICK_DURATION_MS,
    EDGE_DOUBLE_CLICK_DURATION_MS, EDGE_LONG_PRESS_DURATION_MS, LONG_PRESS_DURATION_MS,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Sampling strategy of an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum Detection {
    /// Read the line every `interval`.
    Poll { interval: Duration },
    /// React to kernel edge events, ignoring samples closer than `debounce`
    /// to the previous accepted one.
    Edge { debounce: Duration },
}

impl Detection {
    pub fn poll() -> Self {
        Self::Poll {
            interval: Duration::from_millis(DEFAULT_BOUNCE_TIME_MS),
        }
    }

    pub fn edge() -> Self {
        Self::Edge {
            debounce: Duration::from_millis(DEFAULT_EDGE_DEBOUNCE_MS),
        }
    }

    /// Gesture thresholds tuned for this strategy.
    pub fn default_timings(&self) -> GestureTimings {
        match self {
            Self::Poll { .. } => GestureTimings::poll(),
            Self::Edge { .. } => GestureTimings::edge(),
        }
    }
}

impl Default for Detection {
    fn default() -> Self {
        Self::poll()
    }
}

/// Double-click window and long-press threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GestureTimings {
    pub double_click: Duration,
    pub long_press: Duration,
}

impl GestureTimings {
    /// Timings for polled inputs.
    pub fn poll() -> Self {
        Self {
            double_click: Duration::from_millis(DOUBLE_CLICK_DURATION_MS),
            long_press: Duration::from_millis(LONG_PRESS_DURATION_MS),
        }
    }

    /// Timings for edge-driven inputs. Edges arrive without sampling lag,
    /// so the windows are shorter.
    pub fn edge() -> Self {
        Self {
            double_click: Duration::from_millis(EDGE_DOUBLE_CLICK_DURATION_MS),
            long_press: Duration::from_millis(EDGE_LONG_PRESS_DURATION_MS),
        }
    }
}

/// Outcome of offering an edge to a [`Debouncer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// Process the edge now.
    Accept,
    /// The edge is inside the window. Its level is held and must be
    /// settled at `settle_at`.
    Defer { settle_at: Instant },
    /// The edge replaced a level already held for settling.
    Merged,
}

/// Software debounce window.
///
/// Edges closer than the window to the last accepted one are not dropped:
/// the level of the latest such edge is held and applied once the window
/// closes, so a release that lands inside the window still reaches the
/// classifier.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    last_accepted: Option<Instant>,
    held: Option<bool>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_accepted: None,
            held: None,
        }
    }

    /// Returns `true` if a sample at `at` is outside the window.
    pub fn accept(&mut self, at: Instant) -> bool {
        match self.last_accepted {
            Some(last) if at.saturating_duration_since(last) < self.window => false,
            _ => {
                self.last_accepted = Some(at);
                self.held = None;
                true
            }
        }
    }

    /// Offers an edge with line level `level` seen at `at`.
    pub fn offer(&mut self, at: Instant, level: bool) -> Offer {
        if self.accept(at) {
            return Offer::Accept;
        }
        match self.held.replace(level) {
            Some(_) => Offer::Merged,
            None => Offer::Defer {
                settle_at: self.last_accepted.map_or(at, |last| last + self.window),
            },
        }
    }

    /// Takes the held level, if any, counting it as accepted at `at`.
    pub fn settle(&mut self, at: Instant) -> Option<bool> {
        let level = self.held.take()?;
        self.last_accepted = Some(at);
        Some(level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timings_follow_detection() {
        assert_eq!(Detection::poll().default_timings().double_click, Duration::from_millis(350));
        assert_eq!(Detection::poll().default_timings().long_press, Duration::from_millis(600));
        assert_eq!(Detection::edge().default_timings().double_click, Duration::from_millis(220));
        assert_eq!(Detection::edge().default_timings().long_press, Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_debouncer_rejects_within_window() {
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        let start = Instant::now();

        assert!(debouncer.accept(start));
        assert!(!debouncer.accept(start + Duration::from_millis(40)));
        assert!(!debouncer.accept(start + Duration::from_millis(99)));
        assert!(debouncer.accept(start + Duration::from_millis(100)));
        // The window restarts from the last accepted sample.
        assert!(!debouncer.accept(start + Duration::from_millis(150)));
    }

    #[test]
    fn test_zero_window_accepts_everything() {
        let mut debouncer = Debouncer::new(Duration::ZERO);
        let now = Instant::now();
        assert!(debouncer.accept(now));
        assert!(debouncer.accept(now));
    }

    #[tokio::test(start_paused = true)]
    async fn test_edge_inside_window_is_held_until_it_closes() {
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        let start = Instant::now();

        assert_eq!(debouncer.offer(start, true), Offer::Accept);
        assert_eq!(
            debouncer.offer(start + Duration::from_millis(60), false),
            Offer::Defer {
                settle_at: start + Duration::from_millis(100)
            }
        );
        assert_eq!(debouncer.settle(start + Duration::from_millis(100)), Some(false));
        assert_eq!(debouncer.settle(start + Duration::from_millis(100)), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounce_burst_settles_on_last_level() {
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        let start = Instant::now();

        assert_eq!(debouncer.offer(start, true), Offer::Accept);
        assert!(matches!(
            debouncer.offer(start + Duration::from_millis(2), false),
            Offer::Defer { .. }
        ));
        assert_eq!(debouncer.offer(start + Duration::from_millis(4), true), Offer::Merged);
        assert_eq!(debouncer.settle(start + Duration::from_millis(100)), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_accepted_edge_discards_held_level() {
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        let start = Instant::now();

        debouncer.offer(start, true);
        debouncer.offer(start + Duration::from_millis(50), false);
        assert_eq!(debouncer.offer(start + Duration::from_millis(100), false), Offer::Accept);
        assert_eq!(debouncer.settle(start + Duration::from_millis(100)), None);
    }
}
