//! Click-gesture classification.
//!
//! Turns a stream of pressed/released samples into single, double and long
//! clicks. The machine itself holds no timers; it drives two through the
//! [`GestureTimers`] seam and is told when one of them expires. This keeps
//! the classification rules free of any runtime and lets the input wire
//! real [`ClickTimer`](crate::ClickTimer)s behind it.
//!
//! # States
//!
//! ```text
//!                press (double timer idle)
//!   ┌──────┐ ─────────────────────────────▶ ┌───────────────────────────┐
//!   │ Idle │                                │ PressedWaitingSecondClick │
//!   └──────┘ ◀─── double expiry ───┐        └───────────────────────────┘
//!       ▲                          │                  │ release
//!       │                     ┌──────────┐ ◀──────────┘
//!       └──── (released) ──── │ Released │
//!                             └──────────┘ ── press (double timer armed) ──▶ PressedConfirmed
//! ```
//!
//! # Rules
//!
//! - **Press**: the long-press timer always restarts. If the double-click
//!   timer is armed it is cancelled and a `Double` is emitted; otherwise it
//!   is started and the machine waits for a second click.
//! - **Release**: a `Single` is emitted right away only when no second
//!   click is awaited, no double was confirmed and the long-press timer is
//!   still armed. The long-press timer is then cancelled.
//! - **Double-click expiry**: the wait ends. If the button is already
//!   released and no long press is pending, the deferred `Single` is
//!   emitted.
//! - **Long-press expiry**: `Long` is emitted with the time held. A
//!   double-click wait still running is dropped, so the release that
//!   follows reports nothing.
//!
//! A double click therefore never produces a single, and a single is only
//! reported once the double-click window has passed.

use gpiohub_core::ClickType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::trace;

/// The two timers the machine drives.
pub trait GestureTimers {
    fn start_long(&mut self);
    fn start_double(&mut self);
    /// Returns `true` if the timer was armed.
    fn cancel_long(&mut self) -> bool;
    /// Returns `true` if the timer was armed.
    fn cancel_double(&mut self) -> bool;
    fn long_armed(&self) -> bool;
}

/// Where the machine is between samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GestureState {
    /// Released and nothing pending.
    #[default]
    Idle,
    /// First press of a possible double click.
    PressedWaitingSecondClick,
    /// Second press inside the window; the double was already reported.
    PressedConfirmed,
    /// Released, possibly still inside the double-click window.
    Released,
}

impl fmt::Display for GestureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::PressedWaitingSecondClick => write!(f, "pressed_waiting_second_click"),
            Self::PressedConfirmed => write!(f, "pressed_confirmed"),
            Self::Released => write!(f, "released"),
        }
    }
}

/// Gesture classifier for one button.
#[derive(Debug, Clone, Default)]
pub struct GestureMachine {
    state: GestureState,
    pressed: bool,
    waiting_second_click: bool,
    double_confirmed: bool,
}

impl GestureMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the physical level without classifying it.
    ///
    /// Used once at startup so a button held during boot is not reported
    /// as a press.
    pub fn seed(&mut self, pressed: bool) {
        self.pressed = pressed;
    }

    pub fn state(&self) -> GestureState {
        self.state
    }

    pub fn is_pressed(&self) -> bool {
        self.pressed
    }

    /// Feed one sample. Repeated samples at the same level are ignored.
    pub fn on_sample(&mut self, pressed: bool, timers: &mut impl GestureTimers) -> Option<ClickType> {
        if pressed == self.pressed {
            return None;
        }
        self.pressed = pressed;

        if pressed {
            self.on_press(timers)
        } else {
            self.on_release(timers)
        }
    }

    fn on_press(&mut self, timers: &mut impl GestureTimers) -> Option<ClickType> {
        timers.start_long();

        if timers.cancel_double() {
            self.waiting_second_click = false;
            self.double_confirmed = true;
            self.transition(GestureState::PressedConfirmed);
            Some(ClickType::Double)
        } else {
            timers.start_double();
            self.waiting_second_click = true;
            self.transition(GestureState::PressedWaitingSecondClick);
            None
        }
    }

    fn on_release(&mut self, timers: &mut impl GestureTimers) -> Option<ClickType> {
        let single = !self.waiting_second_click && !self.double_confirmed && timers.long_armed();
        timers.cancel_long();
        self.double_confirmed = false;

        if self.waiting_second_click {
            self.transition(GestureState::Released);
        } else {
            self.transition(GestureState::Idle);
        }
        single.then_some(ClickType::Single)
    }

    /// The double-click window closed without a second press.
    pub fn on_double_expired(&mut self, timers: &impl GestureTimers) -> Option<ClickType> {
        // A long press already ended the wait.
        if !std::mem::take(&mut self.waiting_second_click) {
            return None;
        }
        if self.pressed {
            return None;
        }

        self.transition(GestureState::Idle);
        (!timers.long_armed()).then_some(ClickType::Single)
    }

    /// The button was held for the long-press threshold.
    pub fn on_long_expired(
        &mut self,
        held: Duration,
        timers: &mut impl GestureTimers,
    ) -> Option<(ClickType, Duration)> {
        if !self.pressed {
            return None;
        }
        timers.cancel_double();
        self.waiting_second_click = false;
        Some((ClickType::Long, held))
    }

    fn transition(&mut self, next: GestureState) {
        if self.state != next {
            trace!(from = %self.state, to = %next, "Gesture transition");
            self.state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Timers driven by hand. Expiry is simulated by the test.
    #[derive(Debug, Default)]
    struct ManualTimers {
        long: bool,
        double: bool,
    }

    impl GestureTimers for ManualTimers {
        fn start_long(&mut self) {
            self.long = true;
        }
        fn start_double(&mut self) {
            self.double = true;
        }
        fn cancel_long(&mut self) -> bool {
            std::mem::take(&mut self.long)
        }
        fn cancel_double(&mut self) -> bool {
            std::mem::take(&mut self.double)
        }
        fn long_armed(&self) -> bool {
            self.long
        }
    }

    struct Harness {
        machine: GestureMachine,
        timers: ManualTimers,
        emitted: Vec<ClickType>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                machine: GestureMachine::new(),
                timers: ManualTimers::default(),
                emitted: Vec::new(),
            }
        }

        fn sample(&mut self, pressed: bool) {
            if let Some(click) = self.machine.on_sample(pressed, &mut self.timers) {
                self.emitted.push(click);
            }
        }

        fn expire_double(&mut self) {
            if std::mem::take(&mut self.timers.double) {
                if let Some(click) = self.machine.on_double_expired(&self.timers) {
                    self.emitted.push(click);
                }
            }
        }

        fn expire_long(&mut self) {
            if std::mem::take(&mut self.timers.long) {
                if let Some((click, _)) = self
                    .machine
                    .on_long_expired(Duration::from_millis(600), &mut self.timers)
                {
                    self.emitted.push(click);
                }
            }
        }
    }

    #[test]
    fn test_single_click_reported_after_window() {
        let mut h = Harness::new();
        h.sample(true);
        h.sample(false);
        assert!(h.emitted.is_empty());
        assert_eq!(h.machine.state(), GestureState::Released);

        h.expire_double();
        assert_eq!(h.emitted, vec![ClickType::Single]);
        assert_eq!(h.machine.state(), GestureState::Idle);
    }

    #[test]
    fn test_double_click_never_reports_single() {
        let mut h = Harness::new();
        h.sample(true);
        h.sample(false);
        h.sample(true);
        assert_eq!(h.machine.state(), GestureState::PressedConfirmed);
        h.sample(false);
        h.expire_double();
        h.expire_long();

        assert_eq!(h.emitted, vec![ClickType::Double]);
        assert_eq!(h.machine.state(), GestureState::Idle);
    }

    #[test]
    fn test_long_press_reports_long_only() {
        let mut h = Harness::new();
        h.sample(true);
        h.expire_double();
        h.expire_long();
        h.sample(false);

        assert_eq!(h.emitted, vec![ClickType::Long]);
    }

    #[test]
    fn test_long_press_inside_double_window_reports_long_only() {
        let mut h = Harness::new();
        h.sample(true);
        h.expire_long();
        assert!(!h.timers.double);
        h.sample(false);
        h.expire_double();

        assert_eq!(h.emitted, vec![ClickType::Long]);
        assert_eq!(h.machine.state(), GestureState::Idle);
    }

    #[test]
    fn test_double_expiry_after_long_press_is_ignored() {
        let mut h = Harness::new();
        h.sample(true);
        h.expire_long();
        h.sample(false);

        // An expiry that fired before the long press cancelled it.
        assert_eq!(h.machine.on_double_expired(&h.timers), None);
        assert_eq!(h.emitted, vec![ClickType::Long]);
    }

    #[test]
    fn test_release_after_window_reports_single_immediately() {
        let mut h = Harness::new();
        h.sample(true);
        h.expire_double();
        assert!(h.emitted.is_empty());

        h.sample(false);
        assert_eq!(h.emitted, vec![ClickType::Single]);
    }

    #[test]
    fn test_repeated_samples_ignored() {
        let mut h = Harness::new();
        h.sample(false);
        h.sample(true);
        h.sample(true);
        h.sample(true);
        assert!(h.timers.double);
        assert!(h.machine.is_pressed());
    }

    #[test]
    fn test_seeded_press_is_not_classified() {
        let mut h = Harness::new();
        h.machine.seed(true);
        h.sample(true);
        assert!(!h.timers.long);
        assert!(!h.timers.double);
    }

    #[derive(Debug, Clone, Copy)]
    enum Step {
        Sample(bool),
        DoubleExpires,
        LongExpires,
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            any::<bool>().prop_map(Step::Sample),
            Just(Step::DoubleExpires),
            Just(Step::LongExpires),
        ]
    }

    proptest! {
        /// Property: every press produces at most one classification, and a
        /// double is never preceded by a single for the same pair of presses.
        #[test]
        fn prop_at_most_one_click_per_press(steps in prop::collection::vec(step(), 0..80)) {
            let mut h = Harness::new();
            let mut presses = 0usize;
            let mut doubles = 0usize;

            for step in steps {
                match step {
                    Step::Sample(pressed) => {
                        if pressed && !h.machine.is_pressed() {
                            presses += 1;
                        }
                        h.sample(pressed);
                    }
                    Step::DoubleExpires => h.expire_double(),
                    Step::LongExpires => h.expire_long(),
                }
            }

            for click in &h.emitted {
                if *click == ClickType::Double {
                    doubles += 1;
                }
            }
            // A double consumes two presses.
            prop_assert!(h.emitted.len() + doubles <= presses);
            prop_assert!(h.emitted.iter().all(ClickType::is_gesture));
        }
    }
}
