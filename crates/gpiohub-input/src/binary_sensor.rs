//! Pressed/released reporting for two-state contacts.

use gpiohub_core::ClickType;

/// Classifier for a binary sensor input.
///
/// Reports `Pressed` or `Released` whenever the sampled level changes.
/// The very first sample only establishes the level unless `initial_send`
/// asks for it to be reported too.
#[derive(Debug, Clone)]
pub struct BinarySensorMachine {
    inverted: bool,
    initial_send: bool,
    last: Option<bool>,
}

impl BinarySensorMachine {
    pub fn new(inverted: bool, initial_send: bool) -> Self {
        Self {
            inverted,
            initial_send,
            last: None,
        }
    }

    /// Last level seen, before inversion.
    pub fn level(&self) -> Option<bool> {
        self.last
    }

    pub fn on_sample(&mut self, active: bool) -> Option<ClickType> {
        let first = self.last.is_none();
        if self.last == Some(active) {
            return None;
        }
        self.last = Some(active);

        if first && !self.initial_send {
            return None;
        }

        let pressed = active != self.inverted;
        Some(if pressed {
            ClickType::Pressed
        } else {
            ClickType::Released
        })
    }
}
