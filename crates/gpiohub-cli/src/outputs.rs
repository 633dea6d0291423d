//! Relay outputs driven by actions and inbound commands.

use crate::config::{OutputAction, OutputEntry};
use crate::error::Result;
use chrono::Utc;
use gpiohub_core::{OutputState, Switch};
use gpiohub_events::EventBus;
use gpiohub_hardware::{Bias, Direction, PinManager};
use gpiohub_network::{QueueItem, UniqueQueue, output_payload, state_topic};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Topic segment of relay state messages.
pub const RELAY_KIND: &str = "relay";

/// One output line.
///
/// Every change is written to the pin, published on the bus and queued as
/// a retained state message.
#[derive(Debug)]
pub struct GpioOutput {
    entry: OutputEntry,
    topic: String,
    state: Mutex<Switch>,
    pins: Arc<PinManager>,
    bus: EventBus,
    queue: Arc<UniqueQueue>,
}

impl GpioOutput {
    /// Claim the line as an output, driven inactive.
    ///
    /// # Errors
    ///
    /// Returns an error if the line cannot be configured or written.
    pub async fn start(
        entry: OutputEntry,
        topic_prefix: &str,
        pins: Arc<PinManager>,
        bus: EventBus,
        queue: Arc<UniqueQueue>,
    ) -> Result<Self> {
        pins.configure(&entry.pin, Direction::Output, Bias::Disabled).await?;
        pins.write(&entry.pin, false).await?;
        info!(id = %entry.id, pin = %entry.pin, "Output ready");

        Ok(Self {
            topic: state_topic(topic_prefix, RELAY_KIND, &entry.id),
            entry,
            state: Mutex::new(Switch::Off),
            pins,
            bus,
            queue,
        })
    }

    pub fn id(&self) -> &str {
        &self.entry.id
    }

    pub fn pin(&self) -> &str {
        &self.entry.pin
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn is_on(&self) -> bool {
        self.state.lock().await.is_on()
    }

    pub async fn turn_on(&self) -> Result<()> {
        self.apply(OutputAction::On).await
    }

    pub async fn turn_off(&self) -> Result<()> {
        self.apply(OutputAction::Off).await
    }

    pub async fn toggle(&self) -> Result<()> {
        self.apply(OutputAction::Toggle).await
    }

    /// Apply a command and report the resulting state.
    ///
    /// The state is reported even when it did not change, so consumers
    /// always see an answer to a command.
    ///
    /// # Errors
    ///
    /// Returns an error if the pin write fails; the stored state is left
    /// unchanged in that case.
    pub async fn apply(&self, action: OutputAction) -> Result<()> {
        let mut state = self.state.lock().await;
        let on = match action {
            OutputAction::On => true,
            OutputAction::Off => false,
            OutputAction::Toggle => !state.is_on(),
        };

        self.pins.write(&self.entry.pin, on).await?;
        *state = Switch::from_active(on);
        debug!(id = %self.entry.id, %action, state = %*state, "Output set");

        let snapshot = self.snapshot(*state);
        drop(state);
        self.bus.publish(snapshot.clone());
        self.enqueue(&snapshot).await
    }

    /// Queue the current state again, e.g. after the consumer reconnects.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be encoded.
    pub async fn announce(&self) -> Result<()> {
        let snapshot = self.snapshot(*self.state.lock().await);
        self.enqueue(&snapshot).await
    }

    fn snapshot(&self, state: Switch) -> OutputState {
        OutputState {
            id: self.entry.id.clone(),
            name: self.entry.display_name().to_string(),
            state,
            kind: self.entry.kind.clone(),
            pin: self.entry.pin.clone(),
            timestamp: Some(Utc::now()),
        }
    }

    async fn enqueue(&self, state: &OutputState) -> Result<()> {
        let payload = output_payload(state)?;
        self.queue
            .enqueue(QueueItem::new(self.topic.clone(), payload, true))
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpiohub_core::{Event, EventCategory, EventPayload};
    use gpiohub_events::{EventBusConfig, Target};
    use gpiohub_hardware::PinManagerConfig;
    use gpiohub_hardware::mock::{MockBackend, MockBackendHandle};
    use tokio::sync::mpsc;

    async fn output() -> (GpioOutput, MockBackendHandle, Arc<UniqueQueue>, EventBus) {
        let (backend, handle) = MockBackend::new(&["P8_10"]);
        let pins = PinManager::discover(backend.into(), PinManagerConfig::default())
            .await
            .unwrap();
        let bus = EventBus::start(EventBusConfig::default());
        let queue = Arc::new(UniqueQueue::new());
        queue.set_connected(true);
        let entry = OutputEntry {
            id: "lamp".to_string(),
            pin: "P8_10".to_string(),
            name: Some("Hall lamp".to_string()),
            kind: "switch".to_string(),
        };
        let output = GpioOutput::start(entry, "gpiohub", Arc::new(pins), bus.clone(), Arc::clone(&queue))
            .await
            .unwrap();
        (output, handle, queue, bus)
    }

    #[tokio::test]
    async fn test_start_drives_line_inactive() {
        let (output, handle, queue, bus) = output().await;
        assert_eq!(handle.direction("P8_10"), Some(Direction::Output));
        assert_eq!(handle.level("P8_10"), Some(false));
        assert!(!output.is_on().await);
        assert!(queue.is_empty());
        bus.shutdown().await;
    }

    #[tokio::test]
    async fn test_toggle_writes_and_reports() {
        let (output, handle, queue, bus) = output().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.register(
            EventCategory::Output,
            "lamp",
            "recorder",
            Target::immediate(move |event: Arc<Event>| {
                if let EventPayload::Output(state) = event.payload() {
                    tx.send(state.state)?;
                }
                Ok(())
            }),
        );

        output.toggle().await.unwrap();
        assert_eq!(handle.level("P8_10"), Some(true));
        assert_eq!(rx.recv().await, Some(Switch::On));

        let item = queue.try_dequeue().unwrap();
        assert_eq!(item.topic, "gpiohub/relay/lamp");
        assert_eq!(item.payload, r#"{"state":"ON"}"#);
        assert!(item.retain);

        output.toggle().await.unwrap();
        assert_eq!(handle.level("P8_10"), Some(false));
        assert_eq!(rx.recv().await, Some(Switch::Off));
        bus.shutdown().await;
    }

    #[tokio::test]
    async fn test_repeated_command_still_reports() {
        let (output, _handle, queue, bus) = output().await;
        output.turn_off().await.unwrap();
        output.turn_on().await.unwrap();
        output.turn_on().await.unwrap();

        let payloads: Vec<_> = std::iter::from_fn(|| queue.try_dequeue())
            .map(|item| item.payload)
            .collect();
        assert_eq!(
            payloads,
            vec![r#"{"state":"OFF"}"#, r#"{"state":"ON"}"#, r#"{"state":"ON"}"#]
        );
        bus.shutdown().await;
    }
}
