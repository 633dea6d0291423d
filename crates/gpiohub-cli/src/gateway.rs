//! Wires pins, inputs, outputs, the event bus and queued delivery into one
//! running gateway.
//!
//! Presses run the configured actions first, then queue the input's state
//! message. Relay commands arrive on `{device_id}/cmd/relay/{pin}/set`, and
//! every output re-announces its state whenever the transport comes back
//! online.

use crate::cli::BackendKind;
use crate::config::{ActionConfig, Config, OutputAction};
use crate::error::{GatewayError, Result};
use crate::outputs::{GpioOutput, RELAY_KIND};
use gpiohub_core::ClickType;
use gpiohub_core::constants::CLEAR_MESSAGE_DELAY_MS;
use gpiohub_events::{EventBus, Target};
use gpiohub_hardware::mock::MockBackend;
use gpiohub_hardware::{AnyLineBackend, PinManager};
use gpiohub_input::{Input, PressReport};
use gpiohub_network::{
    LocalTransport, QueueItem, QueuePublisher, UniqueQueue, input_payload, state_topic,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Topic a remote gateway listens on for commands to one of its entities.
pub fn command_topic(device_id: &str, kind: &str, pin: &str) -> String {
    format!("{device_id}/cmd/{kind}/{pin}/set")
}

/// Pin addressed by a command topic.
fn command_pin(topic: &str) -> Option<&str> {
    let mut levels = topic.rsplit('/');
    match (levels.next(), levels.next()) {
        (Some("set"), Some(pin)) if !pin.is_empty() => Some(pin),
        _ => None,
    }
}

/// Build the line backend selected on the command line.
///
/// The mock backend exposes exactly the pins named in the configuration.
///
/// # Errors
///
/// Returns `GatewayError::BackendUnavailable` when the GPIO character
/// device backend was not compiled in.
pub fn backend(kind: BackendKind, config: &Config) -> Result<AnyLineBackend> {
    match kind {
        BackendKind::Mock => {
            let (backend, _handle) = MockBackend::new(&config.pins());
            Ok(backend.into())
        }
        BackendKind::Gpiod => gpiod_backend(),
    }
}

#[cfg(feature = "gpiod")]
fn gpiod_backend() -> Result<AnyLineBackend> {
    Ok(gpiohub_hardware::gpiod::GpiodBackend::new().into())
}

#[cfg(not(feature = "gpiod"))]
fn gpiod_backend() -> Result<AnyLineBackend> {
    Err(GatewayError::BackendUnavailable("gpiod"))
}

/// Turns classifications and commands into output changes and messages.
struct Dispatch {
    topic_prefix: String,
    queue: Arc<UniqueQueue>,
    /// Keyed by pin.
    outputs: BTreeMap<String, Arc<GpioOutput>>,
    /// Keyed by input pin.
    actions: HashMap<String, HashMap<ClickType, Vec<ActionConfig>>>,
    cancel: CancellationToken,
}

impl Dispatch {
    async fn on_press(&self, report: PressReport) -> anyhow::Result<()> {
        let actions = self
            .actions
            .get(&report.pin)
            .and_then(|by_click| by_click.get(&report.click))
            .map(Vec::as_slice)
            .unwrap_or_default();

        for action in actions {
            if let Err(err) = self.run(action).await {
                warn!(pin = %report.pin, click = %report.click, error = %err, "Action failed");
            }
        }

        let topic = state_topic(&self.topic_prefix, report.kind.as_str(), &report.pin);
        let payload = input_payload(report.kind, report.click, report.held_seconds())?;
        debug!(%topic, %payload, "Queueing input state");
        self.queue
            .enqueue(QueueItem::new(topic.clone(), payload, false))
            .await;

        if report.clear_message {
            let queue = Arc::clone(&self.queue);
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {}
                    () = tokio::time::sleep(Duration::from_millis(CLEAR_MESSAGE_DELAY_MS)) => {
                        queue.enqueue(QueueItem::new(topic, "", false)).await;
                    }
                }
            });
        }
        Ok(())
    }

    async fn run(&self, action: &ActionConfig) -> Result<()> {
        match action {
            ActionConfig::Mqtt { topic, message } => {
                self.send(topic.clone(), message.clone()).await;
            }
            ActionConfig::Output { pin, command } => {
                self.output(pin)?.apply(*command).await?;
            }
            ActionConfig::OutputOverMqtt {
                device_id,
                pin,
                command,
            } => {
                self.send(command_topic(device_id, RELAY_KIND, pin), command.as_str())
                    .await;
            }
            ActionConfig::CoverOverMqtt {
                device_id,
                pin,
                command,
            } => {
                self.send(command_topic(device_id, "cover", pin), command.as_str())
                    .await;
            }
        }
        Ok(())
    }

    async fn send(&self, topic: String, payload: impl Into<String>) {
        self.queue.enqueue(QueueItem::new(topic, payload, false)).await;
    }

    fn output(&self, pin: &str) -> Result<&Arc<GpioOutput>> {
        self.outputs
            .get(pin)
            .ok_or_else(|| GatewayError::UnknownOutput(pin.to_string()))
    }
}

/// A running gateway.
pub struct Gateway {
    pins: Arc<PinManager>,
    bus: EventBus,
    queue: Arc<UniqueQueue>,
    transport: LocalTransport,
    publisher: QueuePublisher,
    dispatch: Arc<Dispatch>,
    inputs: Vec<Input>,
    cancel: CancellationToken,
    tasks: Mutex<JoinSet<()>>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.dispatch.outputs.len())
            .field("queued", &self.queue.len())
            .finish()
    }
}

impl Gateway {
    /// Discover the lines and start every configured input and output.
    ///
    /// # Errors
    ///
    /// Returns an error if discovery fails or any line cannot be claimed.
    /// Everything started so far is shut down again.
    pub async fn start(config: Config, backend: AnyLineBackend) -> Result<Self> {
        let pins = Arc::new(PinManager::discover(backend, config.pin_manager_config()).await?);
        let bus = EventBus::start(config.event_bus_config());

        match Self::assemble(&config, Arc::clone(&pins), bus.clone()).await {
            Ok(gateway) => Ok(gateway),
            Err(err) => {
                error!(error = %err, "Gateway startup failed");
                bus.shutdown().await;
                pins.shutdown().await;
                Err(err)
            }
        }
    }

    async fn assemble(config: &Config, pins: Arc<PinManager>, bus: EventBus) -> Result<Self> {
        let prefix = &config.gateway.topic_prefix;
        let queue = Arc::new(match config.queue_capacity() {
            Some(capacity) => UniqueQueue::bounded(capacity),
            None => UniqueQueue::new(),
        });

        let mut outputs = BTreeMap::new();
        for entry in &config.outputs {
            let output = GpioOutput::start(
                entry.clone(),
                prefix,
                Arc::clone(&pins),
                bus.clone(),
                Arc::clone(&queue),
            )
            .await?;
            outputs.insert(entry.pin.clone(), Arc::new(output));
        }

        let cancel = CancellationToken::new();
        let dispatch = Arc::new(Dispatch {
            topic_prefix: prefix.clone(),
            queue: Arc::clone(&queue),
            outputs,
            actions: config
                .inputs
                .iter()
                .map(|entry| (entry.pin.clone(), entry.actions.clone()))
                .collect(),
            cancel: cancel.clone(),
        });

        let announced: Arc<Vec<Arc<GpioOutput>>> = Arc::new(dispatch.outputs.values().cloned().collect());
        bus.register_online_hook(Target::deferred(move |()| {
            let outputs = Arc::clone(&announced);
            async move {
                for output in outputs.iter() {
                    output.announce().await?;
                }
                Ok::<_, anyhow::Error>(())
            }
        }));

        let transport = LocalTransport::new();
        let commands = transport.subscribe(&command_topic(&config.gateway.device_id, RELAY_KIND, "+"));
        let publisher = QueuePublisher::spawn(Arc::clone(&queue), transport.clone(), config.publisher_config());

        let mut tasks = JoinSet::new();
        tasks.spawn(serve_commands(Arc::clone(&dispatch), commands, cancel.clone()));
        tasks.spawn(follow_connectivity(bus.clone(), publisher.connectivity(), cancel.clone()));

        let mut inputs = Vec::with_capacity(config.inputs.len());
        for entry in &config.inputs {
            let target = Arc::clone(&dispatch);
            let callback = Target::deferred(move |report: PressReport| {
                let dispatch = Arc::clone(&target);
                async move { dispatch.on_press(report).await }
            });
            inputs.push(Input::start(entry.input_config(), Arc::clone(&pins), bus.clone(), callback).await?);
        }

        info!(
            device_id = %config.gateway.device_id,
            inputs = inputs.len(),
            outputs = dispatch.outputs.len(),
            "Gateway started"
        );
        Ok(Self {
            pins,
            bus,
            queue,
            transport,
            publisher,
            dispatch,
            inputs,
            cancel,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn queue(&self) -> &Arc<UniqueQueue> {
        &self.queue
    }

    /// Transport the queue drains into.
    pub fn transport(&self) -> &LocalTransport {
        &self.transport
    }

    pub fn inputs(&self) -> &[Input] {
        &self.inputs
    }

    /// Output on `pin`.
    pub fn output(&self, pin: &str) -> Option<&Arc<GpioOutput>> {
        self.dispatch.outputs.get(pin)
    }

    /// Stop inputs, then the bus, then release the lines, then stop
    /// delivery. Messages not yet sent stay queued.
    pub async fn shutdown(&self) {
        info!("Gateway shutting down");
        self.cancel.cancel();

        for input in &self.inputs {
            input.stop().await;
        }
        let mut tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        while let Some(result) = tasks.join_next().await {
            if let Err(err) = result
                && err.is_panic()
            {
                warn!(error = %err, "Gateway task panicked");
            }
        }

        self.bus.shutdown().await;
        self.pins.shutdown().await;
        self.publisher.stop().await;
        info!(unsent = self.queue.len(), "Gateway stopped");
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn serve_commands(
    dispatch: Arc<Dispatch>,
    mut commands: mpsc::UnboundedReceiver<QueueItem>,
    cancel: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            item = commands.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };

        let Some(pin) = command_pin(&item.topic) else {
            warn!(topic = %item.topic, "Malformed command topic");
            continue;
        };
        let command = match item.payload.parse::<OutputAction>() {
            Ok(command) => command,
            Err(err) => {
                warn!(topic = %item.topic, error = %err, "Ignoring relay command");
                continue;
            }
        };
        match dispatch.output(pin) {
            Ok(output) => {
                if let Err(err) = output.apply(command).await {
                    warn!(pin, error = %err, "Relay command failed");
                }
            }
            Err(err) => warn!(error = %err, "Ignoring relay command"),
        }
    }
    debug!("Command listener stopped");
}

async fn follow_connectivity(bus: EventBus, mut connectivity: watch::Receiver<bool>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            changed = connectivity.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
        if *connectivity.borrow_and_update() {
            bus.signal_online().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("hall/cmd/relay/P8_10/set", Some("P8_10"))]
    #[case("hall/cmd/relay/P8_10", None)]
    #[case("hall/cmd/relay//set", None)]
    #[case("set", None)]
    fn test_command_pin(#[case] topic: &str, #[case] expected: Option<&str>) {
        assert_eq!(command_pin(topic), expected);
    }

    #[test]
    fn test_command_topic() {
        assert_eq!(command_topic("attic", "cover", "P9_12"), "attic/cmd/cover/P9_12/set");
    }

    #[test]
    fn test_mock_backend_from_config() {
        let config = Config::parse("[[input]]\npin = \"P8_30\"").unwrap();
        assert!(backend(BackendKind::Mock, &config).is_ok());
    }

    #[cfg(not(feature = "gpiod"))]
    #[test]
    fn test_gpiod_backend_unavailable() {
        let err = backend(BackendKind::Gpiod, &Config::default()).unwrap_err();
        assert!(matches!(err, GatewayError::BackendUnavailable("gpiod")));
    }
}
