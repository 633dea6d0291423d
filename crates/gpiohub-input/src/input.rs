//! A physical input bound to one pin.
//!
//! An [`Input`] samples its pin (by polling or through edge events), feeds
//! the samples to its classifier and hands every classification to a
//! single delivery task. Delivery runs under the input's lock: it stamps
//! the time, awaits the press callback, then publishes an `InputState` on
//! the event bus. Classifications of one input are therefore delivered one
//! at a time and in the order they were made.

use crate::binary_sensor::BinarySensorMachine;
use crate::click_timer::ClickTimer;
use crate::detection::{Debouncer, Detection, GestureTimings, Offer};
use crate::error::{InputError, Result};
use crate::gesture::{GestureMachine, GestureTimers};
use chrono::{DateTime, Utc};
use gpiohub_core::{ClickType, InputKind, InputState};
use gpiohub_events::{EventBus, Target};
use gpiohub_hardware::{Bias, Direction, EdgeKind, HardwareError, PinManager};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

/// Settings of one input.
#[derive(Debug, Clone, PartialEq)]
pub struct InputConfig {
    pub pin: String,
    /// Display name; defaults to the pin name.
    pub name: String,
    pub kind: InputKind,
    pub detection: Detection,
    pub timings: GestureTimings,
    pub bias: Bias,
    /// Binary sensors only: report `Pressed` for an inactive line.
    pub inverted: bool,
    /// Binary sensors only: report the level found at startup.
    pub initial_send: bool,
    /// Ask consumers to clear the published state shortly after a press.
    pub clear_message: bool,
}

impl InputConfig {
    /// Polled input with the default timings.
    pub fn new(pin: impl Into<String>, kind: InputKind) -> Self {
        let pin = pin.into();
        let detection = Detection::default();
        Self {
            name: pin.clone(),
            pin,
            kind,
            detection,
            timings: detection.default_timings(),
            bias: Bias::default(),
            inverted: false,
            initial_send: false,
            clear_message: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Switch the sampling strategy. Resets the timings to the ones tuned
    /// for that strategy.
    pub fn with_detection(mut self, detection: Detection) -> Self {
        self.detection = detection;
        self.timings = detection.default_timings();
        self
    }

    pub fn with_timings(mut self, timings: GestureTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn with_bias(mut self, bias: Bias) -> Self {
        self.bias = bias;
        self
    }

    pub fn inverted(mut self, inverted: bool) -> Self {
        self.inverted = inverted;
        self
    }

    pub fn initial_send(mut self, initial_send: bool) -> Self {
        self.initial_send = initial_send;
        self
    }

    pub fn clear_message(mut self, clear_message: bool) -> Self {
        self.clear_message = clear_message;
        self
    }

    /// Check the settings before touching the hardware.
    ///
    /// # Errors
    ///
    /// Returns `InputError::InvalidConfig` for a zero polling interval or
    /// zero gesture timings.
    pub fn validate(&self) -> Result<()> {
        if let Detection::Poll { interval } = self.detection
            && interval.is_zero()
        {
            return Err(InputError::invalid_config(&self.pin, "polling interval must be positive"));
        }
        if self.kind == InputKind::Event
            && (self.timings.double_click.is_zero() || self.timings.long_press.is_zero())
        {
            return Err(InputError::invalid_config(&self.pin, "gesture timings must be positive"));
        }
        Ok(())
    }
}

/// What the press callback receives for each classification.
#[derive(Debug, Clone, PartialEq)]
pub struct PressReport {
    pub pin: String,
    pub name: String,
    pub kind: InputKind,
    pub click: ClickType,
    /// Time held, for long presses.
    pub duration: Option<Duration>,
    pub clear_message: bool,
    pub timestamp: DateTime<Utc>,
}

impl PressReport {
    /// Held time in seconds rounded to two decimals.
    pub fn held_seconds(&self) -> Option<f64> {
        self.duration.map(round_seconds)
    }
}

/// Callback awaited for every classification, before the bus is notified.
pub type PressCallback = Target<PressReport>;

#[derive(Debug, Clone, Copy)]
struct Emission {
    click: ClickType,
    duration: Option<Duration>,
}

struct InputTimers {
    long: ClickTimer,
    double: ClickTimer,
    owner: Weak<Shared>,
}

impl InputTimers {
    fn new(timings: GestureTimings, owner: Weak<Shared>) -> Self {
        Self {
            long: ClickTimer::new(timings.long_press),
            double: ClickTimer::new(timings.double_click),
            owner,
        }
    }
}

impl GestureTimers for InputTimers {
    fn start_long(&mut self) {
        let owner = self.owner.clone();
        self.long.start(move |held| {
            if let Some(shared) = owner.upgrade() {
                shared.on_long_expired(held);
            }
        });
    }

    fn start_double(&mut self) {
        let owner = self.owner.clone();
        self.double.start(move |_| {
            if let Some(shared) = owner.upgrade() {
                shared.on_double_expired();
            }
        });
    }

    fn cancel_long(&mut self) -> bool {
        self.long.cancel()
    }

    fn cancel_double(&mut self) -> bool {
        self.double.cancel()
    }

    fn long_armed(&self) -> bool {
        self.long.is_armed()
    }
}

enum Classifier {
    Gesture {
        machine: GestureMachine,
        timers: InputTimers,
    },
    Sensor(BinarySensorMachine),
}

#[derive(Debug, Default)]
struct Delivery {
    last: Option<(ClickType, DateTime<Utc>)>,
}

struct Shared {
    config: InputConfig,
    classifier: Mutex<Classifier>,
    debouncer: Option<Mutex<Debouncer>>,
    emissions: mpsc::UnboundedSender<Emission>,
    delivery: tokio::sync::Mutex<Delivery>,
    callback: PressCallback,
    bus: EventBus,
    this: Weak<Shared>,
    stopped: CancellationToken,
}

impl Shared {
    fn classifier(&self) -> std::sync::MutexGuard<'_, Classifier> {
        self.classifier.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn seed(&self, level: bool) {
        let emission = match &mut *self.classifier() {
            Classifier::Gesture { machine, .. } => {
                machine.seed(level);
                None
            }
            Classifier::Sensor(sensor) => sensor.on_sample(level),
        };
        if let Some(click) = emission {
            self.emit(click, None);
        }
    }

    fn on_edge(&self, level: bool) {
        let Some(debouncer) = &self.debouncer else {
            self.on_sample(level);
            return;
        };
        let offer = debouncer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .offer(Instant::now(), level);
        match offer {
            Offer::Accept => self.on_sample(level),
            Offer::Defer { settle_at } => {
                trace!(pin = %self.config.pin, level, "Edge inside debounce window, held");
                tokio::spawn(settle_after(self.this.clone(), settle_at, self.stopped.clone()));
            }
            Offer::Merged => trace!(pin = %self.config.pin, level, "Edge inside debounce window"),
        }
    }

    fn on_settle(&self) {
        let Some(debouncer) = &self.debouncer else {
            return;
        };
        let level = debouncer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .settle(Instant::now());
        if let Some(level) = level {
            trace!(pin = %self.config.pin, level, "Debounce window closed");
            self.on_sample(level);
        }
    }

    fn on_sample(&self, level: bool) {
        let emission = match &mut *self.classifier() {
            Classifier::Gesture { machine, timers } => machine.on_sample(level, timers),
            Classifier::Sensor(sensor) => sensor.on_sample(level),
        };
        if let Some(click) = emission {
            self.emit(click, None);
        }
    }

    fn on_double_expired(&self) {
        let emission = match &mut *self.classifier() {
            // Restarted while this expiry was on its way.
            Classifier::Gesture { timers, .. } if timers.double.is_armed() => None,
            Classifier::Gesture { machine, timers } => machine.on_double_expired(&*timers),
            Classifier::Sensor(_) => None,
        };
        if let Some(click) = emission {
            self.emit(click, None);
        }
    }

    fn on_long_expired(&self, held: Duration) {
        let emission = match &mut *self.classifier() {
            Classifier::Gesture { timers, .. } if timers.long.is_armed() => None,
            Classifier::Gesture { machine, timers } => machine.on_long_expired(held, timers),
            Classifier::Sensor(_) => None,
        };
        if let Some((click, held)) = emission {
            self.emit(click, Some(held));
        }
    }

    fn cancel_timers(&self) {
        if let Classifier::Gesture { timers, .. } = &mut *self.classifier() {
            timers.long.cancel();
            timers.double.cancel();
        }
    }

    fn emit(&self, click: ClickType, duration: Option<Duration>) {
        trace!(pin = %self.config.pin, %click, "Classified");
        if self.emissions.send(Emission { click, duration }).is_err() {
            debug!(pin = %self.config.pin, %click, "Input stopped, classification dropped");
        }
    }

    async fn deliver(&self, emission: Emission) {
        let mut delivery = self.delivery.lock().await;
        let timestamp = Utc::now();
        delivery.last = Some((emission.click, timestamp));

        let report = PressReport {
            pin: self.config.pin.clone(),
            name: self.config.name.clone(),
            kind: self.config.kind,
            click: emission.click,
            duration: emission.duration,
            clear_message: self.config.clear_message,
            timestamp,
        };
        debug!(
            pin = %report.pin,
            click = %report.click,
            duration = ?report.duration,
            "Input press"
        );

        if let Err(err) = self.callback.invoke(report).await {
            error!(pin = %self.config.pin, error = %err, "Press callback failed");
        }

        self.bus.publish(InputState {
            name: self.config.name.clone(),
            pin: self.config.pin.clone(),
            state: emission.click,
            kind: self.config.kind,
            timestamp,
            duration: emission.duration.map(round_seconds),
        });
    }
}

/// Seconds rounded to two decimals.
fn round_seconds(duration: Duration) -> f64 {
    (duration.as_secs_f64() * 100.0).round() / 100.0
}

/// A running input.
///
/// Dropping the input stops its sampling; [`Input::stop`] additionally
/// waits for its tasks to end.
pub struct Input {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    tasks: Mutex<JoinSet<()>>,
}

impl Input {
    /// Configure the pin and start sampling it.
    ///
    /// The level found at startup seeds the classifier: a button held
    /// during boot is not reported, a binary sensor reports it only with
    /// `initial_send`.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid settings or when the pin cannot be
    /// configured, read or subscribed to.
    pub async fn start(
        config: InputConfig,
        pins: Arc<PinManager>,
        bus: EventBus,
        callback: PressCallback,
    ) -> Result<Self> {
        config.validate()?;
        pins.configure(&config.pin, Direction::Input, config.bias).await?;
        let initial = pins.read(&config.pin).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let detection = config.detection;
        let cancel = CancellationToken::new();
        let shared = Arc::new_cyclic(|weak: &Weak<Shared>| {
            let classifier = match config.kind {
                InputKind::Event => Classifier::Gesture {
                    machine: GestureMachine::new(),
                    timers: InputTimers::new(config.timings, weak.clone()),
                },
                InputKind::BinarySensor => {
                    Classifier::Sensor(BinarySensorMachine::new(config.inverted, config.initial_send))
                }
            };
            let debouncer = match detection {
                Detection::Edge { debounce } => Some(Mutex::new(Debouncer::new(debounce))),
                Detection::Poll { .. } => None,
            };
            Shared {
                config,
                classifier: Mutex::new(classifier),
                debouncer,
                emissions: tx,
                delivery: tokio::sync::Mutex::new(Delivery::default()),
                callback,
                bus,
                this: weak.clone(),
                stopped: cancel.clone(),
            }
        });
        shared.seed(initial);

        let mut tasks = JoinSet::new();
        tasks.spawn(delivery_loop(Arc::downgrade(&shared), rx, cancel.clone()));

        let pin = shared.config.pin.clone();
        match detection {
            Detection::Poll { interval } => {
                tasks.spawn(poll_loop(
                    Arc::downgrade(&shared),
                    pins,
                    pin.clone(),
                    interval,
                    cancel.clone(),
                ));
            }
            Detection::Edge { .. } => {
                let weak = Arc::downgrade(&shared);
                let stopped = cancel.clone();
                pins.subscribe_edges(&pin, EdgeKind::Both, Duration::ZERO, move |event| {
                    if stopped.is_cancelled() {
                        return;
                    }
                    if let Some(shared) = weak.upgrade() {
                        shared.on_edge(event.level());
                    }
                })
                .await?;
            }
        }

        debug!(
            pin = %pin,
            kind = %shared.config.kind,
            detection = ?detection,
            initial,
            "Input started"
        );

        Ok(Self {
            shared,
            cancel,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn pin(&self) -> &str {
        &self.shared.config.pin
    }

    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    pub fn config(&self) -> &InputConfig {
        &self.shared.config
    }

    /// Most recent delivered classification and when it was made.
    pub async fn last_click(&self) -> Option<(ClickType, DateTime<Utc>)> {
        self.shared.delivery.lock().await.last
    }

    /// Stop sampling, drop pending timers and wait for the tasks to end.
    ///
    /// Classifications not yet delivered are dropped.
    pub async fn stop(&self) {
        self.cancel.cancel();
        self.shared.cancel_timers();

        let mut tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
        debug!(pin = %self.shared.config.pin, "Input stopped");
    }
}

impl Drop for Input {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Input {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Input")
            .field("config", &self.shared.config)
            .field("stopped", &self.cancel.is_cancelled())
            .finish()
    }
}

async fn delivery_loop(
    shared: Weak<Shared>,
    mut rx: mpsc::UnboundedReceiver<Emission>,
    cancel: CancellationToken,
) {
    loop {
        let emission = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            emission = rx.recv() => match emission {
                Some(emission) => emission,
                None => break,
            },
        };
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.deliver(emission).await;
    }
}

async fn settle_after(shared: Weak<Shared>, at: Instant, cancel: CancellationToken) {
    tokio::select! {
        biased;
        () = cancel.cancelled() => return,
        () = tokio::time::sleep_until(at) => {}
    }
    if let Some(shared) = shared.upgrade() {
        shared.on_settle();
    }
}

async fn poll_loop(
    shared: Weak<Shared>,
    pins: Arc<PinManager>,
    pin: String,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let level = match pins.read(&pin).await {
            Ok(level) => level,
            Err(HardwareError::Closed) => {
                debug!(pin = %pin, "Pin manager closed, polling stopped");
                break;
            }
            Err(err) => {
                warn!(pin = %pin, error = %err, "Failed to sample input");
                continue;
            }
        };

        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.on_sample(level);
    }
}
