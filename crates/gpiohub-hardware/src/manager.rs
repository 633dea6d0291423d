//! Pin manager.
//!
//! This module provides the [`PinManager`], which owns every hardware line
//! for the lifetime of the process. Callers address lines by name only; the
//! request handles never leave the manager, so a direction switch can never
//! leave a caller holding a stale handle.
//!
//! # Architecture
//!
//! Each discovered line gets a slot guarded by an async mutex. The slot holds
//! the line request once the line is configured. Edge subscriptions run in
//! their own task which waits on the request while holding the slot, and
//! steps aside whenever another operation asks for the line.
//!
//! ```text
//!                  ┌──────────────────────────────┐
//! configure ──────►│ slot "P8_30"                 │
//! write     ──────►│   Mutex<SlotState>           │◄──── edge task
//! read      ──────►│     request: AnyLineRequest  │      (waits for edges,
//!                  └──────────────────────────────┘       yields on demand)
//! ```
//!
//! # Examples
//!
//! ```no_run
//! use gpiohub_hardware::manager::{PinManager, PinManagerConfig};
//! use gpiohub_hardware::mock::MockBackend;
//! use gpiohub_hardware::types::{Bias, Direction, EdgeKind};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> gpiohub_hardware::Result<()> {
//!     let (backend, _handle) = MockBackend::new(&["P8_30", "P8_31"]);
//!     let pins = PinManager::discover(backend.into(), PinManagerConfig::default()).await?;
//!
//!     pins.configure("P8_30", Direction::Input, Bias::PullUp).await?;
//!     pins.subscribe_edges("P8_30", EdgeKind::Both, Duration::ZERO, |event| {
//!         println!("edge: {:?}", event.edge);
//!     })
//!     .await?;
//!
//!     pins.configure("P8_31", Direction::Output, Bias::Disabled).await?;
//!     pins.write("P8_31", true).await?;
//!
//!     pins.shutdown().await;
//!     Ok(())
//! }
//! ```

use crate::backends::{AnyLineBackend, AnyLineRequest};
use crate::traits::{LineBackend, LineRequest};
use crate::types::{Bias, Direction, EdgeEvent, EdgeKind, LineInfo, LineSettings};
use crate::{HardwareError, Result};
use gpiohub_core::constants::PIN_SHUTDOWN_GRACE_MS;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard, Notify};
use tokio::task::JoinSet;
use tracing::{debug, error, info, trace, warn};

/// Callback invoked for every delivered edge.
pub type EdgeCallback = Arc<dyn Fn(EdgeEvent) + Send + Sync>;

/// Configuration for the pin manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinManagerConfig {
    /// Upper bound for releasing every line during shutdown.
    pub shutdown_grace: Duration,
}

impl Default for PinManagerConfig {
    fn default() -> Self {
        Self {
            shutdown_grace: Duration::from_millis(PIN_SHUTDOWN_GRACE_MS),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct EdgeSubscription {
    generation: u64,
    debounce: Option<Duration>,
}

#[derive(Debug)]
struct ActiveRequest {
    direction: Direction,
    bias: Bias,
    request: AnyLineRequest,
    edges: Option<EdgeSubscription>,
}

#[derive(Debug, Default)]
struct SlotState {
    /// Present iff the line is configured.
    active: Option<ActiveRequest>,
    /// Bias restored when an output flips back to input.
    input_bias: Bias,
}

const LEVEL_UNKNOWN: u8 = 0;
const LEVEL_INACTIVE: u8 = 1;
const LEVEL_ACTIVE: u8 = 2;

#[derive(Debug)]
struct LineSlot {
    info: LineInfo,
    state: Mutex<SlotState>,
    /// Operations waiting for the slot; the edge task yields while non-zero.
    contenders: AtomicUsize,
    wake: Notify,
    generation: AtomicU64,
    /// Level of the last edge read by the edge task.
    last_edge: AtomicU8,
}

impl LineSlot {
    fn new(info: LineInfo) -> Self {
        Self {
            info,
            state: Mutex::new(SlotState::default()),
            contenders: AtomicUsize::new(0),
            wake: Notify::new(),
            generation: AtomicU64::new(0),
            last_edge: AtomicU8::new(LEVEL_UNKNOWN),
        }
    }

    fn name(&self) -> &str {
        &self.info.name
    }

    /// Lock the slot, interrupting a waiting edge task.
    async fn acquire(&self) -> MutexGuard<'_, SlotState> {
        self.contenders.fetch_add(1, Ordering::AcqRel);
        self.wake.notify_one();
        let guard = self.state.lock().await;
        self.contenders.fetch_sub(1, Ordering::AcqRel);
        guard
    }

    fn cached_level(&self) -> Option<bool> {
        match self.last_edge.load(Ordering::Acquire) {
            LEVEL_ACTIVE => Some(true),
            LEVEL_INACTIVE => Some(false),
            _ => None,
        }
    }

    fn cache_level(&self, level: bool) {
        let value = if level { LEVEL_ACTIVE } else { LEVEL_INACTIVE };
        self.last_edge.store(value, Ordering::Release);
    }

    fn clear_cache(&self) {
        self.last_edge.store(LEVEL_UNKNOWN, Ordering::Release);
    }

    /// Physical level for a logical one.
    fn physical(&self, level: bool) -> bool {
        level ^ self.info.active_low
    }
}

/// Owns every hardware line of the process.
///
/// # Lifecycle
///
/// 1. [`PinManager::discover`] enumerates the lines of every chip once
/// 2. [`PinManager::configure`] requests a line as input or output
/// 3. [`PinManager::read`] and [`PinManager::write`] flip direction on demand
/// 4. [`PinManager::subscribe_edges`] streams edges to a callback
/// 5. [`PinManager::shutdown`] releases everything within a grace period
pub struct PinManager {
    backend: AnyLineBackend,
    slots: BTreeMap<String, Arc<LineSlot>>,
    tasks: std::sync::Mutex<JoinSet<Result<()>>>,
    closed: AtomicBool,
    config: PinManagerConfig,
}

impl std::fmt::Debug for PinManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinManager")
            .field("lines", &self.slots.len())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

impl PinManager {
    /// Discover every line of every chip.
    ///
    /// # Errors
    ///
    /// Returns `HardwareError::DiscoveryFailed` if no chip or no named line
    /// is found. This is fatal for startup and must not be retried.
    pub async fn discover(backend: AnyLineBackend, config: PinManagerConfig) -> Result<Self> {
        let lines = backend.discover().await?;
        if lines.is_empty() {
            return Err(HardwareError::discovery_failed("no named GPIO lines found"));
        }

        let mut slots = BTreeMap::new();
        for line in lines {
            if let Some(previous) = slots.insert(line.name.clone(), Arc::new(LineSlot::new(line))) {
                warn!(pin = %previous.name(), chip = %previous.info.chip.display(), "Duplicate line name, keeping the last one");
            }
        }

        info!(lines = slots.len(), "Discovered GPIO lines");

        Ok(Self {
            backend,
            slots,
            tasks: std::sync::Mutex::new(JoinSet::new()),
            closed: AtomicBool::new(false),
            config,
        })
    }

    /// Names of all discovered lines, sorted.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    /// Discovery record of a line.
    pub fn line_info(&self, name: &str) -> Option<&LineInfo> {
        self.slots.get(name).map(|slot| &slot.info)
    }

    /// Current direction of a line, `None` while unconfigured.
    ///
    /// # Errors
    ///
    /// Returns an error if the pin is unknown.
    pub async fn direction(&self, name: &str) -> Result<Option<Direction>> {
        let slot = self.slot(name)?;
        let state = slot.acquire().await;
        Ok(state.active.as_ref().map(|active| active.direction))
    }

    /// Whether [`PinManager::shutdown`] has run.
    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Configure a line.
    ///
    /// Requests the line on first use. An already configured line is
    /// reconfigured in place; repeating the current configuration is a no-op.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an unknown pin or for a bias on an
    /// output, and a backend error if the driver refuses the request.
    pub async fn configure(&self, name: &str, direction: Direction, bias: Bias) -> Result<()> {
        let slot = self.slot(name)?;
        if direction == Direction::Output && bias != Bias::Disabled {
            return Err(HardwareError::configuration(
                name,
                format!("bias {bias:?} is only supported on inputs"),
            ));
        }

        let mut state = slot.acquire().await;
        self.check_open()?;

        if direction == Direction::Input {
            state.input_bias = bias;
        }

        let mut settings = match direction {
            Direction::Input => LineSettings::input(bias),
            Direction::Output => LineSettings::output(slot.physical(false)),
        };

        match state.active.as_mut() {
            None => {
                let request = self.backend.request(&slot.info, &settings).await?;
                state.active = Some(ActiveRequest {
                    direction,
                    bias,
                    request,
                    edges: None,
                });
                debug!(pin = %name, %direction, ?bias, "Line requested");
            }
            Some(active) if active.direction == direction && active.bias == bias => {
                trace!(pin = %name, %direction, "Line already configured");
            }
            Some(active) => {
                // Inputs keep their edge subscription across a bias change.
                let edges = active.edges.filter(|_| direction == Direction::Input);
                if let Some(subscription) = edges {
                    settings = settings.with_edges(subscription.debounce);
                }
                if let Err(err) = active.request.reconfigure(&settings).await {
                    discard_request(slot, &mut state, &err);
                    return Err(err);
                }
                active.direction = direction;
                active.bias = bias;
                active.edges = edges;
                if edges.is_none() {
                    slot.clear_cache();
                }
                debug!(pin = %name, %direction, ?bias, "Line reconfigured");
            }
        }

        Ok(())
    }

    /// Drive a line to a logical level.
    ///
    /// A line configured as input is switched to output first. Switching
    /// ends any edge subscription on the line.
    ///
    /// # Errors
    ///
    /// Returns `HardwareError::NotConfigured` if the line was never
    /// configured.
    pub async fn write(&self, name: &str, level: bool) -> Result<()> {
        let slot = self.slot(name)?;
        let mut state = slot.acquire().await;
        self.check_open()?;

        let physical = slot.physical(level);
        let active = state
            .active
            .as_mut()
            .ok_or_else(|| HardwareError::not_configured(name))?;

        if active.direction == Direction::Input {
            debug!(pin = %name, "Switching line to output");
            if let Err(err) = active.request.reconfigure(&LineSettings::output(physical)).await {
                discard_request(slot, &mut state, &err);
                return Err(err);
            }
            active.direction = Direction::Output;
            active.bias = Bias::Disabled;
            if active.edges.take().is_some() {
                debug!(pin = %name, "Edge subscription ended by direction switch");
            }
            slot.clear_cache();
        } else {
            active.request.set_value(physical).await?;
        }

        trace!(pin = %name, level, "Line written");
        Ok(())
    }

    /// Read the logical level of a line, `true` when active.
    ///
    /// A line configured as output is switched back to input first, with
    /// the bias it last had as an input. A line with an edge subscription
    /// answers from the level of the last edge when one was seen.
    ///
    /// # Errors
    ///
    /// Returns `HardwareError::NotConfigured` if the line was never
    /// configured.
    pub async fn read(&self, name: &str) -> Result<bool> {
        let slot = self.slot(name)?;
        self.check_open()?;
        if let Some(level) = slot.cached_level() {
            return Ok(level);
        }

        let mut state = slot.acquire().await;
        self.check_open()?;

        let input_bias = state.input_bias;
        let active = state
            .active
            .as_mut()
            .ok_or_else(|| HardwareError::not_configured(name))?;

        if active.direction == Direction::Output {
            debug!(pin = %name, ?input_bias, "Switching line to input");
            if let Err(err) = active.request.reconfigure(&LineSettings::input(input_bias)).await {
                discard_request(slot, &mut state, &err);
                return Err(err);
            }
            active.direction = Direction::Input;
            active.bias = input_bias;
        }

        let physical = active.request.get_value().await?;
        Ok(physical ^ slot.info.active_low)
    }

    /// Stream edges of a line to a callback.
    ///
    /// The line is (re)configured as an edge-detecting input, keeping its
    /// bias. A task then waits for the line, drains every pending edge in one
    /// read and invokes `callback` once per edge accepted by `kind`, in the
    /// order the driver reported them, before waiting again. A slow callback
    /// delays the next wait; no edge is dropped here.
    ///
    /// Edges are reported as logical transitions: `Rising` means the line
    /// became active, also on active-low lines.
    ///
    /// Subscribing again replaces the previous subscription.
    ///
    /// A driver error while reading edges ends the subscription: it is
    /// logged, no further edges are delivered and reads go back to the
    /// line. Subscribe again to resume.
    ///
    /// # Errors
    ///
    /// Returns an error if the pin is unknown or the driver refuses edge
    /// detection.
    pub async fn subscribe_edges<F>(
        &self,
        name: &str,
        kind: EdgeKind,
        debounce: Duration,
        callback: F,
    ) -> Result<()>
    where
        F: Fn(EdgeEvent) + Send + Sync + 'static,
    {
        let slot = Arc::clone(self.slot(name)?);
        let mut state = slot.acquire().await;
        self.check_open()?;

        let generation = slot.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let subscription = EdgeSubscription {
            generation,
            debounce: (!debounce.is_zero()).then_some(debounce),
        };

        let bias = match &state.active {
            Some(active) if active.direction == Direction::Input => active.bias,
            _ => state.input_bias,
        };
        state.input_bias = bias;
        let settings = LineSettings::input(bias).with_edges(subscription.debounce);

        match state.active.as_mut() {
            None => {
                let request = self.backend.request(&slot.info, &settings).await?;
                state.active = Some(ActiveRequest {
                    direction: Direction::Input,
                    bias,
                    request,
                    edges: Some(subscription),
                });
            }
            Some(active) => {
                if let Err(err) = active.request.reconfigure(&settings).await {
                    discard_request(&slot, &mut state, &err);
                    return Err(err);
                }
                active.direction = Direction::Input;
                active.bias = bias;
                active.edges = Some(subscription);
            }
        }
        slot.clear_cache();
        drop(state);

        let callback: EdgeCallback = Arc::new(callback);
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .spawn(Self::edge_task(Arc::clone(&slot), generation, kind, callback));

        debug!(pin = %name, ?kind, ?debounce, "Edge subscription started");
        Ok(())
    }

    /// Release every configured line.
    ///
    /// Best effort and bounded by the configured grace period: release
    /// failures are logged, never returned, and lines still pending when the
    /// grace period ends are abandoned. Calling it again is a no-op.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            debug!("Pin manager already shut down");
            return;
        }

        let grace = self.config.shutdown_grace;
        info!(lines = self.slots.len(), grace_ms = grace.as_millis() as u64, "Releasing GPIO lines");

        match tokio::time::timeout(grace, self.release_all()).await {
            Ok((released, failed)) => info!(released, failed, "GPIO lines released"),
            Err(_) => warn!(
                grace_ms = grace.as_millis() as u64,
                "GPIO line release did not finish within grace period"
            ),
        }

        let mut tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        tasks.abort_all();

        let mut error_count = 0;
        let mut panic_count = 0;

        while let Some(result) = tasks.join_next().await {
            match Self::classify_task_result(result) {
                TaskTermination::Success => {}
                TaskTermination::Error => error_count += 1,
                TaskTermination::Panic => panic_count += 1,
                TaskTermination::Cancelled => {}
            }
        }

        if error_count + panic_count > 0 {
            warn!(error_count, panic_count, "Edge tasks terminated abnormally");
        }
    }

    async fn release_all(&self) -> (usize, usize) {
        let mut pending = Vec::new();
        for slot in self.slots.values() {
            let mut state = slot.acquire().await;
            if let Some(active) = state.active.take() {
                pending.push((slot.name().to_string(), active.request));
            }
            slot.clear_cache();
        }

        let results = futures::future::join_all(
            pending
                .into_iter()
                .map(|(name, request)| async move { (name, request.release().await) }),
        )
        .await;

        let mut released = 0;
        let mut failed = 0;
        for (name, result) in results {
            match result {
                Ok(()) => {
                    released += 1;
                    trace!(pin = %name, "Line released");
                }
                Err(err) => {
                    failed += 1;
                    warn!(pin = %name, error = %err, "Failed to release line");
                }
            }
        }
        (released, failed)
    }

    fn slot(&self, name: &str) -> Result<&Arc<LineSlot>> {
        self.check_open()?;
        self.slots
            .get(name)
            .ok_or_else(|| HardwareError::unknown_pin(name))
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(HardwareError::Closed);
        }
        Ok(())
    }

    /// Classify the termination status of a task.
    fn classify_task_result(
        result: std::result::Result<Result<()>, tokio::task::JoinError>,
    ) -> TaskTermination {
        match result {
            Ok(Ok(())) => TaskTermination::Success,
            Ok(Err(_)) => TaskTermination::Error,
            Err(e) if e.is_cancelled() => TaskTermination::Cancelled,
            Err(_) => TaskTermination::Panic,
        }
    }

    async fn edge_task(
        slot: Arc<LineSlot>,
        generation: u64,
        kind: EdgeKind,
        callback: EdgeCallback,
    ) -> Result<()> {
        loop {
            let batch = {
                let mut state = slot.state.lock().await;
                if slot.contenders.load(Ordering::Acquire) > 0 {
                    drop(state);
                    tokio::task::yield_now().await;
                    continue;
                }

                let Some(active) = state.active.as_mut() else {
                    trace!(pin = %slot.name(), "Line released, edge task stopping");
                    return Ok(());
                };
                if active.edges.map(|edges| edges.generation) != Some(generation) {
                    trace!(pin = %slot.name(), generation, "Edge subscription replaced");
                    return Ok(());
                }

                tokio::select! {
                    result = active.request.read_edges() => result,
                    () = slot.wake.notified() => continue,
                }
            };

            let events = match batch {
                Ok(events) => events,
                Err(err) => {
                    error!(pin = %slot.name(), generation, error = %err, "Edge stream failed, subscription ended");
                    let mut state = slot.state.lock().await;
                    if let Some(active) = state.active.as_mut()
                        && active.edges.map(|edges| edges.generation) == Some(generation)
                    {
                        active.edges = None;
                        slot.clear_cache();
                    }
                    return Err(err);
                }
            };
            trace!(pin = %slot.name(), count = events.len(), "Drained edge events");

            for event in events {
                let event = if slot.info.active_low {
                    EdgeEvent::new(event.edge.inverted(), event.timestamp)
                } else {
                    event
                };
                slot.cache_level(event.level());
                if kind.accepts(event.edge) {
                    callback(event);
                }
            }
        }
    }
}

/// Forget the request of a line whose reconfiguration failed.
///
/// The driver may give up the old request before refusing the new one, so
/// the line counts as unconfigured until it is configured again.
fn discard_request(slot: &LineSlot, state: &mut SlotState, err: &HardwareError) {
    state.active = None;
    slot.clear_cache();
    warn!(pin = %slot.name(), error = %err, "Reconfiguration failed, line is no longer configured");
}

/// Task termination classification for shutdown handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskTermination {
    /// Task completed successfully.
    Success,
    /// Task returned an error.
    Error,
    /// Task was cancelled (expected during shutdown).
    Cancelled,
    /// Task panicked.
    Panic,
}
