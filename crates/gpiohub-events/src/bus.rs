//! The event bus.
//!
//! Producers call [`EventBus::publish`], which never blocks and never fails.
//! A single dispatch task takes events off an unbounded queue in FIFO order
//! and calls the listeners registered for the event's category and entity id,
//! one after the other. Listener failures are logged and contained.
//!
//! Next to dispatch the bus runs a once-per-second tick aligned to wall-clock
//! second boundaries, one-shot jobs scheduled at an instant, and the hooks
//! run on shutdown and when the upstream consumer comes back online.
//!
//! ```text
//! publish ──► mpsc (unbounded) ──► dispatch task ──► listeners[(category, entity)]
//!
//! tick task ──► every-second listeners (Tick::At, then Tick::Shutdown once)
//! schedule_once ──► detached task (child cancellation token)
//! ```

use crate::clock::{Clock, SystemClock};
use crate::error::{EventBusError, Result};
use crate::listener::{EventTarget, HookTarget, JobTarget, Tick, TickTarget};
use crate::registry::{EntityId, ListenerRegistry};
use chrono::{DateTime, TimeDelta, Utc};
use gpiohub_core::constants::EVENT_BUS_SHUTDOWN_GRACE_MS;
use gpiohub_core::{Event, EventCategory};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Configuration for the event bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBusConfig {
    /// Upper bound for each shutdown phase (hooks, task termination).
    pub shutdown_grace: Duration,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            shutdown_grace: Duration::from_millis(EVENT_BUS_SHUTDOWN_GRACE_MS),
        }
    }
}

type TickListeners = BTreeMap<String, TickTarget>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner {
    tx: mpsc::UnboundedSender<Arc<Event>>,
    registry: Arc<RwLock<ListenerRegistry>>,
    every_second: Arc<Mutex<TickListeners>>,
    shutdown_hooks: Mutex<Vec<HookTarget>>,
    online_hooks: Mutex<Vec<HookTarget>>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    tasks: Mutex<JoinSet<()>>,
    closed: AtomicBool,
    config: EventBusConfig,
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Pending one-shot jobs are detached and only stop on cancellation.
        self.cancel.cancel();
    }
}

/// Handle to a running event bus.
///
/// Cloning is cheap; every clone talks to the same dispatch task.
///
/// # Examples
///
/// ```no_run
/// use gpiohub_core::{EventCategory, OutputState, Switch};
/// use gpiohub_events::{EventBus, EventBusConfig, Target};
///
/// #[tokio::main]
/// async fn main() {
///     let bus = EventBus::start(EventBusConfig::default());
///
///     bus.register(
///         EventCategory::Output,
///         "relay1",
///         "logger",
///         Target::immediate(|event| {
///             println!("{event:?}");
///             Ok(())
///         }),
///     );
///
///     bus.publish(OutputState {
///         id: "relay1".into(),
///         name: "Relay 1".into(),
///         state: Switch::On,
///         kind: "switch".into(),
///         pin: "P8_31".into(),
///         timestamp: None,
///     });
///
///     bus.shutdown().await;
/// }
/// ```
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("closed", &self.inner.closed.load(Ordering::Acquire))
            .field("clock", &self.inner.clock)
            .finish()
    }
}

impl EventBus {
    /// Start the bus on the current tokio runtime using the system clock.
    pub fn start(config: EventBusConfig) -> Self {
        Self::start_with_clock(config, Arc::new(SystemClock))
    }

    /// Start the bus with a custom wall-clock source.
    pub fn start_with_clock(config: EventBusConfig, clock: Arc<dyn Clock>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = Arc::new(RwLock::new(ListenerRegistry::new()));
        let every_second = Arc::new(Mutex::new(TickListeners::new()));
        let cancel = CancellationToken::new();

        let mut tasks = JoinSet::new();
        tasks.spawn(dispatch_loop(Arc::clone(&registry), rx, cancel.clone()));
        tasks.spawn(tick_loop(
            Arc::clone(&every_second),
            Arc::clone(&clock),
            cancel.clone(),
        ));

        info!("Event bus started");

        Self {
            inner: Arc::new(Inner {
                tx,
                registry,
                every_second,
                shutdown_hooks: Mutex::new(Vec::new()),
                online_hooks: Mutex::new(Vec::new()),
                clock,
                cancel,
                tasks: Mutex::new(tasks),
                closed: AtomicBool::new(false),
                config,
            }),
        }
    }

    /// Queue an event for dispatch.
    ///
    /// Never blocks. After shutdown the event is dropped with a warning.
    pub fn publish(&self, event: impl Into<Event>) {
        let event = event.into();
        if self.is_shut_down() {
            warn!(category = %event.category(), entity_id = %event.entity_id(), "Event bus shut down, dropping event");
            return;
        }
        trace!(category = %event.category(), entity_id = %event.entity_id(), "Event published");
        if let Err(mpsc::error::SendError(event)) = self.inner.tx.send(Arc::new(event)) {
            warn!(category = %event.category(), entity_id = %event.entity_id(), "Dispatch loop gone, dropping event");
        }
    }

    /// Register a listener for one entity of a category.
    ///
    /// Returns `true` if an existing registration with the same identity was
    /// replaced.
    pub fn register(
        &self,
        category: EventCategory,
        entity_id: &str,
        listener_id: &str,
        target: EventTarget,
    ) -> bool {
        let replaced = self
            .registry_mut()
            .register(category, entity_id, listener_id, target);
        debug!(%category, entity_id, listener_id, replaced, "Listener registered");
        replaced
    }

    /// Remove listeners, see [`ListenerRegistry::unregister`] for the
    /// filter rules. Returns the number of registrations removed.
    pub fn unregister(
        &self,
        category: Option<EventCategory>,
        entity_id: Option<&str>,
        listener_id: Option<&str>,
    ) -> usize {
        let removed = self
            .registry_mut()
            .unregister(category, entity_id, listener_id);
        debug!(?category, ?entity_id, ?listener_id, removed, "Listeners unregistered");
        removed
    }

    /// Every (category, entity id) a listener is registered under.
    pub fn registrations_of(&self, listener_id: &str) -> Vec<(EventCategory, EntityId)> {
        self.inner
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .registrations_of(listener_id)
    }

    /// Register a listener ticked once per wall-clock second.
    ///
    /// A listener registered under an existing name replaces it.
    pub fn register_every_second(&self, name: &str, target: TickTarget) {
        lock(&self.inner.every_second).insert(name.to_string(), target);
        debug!(name, "Every-second listener registered");
    }

    /// Remove an every-second listener. Returns `false` if none was
    /// registered under `name`.
    pub fn unregister_every_second(&self, name: &str) -> bool {
        lock(&self.inner.every_second).remove(name).is_some()
    }

    /// Run `job` once at `at`.
    ///
    /// The job never runs before the clock reads `at`: when the timer wakes
    /// early it is rearmed for the remainder. An instant in the past runs the
    /// job right away.
    ///
    /// # Errors
    ///
    /// Returns `EventBusError::ShutDown` after shutdown.
    pub fn schedule_once(&self, at: DateTime<Utc>, job: JobTarget) -> Result<ScheduledJob> {
        self.check_open()?;

        let token = self.inner.cancel.child_token();
        let cancel = token.clone();
        let clock = Arc::clone(&self.inner.clock);

        tokio::spawn(async move {
            let mut rearmed = false;
            loop {
                let remaining = remaining_until(at, clock.now());
                if remaining.is_zero() {
                    break;
                }
                if rearmed {
                    debug!(%at, remaining_us = remaining.as_micros() as u64, "Timer fired early, rearming");
                }
                tokio::select! {
                    () = cancel.cancelled() => {
                        trace!(%at, "Scheduled job cancelled");
                        return;
                    }
                    () = tokio::time::sleep(remaining) => {}
                }
                rearmed = true;
            }

            if cancel.is_cancelled() {
                return;
            }
            if let Err(err) = job.invoke(at).await {
                warn!(%at, error = %err, "Scheduled job failed");
            }
        });

        Ok(ScheduledJob { token })
    }

    /// Register a hook run during shutdown.
    pub fn register_shutdown_hook(&self, target: HookTarget) {
        lock(&self.inner.shutdown_hooks).push(target);
    }

    /// Register a hook run whenever the upstream consumer comes back online.
    pub fn register_online_hook(&self, target: HookTarget) {
        lock(&self.inner.online_hooks).push(target);
    }

    /// Run every online hook, in registration order.
    pub async fn signal_online(&self) {
        let hooks = lock(&self.inner.online_hooks).clone();
        info!(hooks = hooks.len(), "Upstream online");
        for (hook, target) in hooks.iter().enumerate() {
            if let Err(err) = target.invoke(()).await {
                warn!(hook, error = %err, "Online hook failed");
            }
        }
    }

    /// Whether [`EventBus::shutdown`] has been called.
    pub fn is_shut_down(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Shut the bus down.
    ///
    /// 1. Stop accepting events and one-shot jobs
    /// 2. Run every shutdown hook in registration order
    /// 3. Send [`Tick::Shutdown`] to the every-second listeners
    /// 4. Cancel the dispatch and tick tasks and wait for them
    ///
    /// Phases 2 and 4 are each bounded by the grace period. A listener still
    /// running when phase 4 times out is abandoned. Calling it again is a
    /// no-op.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            debug!("Event bus already shut down");
            return;
        }

        let grace = self.inner.config.shutdown_grace;
        let hooks = lock(&self.inner.shutdown_hooks).clone();
        info!(hooks = hooks.len(), "Shutting down event bus");

        let run_hooks = async {
            for (hook, target) in hooks.iter().enumerate() {
                debug!(hook, "Invoking shutdown hook");
                if let Err(err) = target.invoke(()).await {
                    error!(hook, error = %err, "Shutdown hook failed");
                }
            }
        };
        if tokio::time::timeout(grace, run_hooks).await.is_err() {
            warn!(grace_ms = grace.as_millis() as u64, "Shutdown hooks did not finish within grace period");
        }

        let tick_listeners: Vec<_> = lock(&self.inner.every_second)
            .iter()
            .map(|(name, target)| (name.clone(), target.clone()))
            .collect();
        invoke_ticks(&tick_listeners, Tick::Shutdown).await;

        self.inner.cancel.cancel();

        let mut tasks = std::mem::take(&mut *lock(&self.inner.tasks));
        let mut panic_count = 0;
        let drained = tokio::time::timeout(grace, async {
            while let Some(result) = tasks.join_next().await {
                if matches!(classify_task_result(result), TaskTermination::Panic) {
                    panic_count += 1;
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(grace_ms = grace.as_millis() as u64, "Event bus tasks did not stop within grace period, aborting");
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
        if panic_count > 0 {
            error!(panic_count, "Event bus tasks panicked");
        }

        info!("Event bus stopped");
    }

    fn check_open(&self) -> Result<()> {
        if self.is_shut_down() {
            return Err(EventBusError::ShutDown);
        }
        Ok(())
    }

    fn registry_mut(&self) -> std::sync::RwLockWriteGuard<'_, ListenerRegistry> {
        self.inner
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to a job scheduled with [`EventBus::schedule_once`].
///
/// Dropping the handle does not cancel the job.
#[derive(Debug, Clone)]
pub struct ScheduledJob {
    token: CancellationToken,
}

impl ScheduledJob {
    /// Cancel the job if it has not run yet.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Task termination classification for shutdown handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskTermination {
    Completed,
    Cancelled,
    Panic,
}

fn classify_task_result(result: std::result::Result<(), tokio::task::JoinError>) -> TaskTermination {
    match result {
        Ok(()) => TaskTermination::Completed,
        Err(e) if e.is_cancelled() => TaskTermination::Cancelled,
        Err(_) => TaskTermination::Panic,
    }
}

fn remaining_until(at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (at - now).to_std().unwrap_or(Duration::ZERO)
}

/// Time left until the next whole wall-clock second.
fn until_next_second(now: DateTime<Utc>) -> Duration {
    // Leap seconds report up to 1_999_999_999.
    let nanos = now.timestamp_subsec_nanos().min(999_999_999);
    Duration::from_nanos(1_000_000_000 - u64::from(nanos))
}

async fn dispatch_loop(
    registry: Arc<RwLock<ListenerRegistry>>,
    mut rx: mpsc::UnboundedReceiver<Arc<Event>>,
    cancel: CancellationToken,
) {
    debug!("Dispatch loop started");
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        dispatch(&registry, &event).await;
    }
    debug!(pending = rx.len(), "Dispatch loop stopped");
}

async fn dispatch(registry: &RwLock<ListenerRegistry>, event: &Arc<Event>) {
    let category = event.category();
    let entity_id = event.entity_id();
    let listeners = registry
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .listeners(category, entity_id);

    trace!(%category, entity_id, listeners = listeners.len(), "Dispatching event");

    for (listener_id, target) in listeners {
        if let Err(err) = target.invoke(Arc::clone(event)).await {
            error!(%category, entity_id, %listener_id, error = %err, "Listener failed");
        }
    }
}

async fn tick_loop(
    every_second: Arc<Mutex<TickListeners>>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
) {
    loop {
        let now = clock.now();
        let boundary = TimeDelta::from_std(until_next_second(now)).map_or(now, |residual| now + residual);

        // A timer that wakes before the wall clock reaches the boundary is
        // rearmed, so each second ticks once.
        let mut rearmed = false;
        loop {
            let remaining = remaining_until(boundary, clock.now());
            if remaining.is_zero() {
                break;
            }
            if rearmed {
                debug!(%boundary, remaining_us = remaining.as_micros() as u64, "Tick timer fired early, rearming");
            }
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(remaining) => {}
            }
            rearmed = true;
        }

        let listeners: Vec<_> = lock(&every_second)
            .iter()
            .map(|(name, target)| (name.clone(), target.clone()))
            .collect();
        if !listeners.is_empty() {
            invoke_ticks(&listeners, Tick::At(clock.now())).await;
        }
    }
}

async fn invoke_ticks(listeners: &[(String, TickTarget)], tick: Tick) {
    futures::future::join_all(listeners.iter().map(|(name, target)| async move {
        if let Err(err) = target.invoke(tick).await {
            warn!(listener = %name, ?tick, error = %err, "Every-second listener failed");
        }
    }))
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::Target;
    use chrono::{TimeDelta, TimeZone};
    use gpiohub_core::{OutputState, Switch};
    use rstest::rstest;
    use std::sync::atomic::AtomicUsize;

    /// Wall clock driven by the (paused) tokio clock.
    #[derive(Debug)]
    struct TokioClock {
        base: DateTime<Utc>,
        started: tokio::time::Instant,
    }

    impl TokioClock {
        fn at(base: DateTime<Utc>) -> Arc<Self> {
            Arc::new(Self {
                base,
                started: tokio::time::Instant::now(),
            })
        }
    }

    impl Clock for TokioClock {
        fn now(&self) -> DateTime<Utc> {
            self.base + TimeDelta::from_std(self.started.elapsed()).unwrap()
        }
    }

    fn base() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn relay_event(id: &str, state: Switch) -> OutputState {
        OutputState {
            id: id.to_string(),
            name: id.to_string(),
            state,
            kind: "switch".to_string(),
            pin: "P8_31".to_string(),
            timestamp: None,
        }
    }

    #[rstest]
    #[case(0, Duration::from_secs(1))]
    #[case(250_000_000, Duration::from_millis(750))]
    #[case(999_999_999, Duration::from_nanos(1))]
    fn test_until_next_second(#[case] nanos: u32, #[case] expected: Duration) {
        let now = Utc.timestamp_opt(1_700_000_000, nanos).unwrap();
        assert_eq!(until_next_second(now), expected);
    }

    #[test]
    fn test_remaining_until_past_is_zero() {
        assert_eq!(remaining_until(base(), base() + TimeDelta::seconds(3)), Duration::ZERO);
        assert_eq!(
            remaining_until(base() + TimeDelta::milliseconds(20), base()),
            Duration::from_millis(20)
        );
    }

    #[tokio::test]
    async fn test_listener_failure_does_not_stop_others() {
        let bus = EventBus::start(EventBusConfig::default());
        let delivered = Arc::new(AtomicUsize::new(0));

        bus.register(
            EventCategory::Output,
            "relay1",
            "broken",
            Target::immediate(|_| anyhow::bail!("listener broke")),
        );
        bus.register(
            EventCategory::Output,
            "relay1",
            "panicky",
            Target::immediate(|_| panic!("listener panicked")),
        );
        let counter = Arc::clone(&delivered);
        bus.register(
            EventCategory::Output,
            "relay1",
            "counter",
            Target::immediate(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        bus.publish(relay_event("relay1", Switch::On));
        bus.publish(relay_event("relay1", Switch::Off));
        bus.publish(relay_event("relay2", Switch::Off));

        tokio::time::timeout(Duration::from_secs(1), async {
            while delivered.load(Ordering::SeqCst) < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        bus.shutdown().await;
        assert_eq!(delivered.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_shutdown_runs_hooks_and_is_idempotent() {
        let bus = EventBus::start(EventBusConfig::default());
        let order = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&order);
        bus.register_shutdown_hook(Target::immediate(move |()| {
            log.lock().unwrap().push("immediate");
            Ok(())
        }));
        bus.register_shutdown_hook(Target::immediate(|()| anyhow::bail!("hook failed")));
        let log = Arc::clone(&order);
        bus.register_shutdown_hook(Target::deferred(move |()| {
            let log = Arc::clone(&log);
            async move {
                tokio::task::yield_now().await;
                log.lock().unwrap().push("deferred");
                Ok::<_, anyhow::Error>(())
            }
        }));
        let log = Arc::clone(&order);
        bus.register_every_second(
            "heartbeat",
            Target::immediate(move |tick| {
                if tick == Tick::Shutdown {
                    log.lock().unwrap().push("sentinel");
                }
                Ok(())
            }),
        );

        bus.shutdown().await;
        bus.shutdown().await;

        assert!(bus.is_shut_down());
        assert_eq!(*order.lock().unwrap(), vec!["immediate", "deferred", "sentinel"]);
        assert!(matches!(
            bus.schedule_once(Utc::now(), Target::immediate(|_| Ok(()))),
            Err(EventBusError::ShutDown)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_align_to_second_boundaries() {
        let clock = TokioClock::at(base() + TimeDelta::milliseconds(400));
        let bus = EventBus::start_with_clock(EventBusConfig::default(), clock);
        let ticks = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&ticks);
        bus.register_every_second(
            "slow",
            Target::deferred(move |tick| {
                let sink = Arc::clone(&sink);
                async move {
                    if let Tick::At(at) = tick {
                        sink.lock().unwrap().push(at);
                    }
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    Ok::<_, anyhow::Error>(())
                }
            }),
        );

        tokio::time::sleep(Duration::from_millis(3_000)).await;
        bus.shutdown().await;

        let ticks = ticks.lock().unwrap();
        assert_eq!(ticks.len(), 3);
        for (n, at) in ticks.iter().enumerate() {
            assert_eq!(*at, base() + TimeDelta::seconds(n as i64 + 1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregister_every_second() {
        let bus = EventBus::start_with_clock(EventBusConfig::default(), TokioClock::at(base()));
        let count = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&count);
        bus.register_every_second(
            "counter",
            Target::immediate(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert!(bus.unregister_every_second("counter"));
        assert!(!bus.unregister_every_second("counter"));
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(count.load(Ordering::SeqCst), 2);
        bus.shutdown().await;
    }
}
