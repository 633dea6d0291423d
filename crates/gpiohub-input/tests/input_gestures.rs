//! Integration tests for inputs running on the mock board.
//!
//! Every scenario runs on paused time: levels are set on the mock handle,
//! the test sleeps to move the clock, and the reports delivered to the
//! press callback are compared against the expected classification.

use gpiohub_core::{ClickType, Event, EventCategory, EventPayload, InputKind};
use gpiohub_events::{EventBus, EventBusConfig, Target};
use gpiohub_hardware::mock::{MockBackend, MockBackendHandle};
use gpiohub_hardware::{Edge, PinManager, PinManagerConfig};
use gpiohub_input::{Detection, GestureTimings, Input, InputConfig, PressReport};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

// ============================================================================
// Helpers
// ============================================================================

struct Rig {
    pins: Arc<PinManager>,
    handle: MockBackendHandle,
    bus: EventBus,
}

impl Rig {
    async fn new() -> Self {
        let (backend, handle) = MockBackend::new(&["P8_30", "P8_31"]);
        let pins = PinManager::discover(backend.into(), PinManagerConfig::default())
            .await
            .unwrap();
        Self {
            pins: Arc::new(pins),
            handle,
            bus: EventBus::start(EventBusConfig::default()),
        }
    }

    async fn input(&self, config: InputConfig) -> (Input, mpsc::UnboundedReceiver<PressReport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let input = Input::start(
            config,
            Arc::clone(&self.pins),
            self.bus.clone(),
            Target::immediate(move |report: PressReport| {
                tx.send(report)?;
                Ok(())
            }),
        )
        .await
        .unwrap();
        (input, rx)
    }

    fn set(&self, pin: &str, level: bool) {
        self.handle.set_level(pin, level).unwrap();
    }

    async fn shutdown(self) {
        self.bus.shutdown().await;
        self.pins.shutdown().await;
    }
}

async fn wait(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

fn drain(rx: &mut mpsc::UnboundedReceiver<PressReport>) -> Vec<ClickType> {
    let mut clicks = Vec::new();
    while let Ok(report) = rx.try_recv() {
        clicks.push(report.click);
    }
    clicks
}

fn button(pin: &str, detection: Detection) -> InputConfig {
    InputConfig::new(pin, InputKind::Event).with_detection(detection)
}

// ============================================================================
// Edge-driven gestures
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_edge_double_click_reports_double_only() {
    let rig = Rig::new().await;
    let (_input, mut rx) = rig.input(button("P8_30", Detection::edge())).await;

    rig.set("P8_30", true);
    wait(105).await;
    rig.set("P8_30", false);
    wait(105).await;
    rig.set("P8_30", true);
    wait(105).await;
    rig.set("P8_30", false);
    wait(1_000).await;

    assert_eq!(drain(&mut rx), vec![ClickType::Double]);
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_edge_single_click_waits_for_window() {
    let rig = Rig::new().await;
    let (_input, mut rx) = rig.input(button("P8_30", Detection::edge())).await;

    rig.set("P8_30", true);
    wait(105).await;
    rig.set("P8_30", false);
    wait(50).await;
    assert!(drain(&mut rx).is_empty());

    wait(200).await;
    assert_eq!(drain(&mut rx), vec![ClickType::Single]);
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_edge_long_press_reports_held_time() {
    let rig = Rig::new().await;
    let (_input, mut rx) = rig.input(button("P8_30", Detection::edge())).await;

    rig.set("P8_30", true);
    wait(500).await;
    let report = rx.try_recv().expect("long press not reported");
    assert_eq!(report.click, ClickType::Long);
    assert!(report.duration.unwrap() >= Duration::from_millis(400));

    rig.set("P8_30", false);
    wait(500).await;
    assert!(drain(&mut rx).is_empty());
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_edge_bounce_is_filtered() {
    let rig = Rig::new().await;
    let (_input, mut rx) = rig.input(button("P8_30", Detection::edge())).await;

    // Contact chatter settles on pressed; only the first edge counts.
    rig.handle
        .inject_edges("P8_30", &[Edge::Rising, Edge::Falling, Edge::Rising])
        .unwrap();
    wait(105).await;
    rig.set("P8_30", false);
    wait(300).await;

    assert_eq!(drain(&mut rx), vec![ClickType::Single]);
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_tap_shorter_than_debounce_is_a_single_click() {
    let rig = Rig::new().await;
    let (_input, mut rx) = rig.input(button("P8_30", Detection::edge())).await;

    // The release lands inside the 100 ms window and is applied when it closes.
    rig.set("P8_30", true);
    wait(60).await;
    rig.set("P8_30", false);
    wait(1_000).await;
    assert_eq!(drain(&mut rx), vec![ClickType::Single]);

    rig.set("P8_30", true);
    wait(150).await;
    rig.set("P8_30", false);
    wait(1_000).await;
    assert_eq!(drain(&mut rx), vec![ClickType::Single]);
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_release_chatter_settles_on_released() {
    let rig = Rig::new().await;
    let (_input, mut rx) = rig.input(button("P8_30", Detection::edge())).await;

    rig.set("P8_30", true);
    wait(150).await;
    rig.handle
        .inject_edges("P8_30", &[Edge::Falling, Edge::Rising, Edge::Falling])
        .unwrap();
    wait(1_000).await;
    assert_eq!(drain(&mut rx), vec![ClickType::Single]);

    rig.set("P8_30", true);
    wait(150).await;
    rig.set("P8_30", false);
    wait(1_000).await;
    assert_eq!(drain(&mut rx), vec![ClickType::Single]);
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_long_press_inside_double_window_reports_long_only() {
    let rig = Rig::new().await;
    let timings = GestureTimings {
        double_click: Duration::from_millis(700),
        long_press: Duration::from_millis(400),
    };
    let (_input, mut rx) = rig
        .input(button("P8_30", Detection::edge()).with_timings(timings))
        .await;

    rig.set("P8_30", true);
    wait(500).await;
    rig.set("P8_30", false);
    wait(1_000).await;

    assert_eq!(drain(&mut rx), vec![ClickType::Long]);
    rig.shutdown().await;
}

// ============================================================================
// Polled gestures
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_poll_double_click() {
    let rig = Rig::new().await;
    let (_input, mut rx) = rig.input(button("P8_30", Detection::poll())).await;

    for level in [true, false, true, false] {
        rig.set("P8_30", level);
        wait(100).await;
    }
    wait(1_000).await;

    assert_eq!(drain(&mut rx), vec![ClickType::Double]);
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_poll_inputs_are_independent() {
    let rig = Rig::new().await;
    let (_first, mut first_rx) = rig.input(button("P8_30", Detection::poll())).await;
    let (_second, mut second_rx) = rig.input(button("P8_31", Detection::poll())).await;

    rig.set("P8_30", true);
    rig.set("P8_31", true);
    wait(100).await;
    rig.set("P8_30", false);
    wait(1_000).await;
    rig.set("P8_31", false);
    wait(500).await;

    assert_eq!(drain(&mut first_rx), vec![ClickType::Single]);
    assert_eq!(drain(&mut second_rx), vec![ClickType::Long]);
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_button_held_at_startup_is_not_reported() {
    let rig = Rig::new().await;
    rig.set("P8_30", true);
    let (_input, mut rx) = rig.input(button("P8_30", Detection::poll())).await;

    wait(100).await;
    rig.set("P8_30", false);
    wait(1_000).await;

    assert!(drain(&mut rx).is_empty());
    rig.shutdown().await;
}

// ============================================================================
// Binary sensors
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_sensor_initial_send_reports_startup_level() {
    let rig = Rig::new().await;
    rig.set("P8_30", true);
    let config = InputConfig::new("P8_30", InputKind::BinarySensor).initial_send(true);
    let (_input, mut rx) = rig.input(config).await;

    wait(100).await;
    rig.set("P8_30", false);
    wait(100).await;

    assert_eq!(drain(&mut rx), vec![ClickType::Pressed, ClickType::Released]);
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_inverted_sensor_on_edges() {
    let rig = Rig::new().await;
    let config = InputConfig::new("P8_30", InputKind::BinarySensor)
        .with_detection(Detection::edge())
        .inverted(true);
    let (_input, mut rx) = rig.input(config).await;

    rig.set("P8_30", true);
    wait(150).await;
    rig.set("P8_30", false);
    wait(150).await;

    assert_eq!(drain(&mut rx), vec![ClickType::Released, ClickType::Pressed]);
    rig.shutdown().await;
}

// ============================================================================
// Delivery
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_callback_runs_before_bus_publication() {
    let rig = Rig::new().await;
    let order = Arc::new(Mutex::new(Vec::new()));

    let seen = Arc::clone(&order);
    rig.bus.register(
        EventCategory::Input,
        "P8_30",
        "recorder",
        Target::immediate(move |event: Arc<Event>| {
            if let EventPayload::Input(state) = event.payload() {
                seen.lock().unwrap().push(format!("bus:{}:{}", state.state, state.kind));
                assert_eq!(state.duration, None);
            }
            Ok(())
        }),
    );

    let seen = Arc::clone(&order);
    let _input = Input::start(
        button("P8_30", Detection::edge()).clear_message(true),
        Arc::clone(&rig.pins),
        rig.bus.clone(),
        Target::deferred(move |report: PressReport| {
            let seen = Arc::clone(&seen);
            async move {
                assert!(report.clear_message);
                tokio::time::sleep(Duration::from_millis(30)).await;
                seen.lock().unwrap().push(format!("callback:{}", report.click));
                Ok::<_, anyhow::Error>(())
            }
        }),
    )
    .await
    .unwrap();

    rig.set("P8_30", true);
    wait(105).await;
    rig.set("P8_30", false);
    wait(500).await;

    assert_eq!(
        *order.lock().unwrap(),
        vec!["callback:single".to_string(), "bus:single:input".to_string()]
    );
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failing_callback_still_publishes() {
    let rig = Rig::new().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    rig.bus.register(
        EventCategory::Input,
        "P8_30",
        "recorder",
        Target::immediate(move |event: Arc<Event>| {
            tx.send(event.entity_id().to_string())?;
            Ok(())
        }),
    );

    let input = Input::start(
        button("P8_30", Detection::edge()),
        Arc::clone(&rig.pins),
        rig.bus.clone(),
        Target::immediate(|_: PressReport| anyhow::bail!("no transport")),
    )
    .await
    .unwrap();

    rig.set("P8_30", true);
    wait(500).await;

    assert_eq!(rx.try_recv().unwrap(), "P8_30");
    assert_eq!(input.last_click().await.map(|(click, _)| click), Some(ClickType::Long));
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stopped_input_reports_nothing() {
    let rig = Rig::new().await;
    let (input, mut rx) = rig.input(button("P8_30", Detection::poll())).await;

    input.stop().await;
    rig.set("P8_30", true);
    wait(1_000).await;

    assert!(drain(&mut rx).is_empty());
    rig.shutdown().await;
}
