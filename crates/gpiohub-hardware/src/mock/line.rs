//! Mock GPIO backend for testing and development.
//!
//! This module provides a simulated board whose lines can be driven
//! programmatically, so the pin manager and everything above it can run
//! without physical hardware.

use crate::{
    HardwareError, Result,
    traits::{LineBackend, LineRequest},
    types::{Bias, Direction, Edge, EdgeEvent, LineInfo, LineSettings},
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// How a mock line behaves when its request is released.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReleaseBehavior {
    /// Release succeeds.
    #[default]
    Succeed,

    /// Release reports a driver error.
    Fail,

    /// Release never completes.
    Hang,
}

#[derive(Debug)]
struct MockLine {
    info: LineInfo,
    level: bool,
    settings: Option<LineSettings>,
    edge_tx: Option<mpsc::UnboundedSender<EdgeEvent>>,
    requests: usize,
    reconfigures: usize,
    releases: usize,
    release: ReleaseBehavior,
    fail_reconfigure: bool,
}

impl MockLine {
    fn new(info: LineInfo) -> Self {
        Self {
            info,
            level: false,
            settings: None,
            edge_tx: None,
            requests: 0,
            reconfigures: 0,
            releases: 0,
            release: ReleaseBehavior::Succeed,
            fail_reconfigure: false,
        }
    }

    /// Emit an edge to the subscriber, if edge detection is on.
    fn emit(&mut self, edge: Edge, started: Instant) {
        let event = EdgeEvent::new(edge, started.elapsed());
        let closed = self
            .edge_tx
            .as_ref()
            .is_some_and(|tx| tx.send(event).is_err());
        if closed {
            self.edge_tx = None;
        }
    }
}

#[derive(Debug)]
struct MockBoard {
    lines: Vec<MockLine>,
    started: Instant,
}

impl MockBoard {
    fn line_mut(&mut self, name: &str) -> Result<&mut MockLine> {
        self.lines
            .iter_mut()
            .find(|line| line.info.name == name)
            .ok_or_else(|| HardwareError::unknown_pin(name))
    }

    fn line(&self, name: &str) -> Option<&MockLine> {
        self.lines.iter().find(|line| line.info.name == name)
    }
}

type SharedBoard = Arc<Mutex<MockBoard>>;

fn lock(board: &SharedBoard) -> MutexGuard<'_, MockBoard> {
    board.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mock line backend.
///
/// Every line starts low and unrequested. Tests and the development binary
/// drive the lines through a [`MockBackendHandle`].
///
/// # Examples
///
/// ```
/// use gpiohub_hardware::mock::MockBackend;
/// use gpiohub_hardware::traits::LineBackend;
///
/// #[tokio::main]
/// async fn main() -> gpiohub_hardware::Result<()> {
///     let (backend, _handle) = MockBackend::new(&["P8_30", "P8_31"]);
///
///     let lines = backend.discover().await?;
///     assert_eq!(lines.len(), 2);
///     assert_eq!(lines[1].offset, 1);
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MockBackend {
    board: SharedBoard,
}

impl MockBackend {
    /// Create a board with one chip holding the named lines.
    pub fn new(names: &[&str]) -> (Self, MockBackendHandle) {
        Self::with_lines(
            names
                .iter()
                .enumerate()
                .map(|(offset, name)| LineInfo::new(*name, "/dev/gpiochip0", offset as u32))
                .collect(),
        )
    }

    /// Create a board from explicit line descriptions.
    ///
    /// An empty list simulates a host without GPIO chips.
    pub fn with_lines(lines: Vec<LineInfo>) -> (Self, MockBackendHandle) {
        let board = Arc::new(Mutex::new(MockBoard {
            lines: lines.into_iter().map(MockLine::new).collect(),
            started: Instant::now(),
        }));

        let handle = MockBackendHandle {
            board: Arc::clone(&board),
        };

        (Self { board }, handle)
    }
}

impl LineBackend for MockBackend {
    type Request = MockLineRequest;

    async fn discover(&self) -> Result<Vec<LineInfo>> {
        let board = lock(&self.board);
        if board.lines.is_empty() {
            return Err(HardwareError::discovery_failed("no gpiochip devices found"));
        }
        Ok(board.lines.iter().map(|line| line.info.clone()).collect())
    }

    async fn request(&self, line: &LineInfo, settings: &LineSettings) -> Result<MockLineRequest> {
        let mut board = lock(&self.board);
        let mock = board.line_mut(&line.name)?;

        if mock.settings.is_some() {
            return Err(HardwareError::backend(&line.name, "line busy"));
        }

        mock.requests += 1;
        let edge_rx = apply(mock, settings);

        Ok(MockLineRequest {
            name: line.name.clone(),
            board: Arc::clone(&self.board),
            edge_rx,
        })
    }
}

/// Apply settings to a mock line, returning a fresh edge receiver when edge
/// detection was just switched on.
fn apply(line: &mut MockLine, settings: &LineSettings) -> Option<mpsc::UnboundedReceiver<EdgeEvent>> {
    line.settings = Some(*settings);
    if settings.direction == Direction::Output {
        line.level = settings.output_value;
    }

    if settings.edge_detection {
        let (tx, rx) = mpsc::unbounded_channel();
        line.edge_tx = Some(tx);
        Some(rx)
    } else {
        line.edge_tx = None;
        None
    }
}

/// Request on a mock line.
#[derive(Debug)]
pub struct MockLineRequest {
    name: String,
    board: SharedBoard,
    edge_rx: Option<mpsc::UnboundedReceiver<EdgeEvent>>,
}

impl LineRequest for MockLineRequest {
    async fn reconfigure(&mut self, settings: &LineSettings) -> Result<()> {
        let mut board = lock(&self.board);
        let line = board.line_mut(&self.name)?;
        if std::mem::take(&mut line.fail_reconfigure) {
            // Like the character device: the old request is gone before the
            // new one is refused.
            line.settings = None;
            line.edge_tx = None;
            self.edge_rx = None;
            return Err(HardwareError::backend(&self.name, "line request refused"));
        }
        line.reconfigures += 1;
        self.edge_rx = apply(line, settings);
        Ok(())
    }

    async fn get_value(&mut self) -> Result<bool> {
        let mut board = lock(&self.board);
        Ok(board.line_mut(&self.name)?.level)
    }

    async fn set_value(&mut self, value: bool) -> Result<()> {
        let mut board = lock(&self.board);
        let line = board.line_mut(&self.name)?;
        match line.settings {
            Some(settings) if settings.direction == Direction::Output => {
                line.level = value;
                Ok(())
            }
            _ => Err(HardwareError::backend(&self.name, "line is not an output")),
        }
    }

    async fn read_edges(&mut self) -> Result<Vec<EdgeEvent>> {
        let rx = self
            .edge_rx
            .as_mut()
            .ok_or_else(|| HardwareError::backend(&self.name, "edge detection disabled"))?;

        let first = rx
            .recv()
            .await
            .ok_or_else(|| HardwareError::backend(&self.name, "edge source closed"))?;

        let mut events = vec![first];
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        Ok(events)
    }

    async fn release(self) -> Result<()> {
        let behavior = {
            let mut board = lock(&self.board);
            let line = board.line_mut(&self.name)?;
            if line.release == ReleaseBehavior::Succeed {
                line.settings = None;
                line.edge_tx = None;
                line.releases += 1;
            }
            line.release
        };

        match behavior {
            ReleaseBehavior::Succeed => Ok(()),
            ReleaseBehavior::Fail => Err(HardwareError::backend(&self.name, "release refused")),
            ReleaseBehavior::Hang => std::future::pending().await,
        }
    }
}

/// Handle for driving and inspecting a mock board.
///
/// The handle can be cloned and shared across tasks.
///
/// # Examples
///
/// ```
/// use gpiohub_hardware::mock::MockBackend;
///
/// let (_backend, handle) = MockBackend::new(&["P8_30"]);
///
/// handle.set_level("P8_30", true).unwrap();
/// assert_eq!(handle.level("P8_30"), Some(true));
/// assert_eq!(handle.request_count("P8_30"), 0);
/// ```
#[derive(Debug, Clone)]
pub struct MockBackendHandle {
    board: SharedBoard,
}

impl MockBackendHandle {
    /// Set the physical level of a line.
    ///
    /// Emits an edge to an edge-detecting request when the level changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the line does not exist.
    pub fn set_level(&self, name: &str, level: bool) -> Result<()> {
        let mut board = lock(&self.board);
        let started = board.started;
        let line = board.line_mut(name)?;
        if line.level != level {
            line.level = level;
            line.emit(Edge::towards(level), started);
        }
        Ok(())
    }

    /// Emit a burst of edges in one go, as a bouncing contact would.
    ///
    /// The line ends at the level of the last edge.
    ///
    /// # Errors
    ///
    /// Returns an error if the line does not exist.
    pub fn inject_edges(&self, name: &str, edges: &[Edge]) -> Result<()> {
        let mut board = lock(&self.board);
        let started = board.started;
        let line = board.line_mut(name)?;
        for edge in edges {
            line.level = edge.level();
            line.emit(*edge, started);
        }
        Ok(())
    }

    /// Choose how the next release of a line behaves.
    ///
    /// # Errors
    ///
    /// Returns an error if the line does not exist.
    pub fn set_release_behavior(&self, name: &str, behavior: ReleaseBehavior) -> Result<()> {
        lock(&self.board).line_mut(name)?.release = behavior;
        Ok(())
    }

    /// Make the next reconfiguration of a line fail, leaving the line
    /// unrequested.
    ///
    /// # Errors
    ///
    /// Returns an error if the line does not exist.
    pub fn fail_next_reconfigure(&self, name: &str) -> Result<()> {
        lock(&self.board).line_mut(name)?.fail_reconfigure = true;
        Ok(())
    }

    /// End the edge stream of a line, as a driver read error would.
    ///
    /// # Errors
    ///
    /// Returns an error if the line does not exist.
    pub fn close_edge_stream(&self, name: &str) -> Result<()> {
        lock(&self.board).line_mut(name)?.edge_tx = None;
        Ok(())
    }

    /// Physical level of a line.
    pub fn level(&self, name: &str) -> Option<bool> {
        lock(&self.board).line(name).map(|line| line.level)
    }

    /// Direction the line is currently requested with.
    pub fn direction(&self, name: &str) -> Option<Direction> {
        self.settings(name).map(|settings| settings.direction)
    }

    /// Bias the line is currently requested with.
    pub fn bias(&self, name: &str) -> Option<Bias> {
        self.settings(name).map(|settings| settings.bias)
    }

    /// Current request settings, `None` when the line is free.
    pub fn settings(&self, name: &str) -> Option<LineSettings> {
        lock(&self.board).line(name).and_then(|line| line.settings)
    }

    /// Whether the line is currently held by a request.
    pub fn is_requested(&self, name: &str) -> bool {
        self.settings(name).is_some()
    }

    /// Number of times the line was requested.
    pub fn request_count(&self, name: &str) -> usize {
        lock(&self.board).line(name).map_or(0, |line| line.requests)
    }

    /// Number of in-place reconfigurations.
    pub fn reconfigure_count(&self, name: &str) -> usize {
        lock(&self.board).line(name).map_or(0, |line| line.reconfigures)
    }

    /// Number of successful releases.
    pub fn release_count(&self, name: &str) -> usize {
        lock(&self.board).line(name).map_or(0, |line| line.releases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_discover_order() {
        let (backend, _handle) = MockBackend::new(&["P8_30", "P8_31", "P8_32"]);

        let lines = backend.discover().await.unwrap();
        let names: Vec<_> = lines.iter().map(|line| line.name.as_str()).collect();
        assert_eq!(names, vec!["P8_30", "P8_31", "P8_32"]);
        assert_eq!(lines[2].offset, 2);
    }

    #[tokio::test]
    async fn test_mock_discover_empty_board() {
        let (backend, _handle) = MockBackend::with_lines(Vec::new());

        let result = backend.discover().await;
        assert!(matches!(result, Err(HardwareError::DiscoveryFailed { .. })));
    }

    #[tokio::test]
    async fn test_mock_request_busy() {
        let (backend, handle) = MockBackend::new(&["P8_30"]);
        let info = LineInfo::new("P8_30", "/dev/gpiochip0", 0);

        let _request = backend
            .request(&info, &LineSettings::input(Bias::PullUp))
            .await
            .unwrap();
        assert_eq!(handle.bias("P8_30"), Some(Bias::PullUp));

        let second = backend.request(&info, &LineSettings::input(Bias::PullUp)).await;
        assert!(matches!(second, Err(HardwareError::Backend { .. })));
    }

    #[tokio::test]
    async fn test_mock_set_value_requires_output() {
        let (backend, handle) = MockBackend::new(&["P8_30"]);
        let info = LineInfo::new("P8_30", "/dev/gpiochip0", 0);

        let mut request = backend
            .request(&info, &LineSettings::input(Bias::Disabled))
            .await
            .unwrap();
        assert!(request.set_value(true).await.is_err());

        request.reconfigure(&LineSettings::output(false)).await.unwrap();
        request.set_value(true).await.unwrap();
        assert_eq!(handle.level("P8_30"), Some(true));
        assert_eq!(handle.reconfigure_count("P8_30"), 1);
    }

    #[tokio::test]
    async fn test_mock_read_edges_drains_burst() {
        let (backend, handle) = MockBackend::new(&["P8_30"]);
        let info = LineInfo::new("P8_30", "/dev/gpiochip0", 0);

        let mut request = backend
            .request(&info, &LineSettings::input(Bias::Disabled).with_edges(None))
            .await
            .unwrap();

        handle
            .inject_edges("P8_30", &[Edge::Rising, Edge::Falling, Edge::Rising])
            .unwrap();

        let events = request.read_edges().await.unwrap();
        let edges: Vec<_> = events.iter().map(|event| event.edge).collect();
        assert_eq!(edges, vec![Edge::Rising, Edge::Falling, Edge::Rising]);
        assert_eq!(handle.level("P8_30"), Some(true));
    }

    #[tokio::test]
    async fn test_mock_set_level_only_emits_changes() {
        let (backend, handle) = MockBackend::new(&["P8_30"]);
        let info = LineInfo::new("P8_30", "/dev/gpiochip0", 0);

        let mut request = backend
            .request(&info, &LineSettings::input(Bias::Disabled).with_edges(None))
            .await
            .unwrap();

        handle.set_level("P8_30", false).unwrap();
        handle.set_level("P8_30", true).unwrap();
        handle.set_level("P8_30", true).unwrap();

        let events = request.read_edges().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].edge, Edge::Rising);
    }

    #[tokio::test]
    async fn test_mock_release_behaviors() {
        let (backend, handle) = MockBackend::new(&["P8_30", "P8_31"]);

        let ok = backend
            .request(
                &LineInfo::new("P8_30", "/dev/gpiochip0", 0),
                &LineSettings::output(false),
            )
            .await
            .unwrap();
        ok.release().await.unwrap();
        assert_eq!(handle.release_count("P8_30"), 1);
        assert!(!handle.is_requested("P8_30"));

        handle
            .set_release_behavior("P8_31", ReleaseBehavior::Fail)
            .unwrap();
        let failing = backend
            .request(
                &LineInfo::new("P8_31", "/dev/gpiochip0", 1),
                &LineSettings::output(false),
            )
            .await
            .unwrap();
        assert!(failing.release().await.is_err());
        assert_eq!(handle.release_count("P8_31"), 0);
    }

    #[test]
    fn test_mock_handle_unknown_line() {
        let (_backend, handle) = MockBackend::new(&["P8_30"]);

        assert!(matches!(
            handle.set_level("P9_12", true),
            Err(HardwareError::UnknownPin { .. })
        ));
        assert_eq!(handle.level("P9_12"), None);
    }
}
