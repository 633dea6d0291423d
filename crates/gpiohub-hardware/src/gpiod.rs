//! GPIO character device backend.
//!
//! Lines are discovered by scanning `/dev` for `gpiochip*` devices and asking
//! every chip for the names of its lines. Requests go through the kernel
//! character device interface via `tokio-gpiod`.
//!
//! `tokio-gpiod` types a request by direction, so a direction switch
//! re-requests the line on the same chip. The old request is dropped first,
//! the line is never held twice.

use crate::{
    HardwareError, Result,
    traits::{LineBackend, LineRequest},
    types::{Bias, Direction, Edge, EdgeEvent, LineInfo, LineSettings},
};
use futures::FutureExt;
use gpiohub_core::constants::{GPIO_CHIP_PREFIX, GPIO_DEVICE_DIR, LINE_CONSUMER};
use std::path::PathBuf;
use tokio_gpiod::{Active, Chip, EdgeDetect, Input, Lines, Options, Output};
use tracing::{debug, trace};

fn gpiod_bias(bias: Bias) -> tokio_gpiod::Bias {
    match bias {
        Bias::Disabled => tokio_gpiod::Bias::Disable,
        Bias::PullUp => tokio_gpiod::Bias::PullUp,
        Bias::PullDown => tokio_gpiod::Bias::PullDown,
    }
}

/// Line backend for `/dev/gpiochip*` devices.
#[derive(Debug, Clone)]
pub struct GpiodBackend {
    device_dir: PathBuf,
}

impl GpiodBackend {
    /// Create a backend scanning the default device directory.
    pub fn new() -> Self {
        Self::with_device_dir(GPIO_DEVICE_DIR)
    }

    /// Create a backend scanning a custom device directory.
    pub fn with_device_dir(device_dir: impl Into<PathBuf>) -> Self {
        Self {
            device_dir: device_dir.into(),
        }
    }

    async fn chip_paths(&self) -> Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(&self.device_dir).await?;
        let mut paths = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            if entry
                .file_name()
                .to_string_lossy()
                .starts_with(GPIO_CHIP_PREFIX)
            {
                paths.push(entry.path());
            }
        }

        paths.sort();
        Ok(paths)
    }
}

impl Default for GpiodBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LineBackend for GpiodBackend {
    type Request = GpiodLineRequest;

    async fn discover(&self) -> Result<Vec<LineInfo>> {
        let paths = self.chip_paths().await?;
        if paths.is_empty() {
            return Err(HardwareError::discovery_failed(format!(
                "no {GPIO_CHIP_PREFIX} devices in {}",
                self.device_dir.display()
            )));
        }

        let mut lines = Vec::new();
        for path in paths {
            let chip = Chip::new(&path).await?;
            debug!(chip = %path.display(), lines = chip.num_lines(), "Scanning GPIO chip");

            for offset in 0..chip.num_lines() {
                let info = chip.line_info(offset).await?;
                // Board overlays append a description after the pin name.
                let Some(name) = info.name.split(' ').next().filter(|name| !name.is_empty())
                else {
                    continue;
                };
                lines.push(
                    LineInfo::new(name, path.clone(), offset)
                        .with_active_low(info.active == Active::Low),
                );
            }
        }

        Ok(lines)
    }

    async fn request(&self, line: &LineInfo, settings: &LineSettings) -> Result<GpiodLineRequest> {
        let chip = Chip::new(&line.chip).await?;
        let mut request = GpiodLineRequest {
            info: line.clone(),
            chip,
            lines: None,
        };
        request.open(settings).await?;
        Ok(request)
    }
}

enum GpiodLines {
    Input(Lines<Input>),
    Output(Lines<Output>),
}

/// Request on a character device line.
pub struct GpiodLineRequest {
    info: LineInfo,
    chip: Chip,
    lines: Option<GpiodLines>,
}

impl std::fmt::Debug for GpiodLineRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpiodLineRequest")
            .field("info", &self.info)
            .field("requested", &self.lines.is_some())
            .finish()
    }
}

impl GpiodLineRequest {
    fn error(&self, err: std::io::Error) -> HardwareError {
        HardwareError::backend(&self.info.name, err.to_string())
    }

    /// Request the line with `settings`. The previous request is given up
    /// first; on error the line is left unrequested.
    async fn open(&mut self, settings: &LineSettings) -> Result<()> {
        let offset = self.info.offset;
        self.lines = None;

        let lines = match settings.direction {
            Direction::Input => {
                let edge = if settings.edge_detection {
                    EdgeDetect::Both
                } else {
                    EdgeDetect::Disable
                };
                if let Some(debounce) = settings.debounce {
                    trace!(pin = %self.info.name, ?debounce, "Kernel debounce not available, relying on software debounce");
                }
                let options = Options::input([offset])
                    .bias(gpiod_bias(settings.bias))
                    .edge(edge)
                    .consumer(LINE_CONSUMER);
                let lines = self
                    .chip
                    .request_lines(options)
                    .await
                    .map_err(|err| self.error(err))?;
                GpiodLines::Input(lines)
            }
            Direction::Output => {
                let options = Options::output([offset])
                    .values([settings.output_value])
                    .consumer(LINE_CONSUMER);
                let lines = self
                    .chip
                    .request_lines(options)
                    .await
                    .map_err(|err| self.error(err))?;
                GpiodLines::Output(lines)
            }
        };

        self.lines = Some(lines);
        Ok(())
    }

    fn released(&self) -> HardwareError {
        HardwareError::backend(&self.info.name, "request already released")
    }
}

impl LineRequest for GpiodLineRequest {
    async fn reconfigure(&mut self, settings: &LineSettings) -> Result<()> {
        self.open(settings).await
    }

    async fn get_value(&mut self) -> Result<bool> {
        let values = match &self.lines {
            Some(GpiodLines::Input(lines)) => lines.get_values([false]).await,
            Some(GpiodLines::Output(lines)) => lines.get_values([false]).await,
            None => return Err(self.released()),
        };
        let [value] = values.map_err(|err| self.error(err))?;
        Ok(value)
    }

    async fn set_value(&mut self, value: bool) -> Result<()> {
        match &self.lines {
            Some(GpiodLines::Output(lines)) => {
                lines.set_values([value]).await.map_err(|err| self.error(err))
            }
            Some(GpiodLines::Input(_)) => Err(HardwareError::backend(
                &self.info.name,
                "line is not an output",
            )),
            None => Err(self.released()),
        }
    }

    async fn read_edges(&mut self) -> Result<Vec<EdgeEvent>> {
        let name = self.info.name.clone();
        let Some(GpiodLines::Input(lines)) = self.lines.as_mut() else {
            return Err(HardwareError::backend(name, "edge detection disabled"));
        };

        let convert = |event: tokio_gpiod::Event| {
            let edge = match event.edge {
                tokio_gpiod::Edge::Rising => Edge::Rising,
                tokio_gpiod::Edge::Falling => Edge::Falling,
            };
            EdgeEvent::new(edge, event.time)
        };

        let first = lines
            .read_event()
            .await
            .map_err(|err| HardwareError::backend(&name, err.to_string()))?;
        let mut events = vec![convert(first)];

        // Drain whatever the kernel already queued without waiting again.
        while let Some(next) = lines.read_event().now_or_never() {
            let event = next.map_err(|err| HardwareError::backend(&name, err.to_string()))?;
            events.push(convert(event));
        }

        Ok(events)
    }

    async fn release(mut self) -> Result<()> {
        // Dropping the request closes its file descriptor.
        self.lines.take();
        Ok(())
    }
}
