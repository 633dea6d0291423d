//! Enum wrappers for line backend dispatch.
//!
//! Native `async fn` in traits (RPITIT, Rust Edition 2024) is not
//! object-safe, so the pin manager cannot hold a `Box<dyn LineBackend>`.
//! These enums provide concrete type dispatch instead, with hardware
//! variants compiled in behind cargo features.
//!
//! # Examples
//!
//! ```
//! use gpiohub_hardware::backends::AnyLineBackend;
//! use gpiohub_hardware::mock::MockBackend;
//!
//! let (backend, _handle) = MockBackend::new(&["P8_30"]);
//! let any_backend = AnyLineBackend::Mock(backend);
//!
//! // Can now be handed to the PinManager
//! ```

#[cfg(feature = "gpiod")]
use crate::gpiod::{GpiodBackend, GpiodLineRequest};
use crate::mock::{MockBackend, MockLineRequest};
use crate::traits::{LineBackend, LineRequest};
use crate::types::{EdgeEvent, LineInfo, LineSettings};
use crate::Result;

/// Enum wrapper for line backend dispatch.
///
/// # Examples
///
/// ```
/// use gpiohub_hardware::backends::AnyLineBackend;
/// use gpiohub_hardware::traits::LineBackend;
/// use gpiohub_hardware::mock::MockBackend;
///
/// #[tokio::main]
/// async fn main() -> gpiohub_hardware::Result<()> {
///     let (backend, _handle) = MockBackend::new(&["P8_30", "P8_31"]);
///     let backend = AnyLineBackend::Mock(backend);
///
///     let lines = backend.discover().await?;
///     println!("Found {} lines", lines.len());
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum AnyLineBackend {
    /// Simulated board for development and testing.
    Mock(MockBackend),

    /// Kernel GPIO character devices.
    #[cfg(feature = "gpiod")]
    Gpiod(GpiodBackend),
}

impl LineBackend for AnyLineBackend {
    type Request = AnyLineRequest;

    async fn discover(&self) -> Result<Vec<LineInfo>> {
        match self {
            Self::Mock(backend) => backend.discover().await,
            #[cfg(feature = "gpiod")]
            Self::Gpiod(backend) => backend.discover().await,
        }
    }

    async fn request(&self, line: &LineInfo, settings: &LineSettings) -> Result<AnyLineRequest> {
        match self {
            Self::Mock(backend) => backend.request(line, settings).await.map(AnyLineRequest::Mock),
            #[cfg(feature = "gpiod")]
            Self::Gpiod(backend) => backend
                .request(line, settings)
                .await
                .map(AnyLineRequest::Gpiod),
        }
    }
}

impl From<MockBackend> for AnyLineBackend {
    fn from(backend: MockBackend) -> Self {
        Self::Mock(backend)
    }
}

#[cfg(feature = "gpiod")]
impl From<GpiodBackend> for AnyLineBackend {
    fn from(backend: GpiodBackend) -> Self {
        Self::Gpiod(backend)
    }
}

/// Enum wrapper for line request dispatch.
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyLineRequest {
    /// Request on a simulated line.
    Mock(MockLineRequest),

    /// Request on a kernel GPIO line.
    #[cfg(feature = "gpiod")]
    Gpiod(GpiodLineRequest),
}

impl LineRequest for AnyLineRequest {
    async fn reconfigure(&mut self, settings: &LineSettings) -> Result<()> {
        match self {
            Self::Mock(request) => request.reconfigure(settings).await,
            #[cfg(feature = "gpiod")]
            Self::Gpiod(request) => request.reconfigure(settings).await,
        }
    }

    async fn get_value(&mut self) -> Result<bool> {
        match self {
            Self::Mock(request) => request.get_value().await,
            #[cfg(feature = "gpiod")]
            Self::Gpiod(request) => request.get_value().await,
        }
    }

    async fn set_value(&mut self, value: bool) -> Result<()> {
        match self {
            Self::Mock(request) => request.set_value(value).await,
            #[cfg(feature = "gpiod")]
            Self::Gpiod(request) => request.set_value(value).await,
        }
    }

    async fn read_edges(&mut self) -> Result<Vec<EdgeEvent>> {
        match self {
            Self::Mock(request) => request.read_edges().await,
            #[cfg(feature = "gpiod")]
            Self::Gpiod(request) => request.read_edges().await,
        }
    }

    async fn release(self) -> Result<()> {
        match self {
            Self::Mock(request) => request.release().await,
            #[cfg(feature = "gpiod")]
            Self::Gpiod(request) => request.release().await,
        }
    }
}
