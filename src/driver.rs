//! Platform audio driver seam.
//!
//! The service talks to the platform through three small traits:
//! - [`AudioDriver`]: subsystem bring-up/teardown plus handle factories
//! - [`DeviceStream`]: the output device's byte queue
//! - [`ConverterStream`]: an ad-hoc format bridge (push one format, pull
//!   another)
//!
//! Handles are move-only owned boxes. There is no explicit destroy
//! operation: dropping a handle releases it, which gives the
//! "destroyed exactly once" guarantee for free.
//!
//! Implementations live in [`crate::drivers`]: an instrumented mock for
//! tests and headless hosts, and a cpal-backed device behind the
//! `device-cpal` feature.

use thiserror::Error;

use crate::format::AudioFormat;

/// Failure reported by a driver backend.
///
/// Backends fold their platform-specific error types into a message here;
/// the service either maps these into its control-plane errors (during
/// `initialize` and voice creation) or logs and confines them (during a
/// tick).
#[derive(Debug, Error)]
#[error("{0}")]
pub struct DriverError(String);

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A successfully opened output device.
///
/// `format` is the format the device actually negotiated, which becomes the
/// session's mix format. It may differ from the desired format passed to
/// [`AudioDriver::open_device_stream`].
pub struct OpenedDevice {
    pub stream: Box<dyn DeviceStream>,
    pub format: AudioFormat,
}

/// Platform audio subsystem and handle factory.
pub trait AudioDriver: Send {
    /// Bring up the audio subsystem. Idempotent per process.
    fn init_subsystem(&mut self) -> Result<(), DriverError>;

    /// Tear down the audio subsystem. Counterpart to `init_subsystem`.
    fn shutdown_subsystem(&mut self);

    /// Open the default output device, requesting `desired` as the stream
    /// format. The device may substitute a different one.
    fn open_device_stream(&mut self, desired: AudioFormat) -> Result<OpenedDevice, DriverError>;

    /// Create a conversion stream that accepts `src`-format bytes and
    /// produces `dst`-format bytes.
    fn create_converter(
        &mut self,
        src: AudioFormat,
        dst: AudioFormat,
    ) -> Result<Box<dyn ConverterStream>, DriverError>;
}

/// The platform-owned playback queue.
///
/// Every call is non-blocking or bounded-blocking; the mixer serializes its
/// own pushes through the service mutex regardless.
pub trait DeviceStream: Send {
    /// Begin device consumption.
    fn resume(&mut self) -> Result<(), DriverError>;

    /// Suspend device consumption.
    fn pause(&mut self) -> Result<(), DriverError>;

    /// Enqueue mix-format bytes for playback.
    fn push_bytes(&mut self, bytes: &[u8]) -> Result<(), DriverError>;

    /// Bytes currently queued and not yet consumed by the device.
    fn queued_bytes(&self) -> Result<usize, DriverError>;
}

/// A push/pull format bridge with its own staging queue.
///
/// Accepts arbitrary byte-aligned chunks on the input side. The bridge may
/// hold a bounded internal delay (resampler filter state), which is why
/// drain detection must use `available() == 0` rather than input EOF alone.
pub trait ConverterStream: Send {
    /// Feed source-format bytes.
    fn push(&mut self, bytes: &[u8]) -> Result<(), DriverError>;

    /// Drain up to `out.len()` destination-format bytes. Returns the byte
    /// count actually written; less than `out.len()` means the internal
    /// queue is empty.
    fn pull(&mut self, out: &mut [u8]) -> Result<usize, DriverError>;

    /// Destination-format bytes pullable right now, without further pushes.
    fn available(&self) -> Result<usize, DriverError>;

    /// Signal that no more input will arrive; any residual resampled tail
    /// must still be emitted by subsequent `pull`s.
    fn flush(&mut self) -> Result<(), DriverError>;
}
