//! Instrumented in-process driver.
//!
//! [`MockDriver`] stands in for a platform backend in tests and headless
//! hosts. The device queue is a byte counter plus a full push transcript,
//! so tests can assert back-pressure behavior and inspect the exact bytes
//! the mixer produced. Every subsystem init/shutdown and handle
//! create/destroy is counted, which is how the resource-balance laws are
//! verified.
//!
//! Converters handed out by this driver are real [`FormatConverter`]s
//! wrapped with destroy counting, so end-to-end tests exercise the actual
//! conversion path.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::converter::FormatConverter;
use crate::driver::{AudioDriver, ConverterStream, DeviceStream, DriverError, OpenedDevice};
use crate::format::AudioFormat;

/// Lifecycle counters captured by [`DriverStats::counts`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DriverCounts {
    pub subsystem_inits: usize,
    pub subsystem_shutdowns: usize,
    pub devices_opened: usize,
    pub devices_destroyed: usize,
    pub converters_created: usize,
    pub converters_destroyed: usize,
}

/// Shared handle onto a [`MockDriver`]'s lifecycle counters.
///
/// Stays valid after the driver has been moved into the service.
#[derive(Default, Clone)]
pub struct DriverStats(Arc<Mutex<DriverCounts>>);

impl DriverStats {
    pub fn counts(&self) -> DriverCounts {
        *self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, DriverCounts> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Default)]
struct QueueState {
    queued: usize,
    pushed: Vec<u8>,
    push_count: usize,
    fail_push: bool,
    fail_query: bool,
}

/// Shared handle onto the mock device's playback queue.
///
/// Tests drain it to simulate the device consuming audio, and read the push
/// transcript to check what the mixer emitted.
#[derive(Default, Clone)]
pub struct MockDeviceQueue(Arc<Mutex<QueueState>>);

impl MockDeviceQueue {
    /// Bytes currently queued and not yet "played".
    pub fn queued(&self) -> usize {
        self.lock().queued
    }

    /// Simulate the device consuming up to `bytes` queued bytes.
    pub fn drain(&self, bytes: usize) {
        let mut state = self.lock();
        state.queued = state.queued.saturating_sub(bytes);
    }

    pub fn drain_all(&self) {
        self.lock().queued = 0;
    }

    /// Every byte ever pushed, in push order.
    pub fn pushed_bytes(&self) -> Vec<u8> {
        self.lock().pushed.clone()
    }

    pub fn push_count(&self) -> usize {
        self.lock().push_count
    }

    /// Make subsequent pushes fail until cleared.
    pub fn set_fail_push(&self, fail: bool) {
        self.lock().fail_push = fail;
    }

    /// Make subsequent queue-depth queries fail until cleared.
    pub fn set_fail_query(&self, fail: bool) {
        self.lock().fail_query = fail;
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-process [`AudioDriver`] with lifecycle instrumentation and fault
/// injection.
pub struct MockDriver {
    stats: DriverStats,
    queue: MockDeviceQueue,
    actual_format: Option<AudioFormat>,
    fail_init: bool,
    fail_open: bool,
    fail_resume: bool,
    fail_converter: bool,
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            stats: DriverStats::default(),
            queue: MockDeviceQueue::default(),
            actual_format: None,
            fail_init: false,
            fail_open: false,
            fail_resume: false,
            fail_converter: false,
        }
    }

    /// Counter handle; keep a clone before handing the driver to a service.
    pub fn stats(&self) -> DriverStats {
        self.stats.clone()
    }

    /// Device-queue handle; keep a clone before handing the driver to a
    /// service.
    pub fn queue(&self) -> MockDeviceQueue {
        self.queue.clone()
    }

    /// Report `format` as the negotiated device format instead of echoing
    /// the desired one.
    pub fn negotiate_format(mut self, format: AudioFormat) -> Self {
        self.actual_format = Some(format);
        self
    }

    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn failing_resume(mut self) -> Self {
        self.fail_resume = true;
        self
    }

    pub fn failing_converter(mut self) -> Self {
        self.fail_converter = true;
        self
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDriver for MockDriver {
    fn init_subsystem(&mut self) -> Result<(), DriverError> {
        if self.fail_init {
            return Err(DriverError::new("mock subsystem init failure"));
        }
        self.stats.lock().subsystem_inits += 1;
        Ok(())
    }

    fn shutdown_subsystem(&mut self) {
        self.stats.lock().subsystem_shutdowns += 1;
    }

    fn open_device_stream(&mut self, desired: AudioFormat) -> Result<OpenedDevice, DriverError> {
        if self.fail_open {
            return Err(DriverError::new("mock device open failure"));
        }
        self.stats.lock().devices_opened += 1;
        Ok(OpenedDevice {
            stream: Box::new(MockDeviceStream {
                queue: self.queue.clone(),
                stats: self.stats.clone(),
                fail_resume: self.fail_resume,
            }),
            format: self.actual_format.unwrap_or(desired),
        })
    }

    fn create_converter(
        &mut self,
        src: AudioFormat,
        dst: AudioFormat,
    ) -> Result<Box<dyn ConverterStream>, DriverError> {
        if self.fail_converter {
            return Err(DriverError::new("mock converter creation failure"));
        }
        let inner = FormatConverter::new(src, dst)?;
        self.stats.lock().converters_created += 1;
        Ok(Box::new(CountingConverter {
            inner,
            stats: self.stats.clone(),
        }))
    }
}

struct MockDeviceStream {
    queue: MockDeviceQueue,
    stats: DriverStats,
    fail_resume: bool,
}

impl DeviceStream for MockDeviceStream {
    fn resume(&mut self) -> Result<(), DriverError> {
        if self.fail_resume {
            return Err(DriverError::new("mock device resume failure"));
        }
        Ok(())
    }

    fn pause(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    fn push_bytes(&mut self, bytes: &[u8]) -> Result<(), DriverError> {
        let mut state = self.queue.lock();
        if state.fail_push {
            return Err(DriverError::new("mock device push failure"));
        }
        state.queued += bytes.len();
        state.pushed.extend_from_slice(bytes);
        state.push_count += 1;
        Ok(())
    }

    fn queued_bytes(&self) -> Result<usize, DriverError> {
        let state = self.queue.lock();
        if state.fail_query {
            return Err(DriverError::new("mock device queue query failure"));
        }
        Ok(state.queued)
    }
}

impl Drop for MockDeviceStream {
    fn drop(&mut self) {
        self.stats.lock().devices_destroyed += 1;
    }
}

struct CountingConverter {
    inner: FormatConverter,
    stats: DriverStats,
}

impl ConverterStream for CountingConverter {
    fn push(&mut self, bytes: &[u8]) -> Result<(), DriverError> {
        self.inner.push(bytes)
    }

    fn pull(&mut self, out: &mut [u8]) -> Result<usize, DriverError> {
        self.inner.pull(out)
    }

    fn available(&self) -> Result<usize, DriverError> {
        self.inner.available()
    }

    fn flush(&mut self) -> Result<(), DriverError> {
        self.inner.flush()
    }
}

impl Drop for CountingConverter {
    fn drop(&mut self) {
        self.stats.lock().converters_destroyed += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::SampleFormat;

    #[test]
    fn handle_drops_are_counted_exactly_once() {
        let mut driver = MockDriver::new();
        let stats = driver.stats();

        let opened = driver
            .open_device_stream(AudioFormat::mix_default())
            .unwrap();
        let conv = driver
            .create_converter(
                AudioFormat::new(SampleFormat::S16, 1, 22_050),
                AudioFormat::mix_default(),
            )
            .unwrap();

        drop(opened);
        drop(conv);

        let counts = stats.counts();
        assert_eq!(counts.devices_opened, 1);
        assert_eq!(counts.devices_destroyed, 1);
        assert_eq!(counts.converters_created, 1);
        assert_eq!(counts.converters_destroyed, 1);
    }

    #[test]
    fn queue_records_pushes_and_drains() {
        let mut driver = MockDriver::new();
        let queue = driver.queue();
        let mut opened = driver
            .open_device_stream(AudioFormat::mix_default())
            .unwrap();

        opened.stream.push_bytes(&[1, 2, 3, 4]).unwrap();
        assert_eq!(queue.queued(), 4);
        assert_eq!(opened.stream.queued_bytes().unwrap(), 4);

        queue.drain(3);
        assert_eq!(queue.queued(), 1);
        assert_eq!(queue.pushed_bytes(), vec![1, 2, 3, 4]);
        assert_eq!(queue.push_count(), 1);
    }

    #[test]
    fn injected_faults_surface_as_driver_errors() {
        let mut driver = MockDriver::new().failing_open();
        assert!(driver.open_device_stream(AudioFormat::mix_default()).is_err());

        let mut driver = MockDriver::new();
        let queue = driver.queue();
        let mut opened = driver
            .open_device_stream(AudioFormat::mix_default())
            .unwrap();
        queue.set_fail_push(true);
        assert!(opened.stream.push_bytes(&[0, 0]).is_err());
        queue.set_fail_query(true);
        assert!(opened.stream.queued_bytes().is_err());
    }
}
