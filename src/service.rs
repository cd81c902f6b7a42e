//! The audio service façade.
//!
//! [`AudioService`] is the public control surface: initialize/shutdown,
//! play/stop, volume, and the per-frame [`AudioService::tick`] that pulls
//! voices, mixes, and feeds the device queue.
//!
//! Concurrency contract: every piece of mutable state (driver, device
//! handle, mix format, volume, voice table, scratch buffers, initialized
//! flag) sits behind one mutex. There is no internal thread; the mixer
//! advances only when the host calls `tick`, typically from its main loop,
//! while control calls may arrive from any thread.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{error, info, trace, warn};

use crate::decoder::StreamingDecoder;
use crate::driver::{AudioDriver, DeviceStream, DriverError};
use crate::error::{Error, Result};
use crate::format::{AudioFormat, SampleFormat};
use crate::mixer::{self, MIX_FRAMES, MixBuffers};
use crate::voice::Voice;
use crate::voice_table::VoiceTable;

/// Real-time audio mixing service.
///
/// Construct with a driver, `initialize`, then drive `tick` from the host
/// loop while any thread issues control calls:
///
/// ```no_run
/// use mixdown::drivers::mock::MockDriver;
/// use mixdown::AudioService;
///
/// let service = AudioService::new(MockDriver::new());
/// service.initialize()?;
/// service.play_background(std::path::Path::new("music.ogg"), true)?;
/// loop {
///     service.tick();
///     # break;
/// }
/// # Ok::<(), mixdown::Error>(())
/// ```
pub struct AudioService {
    inner: Mutex<Inner>,
}

struct Inner {
    driver: Box<dyn AudioDriver>,
    initialized: bool,
    device: Option<Box<dyn DeviceStream>>,
    mix_format: AudioFormat,
    volume: f32,
    voices: VoiceTable,
    buffers: MixBuffers,
}

impl AudioService {
    /// Create an uninitialized service over `driver`. No device stream is
    /// opened and no subsystem state is touched until `initialize`.
    pub fn new(driver: impl AudioDriver + 'static) -> Self {
        Self {
            inner: Mutex::new(Inner {
                driver: Box::new(driver),
                initialized: false,
                device: None,
                mix_format: AudioFormat::mix_default(),
                volume: 1.0,
                voices: VoiceTable::default(),
                buffers: MixBuffers::default(),
            }),
        }
    }

    /// Create a service over the platform's default output device.
    #[cfg(feature = "device-cpal")]
    pub fn with_default_device() -> Self {
        Self::new(crate::drivers::cpal::CpalDriver::new())
    }

    /// Bring up the audio subsystem and open the output device stream.
    ///
    /// Idempotent once initialized. On failure, partial bring-up is undone
    /// before returning: a failed device open or resume tears the
    /// subsystem back down.
    pub fn initialize(&self) -> Result<()> {
        trace!("initialize");
        let mut inner = self.lock();
        if inner.initialized {
            return Ok(());
        }

        inner.driver.init_subsystem().map_err(Error::SubsystemInit)?;

        let opened = match inner.driver.open_device_stream(AudioFormat::mix_default()) {
            Ok(opened) => opened,
            Err(e) => {
                inner.driver.shutdown_subsystem();
                return Err(Error::OpenDevice(e));
            }
        };

        // The mixing core sums S16 samples; a driver negotiating another
        // sample encoding cannot be mixed into.
        if opened.format.sample_format != SampleFormat::S16 {
            inner.driver.shutdown_subsystem();
            return Err(Error::OpenDevice(DriverError::new(format!(
                "device negotiated unsupported sample format {:?}",
                opened.format.sample_format
            ))));
        }

        let mut stream = opened.stream;
        if let Err(e) = stream.resume() {
            drop(stream);
            inner.driver.shutdown_subsystem();
            return Err(Error::ResumeDevice(e));
        }

        inner.mix_format = opened.format;
        inner.device = Some(stream);
        inner.initialized = true;
        info!(mix_format = ?inner.mix_format, "audio service initialized");
        Ok(())
    }

    /// Stop playback, destroy every voice and the device stream, and
    /// release the audio subsystem. Idempotent, never fails.
    pub fn shutdown(&self) {
        trace!("shutdown");
        let mut inner = self.lock();
        if !inner.initialized {
            return;
        }

        if let Some(mut device) = inner.device.take() {
            if let Err(e) = device.pause() {
                warn!(error = %e, "failed to pause device stream during shutdown");
            }
        }

        inner.voices.clear_all();
        inner.buffers.release();
        inner.driver.shutdown_subsystem();
        inner.initialized = false;
        info!("audio service shut down");
    }

    /// Start a background track, replacing the current one if any.
    ///
    /// The current background stops before the replacement loads, so a
    /// failed load leaves no background installed.
    pub fn play_background(&self, path: &Path, looping: bool) -> Result<()> {
        trace!(path = %path.display(), looping, "play_background");
        let mut inner = self.lock();
        if !inner.initialized {
            return Err(Error::NotInitialized);
        }

        inner.voices.clear_background();
        let voice = inner.load_voice(path, looping)?;
        inner.voices.replace_background(voice);

        info!(path = %path.display(), looping, "playing background audio");
        Ok(())
    }

    /// Start a sound effect. Effects play simultaneously and persist until
    /// they drain naturally or `stop_all` clears them.
    pub fn play_effect(&self, path: &Path, looping: bool) -> Result<()> {
        trace!(path = %path.display(), looping, "play_effect");
        let mut inner = self.lock();
        if !inner.initialized {
            return Err(Error::NotInitialized);
        }

        let voice = inner.load_voice(path, looping)?;
        inner.voices.append_effect(voice);

        info!(path = %path.display(), looping, "playing effect audio");
        Ok(())
    }

    /// Stop the background track. No-op when nothing plays or the service
    /// is uninitialized.
    pub fn stop_background(&self) {
        trace!("stop_background");
        let mut inner = self.lock();
        if !inner.initialized {
            return;
        }
        inner.voices.clear_background();
        info!("stopped background audio");
    }

    /// Stop every voice, background and effects alike.
    pub fn stop_all(&self) {
        trace!("stop_all");
        let mut inner = self.lock();
        if !inner.initialized {
            return;
        }
        inner.voices.clear_all();
        info!("stopped all audio");
    }

    /// Set master volume, clamped to `[0.0, 1.0]`.
    pub fn set_volume(&self, volume: f32) {
        trace!(volume, "set_volume");
        let mut inner = self.lock();
        inner.volume = volume.clamp(0.0, 1.0);
    }

    /// Current master volume, always within `[0.0, 1.0]`.
    pub fn volume(&self) -> f32 {
        self.lock().volume
    }

    /// True while a background voice exists and has not finished.
    pub fn is_background_playing(&self) -> bool {
        self.lock().voices.background().is_some_and(Voice::is_playing)
    }

    /// Advance the mixer by one tick: pull up to [`MIX_FRAMES`] frames from
    /// every active voice, sum, apply volume with saturation, and queue the
    /// result on the device.
    ///
    /// Skips work when the device queue already holds a full tick's worth
    /// of audio, and queues nothing when no voice contributes (the device
    /// underruns to silence on its own). Never fails: data-plane errors
    /// are logged and confined.
    pub fn tick(&self) {
        trace!("tick");
        let mut guard = self.lock();
        let inner = &mut *guard;

        if !inner.initialized {
            return;
        }
        let Some(device) = inner.device.as_mut() else {
            return;
        };
        if inner.voices.is_empty() {
            return;
        }

        let bytes_per_frame = inner.mix_format.bytes_per_frame();
        if bytes_per_frame == 0 {
            return;
        }

        let queued = match device.queued_bytes() {
            Ok(n) => n,
            Err(e) => {
                error!(error = %e, "failed to query device queue");
                return;
            }
        };
        let queue_limit = bytes_per_frame * MIX_FRAMES;
        if queued >= queue_limit {
            // Back-pressure: the device still has a full tick queued.
            return;
        }

        let channels = usize::from(inner.mix_format.channels);
        let sample_count = MIX_FRAMES * channels;
        let bytes_needed = MIX_FRAMES * bytes_per_frame;
        inner.buffers.prepare(sample_count);

        let mut any_audio = false;

        if let Some(voice) = inner.voices.background_mut() {
            let pulled = voice.read_frames(
                &mut inner.buffers.temp[..bytes_needed],
                MIX_FRAMES,
                bytes_per_frame,
            );
            if pulled > 0 {
                mixer::accumulate_s16(&mut inner.buffers.accum, &inner.buffers.temp[..pulled]);
                any_audio = true;
            }
        }

        for voice in inner.voices.effects_mut() {
            let pulled = voice.read_frames(
                &mut inner.buffers.temp[..bytes_needed],
                MIX_FRAMES,
                bytes_per_frame,
            );
            if pulled > 0 {
                mixer::accumulate_s16(&mut inner.buffers.accum, &inner.buffers.temp[..pulled]);
                any_audio = true;
            }
        }

        inner.voices.sweep();

        if !any_audio {
            return;
        }

        mixer::apply_volume_and_saturate(&inner.buffers.accum, inner.volume, &mut inner.buffers.output);
        if let Err(e) = device.push_bytes(&inner.buffers.output) {
            error!(error = %e, "failed to queue mixed audio");
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Inner {
    fn load_voice(&mut self, path: &Path, looping: bool) -> Result<Voice> {
        let decoder = StreamingDecoder::open(path).map_err(|e| Error::load(path, e))?;
        let converter = self
            .driver
            .create_converter(decoder.source_format(), self.mix_format)
            .map_err(|e| Error::load(path, anyhow::Error::new(e)))?;
        Ok(Voice::new(decoder, converter, looping))
    }
}

impl Drop for AudioService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::mock::MockDriver;

    #[test]
    fn volume_is_clamped_on_every_write() {
        let service = AudioService::new(MockDriver::new());
        service.set_volume(-1.0);
        assert_eq!(service.volume(), 0.0);
        service.set_volume(2.0);
        assert_eq!(service.volume(), 1.0);
        service.set_volume(0.25);
        assert_eq!(service.volume(), 0.25);
    }

    #[test]
    fn play_requires_initialization() {
        let service = AudioService::new(MockDriver::new());
        let err = service
            .play_effect(Path::new("anything.wav"), false)
            .unwrap_err();
        assert!(matches!(err, Error::NotInitialized));
    }

    #[test]
    fn stop_and_tick_are_noops_when_uninitialized() {
        let service = AudioService::new(MockDriver::new());
        service.stop_background();
        service.stop_all();
        service.tick();
        assert!(!service.is_background_playing());
    }

    #[test]
    fn failed_subsystem_init_surfaces_and_leaves_service_uninitialized() {
        let driver = MockDriver::new().failing_init();
        let stats = driver.stats();
        let service = AudioService::new(driver);

        let err = service.initialize().unwrap_err();
        assert!(matches!(err, Error::SubsystemInit(_)));
        assert_eq!(stats.counts().subsystem_shutdowns, 0);
        assert!(matches!(
            service.play_effect(Path::new("x.wav"), false),
            Err(Error::NotInitialized)
        ));
    }

    #[test]
    fn failed_device_open_unwinds_the_subsystem() {
        let driver = MockDriver::new().failing_open();
        let stats = driver.stats();
        let service = AudioService::new(driver);

        let err = service.initialize().unwrap_err();
        assert!(matches!(err, Error::OpenDevice(_)));

        let counts = stats.counts();
        assert_eq!(counts.subsystem_inits, 1);
        assert_eq!(counts.subsystem_shutdowns, 1);
        assert_eq!(counts.devices_opened, 0);
    }

    #[test]
    fn failed_resume_destroys_the_device_and_unwinds() {
        let driver = MockDriver::new().failing_resume();
        let stats = driver.stats();
        let service = AudioService::new(driver);

        let err = service.initialize().unwrap_err();
        assert!(matches!(err, Error::ResumeDevice(_)));

        let counts = stats.counts();
        assert_eq!(counts.devices_opened, 1);
        assert_eq!(counts.devices_destroyed, 1);
        assert_eq!(counts.subsystem_shutdowns, 1);
    }

    #[test]
    fn dropping_an_initialized_service_shuts_it_down() {
        let driver = MockDriver::new();
        let stats = driver.stats();
        {
            let service = AudioService::new(driver);
            service.initialize().unwrap();
        }
        let counts = stats.counts();
        assert_eq!(counts.subsystem_shutdowns, 1);
        assert_eq!(counts.devices_destroyed, 1);
    }
}
