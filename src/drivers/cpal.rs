//! cpal device backend.
//!
//! Plays through the platform's default output device (ALSA, CoreAudio,
//! WASAPI, ...). The mixer pushes mix-format S16 bytes into an SPSC ring
//! buffer; the real-time output callback drains it into the device's f32
//! buffer, filling silence on underrun. Queue depth is ring occupancy,
//! which is what gives the service its back-pressure signal.
//!
//! cpal streams are not `Send`, so each opened device runs a small worker
//! thread that owns the stream and services pause/resume commands.

use std::sync::mpsc;
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{error, info};

use crate::converter::FormatConverter;
use crate::driver::{AudioDriver, ConverterStream, DeviceStream, DriverError, OpenedDevice};
use crate::format::{AudioFormat, SampleFormat};
use crate::mixer::MIX_FRAMES;

// Ring capacity in ticks of audio; must comfortably exceed the mixer's
// one-tick back-pressure window.
const RING_TICKS: usize = 8;

/// [`AudioDriver`] over the platform's default cpal host.
pub struct CpalDriver;

impl CpalDriver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CpalDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDriver for CpalDriver {
    fn init_subsystem(&mut self) -> Result<(), DriverError> {
        // cpal hosts need no explicit bring-up; the connection is made when
        // the device stream opens.
        info!(host = cpal::default_host().id().name(), "cpal driver ready");
        Ok(())
    }

    fn shutdown_subsystem(&mut self) {}

    fn open_device_stream(&mut self, desired: AudioFormat) -> Result<OpenedDevice, DriverError> {
        // The mix pipeline is S16; this backend always negotiates S16 and
        // honors the desired channel count and rate.
        let format = AudioFormat::new(SampleFormat::S16, desired.channels, desired.sample_rate);
        if format.bytes_per_frame() == 0 {
            return Err(DriverError::new("cannot open a zero-channel device stream"));
        }

        let stream = CpalDeviceStream::open(format)?;
        Ok(OpenedDevice {
            stream: Box::new(stream),
            format,
        })
    }

    fn create_converter(
        &mut self,
        src: AudioFormat,
        dst: AudioFormat,
    ) -> Result<Box<dyn ConverterStream>, DriverError> {
        Ok(Box::new(FormatConverter::new(src, dst)?))
    }
}

enum DeviceCommand {
    Pause(mpsc::Sender<Result<(), DriverError>>),
    Resume(mpsc::Sender<Result<(), DriverError>>),
    Close,
}

struct CpalDeviceStream {
    producer: rtrb::Producer<i16>,
    capacity_samples: usize,
    commands: mpsc::Sender<DeviceCommand>,
    worker: Option<thread::JoinHandle<()>>,
}

impl CpalDeviceStream {
    fn open(format: AudioFormat) -> Result<Self, DriverError> {
        let capacity_samples = MIX_FRAMES * usize::from(format.channels) * RING_TICKS;
        let (producer, consumer) = rtrb::RingBuffer::new(capacity_samples);

        let (commands, command_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();

        let worker = thread::Builder::new()
            .name("mixdown-device".into())
            .spawn(move || run_device_worker(consumer, format, command_rx, ready_tx))
            .map_err(|e| DriverError::new(format!("failed to spawn device worker: {e}")))?;

        let stream = Self {
            producer,
            capacity_samples,
            commands,
            worker: Some(worker),
        };

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(stream),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(DriverError::new("device worker exited before reporting readiness")),
        }
    }

    fn send_command(
        &self,
        make: impl FnOnce(mpsc::Sender<Result<(), DriverError>>) -> DeviceCommand,
    ) -> Result<(), DriverError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.commands
            .send(make(reply_tx))
            .map_err(|_| DriverError::new("device worker is gone"))?;
        reply_rx
            .recv()
            .map_err(|_| DriverError::new("device worker dropped the reply"))?
    }
}

impl DeviceStream for CpalDeviceStream {
    fn resume(&mut self) -> Result<(), DriverError> {
        self.send_command(DeviceCommand::Resume)
    }

    fn pause(&mut self) -> Result<(), DriverError> {
        self.send_command(DeviceCommand::Pause)
    }

    fn push_bytes(&mut self, bytes: &[u8]) -> Result<(), DriverError> {
        for pair in bytes.chunks_exact(2) {
            let sample = i16::from_le_bytes([pair[0], pair[1]]);
            if self.producer.push(sample).is_err() {
                return Err(DriverError::new("device queue overrun"));
            }
        }
        Ok(())
    }

    fn queued_bytes(&self) -> Result<usize, DriverError> {
        let queued_samples = self.capacity_samples - self.producer.slots();
        Ok(queued_samples * 2)
    }
}

impl Drop for CpalDeviceStream {
    fn drop(&mut self) {
        let _ = self.commands.send(DeviceCommand::Close);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_device_worker(
    mut consumer: rtrb::Consumer<i16>,
    format: AudioFormat,
    commands: mpsc::Receiver<DeviceCommand>,
    ready_tx: mpsc::Sender<Result<(), DriverError>>,
) {
    let host = cpal::default_host();
    let Some(device) = host.default_output_device() else {
        let _ = ready_tx.send(Err(DriverError::new("no default output device available")));
        return;
    };

    let config = cpal::StreamConfig {
        channels: format.channels,
        sample_rate: format.sample_rate,
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = match device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            for slot in data.iter_mut() {
                *slot = match consumer.pop() {
                    Ok(sample) => f32::from(sample) / 32_768.0,
                    Err(_) => 0.0,
                };
            }
        },
        |err| error!(error = %err, "output stream error"),
        None,
    ) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(DriverError::new(format!(
                "failed to build output stream: {e}"
            ))));
            return;
        }
    };

    // Open suspended; the service resumes explicitly.
    if let Err(e) = stream.pause() {
        error!(error = %e, "failed to suspend freshly opened stream");
    }

    let _ = ready_tx.send(Ok(()));
    info!(
        channels = format.channels,
        sample_rate = format.sample_rate,
        "output device stream opened"
    );

    while let Ok(command) = commands.recv() {
        match command {
            DeviceCommand::Resume(reply) => {
                let _ = reply.send(
                    stream
                        .play()
                        .map_err(|e| DriverError::new(format!("failed to resume stream: {e}"))),
                );
            }
            DeviceCommand::Pause(reply) => {
                let _ = reply.send(
                    stream
                        .pause()
                        .map_err(|e| DriverError::new(format!("failed to pause stream: {e}"))),
                );
            }
            DeviceCommand::Close => break,
        }
    }
}
