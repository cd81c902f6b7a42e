//! Streaming Symphonia decoder.
//!
//! [`StreamingDecoder`] turns a compressed audio file into an incremental
//! stream of interleaved S16 PCM at the file's native channel count and
//! sample rate. It isolates codec-level concerns:
//! - container probing and audio track selection
//! - packet iteration with a streaming-friendly error model (corrupt frames
//!   are skipped, IO errors are end-of-stream)
//! - rewinding for loop playback
//!
//! Voices pull from this in chunks and feed the bytes to their converter;
//! nothing here knows about the mix format.

use std::collections::VecDeque;
use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use crate::format::{AudioFormat, SampleFormat};

/// Incremental decoder for one audio file.
///
/// Close is drop: releasing the value releases the file and codec state.
pub struct StreamingDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    source_format: AudioFormat,

    // Scratch buffer reused across packets for the PCM copy-out.
    sample_buf: Option<SampleBuffer<i16>>,

    // Decoded bytes exceeding the caller's last chunk, served first.
    carry: VecDeque<u8>,

    eof: bool,
}

impl StreamingDecoder {
    /// Open `path`, probe its container, and prepare the first decodable
    /// audio track for streaming.
    ///
    /// Track selection policy: the first track with a real codec, a known
    /// sample rate, and a known channel layout.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open audio file {}", path.display()))?;

        let mss_opts = MediaSourceStreamOptions {
            // Symphonia expects a power-of-two buffer > 32KiB for good
            // probing behavior.
            buffer_len: 256 * 1024,
        };
        let mss = MediaSourceStream::new(Box::new(file), mss_opts);

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let format_opts: FormatOptions = Default::default();
        let metadata_opts: MetadataOptions = Default::default();

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &metadata_opts)
            .map_err(|e| anyhow!(e))
            .context("failed to probe media stream")?;

        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| {
                t.codec_params.codec != CODEC_TYPE_NULL
                    && t.codec_params.sample_rate.is_some()
                    && t.codec_params.channels.is_some()
            })
            .cloned()
            .ok_or_else(|| anyhow!("no decodable audio track found"))?;

        let decoder_opts: DecoderOptions = Default::default();
        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &decoder_opts)
            .map_err(|e| anyhow!(e))
            .context("failed to create decoder for audio track")?;

        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| anyhow!("audio track is missing a sample rate"))?;
        let channels = track
            .codec_params
            .channels
            .ok_or_else(|| anyhow!("audio track is missing a channel layout"))?
            .count();

        Ok(Self {
            format,
            decoder,
            track_id: track.id,
            source_format: AudioFormat::new(SampleFormat::S16, channels as u16, sample_rate),
            sample_buf: None,
            carry: VecDeque::new(),
            eof: false,
        })
    }

    /// The PCM format `read_chunk` produces: S16 at the file's native
    /// channel count and sample rate.
    pub fn source_format(&self) -> AudioFormat {
        self.source_format
    }

    /// Decode the next chunk of PCM into `buf`.
    ///
    /// Returns `Ok(n > 0)` for n bytes written, `Ok(0)` at end-of-stream,
    /// and `Err` for a fatal decoder failure. A partial final frame is
    /// returned as-is; the converter tolerates arbitrary byte boundaries.
    pub fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            if !self.carry.is_empty() {
                let n = buf.len().min(self.carry.len());
                for (slot, byte) in buf.iter_mut().zip(self.carry.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }

            if self.eof {
                return Ok(0);
            }

            let packet = match self.format.next_packet() {
                Ok(p) => p,
                // Treat IO errors as graceful end-of-stream.
                Err(SymphoniaError::IoError(_)) => {
                    self.eof = true;
                    continue;
                }
                Err(e) => return Err(anyhow!(e)).context("failed reading packet"),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    if self.sample_buf.is_none() {
                        let spec = *decoded.spec();
                        let duration = decoded.capacity() as u64;
                        self.sample_buf = Some(SampleBuffer::<i16>::new(duration, spec));
                    }
                    let sbuf = self
                        .sample_buf
                        .as_mut()
                        .ok_or_else(|| anyhow!("sample buffer not initialized"))?;
                    sbuf.copy_interleaved_ref(decoded);
                    for sample in sbuf.samples() {
                        self.carry.extend(sample.to_le_bytes());
                    }
                }
                // Recoverable: corrupted frame, but decoding can continue.
                Err(SymphoniaError::DecodeError(_)) => continue,
                Err(SymphoniaError::IoError(_)) => {
                    self.eof = true;
                }
                Err(e) => return Err(anyhow!(e)).context("decoder failure"),
            }
        }
    }

    /// Rewind to the beginning of the stream, used only for loop playback.
    ///
    /// Carried bytes decoded before the rewind are kept; they are content
    /// from just before the loop point and still belong in the output.
    pub fn seek_to_start(&mut self) -> Result<()> {
        self.format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time: Time::new(0, 0.0),
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| anyhow!(e))
            .context("failed to seek to start of stream")?;
        self.decoder.reset();
        self.eof = false;
        Ok(())
    }
}
