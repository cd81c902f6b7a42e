//! Format conversion FIFO.
//!
//! [`FormatConverter`] bridges a voice's source PCM to the session mix
//! format. It is a push/pull queue with three stages:
//! - decode whole source frames into `f32` (sub-frame remainders are carried
//!   until the next push)
//! - remix to the destination channel count
//! - resample when the rates differ, then encode destination bytes into an
//!   internal FIFO
//!
//! The resampler is created lazily, only when the source and destination
//! rates actually differ. `flush()` pads the accumulated input out to a
//! whole resampler block so the tail is emitted; this residual is why
//! callers detect drain via `available() == 0` instead of input EOF.

use std::collections::VecDeque;

use rubato::{Resampler, SincFixedIn, WindowFunction};

use crate::driver::{ConverterStream, DriverError};
use crate::format::{AudioFormat, SampleFormat};

// Source frames fed to rubato per process() call.
const RESAMPLE_BLOCK_FRAMES: usize = 1024;

/// A stateful source-format to mix-format bridge.
pub struct FormatConverter {
    src: AudioFormat,
    dst: AudioFormat,

    // Carried bytes that do not yet form a whole source frame.
    pending_in: Vec<u8>,

    // Planar accumulator (destination channel count) feeding full blocks
    // into rubato.
    chan_acc: Vec<Vec<f32>>,

    // Lazily initialized; None while the source rate equals the
    // destination rate.
    resampler: Option<SincFixedIn<f32>>,

    // Destination-format bytes ready to pull.
    out: VecDeque<u8>,
}

impl FormatConverter {
    /// Create a converter from `src` to `dst`.
    ///
    /// Fails if either format has zero-byte frames; a converter cannot
    /// meaningfully frame such a stream.
    pub fn new(src: AudioFormat, dst: AudioFormat) -> Result<Self, DriverError> {
        if src.bytes_per_frame() == 0 || dst.bytes_per_frame() == 0 {
            return Err(DriverError::new(format!(
                "cannot convert between zero-byte-frame formats ({src:?} -> {dst:?})"
            )));
        }

        Ok(Self {
            src,
            dst,
            pending_in: Vec::new(),
            chan_acc: vec![Vec::new(); usize::from(dst.channels)],
            resampler: None,
            out: VecDeque::new(),
        })
    }

    fn ensure_resampler(&mut self) -> Result<(), DriverError> {
        if self.resampler.is_some() {
            return Ok(());
        }

        let rs = SincFixedIn::<f32>::new(
            f64::from(self.dst.sample_rate) / f64::from(self.src.sample_rate),
            2.0,
            rubato::SincInterpolationParameters {
                sinc_len: 256,
                f_cutoff: 0.95,
                interpolation: rubato::SincInterpolationType::Linear,
                oversampling_factor: 256,
                window: WindowFunction::BlackmanHarris2,
            },
            RESAMPLE_BLOCK_FRAMES,
            usize::from(self.dst.channels),
        )
        .map_err(|e| DriverError::new(format!("failed to init resampler: {e}")))?;

        self.resampler = Some(rs);
        Ok(())
    }

    /// Decode whole source frames from `pending_in` into interleaved `f32`.
    fn take_decoded_frames(&mut self) -> Vec<f32> {
        let bpf = self.src.bytes_per_frame();
        let frames = self.pending_in.len() / bpf;
        if frames == 0 {
            return Vec::new();
        }

        let raw: Vec<u8> = self.pending_in.drain(..frames * bpf).collect();
        match self.src.sample_format {
            SampleFormat::S16 => raw
                .chunks_exact(2)
                .map(|b| f32::from(i16::from_le_bytes([b[0], b[1]])) / 32_768.0)
                .collect(),
            SampleFormat::F32 => raw
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
        }
    }

    /// Remix interleaved source-channel samples into the planar accumulator
    /// at the destination channel count.
    ///
    /// Policy: identity when equal; equal-weight average down to mono; mono
    /// replicated to every destination channel; otherwise the first
    /// `min(src, dst)` channels are copied and extra destination channels
    /// stay silent.
    fn remix_into_acc(&mut self, interleaved: &[f32]) {
        let src_ch = usize::from(self.src.channels);
        let dst_ch = usize::from(self.dst.channels);
        let frames = interleaved.len() / src_ch;

        for f in 0..frames {
            let frame = &interleaved[f * src_ch..(f + 1) * src_ch];
            if dst_ch == 1 {
                let sum: f32 = frame.iter().sum();
                self.chan_acc[0].push(sum / src_ch as f32);
            } else if src_ch == 1 {
                for chan in &mut self.chan_acc {
                    chan.push(frame[0]);
                }
            } else {
                for (c, chan) in self.chan_acc.iter_mut().enumerate() {
                    chan.push(if c < src_ch { frame[c] } else { 0.0 });
                }
            }
        }
    }

    /// Encode `frames` leading frames of the planar accumulator into the
    /// output FIFO and drop them from the accumulator.
    fn encode_acc_frames(&mut self, frames: usize) {
        for f in 0..frames {
            for chan in &self.chan_acc {
                encode_sample(chan[f], self.dst.sample_format, &mut self.out);
            }
        }
        for chan in &mut self.chan_acc {
            chan.drain(..frames);
        }
    }

    /// Run full accumulator blocks through the resampler, encoding each
    /// output block into the FIFO.
    fn drain_resampler_blocks(&mut self) -> Result<(), DriverError> {
        loop {
            let rs = match self.resampler.as_mut() {
                Some(rs) => rs,
                None => return Ok(()),
            };
            let in_max = rs.input_frames_max();
            if self.chan_acc[0].len() < in_max {
                return Ok(());
            }

            let input: Vec<Vec<f32>> = self
                .chan_acc
                .iter_mut()
                .map(|chan| chan.drain(..in_max).collect())
                .collect();

            let output = rs
                .process(&input, None)
                .map_err(|e| DriverError::new(format!("resampler process failed: {e}")))?;

            let out_frames = output.first().map_or(0, Vec::len);
            for f in 0..out_frames {
                for chan in &output {
                    encode_sample(chan[f], self.dst.sample_format, &mut self.out);
                }
            }
        }
    }
}

impl ConverterStream for FormatConverter {
    fn push(&mut self, bytes: &[u8]) -> Result<(), DriverError> {
        // Identity fast path: same format on both sides streams bytes
        // through untouched, bit-exact.
        if self.src == self.dst {
            self.out.extend(bytes);
            return Ok(());
        }

        self.pending_in.extend_from_slice(bytes);
        let interleaved = self.take_decoded_frames();
        if interleaved.is_empty() {
            return Ok(());
        }

        self.remix_into_acc(&interleaved);

        if self.src.sample_rate == self.dst.sample_rate {
            let frames = self.chan_acc[0].len();
            self.encode_acc_frames(frames);
            return Ok(());
        }

        self.ensure_resampler()?;
        self.drain_resampler_blocks()
    }

    fn pull(&mut self, out: &mut [u8]) -> Result<usize, DriverError> {
        let n = out.len().min(self.out.len());
        for (slot, byte) in out.iter_mut().zip(self.out.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn available(&self) -> Result<usize, DriverError> {
        Ok(self.out.len())
    }

    fn flush(&mut self) -> Result<(), DriverError> {
        let Some(rs) = self.resampler.as_ref() else {
            return Ok(());
        };
        if self.chan_acc[0].is_empty() {
            return Ok(());
        }

        // rubato expects exact block sizes; pad the remainder with zeros.
        let in_max = rs.input_frames_max();
        let rem = self.chan_acc[0].len() % in_max;
        if rem != 0 {
            let target = self.chan_acc[0].len() + (in_max - rem);
            for chan in &mut self.chan_acc {
                chan.resize(target, 0.0);
            }
        }

        self.drain_resampler_blocks()
    }
}

fn encode_sample(sample: f32, format: SampleFormat, out: &mut VecDeque<u8>) {
    match format {
        SampleFormat::S16 => {
            let v = (sample.clamp(-1.0, 1.0) * 32_767.0).round() as i16;
            out.extend(v.to_le_bytes());
        }
        SampleFormat::F32 => {
            out.extend(sample.to_le_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s16(channels: u16, rate: u32) -> AudioFormat {
        AudioFormat::new(SampleFormat::S16, channels, rate)
    }

    fn frames_s16(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn pull_all(conv: &mut FormatConverter) -> Vec<u8> {
        let n = conv.available().unwrap();
        let mut out = vec![0u8; n];
        let pulled = conv.pull(&mut out).unwrap();
        assert_eq!(pulled, n);
        out
    }

    #[test]
    fn zero_byte_frame_formats_are_rejected() {
        let err = FormatConverter::new(s16(0, 44_100), s16(2, 44_100));
        assert!(err.is_err());
    }

    #[test]
    fn identity_format_streams_bytes_through_bit_exact() {
        let fmt = s16(2, 44_100);
        let mut conv = FormatConverter::new(fmt, fmt).unwrap();
        let bytes = frames_s16(&[100, -100, 32_767, -32_768]);

        conv.push(&bytes).unwrap();
        assert_eq!(conv.available().unwrap(), bytes.len());
        assert_eq!(pull_all(&mut conv), bytes);
    }

    #[test]
    fn sub_frame_remainder_is_carried_until_completed() {
        let mut conv = FormatConverter::new(s16(2, 44_100), s16(1, 44_100)).unwrap();
        let bytes = frames_s16(&[1_000, 3_000]);

        // Three of four frame bytes: nothing convertible yet.
        conv.push(&bytes[..3]).unwrap();
        assert_eq!(conv.available().unwrap(), 0);

        conv.push(&bytes[3..]).unwrap();
        assert_eq!(conv.available().unwrap(), 2);
    }

    #[test]
    fn stereo_downmix_averages_channels() {
        let mut conv = FormatConverter::new(s16(2, 44_100), s16(1, 44_100)).unwrap();
        conv.push(&frames_s16(&[1_000, 3_000, -2_000, 2_000])).unwrap();

        let out = pull_all(&mut conv);
        let samples: Vec<i16> = out
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();

        // (1000 + 3000) / 2 = 2000, (-2000 + 2000) / 2 = 0; within one LSB
        // of the decode/encode scaling.
        assert!((samples[0] - 2_000).abs() <= 1, "got {}", samples[0]);
        assert!(samples[1].abs() <= 1, "got {}", samples[1]);
    }

    #[test]
    fn mono_upmix_replicates_to_every_channel() {
        let mut conv = FormatConverter::new(s16(1, 44_100), s16(2, 44_100)).unwrap();
        conv.push(&frames_s16(&[5_000])).unwrap();

        let out = pull_all(&mut conv);
        let samples: Vec<i16> = out
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0], samples[1]);
        assert!((samples[0] - 5_000).abs() <= 1);
    }

    #[test]
    fn s16_to_f32_encodes_float_samples() {
        let mut conv = FormatConverter::new(
            s16(1, 44_100),
            AudioFormat::new(SampleFormat::F32, 1, 44_100),
        )
        .unwrap();
        conv.push(&frames_s16(&[16_384])).unwrap();

        let out = pull_all(&mut conv);
        assert_eq!(out.len(), 4);
        let v = f32::from_le_bytes([out[0], out[1], out[2], out[3]]);
        assert!((v - 0.5).abs() < 0.001, "got {v}");
    }

    #[test]
    fn resample_path_emits_nothing_until_a_full_block() {
        let mut conv = FormatConverter::new(s16(1, 22_050), s16(1, 44_100)).unwrap();
        conv.push(&frames_s16(&[100; 16])).unwrap();
        assert_eq!(conv.available().unwrap(), 0);
    }

    #[test]
    fn flush_emits_resampled_tail_roughly_doubling_frames() {
        let src_frames = 3_000usize;
        let mut conv = FormatConverter::new(s16(1, 22_050), s16(1, 44_100)).unwrap();
        conv.push(&frames_s16(&vec![1_000; src_frames])).unwrap();
        conv.flush().unwrap();

        let out_frames = conv.available().unwrap() / 2;
        // 22.05k -> 44.1k doubles the frame count; allow padding slack from
        // the block-aligned flush.
        assert!(out_frames >= src_frames * 2 - RESAMPLE_BLOCK_FRAMES);
        assert!(out_frames <= (src_frames + RESAMPLE_BLOCK_FRAMES) * 2 + RESAMPLE_BLOCK_FRAMES);
    }

    #[test]
    fn flush_without_resampler_is_a_noop() {
        let mut conv = FormatConverter::new(s16(2, 44_100), s16(1, 44_100)).unwrap();
        conv.flush().unwrap();
        conv.flush().unwrap();
        assert_eq!(conv.available().unwrap(), 0);
    }

    #[test]
    fn pull_returns_short_count_when_drained() {
        let fmt = s16(1, 44_100);
        let mut conv = FormatConverter::new(fmt, fmt).unwrap();
        conv.push(&frames_s16(&[7])).unwrap();

        let mut out = [0u8; 8];
        let pulled = conv.pull(&mut out).unwrap();
        assert_eq!(pulled, 2);
    }
}
